use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use client_core::{
    config::{load_settings, load_settings_from},
    CallClient, CallEvent, LocalIdentity,
};
use shared::domain::UserId;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::warn;

mod commands;
mod media;

use commands::{parse, Command, HELP};
use media::LoggingMediaEngine;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    user_id: i64,
    #[arg(long)]
    name: String,
    #[arg(long)]
    avatar: Option<String>,
    /// Overrides `server_url` from the settings file.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = match args.config.as_deref() {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }

    let mut identity = LocalIdentity::new(UserId(args.user_id), args.name);
    if let Some(avatar) = args.avatar {
        identity = identity.with_avatar(avatar);
    }

    let client = CallClient::connect(identity, &settings, Arc::new(LoggingMediaEngine::new()))?;
    client.start().await;
    println!(
        "signed in as user {} ({}); presence {}. Type 'help' for commands.",
        client.user_id(),
        client.identity().display_name,
        client.presence().current()
    );

    let printer = tokio::spawn(print_call_events(Arc::clone(&client)));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(err) = run(&client, command).await {
            println!("error: {err}");
        }
    }

    client.shutdown().await;
    printer.abort();
    Ok(())
}

async fn run(client: &Arc<CallClient>, command: Command) -> Result<()> {
    match command {
        Command::Call {
            conversation_id,
            kind,
            participants,
        } => {
            let session = client.start_call(conversation_id, kind, participants).await?;
            println!("calling in conversation {} (session {})", conversation_id, session.id);
        }
        Command::Accept {
            conversation_id,
            camera,
        } => {
            client.accept_call(conversation_id, true, camera).await?;
        }
        Command::Decline(conversation_id) => client.decline_call(conversation_id).await?,
        Command::HangUp(conversation_id) => client.hang_up(conversation_id).await?,
        Command::Watch(conversation_id) => client.watch_conversation(conversation_id).await?,
        Command::Unwatch(conversation_id) => client.unwatch_conversation(conversation_id).await,
        Command::Status(status) => {
            client.set_status(status).await?;
            println!("presence is now {}", client.presence().current());
        }
        Command::Restore => {
            let status = client.restore_status().await?;
            println!("presence restored to {status}");
        }
        Command::Mic(enabled) => client.set_microphone(enabled).await?,
        Command::Cam(enabled) => client.set_camera(enabled).await?,
        Command::Screen(enabled) => client.set_screen_share(enabled).await?,
        Command::Show => {
            let state = client.sessions().state();
            println!(
                "presence {} | link {:?} | session {:?} in {:?}",
                client.presence().current(),
                client.connection_state(),
                state.phase,
                state.active_conversation()
            );
            if let Some(session) = state.session {
                for participant in session.participants.values() {
                    println!(
                        "  {} mic={} cam={} speaking={}",
                        participant.identity,
                        participant.mic_enabled,
                        participant.cam_enabled,
                        participant.speaking
                    );
                }
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

async fn print_call_events(client: Arc<CallClient>) {
    let mut events = client.subscribe_call_events();
    loop {
        match events.recv().await {
            Ok(CallEvent::Ringing(invite)) => println!(
                "incoming {kind} call from {caller} (accept {id} / decline {id})",
                kind = invite.kind.as_str(),
                caller = invite.caller_name,
                id = invite.conversation_id
            ),
            Ok(CallEvent::Connected {
                conversation_id,
                kind,
            }) => println!("connected to {} call in conversation {conversation_id}", kind.as_str()),
            Ok(CallEvent::ParticipantAccepted {
                conversation_id,
                user_id,
            }) => println!("user {user_id} joined conversation {conversation_id}"),
            Ok(CallEvent::Ended {
                conversation_id,
                reason,
            }) => println!("call in conversation {conversation_id} ended: {reason:?}"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "desktop: missed call events"),
            Err(RecvError::Closed) => break,
        }
    }
}

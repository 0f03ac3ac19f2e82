use std::sync::Arc;

use anyhow::Result;
use livekit_integration::MediaEngine;
use shared::{
    domain::{CallKind, ConversationId, PresenceStatus, Topic, UserId},
    protocol::{PresenceUpdatePayload, SignalPayload, SignalType},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

pub mod alert_gate;
pub mod call_signaling;
pub mod config;
pub mod error;
pub mod presence;
pub mod presence_store;
pub mod session_manager;
pub mod signal_channel;
pub mod token;
pub mod transport;
pub mod types;

pub use alert_gate::CallAlertGate;
pub use call_signaling::{CallEvent, CallPhase, CallSignaling, EndReason};
pub use config::ClientSettings;
pub use error::{CallError, JoinError, PresenceError, SessionError, SignalError};
pub use presence::{PresenceRecord, PresenceStack};
pub use presence_store::{HttpPresenceStore, InMemoryPresenceStore, PresenceStore};
pub use session_manager::SessionManager;
pub use signal_channel::{ConnectionState, SignalChannel};
pub use token::{HttpTokenProvider, MissingTokenProvider, TokenProvider, TokenRequest};
pub use transport::{MemoryHub, ReconnectPolicy, SignalTransport, WsSignalTransport};
pub use types::{CallInvite, CallSession, JoinRequest, LocalIdentity, SessionPhase, SessionState};

pub struct CallClientDependencies {
    pub transport: Arc<dyn SignalTransport>,
    pub tokens: Arc<dyn TokenProvider>,
    pub engine: Arc<dyn MediaEngine>,
    pub presence_store: Arc<dyn PresenceStore>,
}

pub struct CallClient {
    identity: LocalIdentity,
    presence: Arc<PresenceStack>,
    signals: Arc<SignalChannel>,
    sessions: Arc<SessionManager>,
    calls: Arc<CallSignaling>,
    presence_task: Mutex<Option<JoinHandle<()>>>,
}

impl CallClient {
    pub fn new(
        identity: LocalIdentity,
        settings: &ClientSettings,
        deps: CallClientDependencies,
    ) -> Arc<Self> {
        let presence = Arc::new(PresenceStack::new(identity.user_id, deps.presence_store));
        let signals = SignalChannel::new(
            identity.user_id,
            deps.transport,
            settings.dedup_window(),
        );
        let sessions = SessionManager::new(
            identity.clone(),
            deps.tokens,
            deps.engine,
            Arc::clone(&signals),
            settings.token_timeout(),
        );
        let calls = CallSignaling::new(
            Arc::clone(&signals),
            Arc::clone(&sessions),
            CallAlertGate::new(Arc::clone(&presence)),
            settings.ring_timeout(),
        );

        Arc::new(Self {
            identity,
            presence,
            signals,
            sessions,
            calls,
            presence_task: Mutex::new(None),
        })
    }

    /// Talks to the relay, token and presence endpoints under
    /// `settings.server_url`. Must be called inside a tokio runtime.
    pub fn connect(
        identity: LocalIdentity,
        settings: &ClientSettings,
        engine: Arc<dyn MediaEngine>,
    ) -> Result<Arc<Self>> {
        let transport = WsSignalTransport::spawn(
            &settings.server_url,
            identity.user_id,
            ReconnectPolicy {
                initial_delay: settings.reconnect_delay(),
                max_delay: settings.reconnect_max_delay(),
            },
        )?;
        Ok(Self::new(
            identity,
            settings,
            CallClientDependencies {
                transport,
                tokens: Arc::new(HttpTokenProvider::new(settings.server_url.clone())),
                engine,
                presence_store: Arc::new(HttpPresenceStore::new(settings.server_url.clone())),
            },
        ))
    }

    pub async fn start(self: &Arc<Self>) {
        match self.presence.hydrate().await {
            Ok(status) => info!(user_id = self.identity.user_id.0, %status, "client: presence loaded"),
            Err(err) => warn!(error = %err, "client: keeping default presence"),
        }

        {
            let mut task = self.presence_task.lock().await;
            if task.is_none() {
                let mut updates = self.signals.subscribe(SignalType::PresenceUpdate).await;
                let presence = Arc::clone(&self.presence);
                let user_id = self.identity.user_id;
                *task = Some(tokio::spawn(async move {
                    while let Some(event) = updates.recv().await {
                        let SignalPayload::PresenceUpdate(update) = event.signal else {
                            continue;
                        };
                        if update.user_id != user_id {
                            debug!(user_id = update.user_id.0, "client: ignoring presence for another user");
                            continue;
                        }
                        presence.apply_remote(update.status);
                    }
                }));
            }
        }

        self.signals.start().await;
        self.calls.start().await;
    }

    pub async fn shutdown(&self) {
        self.sessions.leave().await;
        self.calls.shutdown().await;
        if let Some(task) = self.presence_task.lock().await.take() {
            task.abort();
        }
        self.signals.shutdown().await;
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    pub fn presence(&self) -> &Arc<PresenceStack> {
        &self.presence
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn calls(&self) -> &Arc<CallSignaling> {
        &self.calls
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.signals.connection_state()
    }

    pub fn subscribe_call_events(&self) -> broadcast::Receiver<CallEvent> {
        self.calls.subscribe_events()
    }

    pub fn session_updates(&self) -> WatchStream<SessionState> {
        WatchStream::new(self.sessions.subscribe())
    }

    /// Changes local status and tells the user's other devices. A persist
    /// failure is returned after the change has already been announced.
    pub async fn set_status(&self, status: PresenceStatus) -> Result<(), PresenceError> {
        let before = self.presence.current();
        let result = self.presence.set_status(status).await;
        if self.presence.current() != before {
            self.announce_presence().await;
        }
        result
    }

    pub async fn restore_status(&self) -> Result<PresenceStatus, PresenceError> {
        let before = self.presence.current();
        let result = self.presence.restore().await;
        if self.presence.current() != before {
            self.announce_presence().await;
        }
        result
    }

    pub async fn watch_conversation(&self, conversation_id: ConversationId) -> Result<(), SignalError> {
        self.signals
            .join_topic(Topic::Conversation(conversation_id))
            .await
    }

    pub async fn unwatch_conversation(&self, conversation_id: ConversationId) {
        self.signals
            .leave_topic(Topic::Conversation(conversation_id))
            .await
    }

    pub async fn start_call(
        &self,
        conversation_id: ConversationId,
        kind: CallKind,
        participant_ids: Vec<UserId>,
    ) -> Result<CallSession, CallError> {
        self.calls
            .start_call(conversation_id, kind, participant_ids)
            .await
    }

    pub async fn accept_call(
        &self,
        conversation_id: ConversationId,
        mic_on: bool,
        cam_on: bool,
    ) -> Result<CallSession, CallError> {
        self.calls.accept(conversation_id, mic_on, cam_on).await
    }

    pub async fn decline_call(&self, conversation_id: ConversationId) -> Result<(), CallError> {
        self.calls.decline(conversation_id).await
    }

    pub async fn hang_up(&self, conversation_id: ConversationId) -> Result<(), CallError> {
        self.calls.hang_up(conversation_id).await
    }

    pub async fn set_microphone(&self, enabled: bool) -> Result<(), SessionError> {
        self.sessions.set_microphone(enabled).await
    }

    pub async fn set_camera(&self, enabled: bool) -> Result<(), SessionError> {
        self.sessions.set_camera(enabled).await
    }

    pub async fn set_screen_share(&self, enabled: bool) -> Result<(), SessionError> {
        self.sessions.set_screen_share(enabled).await
    }

    async fn announce_presence(&self) {
        let update = SignalPayload::PresenceUpdate(PresenceUpdatePayload {
            user_id: self.identity.user_id,
            status: self.presence.current(),
        });
        if let Err(err) = self
            .signals
            .publish(&[Topic::User(self.identity.user_id)], update)
            .await
        {
            warn!(error = %err, "client: presence change not shared with other devices");
        }
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

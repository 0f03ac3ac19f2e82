use anyhow::{anyhow, bail, Result};
use shared::domain::{CallKind, ConversationId, PresenceStatus, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Call {
        conversation_id: ConversationId,
        kind: CallKind,
        participants: Vec<UserId>,
    },
    Accept {
        conversation_id: ConversationId,
        camera: bool,
    },
    Decline(ConversationId),
    Watch(ConversationId),
    Unwatch(ConversationId),
    HangUp(ConversationId),
    Status(PresenceStatus),
    Restore,
    Mic(bool),
    Cam(bool),
    Screen(bool),
    Show,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  call <conversation> <voice|video> <user>...   start a call
  accept <conversation> [video]                 answer a ringing call
  decline <conversation>                        reject a ringing call
  hangup <conversation>                         leave a connected call
  watch|unwatch <conversation>                  follow a conversation's call signals
  status <online|idle|dnd|invisible|offline>    change presence
  restore                                       return to the previous presence
  mic|cam|screen <on|off>                       toggle a local track
  show                                          print session and presence
  quit";

pub fn parse(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        bail!("empty command");
    };
    let rest: Vec<&str> = words.collect();

    let command = match verb.to_ascii_lowercase().as_str() {
        "call" => {
            let [conversation, kind, users @ ..] = rest.as_slice() else {
                bail!("usage: call <conversation> <voice|video> <user>...");
            };
            let kind = match *kind {
                "voice" => CallKind::Voice,
                "video" => CallKind::Video,
                other => bail!("unknown call kind '{other}'"),
            };
            let participants = users
                .iter()
                .map(|raw| parse_id(raw).map(UserId))
                .collect::<Result<Vec<_>>>()?;
            Command::Call {
                conversation_id: ConversationId(parse_id(conversation)?),
                kind,
                participants,
            }
        }
        "accept" => match rest.as_slice() {
            [conversation] => Command::Accept {
                conversation_id: ConversationId(parse_id(conversation)?),
                camera: false,
            },
            [conversation, "video"] => Command::Accept {
                conversation_id: ConversationId(parse_id(conversation)?),
                camera: true,
            },
            _ => bail!("usage: accept <conversation> [video]"),
        },
        "decline" => Command::Decline(ConversationId(single_id(&rest)?)),
        "hangup" => Command::HangUp(ConversationId(single_id(&rest)?)),
        "watch" => Command::Watch(ConversationId(single_id(&rest)?)),
        "unwatch" => Command::Unwatch(ConversationId(single_id(&rest)?)),
        "status" => {
            let [raw] = rest.as_slice() else {
                bail!("usage: status <online|idle|dnd|invisible|offline>");
            };
            Command::Status(
                PresenceStatus::parse(raw).ok_or_else(|| anyhow!("unknown status '{raw}'"))?,
            )
        }
        "restore" => Command::Restore,
        "mic" => Command::Mic(switch(&rest)?),
        "cam" => Command::Cam(switch(&rest)?),
        "screen" => Command::Screen(switch(&rest)?),
        "show" => Command::Show,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command '{other}'; try 'help'"),
    };
    Ok(command)
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| anyhow!("'{raw}' is not a numeric id"))
}

fn single_id(rest: &[&str]) -> Result<i64> {
    match rest {
        [raw] => parse_id(raw),
        _ => bail!("expected exactly one conversation id"),
    }
}

fn switch(rest: &[&str]) -> Result<bool> {
    match rest {
        ["on"] => Ok(true),
        ["off"] => Ok(false),
        _ => bail!("expected 'on' or 'off'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_group_call() {
        assert_eq!(
            parse("call 4 video 2 3").expect("parse"),
            Command::Call {
                conversation_id: ConversationId(4),
                kind: CallKind::Video,
                participants: vec![UserId(2), UserId(3)],
            }
        );
    }

    #[test]
    fn parses_status_and_toggles() {
        assert_eq!(
            parse("status DND").expect("parse"),
            Command::Status(PresenceStatus::Dnd)
        );
        assert_eq!(parse("mic off").expect("parse"), Command::Mic(false));
        assert_eq!(
            parse("watch 12").expect("parse"),
            Command::Watch(ConversationId(12))
        );
        assert_eq!(
            parse("accept 9 video").expect("parse"),
            Command::Accept {
                conversation_id: ConversationId(9),
                camera: true
            }
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("").is_err());
        assert!(parse("call x voice 2").is_err());
        assert!(parse("call 1 audio 2").is_err());
        assert!(parse("cam maybe").is_err());
        assert!(parse("hangup").is_err());
        assert!(parse("dance").is_err());
    }
}

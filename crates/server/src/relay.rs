use std::collections::HashSet;

use shared::{
    domain::{Topic, UserId},
    error::{ApiError, ErrorCode},
    protocol::{ClientFrame, ServerFrame, SignalEvent},
};
use tokio::sync::broadcast;
use tracing::debug;

pub(crate) type RelayMessage = (Topic, SignalEvent);

/// Topic fan-out shared by every socket. Delivery is at-most-once; a
/// receiver that lags past the buffer loses the oldest frames.
#[derive(Clone)]
pub(crate) struct Relay {
    tx: broadcast::Sender<RelayMessage>,
}

impl Relay {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RelayMessage> {
        self.tx.subscribe()
    }

    /// Returns how many distinct topics the event went out on.
    pub(crate) fn publish(&self, targets: &[Topic], event: &SignalEvent) -> usize {
        let mut seen = HashSet::new();
        for topic in targets {
            if seen.insert(*topic) {
                // No receivers is fine; nobody is listening on that topic.
                let _ = self.tx.send((*topic, event.clone()));
            }
        }
        seen.len()
    }
}

/// Per-socket subscription set. A socket may only listen on its own user
/// topic and on conversation topics.
pub(crate) struct ConnectionTopics {
    user_id: UserId,
    topics: HashSet<Topic>,
}

impl ConnectionTopics {
    pub(crate) fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            topics: HashSet::new(),
        }
    }

    pub(crate) fn wants(&self, topic: &Topic) -> bool {
        self.topics.contains(topic)
    }

    /// Applies one client frame; the returned frame, if any, goes back to
    /// the same socket.
    pub(crate) fn apply(&mut self, relay: &Relay, frame: ClientFrame) -> Option<ServerFrame> {
        match frame {
            ClientFrame::Subscribe { topic } => {
                if let Topic::User(owner) = topic {
                    if owner != self.user_id {
                        return Some(rejection(format!(
                            "cannot subscribe to another user's topic ({owner})"
                        )));
                    }
                }
                self.topics.insert(topic);
                debug!(user_id = self.user_id.0, %topic, "relay: subscribed");
                None
            }
            ClientFrame::Unsubscribe { topic } => {
                self.topics.remove(&topic);
                debug!(user_id = self.user_id.0, %topic, "relay: unsubscribed");
                None
            }
            ClientFrame::Publish { targets, event } => {
                if event.sender_id != self.user_id {
                    return Some(rejection("sender does not match the connection"));
                }
                let fanned = relay.publish(&targets, &event);
                debug!(
                    user_id = self.user_id.0,
                    signal = event.signal_type().as_str(),
                    topics = fanned,
                    "relay: published"
                );
                None
            }
        }
    }
}

fn rejection(message: impl Into<String>) -> ServerFrame {
    ServerFrame::Error(ApiError::new(ErrorCode::Validation, message))
}

#[cfg(test)]
#[path = "tests/relay_tests.rs"]
mod tests;

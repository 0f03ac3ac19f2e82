use std::sync::Arc;

use shared::domain::{PresenceStatus, UserId};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{error::PresenceError, presence_store::PresenceStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub current: PresenceStatus,
    pub previous: Option<PresenceStatus>,
    pub custom_message: Option<String>,
}

impl PresenceRecord {
    pub fn new(current: PresenceStatus) -> Self {
        Self {
            current,
            previous: None,
            custom_message: None,
        }
    }

    /// Leaving a non-offline status remembers it; leaving offline does not, so
    /// `restore` survives any number of offline/online cycles.
    pub fn apply(&mut self, next: PresenceStatus) -> bool {
        if self.current == next {
            return false;
        }
        if self.current != PresenceStatus::Offline {
            self.previous = Some(self.current);
        }
        self.current = next;
        true
    }
}

pub struct PresenceStack {
    user_id: UserId,
    store: Arc<dyn PresenceStore>,
    record: watch::Sender<PresenceRecord>,
}

impl PresenceStack {
    pub fn new(user_id: UserId, store: Arc<dyn PresenceStore>) -> Self {
        Self::with_initial(user_id, store, PresenceStatus::Online)
    }

    pub fn with_initial(
        user_id: UserId,
        store: Arc<dyn PresenceStore>,
        initial: PresenceStatus,
    ) -> Self {
        let (record, _) = watch::channel(PresenceRecord::new(initial));
        Self {
            user_id,
            store,
            record,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn current(&self) -> PresenceStatus {
        self.record.borrow().current
    }

    pub fn previous(&self) -> Option<PresenceStatus> {
        self.record.borrow().previous
    }

    pub fn record(&self) -> PresenceRecord {
        self.record.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceRecord> {
        self.record.subscribe()
    }

    pub async fn hydrate(&self) -> Result<PresenceStatus, PresenceError> {
        let stored = self
            .store
            .read_status(self.user_id)
            .await
            .map_err(|source| PresenceError::Read {
                user_id: self.user_id.0,
                source,
            })?;

        if let Some(status) = stored {
            self.record.send_if_modified(|record| {
                let changed = record.current != status;
                record.current = status;
                changed
            });
            debug!(user_id = self.user_id.0, %status, "presence: hydrated from store");
        }
        Ok(self.current())
    }

    // A store failure is reported but the in-memory transition stands.
    pub async fn set_status(&self, status: PresenceStatus) -> Result<(), PresenceError> {
        let mut from = None;
        let changed = self.record.send_if_modified(|record| {
            from = Some(record.current);
            record.apply(status)
        });
        if !changed {
            return Ok(());
        }

        info!(
            user_id = self.user_id.0,
            from = ?from,
            to = %status,
            previous = ?self.previous(),
            "presence: status changed"
        );

        self.store
            .write_status(self.user_id, status)
            .await
            .map_err(|source| PresenceError::Persist {
                user_id: self.user_id.0,
                source,
            })
    }

    pub async fn restore(&self) -> Result<PresenceStatus, PresenceError> {
        let Some(previous) = self.previous() else {
            return Ok(self.current());
        };
        self.set_status(previous).await?;
        Ok(self.current())
    }

    pub fn apply_remote(&self, status: PresenceStatus) -> bool {
        let changed = self.record.send_if_modified(|record| record.apply(status));
        if changed {
            debug!(user_id = self.user_id.0, %status, "presence: adopted status from another device");
        }
        changed
    }

    pub fn set_custom_message(&self, message: Option<String>) {
        self.record.send_if_modified(|record| {
            if record.custom_message == message {
                return false;
            }
            record.custom_message = message;
            true
        });
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;

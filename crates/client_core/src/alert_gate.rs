use std::sync::Arc;

use shared::domain::PresenceStatus;
use tracing::debug;

use crate::{presence::PresenceStack, types::CallInvite};

/// Whether an incoming call should ring locally given the status at arrival time.
pub fn should_surface(status: PresenceStatus, invite: &CallInvite) -> bool {
    if status == PresenceStatus::Dnd {
        debug!(
            conversation_id = invite.conversation_id.0,
            caller_id = invite.caller_id.0,
            "alert: suppressed incoming call while dnd"
        );
        return false;
    }
    true
}

#[derive(Clone)]
pub struct CallAlertGate {
    presence: Arc<PresenceStack>,
}

impl CallAlertGate {
    pub fn new(presence: Arc<PresenceStack>) -> Self {
        Self { presence }
    }

    pub fn surface_alert(&self, invite: &CallInvite) -> bool {
        should_surface(self.presence.current(), invite)
    }
}

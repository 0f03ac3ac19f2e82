use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{CallKind, ConversationId, Topic, UserId},
    protocol::{CallStartPayload, CallStatePayload, SignalEvent, SignalPayload, SignalType},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    alert_gate::CallAlertGate,
    error::CallError,
    session_manager::SessionManager,
    signal_channel::SignalChannel,
    types::{call_topics, CallInvite, CallSession, JoinRequest, LocalIdentity, SessionPhase},
};

pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    NoCall,
    Ringing,
    Connected,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LocalHangUp,
    LocalDecline,
    RemoteDeclined,
    RemoteEnded,
    AnsweredElsewhere,
    DeclinedElsewhere,
    Missed,
    Switched,
    SessionClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Ringing(CallInvite),
    Connected {
        conversation_id: ConversationId,
        kind: CallKind,
    },
    ParticipantAccepted {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    Ended {
        conversation_id: ConversationId,
        reason: EndReason,
    },
}

struct ConversationCall {
    phase: CallPhase,
    kind: CallKind,
    caller_id: UserId,
    peers: Vec<UserId>,
    ring_seq: u64,
    joining: bool,
    accepted_while_joining: Vec<UserId>,
}

pub struct CallSignaling {
    identity: LocalIdentity,
    signals: Arc<SignalChannel>,
    sessions: Arc<SessionManager>,
    gate: CallAlertGate,
    ring_timeout: Duration,
    calls: Mutex<HashMap<ConversationId, ConversationCall>>,
    ring_seq: AtomicU64,
    events: broadcast::Sender<CallEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CallSignaling {
    pub fn new(
        signals: Arc<SignalChannel>,
        sessions: Arc<SessionManager>,
        gate: CallAlertGate,
        ring_timeout: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            identity: sessions.identity().clone(),
            signals,
            sessions,
            gate,
            ring_timeout,
            calls: Mutex::new(HashMap::new()),
            ring_seq: AtomicU64::new(0),
            events,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self, conversation_id: ConversationId) -> CallPhase {
        self.calls
            .lock()
            .await
            .get(&conversation_id)
            .map(|call| call.phase)
            .unwrap_or(CallPhase::NoCall)
    }

    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        let mut signals = self
            .signals
            .subscribe_all(&SignalType::CALL_LIFECYCLE)
            .await;
        let machine = Arc::downgrade(self);
        tasks.push(tokio::spawn(async move {
            while let Some(event) = signals.recv().await {
                let Some(machine) = machine.upgrade() else {
                    break;
                };
                machine.handle_signal(event).await;
            }
        }));

        let mut session = self.sessions.subscribe();
        let machine = Arc::downgrade(self);
        tasks.push(tokio::spawn(async move {
            while session.changed().await.is_ok() {
                let Some(machine) = machine.upgrade() else {
                    break;
                };
                machine.reconcile_with_session().await;
            }
        }));
    }

    pub async fn shutdown(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    pub async fn start_call(
        &self,
        conversation_id: ConversationId,
        kind: CallKind,
        participant_ids: Vec<UserId>,
    ) -> Result<CallSession, CallError> {
        match self.phase(conversation_id).await {
            CallPhase::Ringing => {
                return self
                    .accept(conversation_id, true, kind == CallKind::Video)
                    .await
            }
            CallPhase::Connected => return Err(CallError::AlreadyInCall(conversation_id)),
            CallPhase::NoCall | CallPhase::Ended => {}
        }

        let local = self.identity.user_id;
        let mut peers = participant_ids;
        peers.sort();
        peers.dedup();
        peers.retain(|user_id| *user_id != local);

        // Tracked before ringing anyone so answers that beat our own join
        // still land on this call.
        let call_seq = self.ring_seq.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut calls = self.calls.lock().await;
            if calls.contains_key(&conversation_id) {
                return Err(CallError::AlreadyInCall(conversation_id));
            }
            calls.insert(
                conversation_id,
                ConversationCall {
                    phase: CallPhase::Connected,
                    kind,
                    caller_id: local,
                    peers: peers.clone(),
                    ring_seq: call_seq,
                    joining: true,
                    accepted_while_joining: Vec::new(),
                },
            );
        }

        let topics = call_topics(local, conversation_id, &peers);
        let started = self
            .signals
            .publish(
                &topics,
                SignalPayload::CallStart(CallStartPayload {
                    conversation_id,
                    kind,
                    caller_id: local,
                    caller_name: self.identity.display_name.clone(),
                    caller_avatar: self.identity.avatar.clone(),
                    participant_ids: peers.clone(),
                }),
            )
            .await;
        if let Err(err) = started {
            self.forget_call(conversation_id, call_seq).await;
            return Err(err.into());
        }

        let request = JoinRequest::new(conversation_id, kind).as_initiator(peers.clone());
        let session = match self.sessions.join(request).await {
            Ok(session) => session,
            Err(err) => {
                self.forget_call(conversation_id, call_seq).await;
                warn!(
                    conversation_id = conversation_id.0,
                    error = %err,
                    "call: failed to join own call; cancelling ring"
                );
                let ended = SignalPayload::CallEnded(CallStatePayload {
                    conversation_id,
                    kind,
                });
                if let Err(err) = self.signals.publish(&topics, ended).await {
                    warn!(conversation_id = conversation_id.0, error = %err, "call: failed to cancel ring");
                }
                return Err(err.into());
            }
        };

        let early_accepts = {
            let mut calls = self.calls.lock().await;
            match calls.get_mut(&conversation_id) {
                Some(call) if call.joining && call.ring_seq == call_seq => {
                    call.joining = false;
                    Some(std::mem::take(&mut call.accepted_while_joining))
                }
                _ => None,
            }
        };
        let Some(early_accepts) = early_accepts else {
            warn!(
                conversation_id = conversation_id.0,
                "call: ended while the caller was still joining; leaving"
            );
            if self.sessions.active_conversation() == Some(conversation_id) {
                self.sessions.leave().await;
            }
            return Err(CallError::CallEnded(conversation_id));
        };

        info!(
            conversation_id = conversation_id.0,
            kind = kind.as_str(),
            invitees = peers.len(),
            "call: started"
        );
        let _ = self.events.send(CallEvent::Connected {
            conversation_id,
            kind,
        });
        for user_id in early_accepts {
            let _ = self.events.send(CallEvent::ParticipantAccepted {
                conversation_id,
                user_id,
            });
        }
        Ok(session)
    }

    async fn forget_call(&self, conversation_id: ConversationId, call_seq: u64) {
        let mut calls = self.calls.lock().await;
        if calls
            .get(&conversation_id)
            .is_some_and(|call| call.ring_seq == call_seq)
        {
            calls.remove(&conversation_id);
        }
    }

    pub async fn accept(
        &self,
        conversation_id: ConversationId,
        mic_on: bool,
        cam_on: bool,
    ) -> Result<CallSession, CallError> {
        let (kind, peers, ring_seq) = {
            let calls = self.calls.lock().await;
            match calls.get(&conversation_id) {
                Some(call) if call.phase == CallPhase::Ringing => {
                    (call.kind, call.peers.clone(), call.ring_seq)
                }
                _ => return Err(CallError::NoPendingCall(conversation_id)),
            }
        };

        let request = JoinRequest::new(conversation_id, kind).with_media(mic_on, cam_on);
        let session = self.sessions.join(request).await?;

        let still_ringing = {
            let mut calls = self.calls.lock().await;
            match calls.get_mut(&conversation_id) {
                Some(call) if call.phase == CallPhase::Ringing && call.ring_seq == ring_seq => {
                    call.phase = CallPhase::Connected;
                    true
                }
                _ => false,
            }
        };
        if !still_ringing {
            warn!(
                conversation_id = conversation_id.0,
                "call: ended while the local join was in flight; leaving"
            );
            if self.sessions.active_conversation() == Some(conversation_id) {
                self.sessions.leave_without_signal().await;
            }
            return Err(CallError::CallEnded(conversation_id));
        }

        let topics = call_topics(self.identity.user_id, conversation_id, &peers);
        let accepted = SignalPayload::CallAccepted(CallStatePayload {
            conversation_id,
            kind,
        });
        if let Err(err) = self.signals.publish(&topics, accepted).await {
            warn!(conversation_id = conversation_id.0, error = %err, "call: failed to announce accept");
        }

        info!(conversation_id = conversation_id.0, "call: accepted");
        let _ = self.events.send(CallEvent::Connected {
            conversation_id,
            kind,
        });
        Ok(session)
    }

    pub async fn decline(&self, conversation_id: ConversationId) -> Result<(), CallError> {
        let call = {
            let mut calls = self.calls.lock().await;
            match calls.get(&conversation_id) {
                Some(call) if call.phase == CallPhase::Ringing => calls.remove(&conversation_id),
                _ => None,
            }
        };
        let Some(call) = call else {
            return Err(CallError::NoPendingCall(conversation_id));
        };

        info!(conversation_id = conversation_id.0, "call: declined");
        let _ = self.events.send(CallEvent::Ended {
            conversation_id,
            reason: EndReason::LocalDecline,
        });

        // Only the caller and our other devices hear about a decline.
        let local = self.identity.user_id;
        let mut targets = vec![Topic::User(local)];
        if call.caller_id != local {
            targets.push(Topic::User(call.caller_id));
        }
        let declined = SignalPayload::CallDeclined(CallStatePayload {
            conversation_id,
            kind: call.kind,
        });
        if let Err(err) = self.signals.publish(&targets, declined).await {
            warn!(conversation_id = conversation_id.0, error = %err, "call: failed to announce decline");
        }
        Ok(())
    }

    pub async fn hang_up(&self, conversation_id: ConversationId) -> Result<(), CallError> {
        let call = {
            let mut calls = self.calls.lock().await;
            match calls.get(&conversation_id) {
                Some(call) if call.phase == CallPhase::Connected => calls.remove(&conversation_id),
                _ => None,
            }
        };
        if call.is_none() {
            return Err(CallError::NotInCall(conversation_id));
        }

        if self.sessions.active_conversation() == Some(conversation_id) {
            self.sessions.leave().await;
        }
        info!(conversation_id = conversation_id.0, "call: hung up");
        let _ = self.events.send(CallEvent::Ended {
            conversation_id,
            reason: EndReason::LocalHangUp,
        });
        Ok(())
    }

    async fn handle_signal(self: &Arc<Self>, event: SignalEvent) {
        let SignalEvent {
            sender_id,
            timestamp,
            signal,
            ..
        } = event;

        match signal {
            SignalPayload::CallStart(payload) => {
                self.on_call_start(sender_id, timestamp, payload).await
            }
            SignalPayload::CallAccepted(payload) => self.on_call_accepted(sender_id, payload).await,
            SignalPayload::CallDeclined(payload) => {
                self.on_remote_end(sender_id, payload, true).await
            }
            SignalPayload::CallEnded(payload) => {
                self.on_remote_end(sender_id, payload, false).await
            }
            SignalPayload::PresenceUpdate(_) => {}
        }
    }

    async fn on_call_start(
        self: &Arc<Self>,
        sender_id: UserId,
        sent_at: DateTime<Utc>,
        payload: CallStartPayload,
    ) {
        let local = self.identity.user_id;
        let conversation_id = payload.conversation_id;
        if payload.caller_id == local || sender_id == local {
            debug!(conversation_id = conversation_id.0, "call: ignoring self-initiated call start");
            return;
        }
        if self.sessions.active_conversation() == Some(conversation_id) {
            debug!(conversation_id = conversation_id.0, "call: already in this conversation's room");
            return;
        }

        let invite = CallInvite::from_signal(&payload, sent_at);
        let ring_seq = self.ring_seq.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut calls = self.calls.lock().await;
            if calls.contains_key(&conversation_id) {
                debug!(conversation_id = conversation_id.0, "call: ignoring repeated call start");
                return;
            }
            if !self.gate.surface_alert(&invite) {
                return;
            }
            calls.insert(
                conversation_id,
                ConversationCall {
                    phase: CallPhase::Ringing,
                    kind: invite.kind,
                    caller_id: invite.caller_id,
                    peers: invite.peers_of(local),
                    ring_seq,
                    joining: false,
                    accepted_while_joining: Vec::new(),
                },
            );
        }

        info!(
            conversation_id = conversation_id.0,
            caller_id = invite.caller_id.0,
            kind = invite.kind.as_str(),
            "call: ringing"
        );
        let _ = self.events.send(CallEvent::Ringing(invite));
        self.spawn_ring_timeout(conversation_id, ring_seq);
    }

    async fn on_call_accepted(&self, sender_id: UserId, payload: CallStatePayload) {
        let conversation_id = payload.conversation_id;
        let mut calls = self.calls.lock().await;

        if sender_id == self.identity.user_id {
            let answered_here = calls
                .get(&conversation_id)
                .is_some_and(|call| call.phase != CallPhase::Ringing);
            if answered_here || calls.remove(&conversation_id).is_none() {
                return;
            }
            drop(calls);
            info!(conversation_id = conversation_id.0, "call: answered on another device");
            let _ = self.events.send(CallEvent::Ended {
                conversation_id,
                reason: EndReason::AnsweredElsewhere,
            });
            return;
        }

        let Some(call) = calls.get_mut(&conversation_id) else {
            return;
        };
        if call.phase != CallPhase::Connected {
            return;
        }
        if !call.peers.contains(&sender_id) {
            call.peers.push(sender_id);
        }
        if call.joining {
            if !call.accepted_while_joining.contains(&sender_id) {
                call.accepted_while_joining.push(sender_id);
            }
            return;
        }
        drop(calls);

        info!(
            conversation_id = conversation_id.0,
            user_id = sender_id.0,
            "call: participant accepted"
        );
        let _ = self.events.send(CallEvent::ParticipantAccepted {
            conversation_id,
            user_id: sender_id,
        });
    }

    async fn on_remote_end(&self, sender_id: UserId, payload: CallStatePayload, declined: bool) {
        let conversation_id = payload.conversation_id;
        let call = self.calls.lock().await.remove(&conversation_id);
        let Some(call) = call else {
            return;
        };

        let from_own_device = sender_id == self.identity.user_id;
        let reason = match (declined, from_own_device, call.phase) {
            (true, true, CallPhase::Ringing) => EndReason::DeclinedElsewhere,
            (true, _, _) => EndReason::RemoteDeclined,
            (false, _, _) => EndReason::RemoteEnded,
        };

        if call.phase == CallPhase::Connected
            && !call.joining
            && self.sessions.active_conversation() == Some(conversation_id)
        {
            self.sessions.leave_without_signal().await;
        }

        info!(
            conversation_id = conversation_id.0,
            sender_id = sender_id.0,
            ?reason,
            "call: ended remotely"
        );
        let _ = self.events.send(CallEvent::Ended {
            conversation_id,
            reason,
        });
    }

    // Session state is read under the calls lock so a freshly inserted call
    // is never judged against an older snapshot.
    async fn reconcile_with_session(&self) {
        let (ended, active) = {
            let mut calls = self.calls.lock().await;
            let state = self.sessions.state();
            let active = match state.phase {
                SessionPhase::Idle => None,
                SessionPhase::Connected => state.active_conversation(),
                SessionPhase::Requesting | SessionPhase::Switching | SessionPhase::Leaving => {
                    return
                }
            };
            let ended: Vec<ConversationId> = calls
                .iter()
                .filter(|(id, call)| {
                    call.phase == CallPhase::Connected && !call.joining && Some(**id) != active
                })
                .map(|(id, _)| *id)
                .collect();
            for id in &ended {
                calls.remove(id);
            }
            (ended, active)
        };

        let reason = if active.is_some() {
            EndReason::Switched
        } else {
            EndReason::SessionClosed
        };
        for conversation_id in ended {
            info!(conversation_id = conversation_id.0, ?reason, "call: session moved on");
            let _ = self.events.send(CallEvent::Ended {
                conversation_id,
                reason,
            });
        }
    }

    fn spawn_ring_timeout(self: &Arc<Self>, conversation_id: ConversationId, ring_seq: u64) {
        let machine = Arc::downgrade(self);
        let timeout = self.ring_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(machine) = machine.upgrade() {
                machine.expire_ring(conversation_id, ring_seq).await;
            }
        });
    }

    async fn expire_ring(&self, conversation_id: ConversationId, ring_seq: u64) {
        {
            let mut calls = self.calls.lock().await;
            let unanswered = calls.get(&conversation_id).is_some_and(|call| {
                call.phase == CallPhase::Ringing && call.ring_seq == ring_seq
            });
            if !unanswered {
                return;
            }
            calls.remove(&conversation_id);
        }
        info!(conversation_id = conversation_id.0, "call: missed");
        let _ = self.events.send(CallEvent::Ended {
            conversation_id,
            reason: EndReason::Missed,
        });
    }
}

impl Drop for CallSignaling {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/call_signaling_tests.rs"]
mod tests;

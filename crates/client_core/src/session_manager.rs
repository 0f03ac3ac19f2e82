use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use livekit_integration::{
    room_name_for_conversation, MediaConnectOptions, MediaEngine, MediaEvent, TrackSource,
};
use shared::{
    domain::ConversationId,
    protocol::{CallStatePayload, SignalPayload},
};
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{JoinError, SessionError},
    signal_channel::SignalChannel,
    token::{TokenProvider, TokenRequest},
    types::{
        call_topics, CallSession, JoinRequest, LocalIdentity, Participant, SessionPhase,
        SessionState,
    },
};

pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(8);

pub struct SessionManager {
    identity: LocalIdentity,
    tokens: Arc<dyn TokenProvider>,
    engine: Arc<dyn MediaEngine>,
    signals: Arc<SignalChannel>,
    token_timeout: Duration,
    gate: Mutex<()>,
    generation: AtomicU64,
    state: watch::Sender<SessionState>,
    media_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        identity: LocalIdentity,
        tokens: Arc<dyn TokenProvider>,
        engine: Arc<dyn MediaEngine>,
        signals: Arc<SignalChannel>,
        token_timeout: Duration,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::idle());
        Arc::new(Self {
            identity,
            tokens,
            engine,
            signals,
            token_timeout,
            gate: Mutex::new(()),
            generation: AtomicU64::new(0),
            state,
            media_task: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.state.borrow().active_conversation()
    }

    pub async fn join(self: &Arc<Self>, request: JoinRequest) -> Result<CallSession, SessionError> {
        let _gate = self.gate.try_lock().map_err(|_| SessionError::Busy)?;
        self.transition_locked(request).await
    }

    pub async fn switch_to(
        self: &Arc<Self>,
        request: JoinRequest,
    ) -> Result<CallSession, SessionError> {
        let _gate = self.gate.try_lock().map_err(|_| SessionError::Busy)?;
        self.transition_locked(request).await
    }

    pub async fn leave(&self) {
        self.leave_inner(true).await;
    }

    pub async fn leave_without_signal(&self) {
        self.leave_inner(false).await;
    }

    pub async fn set_microphone(&self, enabled: bool) -> Result<(), SessionError> {
        self.set_local_track(TrackSource::Microphone, enabled).await
    }

    pub async fn set_camera(&self, enabled: bool) -> Result<(), SessionError> {
        self.set_local_track(TrackSource::Camera, enabled).await
    }

    pub async fn set_screen_share(&self, enabled: bool) -> Result<(), SessionError> {
        self.set_local_track(TrackSource::ScreenShare, enabled).await
    }

    /// Every transition bumps the generation, so callbacks captured under an
    /// older one are dropped here.
    pub fn apply_media_event(&self, generation: u64, event: MediaEvent) -> bool {
        if generation != self.current_generation() {
            debug!(
                generation,
                current = self.current_generation(),
                "session: discarded stale media event"
            );
            return false;
        }

        self.state.send_if_modified(|state| {
            let Some(session) = state.session.as_mut() else {
                return false;
            };
            if session.generation != generation {
                return false;
            }
            match event {
                MediaEvent::ParticipantJoined(remote) => {
                    session.participants.insert(
                        remote.identity.clone(),
                        Participant {
                            identity: remote.identity,
                            mic_enabled: remote.mic_enabled,
                            cam_enabled: remote.cam_enabled,
                            screen_sharing: false,
                            speaking: false,
                            joined_at: remote.joined_at,
                        },
                    );
                    true
                }
                MediaEvent::ParticipantLeft { identity } => {
                    session.participants.remove(&identity).is_some()
                }
                MediaEvent::TrackToggled {
                    identity,
                    source,
                    enabled,
                } => {
                    let Some(participant) = session.participants.get_mut(&identity) else {
                        return false;
                    };
                    let slot = match source {
                        TrackSource::Microphone => &mut participant.mic_enabled,
                        TrackSource::Camera => &mut participant.cam_enabled,
                        TrackSource::ScreenShare => &mut participant.screen_sharing,
                    };
                    let changed = *slot != enabled;
                    *slot = enabled;
                    changed
                }
                MediaEvent::ActiveSpeakersChanged { identities } => {
                    let mut changed = false;
                    for participant in session.participants.values_mut() {
                        let speaking = identities.contains(&participant.identity);
                        if participant.speaking != speaking {
                            participant.speaking = speaking;
                            changed = true;
                        }
                    }
                    changed
                }
                MediaEvent::Disconnected => false,
            }
        })
    }

    async fn transition_locked(
        self: &Arc<Self>,
        request: JoinRequest,
    ) -> Result<CallSession, SessionError> {
        let active = self.state.borrow().session.clone();
        match active {
            Some(session) if session.conversation_id == request.conversation_id => {
                debug!(
                    conversation_id = session.conversation_id.0,
                    "session: already connected"
                );
                Ok(session)
            }
            Some(previous) => self.switch_locked(previous, request).await,
            None => self.join_locked(request).await,
        }
    }

    async fn join_locked(
        self: &Arc<Self>,
        request: JoinRequest,
    ) -> Result<CallSession, SessionError> {
        let generation = self.next_generation();
        let conversation_id = request.conversation_id;
        self.state.send_modify(|state| {
            state.phase = SessionPhase::Requesting;
            state.target = Some(conversation_id);
        });

        self.connect_locked(generation, request)
            .await
            .map_err(|err| self.fail_join(conversation_id, generation, err))
    }

    async fn switch_locked(
        self: &Arc<Self>,
        previous: CallSession,
        request: JoinRequest,
    ) -> Result<CallSession, SessionError> {
        let generation = self.next_generation();
        let conversation_id = request.conversation_id;
        info!(
            from = previous.conversation_id.0,
            to = conversation_id.0,
            generation,
            "session: switching"
        );
        self.state.send_modify(|state| {
            state.phase = SessionPhase::Switching;
            state.target = Some(conversation_id);
        });

        self.teardown(&previous, true).await;
        self.state.send_modify(|state| state.session = None);

        self.connect_locked(generation, request)
            .await
            .map_err(|err| self.fail_join(conversation_id, generation, err))
    }

    async fn connect_locked(
        self: &Arc<Self>,
        generation: u64,
        request: JoinRequest,
    ) -> Result<CallSession, JoinError> {
        let room_name = room_name_for_conversation(request.conversation_id);
        let token_request = TokenRequest {
            room: room_name.clone(),
            identity: self.identity.media_identity(),
            avatar: self.identity.avatar.clone(),
        };

        let token = match tokio::time::timeout(
            self.token_timeout,
            self.tokens.fetch_token(&token_request),
        )
        .await
        {
            Ok(Ok(token)) => token,
            Ok(Err(err)) => return Err(JoinError::TokenRequest(err.to_string())),
            Err(_) => return Err(JoinError::TokenTimeout(self.token_timeout)),
        };
        if self.is_stale(generation) {
            return Err(JoinError::Superseded);
        }

        let media_events = self.engine.subscribe_events();
        self.engine
            .connect(MediaConnectOptions {
                room_name: room_name.clone(),
                token,
                audio_enabled: request.mic_on,
                video_enabled: request.cam_on,
            })
            .await
            .map_err(|err| JoinError::Connect(err.to_string()))?;

        if self.is_stale(generation) {
            if let Err(err) = self.engine.disconnect().await {
                warn!(room = %room_name, error = %err, "session: failed to release superseded room");
            }
            return Err(JoinError::Superseded);
        }

        let session = CallSession {
            id: Uuid::new_v4(),
            conversation_id: request.conversation_id,
            kind: request.kind,
            started_at: Utc::now(),
            generation,
            initiated_locally: request.initiated_locally,
            invitees: request.invitees,
            participants: BTreeMap::new(),
            mic_enabled: request.mic_on,
            cam_enabled: request.cam_on,
            screen_share_enabled: false,
        };

        let task = self.spawn_media_task(generation, media_events);
        if let Some(previous) = self.media_task.lock().await.replace(task) {
            previous.abort();
        }

        self.state.send_replace(SessionState {
            phase: SessionPhase::Connected,
            target: None,
            session: Some(session.clone()),
        });
        info!(
            conversation_id = session.conversation_id.0,
            kind = session.kind.as_str(),
            generation,
            room = %room_name,
            "session: connected"
        );
        Ok(session)
    }

    fn fail_join(
        &self,
        conversation_id: ConversationId,
        generation: u64,
        err: JoinError,
    ) -> SessionError {
        warn!(
            conversation_id = conversation_id.0,
            generation,
            error = %err,
            "session: join failed"
        );
        self.state.send_replace(SessionState::idle());
        SessionError::Join(err)
    }

    async fn leave_inner(&self, announce: bool) {
        let generation = self.next_generation();
        let _gate = self.gate.lock().await;

        let active = self.state.borrow().session.clone();
        let Some(session) = active else {
            self.state.send_replace(SessionState::idle());
            return;
        };
        self.close_locked(session, generation, announce).await;
    }

    /// Leaves only if the session bound under `generation` is still the
    /// active one. A transition that started after the room dropped wins.
    pub(crate) async fn leave_if_current(&self, generation: u64) -> bool {
        let _gate = self.gate.lock().await;
        let active = self.state.borrow().session.clone();
        let Some(session) = active.filter(|session| session.generation == generation) else {
            debug!(generation, "session: dropped room was already replaced");
            return false;
        };
        let generation = self.next_generation();
        self.close_locked(session, generation, true).await;
        true
    }

    async fn close_locked(&self, session: CallSession, generation: u64, announce: bool) {
        self.state.send_modify(|state| {
            state.phase = SessionPhase::Leaving;
            state.target = None;
        });
        self.teardown(&session, announce).await;
        self.state.send_replace(SessionState::idle());
        info!(
            conversation_id = session.conversation_id.0,
            generation,
            "session: left"
        );
    }

    async fn teardown(&self, session: &CallSession, announce: bool) {
        if let Some(task) = self.media_task.lock().await.take() {
            task.abort();
        }

        if announce && session.initiated_locally {
            let topics = call_topics(
                self.identity.user_id,
                session.conversation_id,
                &session.invitees,
            );
            let ended = SignalPayload::CallEnded(CallStatePayload {
                conversation_id: session.conversation_id,
                kind: session.kind,
            });
            if let Err(err) = self.signals.publish(&topics, ended).await {
                warn!(
                    conversation_id = session.conversation_id.0,
                    error = %err,
                    "session: failed to announce call end"
                );
            }
        }

        if let Err(err) = self.engine.disconnect().await {
            warn!(
                conversation_id = session.conversation_id.0,
                error = %err,
                "session: media disconnect failed; continuing teardown"
            );
        }
    }

    async fn set_local_track(&self, source: TrackSource, enabled: bool) -> Result<(), SessionError> {
        let generation = {
            let state = self.state.borrow();
            if state.phase != SessionPhase::Connected {
                return Err(SessionError::NotConnected);
            }
            state
                .session
                .as_ref()
                .map(|session| session.generation)
                .ok_or(SessionError::NotConnected)?
        };

        self.engine
            .set_track_enabled(source, enabled)
            .await
            .map_err(|err| SessionError::Media(err.to_string()))?;

        let applied = self.state.send_if_modified(|state| match state.session.as_mut() {
            Some(session) if session.generation == generation => {
                match source {
                    TrackSource::Microphone => session.mic_enabled = enabled,
                    TrackSource::Camera => session.cam_enabled = enabled,
                    TrackSource::ScreenShare => session.screen_share_enabled = enabled,
                }
                true
            }
            _ => false,
        });
        if !applied {
            debug!(generation, ?source, "session: track change outlived its session");
        }
        Ok(())
    }

    fn spawn_media_task(
        self: &Arc<Self>,
        generation: u64,
        mut events: broadcast::Receiver<MediaEvent>,
    ) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, generation, "session: media events lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(manager) = manager.upgrade() else {
                    break;
                };

                if event == MediaEvent::Disconnected {
                    if manager.is_stale(generation) {
                        break;
                    }
                    warn!(generation, "session: media room dropped us; leaving");
                    // Leaving aborts this task, so it has to run on its own.
                    tokio::spawn(async move {
                        manager.leave_if_current(generation).await;
                    });
                    break;
                }
                manager.apply_media_event(generation, event);
            }
        })
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.current_generation() != generation
    }
}

#[cfg(test)]
#[path = "tests/session_manager_tests.rs"]
mod tests;

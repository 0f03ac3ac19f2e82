use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use shared::{
    domain::{ConversationId, Topic, UserId},
    protocol::{SignalEvent, SignalPayload, SignalType},
};
use tokio::{
    sync::{broadcast::error::RecvError, mpsc, watch, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::SignalError,
    transport::{SignalTransport, TransportEvent},
};

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

struct DedupWindow {
    window: Duration,
    seen: HashMap<(ConversationId, SignalType), Instant>,
}

impl DedupWindow {
    fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    fn admit(&mut self, key: (ConversationId, SignalType), now: Instant) -> bool {
        let window = self.window;
        self.seen
            .retain(|_, first_seen| now.duration_since(*first_seen) < window);
        if self.seen.contains_key(&key) {
            return false;
        }
        self.seen.insert(key, now);
        true
    }
}

pub struct SignalChannel {
    user_id: UserId,
    origin: Uuid,
    transport: Arc<dyn SignalTransport>,
    handlers: Mutex<HashMap<SignalType, Vec<mpsc::UnboundedSender<SignalEvent>>>>,
    dedup: Mutex<DedupWindow>,
    topics: Mutex<HashSet<Topic>>,
    connection: watch::Sender<ConnectionState>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SignalChannel {
    pub fn new(
        user_id: UserId,
        transport: Arc<dyn SignalTransport>,
        dedup_window: Duration,
    ) -> Arc<Self> {
        let initial = if transport.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        let (connection, _) = watch::channel(initial);
        Arc::new(Self {
            user_id,
            origin: Uuid::new_v4(),
            transport,
            handlers: Mutex::new(HashMap::new()),
            dedup: Mutex::new(DedupWindow::new(dedup_window)),
            topics: Mutex::new(HashSet::new()),
            connection,
            pump: Mutex::new(None),
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub async fn start(self: &Arc<Self>) {
        let mut pump = self.pump.lock().await;
        if pump.is_some() {
            return;
        }

        let mut events = self.transport.subscribe_events();
        if self.transport.is_connected() {
            self.resubscribe().await;
            self.connection.send_replace(ConnectionState::Connected);
        }

        let channel = Arc::downgrade(self);
        *pump = Some(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "signal: transport events lagged; some signals were lost");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(channel) = channel.upgrade() else {
                    break;
                };
                channel.handle_transport_event(event).await;
            }
        }));
    }

    pub async fn shutdown(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
    }

    pub async fn subscribe(&self, signal_type: SignalType) -> mpsc::UnboundedReceiver<SignalEvent> {
        self.subscribe_all(&[signal_type]).await
    }

    pub async fn subscribe_all(
        &self,
        signal_types: &[SignalType],
    ) -> mpsc::UnboundedReceiver<SignalEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handlers = self.handlers.lock().await;
        for signal_type in signal_types {
            handlers.entry(*signal_type).or_default().push(tx.clone());
        }
        rx
    }

    pub async fn join_topic(&self, topic: Topic) -> Result<(), SignalError> {
        let inserted = self.topics.lock().await.insert(topic);
        if !inserted || !self.transport.is_connected() {
            return Ok(());
        }
        self.transport
            .subscribe(topic)
            .await
            .map_err(|err| SignalError::Transport(err.to_string()))
    }

    pub async fn leave_topic(&self, topic: Topic) {
        if !self.topics.lock().await.remove(&topic) || !self.transport.is_connected() {
            return;
        }
        if let Err(err) = self.transport.unsubscribe(topic).await {
            warn!(%topic, error = %err, "signal: failed to unsubscribe topic");
        }
    }

    pub async fn publish(
        &self,
        targets: &[Topic],
        signal: SignalPayload,
    ) -> Result<SignalEvent, SignalError> {
        if !self.transport.is_connected() {
            return Err(SignalError::Disconnected);
        }

        let event = SignalEvent::new(self.user_id, self.origin, signal);
        self.transport
            .publish(targets.to_vec(), event.clone())
            .await
            .map_err(|err| SignalError::Transport(err.to_string()))?;

        debug!(
            signal = event.signal_type().as_str(),
            conversation_id = ?event.conversation_id(),
            targets = targets.len(),
            "signal: published"
        );
        Ok(event)
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.transport.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Drops our own echoes, and collapses repeats of one `(conversation, type)`
    /// key inside the dedup window, since several topics can relay the same
    /// occurrence.
    pub async fn dispatch(&self, event: SignalEvent) -> bool {
        if event.origin == self.origin {
            return false;
        }

        let signal_type = event.signal_type();
        if let Some(conversation_id) = event.conversation_id() {
            let admitted = self
                .dedup
                .lock()
                .await
                .admit((conversation_id, signal_type), Instant::now());
            if !admitted {
                debug!(
                    signal = signal_type.as_str(),
                    conversation_id = conversation_id.0,
                    "signal: dropped duplicate"
                );
                return false;
            }
        }

        let mut handlers = self.handlers.lock().await;
        if let Some(senders) = handlers.get_mut(&signal_type) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
        true
    }

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.resubscribe().await;
                self.connection.send_replace(ConnectionState::Connected);
                info!(user_id = self.user_id.0, "signal: connected");
            }
            TransportEvent::Disconnected => {
                self.connection.send_replace(ConnectionState::Disconnected);
                warn!(user_id = self.user_id.0, "signal: disconnected; events are lost until reconnect");
            }
            TransportEvent::Frame { event, .. } => {
                self.dispatch(event).await;
            }
        }
    }

    async fn resubscribe(&self) {
        let mut topics = vec![Topic::User(self.user_id)];
        topics.extend(self.topics.lock().await.iter().copied());
        for topic in topics {
            if let Err(err) = self.transport.subscribe(topic).await {
                warn!(%topic, error = %err, "signal: failed to subscribe topic");
            }
        }
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/signal_channel_tests.rs"]
mod tests;

use async_trait::async_trait;
use shared::{domain::Topic, protocol::SignalEvent};
use tokio::sync::broadcast;

mod memory;
mod ws;

pub use memory::{MemoryHub, MemoryTransport};
pub use ws::{websocket_url, ReconnectPolicy, WsSignalTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Frame { topic: Topic, event: SignalEvent },
}

/// Realtime pub/sub link to the relay. Delivery is best effort; nothing is
/// queued or replayed across disconnects.
#[async_trait]
pub trait SignalTransport: Send + Sync {
    async fn subscribe(&self, topic: Topic) -> anyhow::Result<()>;
    async fn unsubscribe(&self, topic: Topic) -> anyhow::Result<()>;
    async fn publish(&self, targets: Vec<Topic>, event: SignalEvent) -> anyhow::Result<()>;
    fn is_connected(&self) -> bool;
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;
}

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{domain::Topic, protocol::SignalEvent};
use tokio::sync::{broadcast, Mutex};

use super::{SignalTransport, TransportEvent};

/// In-process relay with the same per-topic fan-out as the server: a peer
/// subscribed to several targeted topics receives one frame per topic.
#[derive(Default)]
pub struct MemoryHub {
    peers: Mutex<Vec<Weak<MemoryTransport>>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn connect(self: &Arc<Self>) -> Arc<MemoryTransport> {
        let (events, _) = broadcast::channel(256);
        let transport = Arc::new(MemoryTransport {
            hub: Arc::clone(self),
            connected: AtomicBool::new(true),
            topics: Mutex::new(HashSet::new()),
            events,
        });
        self.peers.lock().await.push(Arc::downgrade(&transport));
        transport
    }

    async fn deliver(&self, targets: &[Topic], event: &SignalEvent) {
        let peers: Vec<Arc<MemoryTransport>> = {
            let mut guard = self.peers.lock().await;
            guard.retain(|peer| peer.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };

        for peer in peers {
            if !peer.is_connected() {
                continue;
            }
            let topics = peer.topics.lock().await;
            for topic in targets {
                if topics.contains(topic) {
                    let _ = peer.events.send(TransportEvent::Frame {
                        topic: *topic,
                        event: event.clone(),
                    });
                }
            }
        }
    }
}

pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    connected: AtomicBool,
    topics: Mutex<HashSet<Topic>>,
    events: broadcast::Sender<TransportEvent>,
}

impl MemoryTransport {
    pub async fn set_connected(&self, connected: bool) {
        let was_connected = self.connected.swap(connected, Ordering::SeqCst);
        if was_connected == connected {
            return;
        }
        if connected {
            let _ = self.events.send(TransportEvent::Connected);
        } else {
            self.topics.lock().await.clear();
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }

    pub async fn subscribed_topics(&self) -> HashSet<Topic> {
        self.topics.lock().await.clone()
    }
}

#[async_trait]
impl SignalTransport for MemoryTransport {
    async fn subscribe(&self, topic: Topic) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("memory transport is disconnected"));
        }
        self.topics.lock().await.insert(topic);
        Ok(())
    }

    async fn unsubscribe(&self, topic: Topic) -> Result<()> {
        self.topics.lock().await.remove(&topic);
        Ok(())
    }

    async fn publish(&self, targets: Vec<Topic>, event: SignalEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("memory transport is disconnected"));
        }
        self.hub.deliver(&targets, &event).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

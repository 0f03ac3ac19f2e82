use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use shared::{
    domain::{Topic, UserId},
    protocol::{ClientFrame, ServerFrame, SignalEvent},
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{info, warn};

use super::{SignalTransport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
        }
    }
}

pub fn websocket_url(server_url: &str, user_id: UserId) -> Result<String> {
    let server_url = server_url.trim_end_matches('/');
    let ws_url = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if server_url.starts_with("ws://") || server_url.starts_with("wss://") {
        server_url.to_string()
    } else {
        return Err(anyhow!("server_url must start with http:// or https://"));
    };
    Ok(format!("{ws_url}/ws?user_id={}", user_id.0))
}

pub struct WsSignalTransport {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<TransportEvent>,
    task: JoinHandle<()>,
}

impl WsSignalTransport {
    pub fn spawn(server_url: &str, user_id: UserId, policy: ReconnectPolicy) -> Result<Arc<Self>> {
        let url = websocket_url(server_url, user_id)?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        let connected = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_connection_loop(
            url,
            policy,
            outbound_rx,
            events.clone(),
            Arc::clone(&connected),
        ));

        Ok(Arc::new(Self {
            outbound,
            connected,
            events,
            task,
        }))
    }

    fn send_frame(&self, frame: ClientFrame) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("websocket is disconnected"));
        }
        self.outbound
            .send(frame)
            .map_err(|_| anyhow!("websocket writer task has stopped"))
    }
}

impl Drop for WsSignalTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl SignalTransport for WsSignalTransport {
    async fn subscribe(&self, topic: Topic) -> Result<()> {
        self.send_frame(ClientFrame::Subscribe { topic })
    }

    async fn unsubscribe(&self, topic: Topic) -> Result<()> {
        self.send_frame(ClientFrame::Unsubscribe { topic })
    }

    async fn publish(&self, targets: Vec<Topic>, event: SignalEvent) -> Result<()> {
        self.send_frame(ClientFrame::Publish { targets, event })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

async fn run_connection_loop(
    url: String,
    policy: ReconnectPolicy,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientFrame>,
    events: broadcast::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut delay = policy.initial_delay;
    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                delay = policy.initial_delay;
                while outbound_rx.try_recv().is_ok() {}
                connected.store(true, Ordering::SeqCst);
                info!(%url, "signal: websocket connected");
                let _ = events.send(TransportEvent::Connected);

                let keep_running = pump_socket(stream, &mut outbound_rx, &events).await;

                connected.store(false, Ordering::SeqCst);
                let _ = events.send(TransportEvent::Disconnected);
                if !keep_running {
                    return;
                }
                warn!(%url, "signal: websocket disconnected; reconnecting");
            }
            Err(err) => {
                warn!(
                    %url,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "signal: websocket connect failed"
                );
            }
        }
        tokio::time::sleep(delay).await;
        delay = policy.next(delay);
    }
}

/// Returns `false` once the owning transport has been dropped.
async fn pump_socket<S>(
    stream: S,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientFrame>,
    events: &broadcast::Sender<TransportEvent>,
) -> bool
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let (mut writer, mut reader) = stream.split();
    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    let _ = writer.close().await;
                    return false;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "signal: failed to encode client frame");
                        continue;
                    }
                };
                if let Err(err) = writer.send(Message::Text(text)).await {
                    warn!(error = %err, "signal: websocket send failed");
                    return true;
                }
            }
            msg = reader.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(ServerFrame::Event { topic, event }) => {
                        let _ = events.send(TransportEvent::Frame { topic, event });
                    }
                    Ok(ServerFrame::Error(err)) => {
                        warn!(code = ?err.code, message = %err.message, "signal: relay reported error");
                    }
                    Err(err) => warn!(error = %err, "signal: invalid relay frame"),
                },
                Some(Ok(Message::Close(_))) | None => return true,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "signal: websocket receive failed");
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_maps_http_schemes() {
        assert_eq!(
            websocket_url("http://localhost:8443/", UserId(7)).expect("url"),
            "ws://localhost:8443/ws?user_id=7"
        );
        assert_eq!(
            websocket_url("https://chat.example", UserId(8)).expect("url"),
            "wss://chat.example/ws?user_id=8"
        );
        assert!(websocket_url("localhost:8443", UserId(1)).is_err());
    }

    #[test]
    fn reconnect_delay_doubles_up_to_cap() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(1),
        };
        let second = policy.next(policy.initial_delay);
        assert_eq!(second, Duration::from_millis(800));
        assert_eq!(policy.next(second), Duration::from_secs(1));
    }
}

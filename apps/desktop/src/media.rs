use anyhow::{bail, Result};
use async_trait::async_trait;
use livekit_integration::{MediaConnectOptions, MediaEngine, MediaEvent, TrackSource};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::info;

/// Stand-in media binding for the terminal client: it tracks which room is
/// bound and logs track changes, but captures no audio or video.
pub struct LoggingMediaEngine {
    room: Mutex<Option<String>>,
    events: broadcast::Sender<MediaEvent>,
}

impl LoggingMediaEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            room: Mutex::new(None),
            events,
        }
    }

    fn bound_room(&self) -> Option<String> {
        self.room.lock().ok().and_then(|room| room.clone())
    }
}

#[async_trait]
impl MediaEngine for LoggingMediaEngine {
    async fn connect(&self, options: MediaConnectOptions) -> Result<()> {
        let mut room = match self.room.lock() {
            Ok(room) => room,
            Err(_) => bail!("media state poisoned"),
        };
        if let Some(current) = room.as_deref() {
            bail!("already bound to {current}");
        }
        info!(
            room = %options.room_name,
            audio = options.audio_enabled,
            video = options.video_enabled,
            "media: joined room"
        );
        *room = Some(options.room_name);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Ok(mut room) = self.room.lock() {
            if let Some(left) = room.take() {
                info!(room = %left, "media: left room");
            }
        }
        Ok(())
    }

    async fn set_track_enabled(&self, source: TrackSource, enabled: bool) -> Result<()> {
        let Some(room) = self.bound_room() else {
            bail!("not bound to a room");
        };
        info!(%room, ?source, enabled, "media: track toggled");
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }
}

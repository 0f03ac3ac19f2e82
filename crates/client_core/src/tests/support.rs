use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use livekit_integration::{MediaConnectOptions, MediaEngine, MediaEvent, TrackSource};
use tokio::sync::broadcast;

use crate::token::{TokenProvider, TokenRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Connect(String),
    Disconnect,
    Track(TrackSource, bool),
}

pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    pub bound: Mutex<Option<String>>,
    pub overlapping_binds: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub fail_disconnect: AtomicBool,
    events: broadcast::Sender<MediaEvent>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            bound: Mutex::new(None),
            overlapping_binds: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
            events,
        })
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn emit(&self, event: MediaEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl MediaEngine for RecordingEngine {
    async fn connect(&self, options: MediaConnectOptions) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::Connect(options.room_name.clone()));
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(anyhow!("sfu unreachable"));
        }
        let mut bound = self.bound.lock().unwrap();
        if bound.is_some() {
            self.overlapping_binds.fetch_add(1, Ordering::SeqCst);
        }
        *bound = Some(options.room_name);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.calls.lock().unwrap().push(EngineCall::Disconnect);
        *self.bound.lock().unwrap() = None;
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(anyhow!("device release failed"));
        }
        Ok(())
    }

    async fn set_track_enabled(&self, source: TrackSource, enabled: bool) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::Track(source, enabled));
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }
}

pub struct StaticTokens {
    pub delay: Duration,
}

impl StaticTokens {
    pub fn instant() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn fetch_token(&self, request: &TokenRequest) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(format!("token-for-{}", request.room))
    }
}

pub struct RejectingTokens;

#[async_trait]
impl TokenProvider for RejectingTokens {
    async fn fetch_token(&self, _request: &TokenRequest) -> Result<String> {
        Err(anyhow!("401 unauthorized"))
    }
}

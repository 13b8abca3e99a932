// Shared fakes for session tests
#![allow(dead_code)]

use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use voice_onboarding::audio::{
    AudioDevices, CaptureBackend, MicrophoneConstraints, PlaybackEnded, PlaybackOutput,
    CAPTURE_CHANNEL_CAPACITY,
};
use voice_onboarding::transport::{
    InboundMessage, NegotiatedSession, Outbound, SessionNegotiator, Transport,
    TransportConnector, TransportEvent, TransportHandle, EVENT_CHANNEL_CAPACITY,
};
use voice_onboarding::{
    Collaborators, LifecycleState, SessionConfig, SessionController, SessionError,
    SessionResult, StaticIdentity,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// Poll `check` until it returns true or the wait times out
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {:?}",
            WAIT
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_state(controller: &SessionController, state: LifecycleState) {
    let mut rx = controller.watch_state();
    let reached = tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state)).await;
    assert!(
        matches!(reached, Ok(Ok(_))),
        "expected {}, still {}",
        state,
        controller.state()
    );
}

// ============================================================================
// Audio devices
// ============================================================================

#[derive(Default)]
pub struct DeviceCounters {
    pub microphones_opened: AtomicUsize,
    pub captures_started: AtomicUsize,
    pub captures_stopped: AtomicUsize,
    pub playbacks_opened: AtomicUsize,
    pub playbacks_closed: AtomicUsize,
}

/// A scheduled playback buffer
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduled {
    pub samples: usize,
    pub start: f64,
    pub end: f64,
}

#[derive(Default)]
struct PlaybackLog {
    clock: f64,
    scheduled: Vec<Scheduled>,
    ended_tx: Option<mpsc::UnboundedSender<PlaybackEnded>>,
    closed: bool,
}

/// Microphone and speaker driven by the test
#[derive(Clone, Default)]
pub struct FakeDevices {
    pub counters: Arc<DeviceCounters>,
    pub deny_microphone: Arc<AtomicBool>,
    pub fail_playback: Arc<AtomicBool>,
    pub capture_start_delay: Arc<Mutex<Option<Duration>>>,
    blocks: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>>,
    playback: Arc<Mutex<PlaybackLog>>,
}

impl FakeDevices {
    pub fn denying_microphone() -> Self {
        let devices = Self::default();
        devices.deny_microphone.store(true, Ordering::SeqCst);
        devices
    }

    /// Microphone whose `start` takes `delay`
    pub fn slow_capture_start(delay: Duration) -> Self {
        let devices = Self::default();
        *devices.capture_start_delay.lock().unwrap() = Some(delay);
        devices
    }

    pub fn failing_playback() -> Self {
        let devices = Self::default();
        devices.fail_playback.store(true, Ordering::SeqCst);
        devices
    }

    /// Feed one capture block, as if the microphone produced it
    pub async fn speak(&self, block: Vec<f32>) {
        let sender = self
            .blocks
            .lock()
            .unwrap()
            .clone()
            .expect("capture not started");
        sender.send(block).await.expect("capture task gone");
    }

    pub fn set_clock(&self, now: f64) {
        self.playback.lock().unwrap().clock = now;
    }

    pub fn scheduled(&self) -> Vec<Scheduled> {
        self.playback.lock().unwrap().scheduled.clone()
    }

    /// Advance the clock to the end of scheduled buffer `index` and report it finished
    pub fn finish(&self, index: usize) {
        let mut log = self.playback.lock().unwrap();
        let buffer = log.scheduled[index].clone();
        log.clock = buffer.end;
        if let Some(tx) = &log.ended_tx {
            let _ = tx.send(PlaybackEnded {
                start: buffer.start,
                end: buffer.end,
            });
        }
    }

    pub fn count(&self, counter: impl Fn(&DeviceCounters) -> &AtomicUsize) -> usize {
        counter(&self.counters).load(Ordering::SeqCst)
    }
}

struct FakeCapture {
    counters: Arc<DeviceCounters>,
    start_delay: Option<Duration>,
    blocks: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>>,
    capturing: bool,
}

#[async_trait::async_trait]
impl CaptureBackend for FakeCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>> {
        self.counters.captures_started.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }

        let (tx, rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        *self.blocks.lock().unwrap() = Some(tx);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.blocks.lock().unwrap().take();
        self.capturing = false;
        self.counters.captures_stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

struct FakePlayback {
    counters: Arc<DeviceCounters>,
    log: Arc<Mutex<PlaybackLog>>,
    sample_rate: u32,
}

#[async_trait::async_trait]
impl PlaybackOutput for FakePlayback {
    fn now(&self) -> f64 {
        self.log.lock().unwrap().clock
    }

    fn schedule(&self, samples: Vec<f32>, start_at: f64) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        anyhow::ensure!(!log.closed, "playback closed");
        log.scheduled.push(Scheduled {
            samples: samples.len(),
            start: start_at,
            end: start_at + samples.len() as f64 / self.sample_rate as f64,
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.lock().unwrap().closed = true;
        self.counters.playbacks_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "fake speaker"
    }
}

#[async_trait::async_trait]
impl AudioDevices for FakeDevices {
    async fn open_microphone(
        &self,
        _constraints: &MicrophoneConstraints,
    ) -> SessionResult<Box<dyn CaptureBackend>> {
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(SessionError::DeviceAccessDenied(
                "permission denied".to_string(),
            ));
        }
        self.counters
            .microphones_opened
            .fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeCapture {
            counters: Arc::clone(&self.counters),
            start_delay: *self.capture_start_delay.lock().unwrap(),
            blocks: Arc::clone(&self.blocks),
            capturing: false,
        }))
    }

    async fn open_playback(
        &self,
        sample_rate: u32,
        ended_tx: mpsc::UnboundedSender<PlaybackEnded>,
    ) -> SessionResult<Arc<dyn PlaybackOutput>> {
        if self.fail_playback.load(Ordering::SeqCst) {
            return Err(SessionError::AudioInitFailed(
                "no output device".to_string(),
            ));
        }
        {
            let mut log = self.playback.lock().unwrap();
            *log = PlaybackLog {
                ended_tx: Some(ended_tx),
                ..Default::default()
            };
        }
        self.counters.playbacks_opened.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(FakePlayback {
            counters: Arc::clone(&self.counters),
            log: Arc::clone(&self.playback),
            sample_rate,
        }))
    }
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Clone, Default)]
pub struct FakeNegotiator {
    pub calls: Arc<AtomicUsize>,
    pub fail_with: Option<SessionError>,
    pub delay: Option<Duration>,
}

impl FakeNegotiator {
    pub fn failing(error: SessionError) -> Self {
        Self {
            fail_with: Some(error),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl SessionNegotiator for FakeNegotiator {
    async fn negotiate(&self, user_id: &str) -> SessionResult<NegotiatedSession> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        Ok(NegotiatedSession {
            session_id: format!("session-{}", user_id),
            websocket_url: "ws://backend.test/ws".to_string(),
        })
    }
}

/// The backend's end of a fake transport
pub struct FakeRemote {
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl FakeRemote {
    pub async fn send_text(&self, text: &str) {
        self.events
            .send(TransportEvent::Message(InboundMessage::Text(text.to_string())))
            .await
            .expect("event loop gone");
    }

    pub async fn send_audio(&self, payload: Vec<u8>) {
        self.events
            .send(TransportEvent::Message(InboundMessage::Binary(payload)))
            .await
            .expect("event loop gone");
    }

    pub async fn close(&self) {
        let _ = self.events.send(TransportEvent::Closed).await;
    }

    /// Next outbound message, failing the test if none arrives
    pub async fn next_outbound(&mut self) -> Outbound {
        tokio::time::timeout(WAIT, self.outbound.recv())
            .await
            .expect("no outbound message")
            .expect("transport dropped")
    }

    /// Everything sent so far
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        let mut sent = Vec::new();
        while let Ok(outbound) = self.outbound.try_recv() {
            sent.push(outbound);
        }
        sent
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub calls: Arc<AtomicUsize>,
    pub endpoints: Arc<Mutex<Vec<String>>>,
    pub fail_with: Option<SessionError>,
    pub delay: Option<Duration>,
    remote: Arc<Mutex<Option<FakeRemote>>>,
}

impl FakeConnector {
    pub fn failing(error: SessionError) -> Self {
        Self {
            fail_with: Some(error),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// Take the backend side of the last opened transport
    pub fn remote(&self) -> FakeRemote {
        self.remote
            .lock()
            .unwrap()
            .take()
            .expect("no transport opened")
    }
}

#[async_trait::async_trait]
impl TransportConnector for FakeConnector {
    async fn connect(&self, endpoint: &str) -> SessionResult<Transport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(endpoint.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }

        let (handle, outbound) = TransportHandle::channel();
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *self.remote.lock().unwrap() = Some(FakeRemote {
            outbound,
            events: events_tx,
        });

        Ok(Transport { handle, events })
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub controller: SessionController,
    pub devices: FakeDevices,
    pub negotiator: FakeNegotiator,
    pub connector: FakeConnector,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(
            StaticIdentity::signed_in("user-1"),
            FakeDevices::default(),
            FakeNegotiator::default(),
        )
    }

    pub fn with(
        identity: StaticIdentity,
        devices: FakeDevices,
        negotiator: FakeNegotiator,
    ) -> Self {
        Self::build(
            identity,
            devices,
            negotiator,
            FakeConnector::default(),
            SessionConfig::default(),
        )
    }

    pub fn build(
        identity: StaticIdentity,
        devices: FakeDevices,
        negotiator: FakeNegotiator,
        connector: FakeConnector,
        config: SessionConfig,
    ) -> Self {
        let collaborators = Collaborators {
            identity: Arc::new(identity),
            devices: Arc::new(devices.clone()),
            negotiator: Arc::new(negotiator.clone()),
            connector: Arc::new(connector.clone()),
        };

        Self {
            controller: SessionController::new(config, collaborators),
            devices,
            negotiator,
            connector,
        }
    }

    /// Start a session and bring it to `active`
    pub async fn start_active(&self) -> FakeRemote {
        self.controller.start().await.expect("start failed");
        let remote = self.connector.remote();
        remote.send_text(r#"{"type":"ready"}"#).await;
        wait_for_state(&self.controller, LifecycleState::Active).await;
        remote
    }
}

/// `seconds` of 16kHz PCM, encoded as the backend sends it
pub fn agent_pcm(seconds: f64) -> Vec<u8> {
    let samples = (seconds * 16000.0) as usize;
    (0..samples)
        .flat_map(|i| (((i % 100) as i16) * 100).to_le_bytes())
        .collect()
}

use super::config::SessionConfig;
use super::state::{LifecycleState, Trigger};
use super::stats::{ProfileSnapshot, Role, SessionStats, TranscriptEntry};
use crate::audio::capture::{self, process_block};
use crate::audio::{
    AudioDevices, BlockOutcome, CaptureBackend, CaptureGate, PlaybackEnded, PlaybackOutput,
    PlaybackScheduler,
};
use crate::auth::IdentityProvider;
use crate::error::{SessionError, SessionResult};
use crate::transport::{
    route, ControlMessage, InboundEvent, Routed, SessionNegotiator, TransportConnector,
    TransportEvent, TransportHandle,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the update broadcast channel
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Message recorded when the backend sends an `error` event without one
const UNKNOWN_REMOTE_ERROR: &str = "Unknown error from agent";

/// Notifications published while a session runs
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    StateChanged(LifecycleState),
    Transcript(TranscriptEntry),
    Profile(ProfileSnapshot),
    AgentSpeaking(bool),
    Muted(bool),
    Error(String),
}

/// External services a session talks to
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub devices: Arc<dyn AudioDevices>,
    pub negotiator: Arc<dyn SessionNegotiator>,
    pub connector: Arc<dyn TransportConnector>,
}

/// Resources held by a running session. Taking them out of `Inner` is the
/// only way to release them, so each is released exactly once.
#[derive(Default)]
struct Resources {
    capture_task: Option<JoinHandle<()>>,
    capture: Option<Box<dyn CaptureBackend>>,
    playback: Option<Arc<dyn PlaybackOutput>>,
    transport: Option<TransportHandle>,
}

impl Resources {
    fn is_empty(&self) -> bool {
        self.capture_task.is_none()
            && self.capture.is_none()
            && self.playback.is_none()
            && self.transport.is_none()
    }

    fn merge(&mut self, other: Resources) {
        if other.capture_task.is_some() {
            self.capture_task = other.capture_task;
        }
        if other.capture.is_some() {
            self.capture = other.capture;
        }
        if other.playback.is_some() {
            self.playback = other.playback;
        }
        if other.transport.is_some() {
            self.transport = other.transport;
        }
    }
}

struct Inner {
    state: LifecycleState,

    /// Bumped on every start; tasks of earlier sessions compare against it
    generation: u64,

    session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    scheduler: PlaybackScheduler,
    transcript: Vec<TranscriptEntry>,
    profile: ProfileSnapshot,
    last_error: Option<String>,

    frames_sent: u64,
    blocks_discarded: u64,
    frames_received: u64,
    frames_scheduled: u64,

    resources: Resources,
    event_loop: Option<JoinHandle<()>>,
}

struct Shared {
    config: SessionConfig,
    collaborators: Collaborators,
    inner: Mutex<Inner>,
    muted: AtomicBool,
    state_tx: watch::Sender<LifecycleState>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl Shared {
    fn publish(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    /// Apply `trigger`; returns false when it does not apply in the current state
    fn transition(&self, inner: &mut Inner, trigger: Trigger) -> bool {
        let Some(next) = inner.state.transition(trigger) else {
            debug!("Ignoring {:?} while {}", trigger, inner.state);
            return false;
        };

        info!("Session state: {} -> {}", inner.state, next);
        inner.state = next;
        self.state_tx.send_replace(next);
        self.publish(SessionUpdate::StateChanged(next));

        if next.is_terminal() && inner.scheduler.silence() {
            self.publish(SessionUpdate::AgentSpeaking(false));
        }
        true
    }

    /// Record a fatal error and move to `error`
    fn fail(&self, inner: &mut Inner, failure: &SessionError) -> bool {
        let trigger = match failure {
            SessionError::RemoteError(_) => Trigger::RemoteError,
            _ => Trigger::Failure,
        };
        if !self.transition(inner, trigger) {
            return false;
        }

        error!("Session failed: {}", failure);
        let message = failure.to_string();
        inner.last_error = Some(message.clone());
        self.publish(SessionUpdate::Error(message));
        true
    }

    /// Resources to release once the lock is dropped, if the session just ended
    fn take_if_finished(inner: &mut Inner) -> Option<Resources> {
        if inner.state.is_terminal() && !inner.resources.is_empty() {
            Some(std::mem::take(&mut inner.resources))
        } else {
            None
        }
    }
}

/// Drives one conversation at a time: negotiation, transport, capture,
/// playback, transcript and profile.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Idle);
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        let inner = Inner {
            state: LifecycleState::Idle,
            generation: 0,
            session_id: None,
            started_at: None,
            scheduler: PlaybackScheduler::new(config.sample_rate, config.speaking_tolerance_secs),
            transcript: Vec::new(),
            profile: ProfileSnapshot::new(),
            last_error: None,
            frames_sent: 0,
            blocks_discarded: 0,
            frames_received: 0,
            frames_scheduled: 0,
            resources: Resources::default(),
            event_loop: None,
        };

        Self {
            shared: Arc::new(Shared {
                config,
                collaborators,
                inner: Mutex::new(inner),
                muted: AtomicBool::new(false),
                state_tx,
                updates,
            }),
        }
    }

    /// Start a new conversation.
    ///
    /// Returns the backend session id once the transport is open. The
    /// session becomes `active` when the backend sends `ready`.
    pub async fn start(&self) -> SessionResult<String> {
        let generation = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != LifecycleState::Idle {
                warn!("Session already in progress ({})", inner.state);
                return Err(SessionError::SessionInProgress(inner.state));
            }

            inner.generation += 1;
            inner.session_id = None;
            inner.started_at = Some(Utc::now());
            inner.scheduler = PlaybackScheduler::new(
                self.shared.config.sample_rate,
                self.shared.config.speaking_tolerance_secs,
            );
            inner.transcript.clear();
            inner.profile = ProfileSnapshot::new();
            inner.last_error = None;
            inner.frames_sent = 0;
            inner.blocks_discarded = 0;
            inner.frames_received = 0;
            inner.frames_scheduled = 0;

            self.shared.transition(&mut inner, Trigger::Start);
            inner.generation
        };

        match self.connect(generation).await {
            Ok(session_id) => Ok(session_id),
            Err(e) => Err(self.abort_start(generation, e).await),
        }
    }

    async fn connect(&self, generation: u64) -> SessionResult<String> {
        let shared = &self.shared;
        let collaborators = &shared.collaborators;

        let identity = collaborators
            .identity
            .current_identity()
            .await
            .ok_or(SessionError::Unauthenticated)?;
        info!("Starting session for user {}", identity.user_id);

        let constraints = shared.config.microphone_constraints();
        let capture = collaborators.devices.open_microphone(&constraints).await?;
        info!("Microphone opened: {}", capture.name());
        self.hold(
            generation,
            Resources {
                capture: Some(capture),
                ..Default::default()
            },
        )
        .await?;

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let playback = collaborators
            .devices
            .open_playback(shared.config.sample_rate, ended_tx)
            .await?;
        info!("Playback output opened: {}", playback.name());
        self.hold(
            generation,
            Resources {
                playback: Some(Arc::clone(&playback)),
                ..Default::default()
            },
        )
        .await?;

        let negotiation_timeout = shared.config.negotiation_timeout;
        let negotiated = tokio::time::timeout(
            negotiation_timeout,
            collaborators.negotiator.negotiate(&identity.user_id),
        )
        .await
        .map_err(|_| {
            SessionError::SessionNegotiationFailed(format!(
                "no response within {:?}",
                negotiation_timeout
            ))
        })??;

        {
            let mut inner = shared.inner.lock().await;
            if inner.generation != generation || inner.state != LifecycleState::Connecting {
                return Err(SessionError::Cancelled);
            }
            inner.session_id = Some(negotiated.session_id.clone());
        }

        let connect_timeout = shared.config.connect_timeout;
        let transport = tokio::time::timeout(
            connect_timeout,
            collaborators.connector.connect(&negotiated.websocket_url),
        )
        .await
        .map_err(|_| {
            SessionError::TransportError(format!(
                "connection not established within {:?}",
                connect_timeout
            ))
        })??;
        let handle = transport.handle;
        self.hold(
            generation,
            Resources {
                transport: Some(handle.clone()),
                ..Default::default()
            },
        )
        .await?;
        info!("Connected to conversation {}", negotiated.session_id);

        // The event loop starts before capture so nothing sent by the backend
        // is missed; both check the generation on every callback
        let event_loop = tokio::spawn(self.clone().run_event_loop(
            generation,
            playback,
            transport.events,
            ended_rx,
        ));

        let mut capture = {
            let mut inner = shared.inner.lock().await;
            inner.event_loop = Some(event_loop);
            // `ready` may already have been handled by the event loop
            if inner.generation != generation || !inner.state.accepts_capture() {
                return Err(SessionError::Cancelled);
            }
            inner
                .resources
                .capture
                .take()
                .ok_or(SessionError::Cancelled)?
        };

        // Device start happens outside the lock
        let started = capture.start().await;

        let mut inner = shared.inner.lock().await;
        if inner.generation != generation || !inner.state.accepts_capture() {
            drop(inner);
            info!("Session was stopped while starting capture, releasing microphone");
            release(Resources {
                capture: Some(capture),
                ..Default::default()
            })
            .await;
            return Err(SessionError::Cancelled);
        }
        inner.resources.capture = Some(capture);

        let blocks =
            started.map_err(|e| SessionError::DeviceAccessDenied(format!("{:#}", e)))?;
        let capture_task = tokio::spawn(Self::run_capture(
            Arc::clone(shared),
            generation,
            handle,
            blocks,
        ));
        inner.resources.capture_task = Some(capture_task);

        Ok(negotiated.session_id)
    }

    /// Store freshly acquired resources, or release them at once if the
    /// session moved on while they were being acquired
    async fn hold(&self, generation: u64, acquired: Resources) -> SessionResult<()> {
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.generation == generation && inner.state == LifecycleState::Connecting {
                inner.resources.merge(acquired);
                return Ok(());
            }
        }

        info!("Session was stopped while starting, releasing resources");
        release(acquired).await;
        Err(SessionError::Cancelled)
    }

    async fn abort_start(&self, generation: u64, failure: SessionError) -> SessionError {
        if failure == SessionError::Cancelled {
            return failure;
        }

        let resources = {
            let mut inner = self.shared.inner.lock().await;
            if inner.generation != generation {
                return failure;
            }
            self.shared.fail(&mut inner, &failure);
            std::mem::take(&mut inner.resources)
        };

        release(resources).await;
        failure
    }

    /// End the conversation.
    ///
    /// Sends `end_conversation` if the transport is open, then releases every
    /// resource. Calling it again, or in any state other than `connecting` or
    /// `active`, only returns the current statistics.
    pub async fn stop(&self) -> SessionResult<SessionStats> {
        let (resources, generation) = {
            let mut inner = self.shared.inner.lock().await;
            if !self.shared.transition(&mut inner, Trigger::UserStop) {
                drop(inner);
                return Ok(self.get_stats().await);
            }
            (std::mem::take(&mut inner.resources), inner.generation)
        };

        let transport_open = resources
            .transport
            .as_ref()
            .map(TransportHandle::is_open)
            .unwrap_or(false);

        if let Some(transport) = resources.transport.as_ref().filter(|_| transport_open) {
            match transport.send_control(&ControlMessage::EndConversation) {
                Ok(()) => info!("Sent end_conversation"),
                Err(e) => warn!("Failed to send end_conversation: {}", e),
            }
        }

        release(resources).await;

        if transport_open {
            tokio::spawn(Self::expire_close(Arc::clone(&self.shared), generation));
        } else {
            // With no open transport nothing will report the close
            let mut inner = self.shared.inner.lock().await;
            if inner.generation == generation {
                self.shared.transition(&mut inner, Trigger::TransportClosed);
            }
        }

        Ok(self.get_stats().await)
    }

    /// Complete a stopped session whose backend never answered the close
    async fn expire_close(shared: Arc<Shared>, generation: u64) {
        tokio::time::sleep(shared.config.close_timeout).await;

        let mut inner = shared.inner.lock().await;
        if inner.generation == generation && inner.state == LifecycleState::Ending {
            warn!(
                "Transport not closed within {:?} of stopping, treating it as closed",
                shared.config.close_timeout
            );
            shared.transition(&mut inner, Trigger::TransportClosed);
        }
    }

    /// Return a finished session to `idle`. No-op in any other state.
    pub async fn reset(&self) -> LifecycleState {
        let (resources, event_loop) = {
            let mut inner = self.shared.inner.lock().await;
            if !self.shared.transition(&mut inner, Trigger::Reset) {
                return inner.state;
            }
            inner.last_error = None;
            (
                std::mem::take(&mut inner.resources),
                inner.event_loop.take(),
            )
        };

        if let Some(event_loop) = event_loop {
            event_loop.abort();
        }
        release(resources).await;

        LifecycleState::Idle
    }

    pub fn set_muted(&self, muted: bool) {
        let previous = self.shared.muted.swap(muted, Ordering::SeqCst);
        if previous != muted {
            info!("Microphone {}", if muted { "muted" } else { "unmuted" });
            self.shared.publish(SessionUpdate::Muted(muted));
        }
    }

    /// Flip the mute flag and return the new value
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.shared.muted.fetch_xor(true, Ordering::SeqCst);
        info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        self.shared.publish(SessionUpdate::Muted(muted));
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LifecycleState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver that always holds the latest lifecycle state
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.shared.updates.subscribe()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.shared.inner.lock().await.session_id.clone()
    }

    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.shared.inner.lock().await.transcript.clone()
    }

    pub async fn profile(&self) -> ProfileSnapshot {
        self.shared.inner.lock().await.profile.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.shared.inner.lock().await.last_error.clone()
    }

    pub async fn is_agent_speaking(&self) -> bool {
        self.shared.inner.lock().await.scheduler.is_speaking()
    }

    pub async fn get_stats(&self) -> SessionStats {
        let inner = self.shared.inner.lock().await;

        let duration_secs = inner
            .started_at
            .map(|started| (Utc::now() - started).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            session_id: inner.session_id.clone(),
            state: inner.state,
            started_at: inner.started_at,
            duration_secs,
            frames_sent: inner.frames_sent,
            blocks_discarded: inner.blocks_discarded,
            frames_received: inner.frames_received,
            frames_scheduled: inner.frames_scheduled,
            transcript_entries: inner.transcript.len(),
            agent_speaking: inner.scheduler.is_speaking(),
            muted: self.is_muted(),
            last_error: inner.last_error.clone(),
        }
    }

    async fn run_capture(
        shared: Arc<Shared>,
        generation: u64,
        transport: TransportHandle,
        mut blocks: mpsc::Receiver<Vec<f32>>,
    ) {
        info!("Capture task started");

        while let Some(block) = blocks.recv().await {
            let mut inner = shared.inner.lock().await;

            let gate = CaptureGate {
                transport_open: transport.is_open(),
                muted: shared.muted.load(Ordering::SeqCst),
                session_live: inner.generation == generation && inner.state.accepts_capture(),
            };

            let outcome = match process_block(&block, gate) {
                BlockOutcome::Send(frame) => match transport.send_audio(frame) {
                    Ok(()) => {
                        inner.frames_sent += 1;
                        capture::log_sent(inner.frames_sent, &block);
                        continue;
                    }
                    Err(e) => {
                        debug!("Dropping audio frame: {}", e);
                        BlockOutcome::DiscardedTransportClosed
                    }
                },
                discarded => discarded,
            };

            inner.blocks_discarded += 1;
            capture::log_discarded(inner.blocks_discarded, &outcome);
        }

        info!("Capture task stopped");
    }

    async fn run_event_loop(
        self,
        generation: u64,
        playback: Arc<dyn PlaybackOutput>,
        mut events: mpsc::Receiver<TransportEvent>,
        mut ended: mpsc::UnboundedReceiver<PlaybackEnded>,
    ) {
        info!("Session event loop started");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Closed) | None => {
                        self.on_transport_closed(generation).await;
                        break;
                    }
                    Some(TransportEvent::Error(message)) => {
                        self.on_failure(generation, SessionError::TransportError(message))
                            .await;
                    }
                    Some(TransportEvent::Message(message)) => match route(message) {
                        Ok(Routed::Audio(payload)) => {
                            self.on_audio(generation, playback.as_ref(), &payload).await;
                        }
                        Ok(Routed::Event(event)) => self.on_event(generation, event).await,
                        Err(e) => warn!("Dropping inbound message: {}", e),
                    },
                },
                Some(done) = ended.recv() => {
                    self.on_playback_ended(generation, playback.as_ref(), done).await;
                }
            }
        }

        info!("Session event loop stopped");
    }

    async fn on_audio(&self, generation: u64, playback: &dyn PlaybackOutput, payload: &[u8]) {
        let mut inner = self.shared.inner.lock().await;
        if inner.generation != generation {
            return;
        }

        inner.frames_received += 1;
        if !inner.state.accepts_playback() {
            debug!("Dropping agent audio while {}", inner.state);
            return;
        }

        let Some(frame) = inner.scheduler.schedule(payload, playback.now()) else {
            debug!("Skipping unplayable audio frame ({} bytes)", payload.len());
            return;
        };

        if let Err(e) = playback.schedule(frame.samples, frame.start) {
            warn!("Failed to schedule agent audio: {:#}", e);
            return;
        }

        inner.frames_scheduled += 1;
        if frame.started_speaking {
            self.shared.publish(SessionUpdate::AgentSpeaking(true));
        }
    }

    async fn on_playback_ended(
        &self,
        generation: u64,
        playback: &dyn PlaybackOutput,
        done: PlaybackEnded,
    ) {
        let mut inner = self.shared.inner.lock().await;
        if inner.generation != generation {
            return;
        }

        if inner.scheduler.frame_ended(playback.now()) {
            debug!("Agent finished speaking at {:.3}s", done.end);
            self.shared.publish(SessionUpdate::AgentSpeaking(false));
        }
    }

    async fn on_event(&self, generation: u64, event: InboundEvent) {
        let finished = {
            let mut inner = self.shared.inner.lock().await;
            if inner.generation != generation {
                return;
            }
            if inner.state.is_terminal() {
                debug!("Ignoring {:?} after session finished", event);
                return;
            }

            match event {
                InboundEvent::Ready { session_id } => {
                    if self.shared.transition(&mut inner, Trigger::Ready) {
                        info!(
                            "Conversation ready{}",
                            session_id
                                .map(|id| format!(" ({})", id))
                                .unwrap_or_default()
                        );
                    }
                }
                InboundEvent::UserTranscript(text) => {
                    self.append_transcript(&mut inner, Role::User, text)
                }
                InboundEvent::AgentResponse(text) => {
                    self.append_transcript(&mut inner, Role::Agent, text)
                }
                InboundEvent::ProfileUpdated(Some(profile)) => {
                    info!("Profile updated ({} fields)", profile.len());
                    inner.profile = profile.clone();
                    self.shared.publish(SessionUpdate::Profile(profile));
                }
                InboundEvent::ProfileUpdated(None) => {
                    debug!("profile_updated without a profile");
                }
                InboundEvent::SessionEnded(profile) => {
                    let profile = profile.unwrap_or_default();
                    info!("Session ended by agent ({} profile fields)", profile.len());
                    inner.profile = profile.clone();
                    self.shared.publish(SessionUpdate::Profile(profile));
                    self.shared.transition(&mut inner, Trigger::RemoteEnded);
                }
                InboundEvent::Error(message) => {
                    let message = message.unwrap_or_else(|| UNKNOWN_REMOTE_ERROR.to_string());
                    self.shared
                        .fail(&mut inner, &SessionError::RemoteError(message));
                }
                InboundEvent::Metadata => info!("Conversation initiated with voice agent"),
                InboundEvent::Unrecognized(kind) => debug!("Unknown message type: {}", kind),
            }

            Shared::take_if_finished(&mut inner)
        };

        if let Some(resources) = finished {
            release(resources).await;
        }
    }

    fn append_transcript(&self, inner: &mut Inner, role: Role, text: Option<String>) {
        let Some(text) = text.filter(|t| !t.is_empty()) else {
            return;
        };

        debug!("{:?}: {}", role, text);
        let entry = TranscriptEntry::new(role, text);
        inner.transcript.push(entry.clone());
        self.shared.publish(SessionUpdate::Transcript(entry));
    }

    async fn on_transport_closed(&self, generation: u64) {
        let finished = {
            let mut inner = self.shared.inner.lock().await;
            if inner.generation != generation {
                return;
            }

            if let Some(transport) = &inner.resources.transport {
                transport.mark_closed();
            }

            if inner.state == LifecycleState::Connecting {
                self.shared.fail(
                    &mut inner,
                    &SessionError::TransportError(
                        "connection closed before the session was ready".into(),
                    ),
                );
            } else {
                info!("Transport closed");
                self.shared.transition(&mut inner, Trigger::TransportClosed);
            }

            Shared::take_if_finished(&mut inner)
        };

        if let Some(resources) = finished {
            release(resources).await;
        }
    }

    async fn on_failure(&self, generation: u64, failure: SessionError) {
        let finished = {
            let mut inner = self.shared.inner.lock().await;
            if inner.generation != generation {
                return;
            }

            // Peers often drop the socket instead of finishing the close
            // handshake; once the user has stopped that still counts as closed
            if inner.state == LifecycleState::Ending {
                debug!("Transport failed while ending: {}", failure);
                self.shared.transition(&mut inner, Trigger::TransportClosed);
            } else {
                self.shared.fail(&mut inner, &failure);
            }
            Shared::take_if_finished(&mut inner)
        };

        if let Some(resources) = finished {
            release(resources).await;
        }
    }
}

/// Release session resources: stop capture processing, release the
/// microphone, close playback, close the transport. Each step is attempted
/// even if an earlier one fails.
async fn release(resources: Resources) {
    if resources.is_empty() {
        return;
    }
    info!("Releasing session resources");

    let Resources {
        capture_task,
        capture,
        playback,
        transport,
    } = resources;

    // Dropping the task drops the block receiver, disconnecting the source
    if let Some(task) = capture_task {
        task.abort();
    }

    if let Some(mut capture) = capture {
        if let Err(e) = capture.stop().await {
            warn!("Failed to stop {}: {:#}", capture.name(), e);
        }
    }

    if let Some(playback) = playback {
        if let Err(e) = playback.close().await {
            warn!("Failed to close {}: {:#}", playback.name(), e);
        }
    }

    if let Some(transport) = transport {
        if transport.close() {
            debug!("Transport close requested");
        }
    }
}

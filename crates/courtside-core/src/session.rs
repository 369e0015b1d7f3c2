//! Playback Session - ties engine events to saved progress and navigation
//!
//! Coordinates:
//! - Resume from the saved position once the engine is ready
//! - Progress saves on pause, seek, back and backgrounding
//! - Progress clear and navigation back on completion
//! - Synchronous engine teardown when the app is backgrounded
//! - Audio track re-selection when the variant ladder changes
//! - Listener cleanup, exactly once, on teardown

use crate::adapter::{PlaybackEngineAdapter, DEFAULT_DEINIT_TIMEOUT};
use crate::capability::DeviceCapabilityMonitor;
use crate::engine::{EngineEvent, EventListener, ListenerId};
use crate::progress::ProgressStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Engine events the session reacts to
const SESSION_EVENTS: [EngineEvent; 5] = [
    EngineEvent::Playing,
    EngineEvent::Pause,
    EngineEvent::Seeked,
    EngineEvent::Ended,
    EngineEvent::VariantsChanged,
];

/// How long teardown waits for queued events before abandoning them
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Work queued for the session's event task
enum SessionMessage {
    Event(EngineEvent),
    /// Handle what is already queued, then stop
    Shutdown,
}

/// Navigation requested by the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Navigation {
    /// Return to the previous screen
    Back,
    /// Replace the stack with the details screen for this media
    ResetToDetails {
        media_id: String,
        endpoint: Option<String>,
    },
}

/// Navigation collaborator
pub trait Navigator: Send + Sync {
    fn navigate(&self, request: Navigation);
}

/// Host application lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Active,
    Inactive,
    Background,
}

/// Where the session is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Waiting for the engine
    Initializing,
    /// Engine ready, resume applied
    Playable,
    /// Playback reached the end
    Completed,
    /// App left the foreground; engine destroyed
    Backgrounded,
    /// Torn down
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Initializing => write!(f, "initializing"),
            SessionPhase::Playable => write!(f, "playable"),
            SessionPhase::Completed => write!(f, "completed"),
            SessionPhase::Backgrounded => write!(f, "backgrounded"),
            SessionPhase::Closed => write!(f, "closed"),
        }
    }
}

/// What the session is playing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    pub media_id: String,
    /// Details endpoint the app returns to on backgrounding
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl SessionParams {
    pub fn new(media_id: impl Into<String>) -> Self {
        Self {
            media_id: media_id.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }
}

struct SessionInner {
    params: SessionParams,
    adapter: Arc<PlaybackEngineAdapter>,
    progress: ProgressStore,
    navigator: Arc<dyn Navigator>,
    monitor: OnceLock<Arc<DeviceCapabilityMonitor>>,
    phase: watch::Sender<SessionPhase>,
}

impl SessionInner {
    fn set_phase(&self, phase: SessionPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            info!(media_id = %self.params.media_id, from = %previous, to = %phase, "Session phase");
        }
    }

    /// Save the engine-reported position unless it is zero or unavailable
    async fn save_progress(&self) -> bool {
        match self.adapter.current_time() {
            Some(current_time) if current_time > 0.0 => {
                self.progress
                    .set_progress(&self.params.media_id, current_time)
                    .await
            }
            current_time => {
                debug!(current_time = ?current_time, "Skipping progress save");
                false
            }
        }
    }

    async fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Playing => debug!(media_id = %self.params.media_id, "Playback started"),
            EngineEvent::Pause | EngineEvent::Seeked => {
                self.save_progress().await;
            }
            EngineEvent::Ended => {
                info!(media_id = %self.params.media_id, "Playback ended");
                self.progress.clear_progress(&self.params.media_id).await;
                self.set_phase(SessionPhase::Completed);
                self.navigator.navigate(Navigation::Back);
            }
            EngineEvent::Error => warn!(media_id = %self.params.media_id, "Engine reported an error"),
            EngineEvent::VariantsChanged => match self.monitor.get() {
                Some(monitor) => {
                    let outcome = monitor.reselect();
                    debug!(
                        selected = ?outcome.as_ref().and_then(|o| o.selected.as_ref()).map(|q| q.variant.token),
                        switched = outcome.as_ref().is_some_and(|o| o.switched),
                        "Re-selected audio track for new variants"
                    );
                }
                None => debug!("Variants changed; no capability monitor"),
            },
        }
    }
}

/// Orchestrates one playback screen
pub struct PlaybackSessionController {
    inner: Arc<SessionInner>,
    listeners: Mutex<Vec<ListenerId>>,
    events: Mutex<Option<mpsc::UnboundedSender<SessionMessage>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PlaybackSessionController {
    pub fn new(
        params: SessionParams,
        adapter: Arc<PlaybackEngineAdapter>,
        progress: ProgressStore,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Initializing);

        Self {
            inner: Arc::new(SessionInner {
                params,
                adapter,
                progress,
                navigator,
                monitor: OnceLock::new(),
                phase,
            }),
            listeners: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Re-run track selection when the engine becomes ready or the variant
    /// ladder changes, and tear the monitor down with the session.
    pub fn with_capability_monitor(self, monitor: Arc<DeviceCapabilityMonitor>) -> Self {
        if self.inner.monitor.set(monitor).is_err() {
            warn!("Capability monitor already set");
        }
        self
    }

    pub fn params(&self) -> &SessionParams {
        &self.inner.params
    }

    pub fn adapter(&self) -> &Arc<PlaybackEngineAdapter> {
        &self.inner.adapter
    }

    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase.borrow()
    }

    /// Subscribe to phase changes
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase.subscribe()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<ListenerId>> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Resume from the saved position, start listening for engine events and
    /// mark the session playable.
    ///
    /// A failed resume seek is logged and playback starts from the top.
    #[instrument(skip(self), fields(media_id = %self.inner.params.media_id))]
    pub async fn on_engine_ready(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) || !self.listeners().is_empty() {
            return Ok(());
        }

        if let Some(position) = self.inner.progress.get_progress(&self.inner.params.media_id).await {
            match self.inner.adapter.seek(position) {
                Ok(()) => info!(position, "Resumed from saved progress"),
                Err(e) => warn!(position, error = %e, "Failed to seek to saved progress"),
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<SessionMessage>();
        let mut registered = Vec::with_capacity(SESSION_EVENTS.len());
        for event in SESSION_EVENTS {
            let tx = tx.clone();
            let listener: EventListener = Arc::new(move |fired: EngineEvent| {
                let _ = tx.send(SessionMessage::Event(fired));
            });
            match self.inner.adapter.add_event_listener(event, listener) {
                Ok(id) => registered.push(id),
                Err(e) => {
                    for id in registered {
                        self.inner.adapter.remove_event_listener(id);
                    }
                    return Err(e);
                }
            }
        }
        *self.listeners() = registered;
        if let Ok(mut events) = self.events.lock() {
            *events = Some(tx);
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    SessionMessage::Event(event) => inner.handle_event(event).await,
                    SessionMessage::Shutdown => break,
                }
            }
        });
        if let Ok(mut task) = self.task.lock() {
            if let Some(previous) = task.replace(handle) {
                previous.abort();
            }
        }

        if let Some(monitor) = self.inner.monitor.get() {
            let device = monitor.capability().current_device;
            monitor.update_audio_capabilities_for_device(device).await;
        }

        self.inner.set_phase(SessionPhase::Playable);
        Ok(())
    }

    /// Handle one engine event directly
    pub async fn handle_event(&self, event: EngineEvent) {
        self.inner.handle_event(event).await;
    }

    /// Save the current position unless it is zero or unavailable. Returns
    /// whether a save happened.
    pub async fn save_progress(&self) -> bool {
        self.inner.save_progress().await
    }

    /// Forget the saved position for this media
    pub async fn clear_saved_progress(&self) -> bool {
        self.inner.progress.clear_progress(&self.inner.params.media_id).await
    }

    /// React to the host app changing lifecycle state
    #[instrument(skip(self), fields(media_id = %self.inner.params.media_id))]
    pub async fn on_app_state_change(&self, state: AppState) {
        debug!(state = ?state, "App state change");
        if state != AppState::Background {
            return;
        }

        self.inner.save_progress().await;
        self.inner.adapter.destroy_sync(DEFAULT_DEINIT_TIMEOUT);
        self.inner.set_phase(SessionPhase::Backgrounded);

        let params = &self.inner.params;
        self.inner.navigator.navigate(Navigation::ResetToDetails {
            media_id: params.media_id.clone(),
            endpoint: params.endpoint.clone(),
        });
    }

    /// Hardware back: save and leave. Always consumes the event.
    pub async fn on_back_pressed(&self) -> bool {
        self.inner.save_progress().await;
        self.inner.navigator.navigate(Navigation::Back);
        true
    }

    /// Unregister engine listeners, finish handling events already queued
    /// and stop event processing. Safe to call more than once; only the
    /// first call does anything.
    #[instrument(skip(self), fields(media_id = %self.inner.params.media_id))]
    pub async fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let listeners: Vec<ListenerId> = self.listeners().drain(..).collect();
        for id in &listeners {
            if !self.inner.adapter.remove_event_listener(*id) {
                debug!(listener = id.0, "Listener already gone");
            }
        }

        // Shutdown queues behind any event fired before the listeners went away
        let sender = self.events.lock().ok().and_then(|mut events| events.take());
        if let Some(sender) = sender {
            let _ = sender.send(SessionMessage::Shutdown);
        }
        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(mut handle) = task {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await.is_err() {
                warn!("Event task did not drain in time");
                handle.abort();
            }
        }

        if let Some(monitor) = self.inner.monitor.get() {
            monitor.teardown().await;
        }

        self.inner.set_phase(SessionPhase::Closed);
        info!(listeners = listeners.len(), "Session torn down");
    }
}

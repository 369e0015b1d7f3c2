//! Playback Engine Adapter - lifecycle wrapper around the decoding engine
//!
//! Coordinates:
//! - Filter installation, engine configuration and DRM setup on load
//! - Deferred text-track registration until the manifest is loaded
//! - Variant enumeration and quality switching
//! - The `Idle -> Loading -> Ready -> Destroyed` state machine

use crate::engine::{
    EngineConfig, EngineEvent, EventListener, ListenerId, PlaybackEngine, PlaybackStatus,
};
use crate::filters::RequestFilterPipeline;
use crate::labeler;
use crate::selector::QualityController;
use crate::text_tracks::{Submission, TextTrackManager};
use crate::types::*;
use crate::{Error, LoadError, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Default timeout for [`PlaybackEngineAdapter::destroy_sync`]
pub const DEFAULT_DEINIT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Clamp a position to `[0, duration]`. Without a known duration only the
/// lower bound applies; NaN becomes zero.
fn constrain_time(seconds: f64, duration: Option<f64>) -> f64 {
    let upper = duration.filter(|d| d.is_finite() && *d >= 0.0).unwrap_or(f64::INFINITY);
    if seconds.is_nan() {
        0.0
    } else {
        seconds.clamp(0.0, upper)
    }
}

/// Owns one engine instance for one media source
pub struct PlaybackEngineAdapter {
    /// Unique adapter ID
    id: SessionId,
    /// Underlying engine
    engine: Arc<dyn PlaybackEngine>,
    /// Player settings
    settings: PlayerSettings,
    /// Business rules applied on load
    policy: PlaybackPolicy,
    /// Request/response filters and the routing prefix
    filters: RequestFilterPipeline,
    /// Text tracks waiting for the engine
    text_tracks: Mutex<TextTrackManager>,
    /// Current state, broadcast to subscribers
    state: watch::Sender<AdapterState>,
}

impl PlaybackEngineAdapter {
    pub fn new(engine: Arc<dyn PlaybackEngine>, settings: PlayerSettings, policy: PlaybackPolicy) -> Self {
        let (state, _) = watch::channel(AdapterState::Idle);

        Self {
            id: SessionId::new(),
            engine,
            settings,
            policy,
            filters: RequestFilterPipeline::new(),
            text_tracks: Mutex::new(TextTrackManager::new()),
            state,
        }
    }

    /// Get adapter ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Get current state
    pub fn state(&self) -> AdapterState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe_state(&self) -> watch::Receiver<AdapterState> {
        self.state.subscribe()
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    /// Routing prefix captured by the current load (empty if none)
    pub fn routing_prefix(&self) -> String {
        self.filters.routing_prefix()
    }

    fn tracks(&self) -> MutexGuard<'_, TextTrackManager> {
        match self.text_tracks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Transition to new state
    fn set_state(&self, new_state: AdapterState) -> Result<()> {
        let mut result = Ok(());

        self.state.send_if_modified(|current| {
            if !current.can_transition_to(new_state) {
                result = Err(Error::InvalidStateTransition {
                    from: *current,
                    to: new_state,
                });
                return false;
            }

            info!(adapter = %self.id, from = %current, to = %new_state, "State transition");
            *current = new_state;
            true
        });

        result
    }

    fn require_ready(&self) -> Result<()> {
        match self.state() {
            AdapterState::Ready => Ok(()),
            AdapterState::Destroyed => Err(Error::Destroyed),
            state => Err(Error::NotReady { state }),
        }
    }

    /// The load continues only while nothing has unloaded the adapter
    fn ensure_loading(&self) -> std::result::Result<(), LoadError> {
        if self.state() == AdapterState::Loading {
            Ok(())
        } else {
            Err(LoadError::Interrupted)
        }
    }

    /// Load a media source into the engine.
    ///
    /// On failure the adapter ends in `Failed` and must be discarded. If
    /// `unload()` runs while this is in flight, the load stops at its next
    /// step with [`LoadError::Interrupted`] and makes no further engine calls.
    #[instrument(skip(self, source), fields(adapter = %self.id, uri = %source.uri))]
    pub async fn load(&self, source: &MediaSource, autoplay: bool) -> Result<()> {
        if self.state().is_terminal() {
            return Err(Error::Destroyed);
        }
        self.set_state(AdapterState::Loading)?;

        // Initial tracks queue behind anything added before load()
        {
            let mut tracks = self.tracks();
            for track in &source.text_tracks {
                tracks.submit(track.clone());
            }
        }

        match self.run_load(source, autoplay).await {
            Ok(()) => {
                info!(prefix = %self.filters.routing_prefix(), "Source loaded");
                Ok(())
            }
            Err(e) => {
                if self.state() == AdapterState::Loading {
                    error!(error = %e, code = Error::Load(e.clone()).error_code(), "Load failed");
                    let _ = self.set_state(AdapterState::Failed);
                } else {
                    warn!(state = %self.state(), "Load abandoned after unload");
                }
                Err(Error::Load(e))
            }
        }
    }

    async fn run_load(&self, source: &MediaSource, autoplay: bool) -> std::result::Result<(), LoadError> {
        let format = source.validate()?;

        self.engine
            .attach()
            .await
            .map_err(|e| LoadError::Engine(e.to_string()))?;
        self.ensure_loading()?;

        let filters = self.filters.install(self.engine.as_ref(), source);

        let config = EngineConfig::for_source(source, &self.settings, &self.policy);
        self.engine
            .configure(&config)
            .map_err(|e| LoadError::Engine(e.to_string()))?;

        if let Some(drm) = &config.drm {
            self.engine
                .configure_drm(drm)
                .map_err(|e| LoadError::DrmRejected(e.to_string()))?;
        }

        debug!(
            format = %format,
            filters,
            drm = config.drm.is_some(),
            abr_max_width = ?config.abr.restrictions.max_width,
            abr_max_height = ?config.abr.restrictions.max_height,
            "Engine configured"
        );

        self.engine.set_autoplay(autoplay);
        self.engine
            .load_manifest(&source.uri)
            .await
            .map_err(|e| LoadError::ManifestFetch(e.to_string()))?;
        self.ensure_loading()?;

        self.engine.set_text_track_visibility(true);
        self.flush_text_tracks().await?;

        self.set_state(AdapterState::Ready)
            .map_err(|_| LoadError::Interrupted)
    }

    /// Register buffered tracks one at a time, in submission order. Tracks
    /// submitted while this runs join the back of the queue.
    async fn flush_text_tracks(&self) -> std::result::Result<(), LoadError> {
        loop {
            let next = self.tracks().next_or_ready();
            let Some(track) = next else {
                return Ok(());
            };

            self.ensure_loading()?;
            match self.engine.add_text_track(&track).await {
                Ok(()) => debug!(language = %track.language, "Buffered text track registered"),
                Err(e) => warn!(language = %track.language, error = %e, "Failed to register text track"),
            }
        }
    }

    /// Start playback. No-op unless loaded.
    #[instrument(skip(self), fields(adapter = %self.id))]
    pub async fn play(&self) -> Result<()> {
        match self.state() {
            AdapterState::Ready => self.engine.play().await,
            AdapterState::Destroyed => Err(Error::Destroyed),
            state => {
                debug!(state = %state, "Ignoring play before load");
                Ok(())
            }
        }
    }

    /// Pause playback. No-op unless loaded.
    #[instrument(skip(self), fields(adapter = %self.id))]
    pub async fn pause(&self) -> Result<()> {
        match self.state() {
            AdapterState::Ready => self.engine.pause().await,
            AdapterState::Destroyed => Err(Error::Destroyed),
            state => {
                debug!(state = %state, "Ignoring pause before load");
                Ok(())
            }
        }
    }

    /// Set the playback position. Out-of-range values are left to the engine.
    #[instrument(skip(self), fields(adapter = %self.id))]
    pub fn seek(&self, seconds: f64) -> Result<()> {
        self.require_ready()?;
        self.engine.set_current_time(seconds);
        Ok(())
    }

    /// Move the playback position by `offset` seconds, clamped to the start
    /// and, when known, the end of the media. Returns the position sought to.
    #[instrument(skip(self), fields(adapter = %self.id))]
    pub fn seek_by(&self, offset: f64) -> Result<f64> {
        self.require_ready()?;
        let target = constrain_time(self.engine.current_time() + offset, self.engine.duration());
        self.engine.set_current_time(target);
        Ok(target)
    }

    /// Engine-reported playback position, if loaded
    pub fn current_time(&self) -> Option<f64> {
        match self.state() {
            AdapterState::Ready => Some(self.engine.current_time()),
            _ => None,
        }
    }

    /// Media duration, if loaded and known
    pub fn duration(&self) -> Option<f64> {
        match self.state() {
            AdapterState::Ready => self.engine.duration(),
            _ => None,
        }
    }

    /// Position as a percentage of the duration
    pub fn progress_percent(&self) -> Option<f64> {
        let duration = self.duration().filter(|d| d.is_finite() && *d > 0.0)?;
        let current = self.current_time()?;
        Some(current * 100.0 / duration)
    }

    /// What the media element is doing, if loaded
    pub fn playback_status(&self) -> Option<PlaybackStatus> {
        match self.state() {
            AdapterState::Ready => Some(self.engine.playback_status()),
            _ => None,
        }
    }

    /// Detach and destroy the engine. The adapter is unusable afterwards.
    #[instrument(skip(self), fields(adapter = %self.id))]
    pub async fn unload(&self) -> Result<()> {
        let previous = self.state();
        if previous.is_terminal() {
            return Err(Error::Destroyed);
        }
        self.set_state(AdapterState::Destroyed)?;
        self.tracks().reset();

        if previous == AdapterState::Idle {
            return Ok(());
        }

        if let Err(e) = self.engine.detach().await {
            warn!(error = %e, "Failed to detach engine");
        }
        if let Err(e) = self.engine.destroy().await {
            warn!(error = %e, "Failed to destroy engine");
        }

        info!("Engine unloaded");
        Ok(())
    }

    /// Tear the engine down without awaiting, e.g. when the app leaves the
    /// foreground. Returns whether the engine reported success; the adapter
    /// is `Destroyed` either way.
    pub fn destroy_sync(&self, timeout: Duration) -> bool {
        let previous = self.state();
        if self.set_state(AdapterState::Destroyed).is_err() {
            return false;
        }
        self.tracks().reset();

        if previous == AdapterState::Idle {
            return false;
        }

        let ok = self.engine.deinitialize_sync(timeout);
        if ok {
            info!(adapter = %self.id, "Engine deinitialized");
        } else {
            warn!(adapter = %self.id, timeout_ms = timeout.as_millis() as u64, "Engine deinitialization failed");
        }
        ok
    }

    // =========================================================================
    // Variants
    // =========================================================================

    /// Variants the engine offers, each with a display label
    pub fn available_qualities(&self) -> Result<Vec<QualityVariant>> {
        self.require_ready()?;

        Ok(self
            .engine
            .variant_tracks()
            .into_iter()
            .map(|variant| QualityVariant {
                label: labeler::label_for(&variant),
                variant,
            })
            .collect())
    }

    /// Activate a variant. Does nothing if it is already active.
    pub fn set_quality(&self, token: VariantToken) -> Result<()> {
        self.require_ready()?;

        let variants = self.engine.variant_tracks();
        let variant = variants
            .iter()
            .find(|v| v.token == token)
            .ok_or(Error::UnknownVariant(token.0))?;

        if variant.active {
            debug!(token = %token, "Variant already active");
            return Ok(());
        }

        self.engine.select_variant(token)?;
        info!(token = %token, bandwidth = variant.bandwidth, "Quality set");
        Ok(())
    }

    // =========================================================================
    // Text tracks
    // =========================================================================

    /// Register a text track, or queue it until the manifest is loaded
    pub async fn add_text_track(&self, track: TextTrack) -> Result<()> {
        match self.state() {
            AdapterState::Destroyed => return Err(Error::Destroyed),
            AdapterState::Failed => return Err(Error::NotReady { state: AdapterState::Failed }),
            _ => {}
        }

        let submission = self.tracks().submit(track);
        match submission {
            Submission::Immediate(track) => {
                self.engine.add_text_track(&track).await?;
                debug!(language = %track.language, "Text track registered");
            }
            Submission::Buffered { position } => {
                debug!(position, "Text track queued");
            }
        }
        Ok(())
    }

    pub fn text_tracks(&self) -> Result<Vec<EngineTextTrack>> {
        self.require_ready()?;
        Ok(self.engine.text_tracks())
    }

    /// Select a text track, or hide text with `None`
    pub fn select_text_track(&self, track: Option<&EngineTextTrack>) -> Result<()> {
        self.require_ready()?;

        match track {
            Some(track) => {
                self.engine.select_text_track(track.id)?;
                self.engine.set_text_track_visibility(true);
                debug!(id = track.id, language = %track.language, "Text track selected");
            }
            None => {
                self.engine.set_text_track_visibility(false);
                debug!("Text tracks hidden");
            }
        }
        Ok(())
    }

    pub fn active_text_track(&self) -> Result<Option<EngineTextTrack>> {
        self.require_ready()?;
        Ok(self.engine.text_tracks().into_iter().find(|t| t.active))
    }

    pub fn is_text_track_visible(&self) -> Result<bool> {
        self.require_ready()?;
        Ok(self.engine.is_text_track_visible())
    }

    // =========================================================================
    // Events
    // =========================================================================

    pub fn add_event_listener(&self, event: EngineEvent, listener: EventListener) -> Result<ListenerId> {
        if self.state().is_terminal() {
            return Err(Error::Destroyed);
        }
        Ok(self.engine.add_event_listener(event, listener))
    }

    /// Returns false if the listener was not registered. Safe after unload.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.engine.remove_event_listener(id)
    }
}

impl QualityController for PlaybackEngineAdapter {
    fn available_qualities(&self) -> Result<Vec<QualityVariant>> {
        PlaybackEngineAdapter::available_qualities(self)
    }

    fn set_quality(&self, token: VariantToken) -> Result<()> {
        PlaybackEngineAdapter::set_quality(self, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm::HW_SECURE_ALL;
    use crate::sim::{EngineCall, SimulatedEngine};

    fn ladder() -> Vec<Variant> {
        vec![
            Variant::new(1, 800_000).with_resolution(1280, 720).with_audio_codec("mp4a.40.2"),
            Variant::new(2, 3_000_000).with_resolution(1920, 1080).with_audio_codec("mp4a.40.2"),
        ]
    }

    fn source() -> MediaSource {
        MediaSource::new("https://cdn.example.com/game.mpd", MediaFormat::Dash)
    }

    fn adapter_with(engine: Arc<SimulatedEngine>) -> PlaybackEngineAdapter {
        PlaybackEngineAdapter::new(engine, PlayerSettings::default(), PlaybackPolicy::default())
    }

    fn track(language: &str) -> TextTrack {
        TextTrack::new(format!("https://cdn.example.com/{language}.vtt"), language, TextTrackKind::Subtitles)
    }

    fn registered_languages(engine: &SimulatedEngine) -> Vec<String> {
        engine
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::AddTextTrack(language) => Some(language),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_load_reaches_ready() {
        let engine = Arc::new(SimulatedEngine::new().with_variants(ladder()));
        let adapter = adapter_with(engine.clone());
        let mut states = adapter.subscribe_state();

        adapter.load(&source(), true).await.unwrap();

        assert_eq!(adapter.state(), AdapterState::Ready);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), AdapterState::Ready);
        assert!(engine.calls().contains(&EngineCall::SetTextTrackVisibility(true)));
        assert!(engine.drm().is_none());
        assert!(!engine
            .calls()
            .iter()
            .any(|c| matches!(c, EngineCall::ConfigureDrm(_))));
    }

    #[tokio::test]
    async fn test_secure_widevine_configures_hardware_drm() {
        let engine = Arc::new(SimulatedEngine::new().with_variants(ladder()));
        let adapter = adapter_with(engine.clone());
        let source = source()
            .with_drm("com.widevine.alpha", "https://license.example.com/wv")
            .secure(true);

        adapter.load(&source, false).await.unwrap();

        let drm = engine.drm().unwrap();
        assert_eq!(
            drm.servers.get("com.widevine.alpha").map(String::as_str),
            Some("https://license.example.com/wv")
        );
        let advanced = drm.advanced.get("com.widevine.alpha").unwrap();
        assert_eq!(advanced.video_robustness, HW_SECURE_ALL);
    }

    #[tokio::test]
    async fn test_manifest_failure_leaves_failed() {
        let engine = Arc::new(SimulatedEngine::new());
        engine.fail_manifest("404");
        let adapter = adapter_with(engine);

        let err = adapter.load(&source(), true).await.unwrap_err();
        assert!(matches!(err, Error::Load(LoadError::ManifestFetch(_))));
        assert_eq!(adapter.state(), AdapterState::Failed);

        // A failed adapter cannot be reloaded
        assert!(matches!(
            adapter.load(&source(), true).await,
            Err(Error::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_drm_rejection_is_load_error() {
        let engine = Arc::new(SimulatedEngine::new());
        engine.reject_drm();
        let adapter = adapter_with(engine.clone());

        let err = adapter
            .load(&source().with_drm("com.microsoft.playready", "https://license.example.com/pr"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Load(LoadError::DrmRejected(_))));
        assert!(!engine
            .calls()
            .iter()
            .any(|c| matches!(c, EngineCall::LoadManifest(_))));
    }

    #[tokio::test]
    async fn test_invalid_source_never_touches_engine() {
        let engine = Arc::new(SimulatedEngine::new());
        let adapter = adapter_with(engine.clone());
        let mut source = source();
        source.format = "flv".to_string();

        let err = adapter.load(&source, true).await.unwrap_err();
        assert!(matches!(err, Error::Load(LoadError::InvalidSource(_))));
        assert!(engine.calls().is_empty());
        assert_eq!(adapter.state(), AdapterState::Failed);
    }

    #[tokio::test]
    async fn test_controls_before_ready() {
        let engine = Arc::new(SimulatedEngine::new());
        let adapter = adapter_with(engine.clone());

        adapter.play().await.unwrap();
        adapter.pause().await.unwrap();
        assert!(engine.calls().is_empty());

        assert!(matches!(adapter.seek(10.0), Err(Error::NotReady { .. })));
        assert!(matches!(adapter.set_quality(VariantToken(1)), Err(Error::NotReady { .. })));
        assert!(adapter.current_time().is_none());
    }

    #[tokio::test]
    async fn test_text_tracks_buffered_until_ready() {
        let engine = Arc::new(SimulatedEngine::new());
        let adapter = adapter_with(engine.clone());

        adapter.add_text_track(track("en")).await.unwrap();
        adapter.add_text_track(track("es")).await.unwrap();
        assert!(registered_languages(&engine).is_empty());

        adapter
            .load(&source().with_text_track(track("fr")), true)
            .await
            .unwrap();
        assert_eq!(registered_languages(&engine), vec!["en", "es", "fr"]);

        // Manifest first, then the flush
        let calls = engine.calls();
        let manifest = calls.iter().position(|c| matches!(c, EngineCall::LoadManifest(_))).unwrap();
        let first_track = calls.iter().position(|c| matches!(c, EngineCall::AddTextTrack(_))).unwrap();
        assert!(manifest < first_track);

        adapter.add_text_track(track("de")).await.unwrap();
        assert_eq!(registered_languages(&engine), vec!["en", "es", "fr", "de"]);
    }

    #[tokio::test]
    async fn test_text_track_submitted_during_flush_keeps_order() {
        let engine = Arc::new(SimulatedEngine::new());
        engine.set_text_track_delay(Duration::from_millis(20));
        let adapter = Arc::new(adapter_with(engine.clone()));

        adapter.add_text_track(track("en")).await.unwrap();
        let loading = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move { adapter.load(&source(), true).await })
        };

        // Wait until the flush has started
        tokio::time::timeout(Duration::from_secs(1), async {
            while registered_languages(&engine).is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        adapter.add_text_track(track("pt")).await.unwrap();

        loading.await.unwrap().unwrap();
        assert_eq!(registered_languages(&engine), vec!["en", "pt"]);
    }

    #[tokio::test]
    async fn test_set_quality_is_idempotent() {
        let engine = Arc::new(SimulatedEngine::new().with_variants(ladder()));
        let adapter = adapter_with(engine.clone());
        adapter.load(&source(), true).await.unwrap();

        let qualities = adapter.available_qualities().unwrap();
        assert_eq!(qualities[0].label, "720p HD");
        assert_eq!(qualities[1].label, "1080p FHD");

        adapter.set_quality(VariantToken(2)).unwrap();
        adapter.set_quality(VariantToken(2)).unwrap();
        let selects = engine
            .calls()
            .into_iter()
            .filter(|c| matches!(c, EngineCall::SelectVariant(_)))
            .count();
        assert_eq!(selects, 1);

        assert!(matches!(adapter.set_quality(VariantToken(42)), Err(Error::UnknownVariant(42))));
    }

    #[tokio::test]
    async fn test_select_text_track_and_hide() {
        let engine = Arc::new(SimulatedEngine::new());
        let adapter = adapter_with(engine.clone());
        adapter
            .load(&source().with_text_track(track("en")).with_text_track(track("es")), true)
            .await
            .unwrap();

        assert!(adapter.active_text_track().unwrap().is_none());

        let tracks = adapter.text_tracks().unwrap();
        adapter.select_text_track(Some(&tracks[1])).unwrap();
        assert_eq!(adapter.active_text_track().unwrap().unwrap().language, "es");
        assert!(adapter.is_text_track_visible().unwrap());

        adapter.select_text_track(None).unwrap();
        assert!(!adapter.is_text_track_visible().unwrap());
    }

    #[tokio::test]
    async fn test_unload_interrupts_load() {
        let engine = Arc::new(SimulatedEngine::new().with_variants(ladder()));
        engine.set_manifest_delay(Duration::from_millis(50));
        let adapter = Arc::new(adapter_with(engine.clone()));

        let loading = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move { adapter.load(&source(), true).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        adapter.unload().await.unwrap();

        let err = loading.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Load(LoadError::Interrupted)));
        assert_eq!(adapter.state(), AdapterState::Destroyed);

        // Nothing ran after the manifest came back
        assert!(!engine
            .calls()
            .contains(&EngineCall::SetTextTrackVisibility(true)));
    }

    #[tokio::test]
    async fn test_calls_after_unload_fail() {
        let engine = Arc::new(SimulatedEngine::new().with_variants(ladder()));
        let adapter = adapter_with(engine.clone());
        adapter.load(&source(), true).await.unwrap();
        adapter.unload().await.unwrap();

        assert!(engine.is_destroyed());
        assert!(matches!(adapter.play().await, Err(Error::Destroyed)));
        assert!(matches!(adapter.seek(1.0), Err(Error::Destroyed)));
        assert!(matches!(adapter.unload().await, Err(Error::Destroyed)));
        assert!(matches!(adapter.add_text_track(track("en")).await, Err(Error::Destroyed)));
        assert!(matches!(adapter.load(&source(), true).await, Err(Error::Destroyed)));
        assert!(matches!(
            adapter.add_event_listener(EngineEvent::Pause, Arc::new(|_: EngineEvent| {})),
            Err(Error::Destroyed)
        ));
        assert_eq!(engine.calls().iter().filter(|c| matches!(c, EngineCall::Attach)).count(), 1);
    }

    #[test]
    fn test_constrain_time() {
        assert_eq!(constrain_time(-5.0, Some(100.0)), 0.0);
        assert_eq!(constrain_time(140.0, Some(100.0)), 100.0);
        assert_eq!(constrain_time(140.0, None), 140.0);
        assert_eq!(constrain_time(f64::NAN, Some(100.0)), 0.0);
        assert_eq!(constrain_time(50.0, Some(f64::NAN)), 50.0);
    }

    #[tokio::test]
    async fn test_seek_by_clamps_to_media_bounds() {
        let engine = Arc::new(SimulatedEngine::new().with_variants(ladder()).with_duration(120.0));
        let adapter = adapter_with(engine.clone());
        assert!(matches!(adapter.seek_by(10.0), Err(Error::NotReady { .. })));
        adapter.load(&source(), true).await.unwrap();

        engine.advance_to(20.0);
        assert_eq!(adapter.seek_by(-30.0).unwrap(), 0.0);
        assert_eq!(adapter.current_time(), Some(0.0));

        assert_eq!(adapter.seek_by(45.0).unwrap(), 45.0);
        assert_eq!(adapter.seek_by(500.0).unwrap(), 120.0);
        assert_eq!(adapter.current_time(), Some(120.0));
        assert!(engine.calls().contains(&EngineCall::Seek(120.0)));
    }

    #[tokio::test]
    async fn test_duration_and_progress_percent() {
        let engine = Arc::new(SimulatedEngine::new().with_duration(200.0));
        let adapter = adapter_with(engine.clone());
        assert_eq!(adapter.duration(), None);
        assert_eq!(adapter.progress_percent(), None);

        adapter.load(&source(), false).await.unwrap();
        engine.advance_to(50.0);
        assert_eq!(adapter.duration(), Some(200.0));
        assert_eq!(adapter.progress_percent(), Some(25.0));

        // Live streams report no duration
        let live = Arc::new(SimulatedEngine::new());
        let adapter = adapter_with(live.clone());
        adapter.load(&source(), false).await.unwrap();
        live.advance_to(50.0);
        assert_eq!(adapter.progress_percent(), None);
    }

    #[tokio::test]
    async fn test_playback_status_follows_engine() {
        let engine = Arc::new(SimulatedEngine::new().with_duration(60.0));
        let adapter = adapter_with(engine.clone());
        assert_eq!(adapter.playback_status(), None);

        adapter.load(&source(), false).await.unwrap();
        assert_eq!(adapter.playback_status(), Some(PlaybackStatus::Paused));

        adapter.play().await.unwrap();
        assert_eq!(adapter.playback_status(), Some(PlaybackStatus::Playing));

        engine.hold_seeks(true);
        adapter.seek_by(10.0).unwrap();
        assert_eq!(adapter.playback_status(), Some(PlaybackStatus::Seeking));
        engine.complete_seek();

        engine.stall();
        assert_eq!(adapter.playback_status(), Some(PlaybackStatus::Waiting));
        engine.resume_from_stall();
        assert_eq!(adapter.playback_status(), Some(PlaybackStatus::Playing));
    }

    #[tokio::test]
    async fn test_destroy_sync() {
        let engine = Arc::new(SimulatedEngine::new());
        let adapter = adapter_with(engine.clone());
        adapter.load(&source(), true).await.unwrap();

        assert!(adapter.destroy_sync(DEFAULT_DEINIT_TIMEOUT));
        assert_eq!(adapter.state(), AdapterState::Destroyed);
        assert!(engine.is_destroyed());
        assert!(!adapter.destroy_sync(DEFAULT_DEINIT_TIMEOUT));
    }
}

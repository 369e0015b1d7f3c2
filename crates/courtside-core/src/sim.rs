//! In-memory collaborators
//!
//! [`SimulatedEngine`], [`SimulatedAudioDevice`], [`StaticQualities`] and
//! [`RecordingNavigator`] implement the collaborator traits without a device. They keep everything
//! in memory and record what was asked of them. The `courtside simulate`
//! command drives a full session against them.

use crate::capability::{AudioCapabilityProvider, DeviceEventCallback};
use crate::drm::DrmConfiguration;
use crate::engine::{
    EngineConfig, EngineEvent, EventListener, ListenerId, PlaybackEngine, PlaybackStatus,
};
use crate::filters::{NetworkRequest, NetworkResponse, RequestFilter, RequestType, ResponseFilter};
use crate::labeler;
use crate::selector::QualityController;
use crate::session::{Navigation, Navigator};
use crate::types::*;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One call made on a [`SimulatedEngine`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", content = "arg", rename_all = "snake_case")]
pub enum EngineCall {
    Attach,
    Configure,
    ConfigureDrm(Vec<String>),
    ClearRequestFilters,
    ClearResponseFilters,
    RegisterRequestFilter(&'static str),
    RegisterResponseFilter(&'static str),
    LoadManifest(String),
    SetAutoplay(bool),
    SelectVariant(VariantToken),
    AddTextTrack(String),
    SelectTextTrack(u64),
    SetTextTrackVisibility(bool),
    Play,
    Pause,
    Seek(f64),
    AddListener(EngineEvent),
    RemoveListener(u64),
    Detach,
    Destroy,
    DeinitializeSync,
}

/// Behaviour knobs for the next load
#[derive(Debug, Clone, Default)]
struct Script {
    catalogue: Vec<Variant>,
    manifest_headers: Vec<(String, String)>,
    manifest_failure: Option<String>,
    reject_drm: bool,
    manifest_delay: Option<Duration>,
    text_track_delay: Option<Duration>,
    duration: Option<f64>,
    hold_seeks: bool,
}

#[derive(Default)]
struct EngineState {
    attached: bool,
    destroyed: bool,
    config: Option<EngineConfig>,
    drm: Option<DrmConfiguration>,
    request_filters: Vec<Arc<dyn RequestFilter>>,
    response_filters: Vec<Arc<dyn ResponseFilter>>,
    variants: Vec<Variant>,
    text_tracks: Vec<EngineTextTrack>,
    next_text_track: u64,
    text_visible: bool,
    autoplay: bool,
    playing: bool,
    seeking: bool,
    stalled: bool,
    current_time: f64,
    duration: Option<f64>,
    listeners: Vec<(ListenerId, EngineEvent, EventListener)>,
    next_listener: u64,
    calls: Vec<EngineCall>,
    requests: Vec<(RequestType, NetworkRequest)>,
}

/// Engine that serves a fixed variant ladder and runs installed filters
/// over synthetic manifest and license requests
#[derive(Default)]
pub struct SimulatedEngine {
    script: Mutex<Script>,
    state: Mutex<EngineState>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variants exposed once a manifest is loaded
    pub fn with_variants(self, variants: Vec<Variant>) -> Self {
        lock(&self.script).catalogue = variants;
        self
    }

    /// Header attached to every manifest response
    pub fn with_manifest_header(self, key: &str, value: &str) -> Self {
        lock(&self.script)
            .manifest_headers
            .push((key.to_string(), value.to_string()));
        self
    }

    /// Media duration reported once a manifest is loaded
    pub fn with_duration(self, seconds: f64) -> Self {
        lock(&self.script).duration = Some(seconds);
        self
    }

    /// Leave seeks pending until [`SimulatedEngine::complete_seek`]
    pub fn hold_seeks(&self, hold: bool) {
        lock(&self.script).hold_seeks = hold;
    }

    pub fn fail_manifest(&self, reason: &str) {
        lock(&self.script).manifest_failure = Some(reason.to_string());
    }

    pub fn reject_drm(&self) {
        lock(&self.script).reject_drm = true;
    }

    pub fn set_manifest_delay(&self, delay: Duration) {
        lock(&self.script).manifest_delay = Some(delay);
    }

    pub fn set_text_track_delay(&self, delay: Duration) {
        lock(&self.script).text_track_delay = Some(delay);
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.state).calls.clone()
    }

    /// Requests as they left the engine, after filtering
    pub fn requests(&self) -> Vec<(RequestType, NetworkRequest)> {
        lock(&self.state).requests.clone()
    }

    pub fn config(&self) -> Option<EngineConfig> {
        lock(&self.state).config.clone()
    }

    pub fn drm(&self) -> Option<DrmConfiguration> {
        lock(&self.state).drm.clone()
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.state).destroyed
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }

    /// Move the playhead without a seek, as playback would
    pub fn advance_to(&self, seconds: f64) {
        lock(&self.state).current_time = seconds;
    }

    /// Replace the variant ladder, as a manifest refresh would, and report
    /// the change
    pub fn replace_variants(&self, variants: Vec<Variant>) {
        lock(&self.state).variants = variants;
        self.emit(EngineEvent::VariantsChanged);
    }

    /// Finish a held seek
    pub fn complete_seek(&self) {
        let was_seeking = std::mem::replace(&mut lock(&self.state).seeking, false);
        if was_seeking {
            self.emit(EngineEvent::Seeked);
        }
    }

    /// Run out of buffered data
    pub fn stall(&self) {
        lock(&self.state).stalled = true;
    }

    pub fn resume_from_stall(&self) {
        lock(&self.state).stalled = false;
    }

    /// Deliver `event` to every listener registered for it
    pub fn emit(&self, event: EngineEvent) {
        let listeners: Vec<EventListener> = lock(&self.state)
            .listeners
            .iter()
            .filter(|(_, registered, _)| *registered == event)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        debug!(event = ?event, listeners = listeners.len(), "Simulated engine event");
        for listener in listeners {
            listener(event);
        }
    }

    /// Run a request through the installed request filters and record it
    pub fn send_request(&self, request_type: RequestType, mut request: NetworkRequest) -> NetworkRequest {
        let filters = lock(&self.state).request_filters.clone();
        for filter in filters {
            filter.filter(request_type, &mut request);
        }
        lock(&self.state).requests.push((request_type, request.clone()));
        request
    }

    /// Run a response through the installed response filters
    pub fn receive_response(&self, request_type: RequestType, mut response: NetworkResponse) -> NetworkResponse {
        let filters = lock(&self.state).response_filters.clone();
        for filter in filters {
            filter.filter(request_type, &mut response);
        }
        response
    }

    fn record(&self, call: EngineCall) {
        lock(&self.state).calls.push(call);
    }
}

#[async_trait]
impl PlaybackEngine for SimulatedEngine {
    async fn attach(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.destroyed {
            return Err(Error::engine("engine destroyed"));
        }
        state.attached = true;
        state.calls.push(EngineCall::Attach);
        Ok(())
    }

    fn configure(&self, config: &EngineConfig) -> Result<()> {
        let mut state = lock(&self.state);
        state.config = Some(config.clone());
        state.calls.push(EngineCall::Configure);
        Ok(())
    }

    fn configure_drm(&self, drm: &DrmConfiguration) -> Result<()> {
        let reject = lock(&self.script).reject_drm;
        let mut state = lock(&self.state);
        state
            .calls
            .push(EngineCall::ConfigureDrm(drm.preferred_key_systems.clone()));
        if reject {
            return Err(Error::engine("unsupported key system"));
        }
        state.drm = Some(drm.clone());
        Ok(())
    }

    fn clear_request_filters(&self) {
        let mut state = lock(&self.state);
        state.request_filters.clear();
        state.calls.push(EngineCall::ClearRequestFilters);
    }

    fn clear_response_filters(&self) {
        let mut state = lock(&self.state);
        state.response_filters.clear();
        state.calls.push(EngineCall::ClearResponseFilters);
    }

    fn register_request_filter(&self, filter: Arc<dyn RequestFilter>) {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::RegisterRequestFilter(filter.name()));
        state.request_filters.push(filter);
    }

    fn register_response_filter(&self, filter: Arc<dyn ResponseFilter>) {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::RegisterResponseFilter(filter.name()));
        state.response_filters.push(filter);
    }

    async fn load_manifest(&self, uri: &str) -> Result<()> {
        {
            let mut state = lock(&self.state);
            state.calls.push(EngineCall::LoadManifest(uri.to_string()));
            if !state.attached {
                return Err(Error::engine("engine not attached"));
            }
        }
        let script = lock(&self.script).clone();

        let request = self.send_request(RequestType::Manifest, NetworkRequest::get(uri));
        if let Some(delay) = script.manifest_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = script.manifest_failure {
            return Err(Error::engine(reason));
        }

        let manifest_uri = request.uris.first().cloned().unwrap_or_default();
        let response = script
            .manifest_headers
            .iter()
            .fold(NetworkResponse::new(manifest_uri), |response, (key, value)| {
                response.with_header(key, value)
            });
        self.receive_response(RequestType::Manifest, response);

        let mut variants = script.catalogue;
        if !variants.iter().any(|v| v.active) {
            if let Some(first) = variants.first_mut() {
                first.active = true;
            }
        }
        {
            let mut state = lock(&self.state);
            state.variants = variants;
            state.duration = script.duration;
            state.playing = state.autoplay;
        }

        // Encrypted content triggers a license exchange straight away
        let license_server = lock(&self.state)
            .drm
            .as_ref()
            .and_then(|drm| drm.license_server().map(str::to_string));
        if let Some(server) = license_server {
            self.send_request(
                RequestType::License,
                NetworkRequest::post(server, Bytes::from_static(b"license-challenge")),
            );
        }

        Ok(())
    }

    fn set_autoplay(&self, autoplay: bool) {
        let mut state = lock(&self.state);
        state.autoplay = autoplay;
        state.calls.push(EngineCall::SetAutoplay(autoplay));
    }

    fn variant_tracks(&self) -> Vec<Variant> {
        lock(&self.state).variants.clone()
    }

    fn select_variant(&self, token: VariantToken) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::SelectVariant(token));
        if !state.variants.iter().any(|v| v.token == token) {
            return Err(Error::UnknownVariant(token.0));
        }
        for variant in state.variants.iter_mut() {
            variant.active = variant.token == token;
        }
        Ok(())
    }

    async fn add_text_track(&self, track: &TextTrack) -> Result<()> {
        self.record(EngineCall::AddTextTrack(track.language.clone()));
        let delay = lock(&self.script).text_track_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        state.next_text_track += 1;
        let id = state.next_text_track;
        state.text_tracks.push(EngineTextTrack {
            id,
            language: track.language.clone(),
            kind: track.kind,
            label: track.label.clone(),
            mime_type: track.mime_type.clone(),
            active: false,
        });
        Ok(())
    }

    fn text_tracks(&self) -> Vec<EngineTextTrack> {
        lock(&self.state).text_tracks.clone()
    }

    fn select_text_track(&self, id: u64) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::SelectTextTrack(id));
        if !state.text_tracks.iter().any(|t| t.id == id) {
            return Err(Error::engine(format!("unknown text track {id}")));
        }
        for track in state.text_tracks.iter_mut() {
            track.active = track.id == id;
        }
        Ok(())
    }

    fn set_text_track_visibility(&self, visible: bool) {
        let mut state = lock(&self.state);
        state.text_visible = visible;
        state.calls.push(EngineCall::SetTextTrackVisibility(visible));
    }

    fn is_text_track_visible(&self) -> bool {
        lock(&self.state).text_visible
    }

    async fn play(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            state.playing = true;
            state.calls.push(EngineCall::Play);
        }
        self.emit(EngineEvent::Playing);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            state.playing = false;
            state.calls.push(EngineCall::Pause);
        }
        self.emit(EngineEvent::Pause);
        Ok(())
    }

    fn set_current_time(&self, seconds: f64) {
        let hold = lock(&self.script).hold_seeks;
        {
            let mut state = lock(&self.state);
            state.current_time = seconds;
            state.seeking = hold;
            state.calls.push(EngineCall::Seek(seconds));
        }
        if !hold {
            self.emit(EngineEvent::Seeked);
        }
    }

    fn current_time(&self) -> f64 {
        lock(&self.state).current_time
    }

    fn duration(&self) -> Option<f64> {
        lock(&self.state).duration
    }

    fn playback_status(&self) -> PlaybackStatus {
        let state = lock(&self.state);
        if state.seeking {
            PlaybackStatus::Seeking
        } else if state.stalled {
            PlaybackStatus::Waiting
        } else if state.playing {
            PlaybackStatus::Playing
        } else {
            PlaybackStatus::Paused
        }
    }

    fn add_event_listener(&self, event: EngineEvent, listener: EventListener) -> ListenerId {
        let mut state = lock(&self.state);
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state.listeners.push((id, event, listener));
        state.calls.push(EngineCall::AddListener(event));
        id
    }

    fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::RemoveListener(id.0));
        let before = state.listeners.len();
        state.listeners.retain(|(registered, _, _)| *registered != id);
        state.listeners.len() != before
    }

    async fn detach(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.attached = false;
        state.playing = false;
        state.calls.push(EngineCall::Detach);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.destroyed = true;
        state.request_filters.clear();
        state.response_filters.clear();
        state.calls.push(EngineCall::Destroy);
        Ok(())
    }

    fn deinitialize_sync(&self, _timeout: Duration) -> bool {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::DeinitializeSync);
        if state.destroyed {
            return false;
        }
        state.attached = false;
        state.playing = false;
        state.destroyed = true;
        true
    }
}

// =============================================================================
// Audio device
// =============================================================================

/// Host audio subsystem with configurable per-device configurations
#[derive(Default)]
pub struct SimulatedAudioDevice {
    configurations: Mutex<HashMap<AudioDevice, Vec<AudioConfig>>>,
    observer: Mutex<Option<DeviceEventCallback>>,
    fail_next: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
}

impl SimulatedAudioDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_configurations(&self, device: &AudioDevice, configurations: Vec<AudioConfig>) {
        lock(&self.configurations).insert(device.clone(), configurations);
    }

    /// Make the next configuration fetch fail
    pub fn fail_next_fetch(&self) {
        self.fail_next.store(true, Ordering::Release);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *lock(&self.fetch_delay) = Some(delay);
    }

    /// Deliver a device event to the registered observer. Returns false when
    /// nothing is registered.
    pub fn emit(&self, event: DeviceEvent) -> bool {
        let observer = lock(&self.observer).clone();
        match observer {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }

    pub fn has_observer(&self) -> bool {
        lock(&self.observer).is_some()
    }
}

#[async_trait]
impl AudioCapabilityProvider for SimulatedAudioDevice {
    async fn supported_configurations(
        &self,
        _attributes: &AudioAttributes,
        device: &AudioDevice,
    ) -> Result<Vec<AudioConfig>> {
        let delay = *lock(&self.fetch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_next.swap(false, Ordering::AcqRel) {
            return Err(Error::engine("audio service unavailable"));
        }

        lock(&self.configurations)
            .get(device)
            .cloned()
            .ok_or_else(|| Error::engine(format!("unknown audio device {device}")))
    }

    async fn register_device_observer(&self, callback: DeviceEventCallback) -> Result<()> {
        *lock(&self.observer) = Some(callback);
        Ok(())
    }

    async fn unregister_device_observer(&self) -> Result<()> {
        *lock(&self.observer) = None;
        Ok(())
    }
}

// =============================================================================
// Fixed variant ladder
// =============================================================================

/// [`QualityController`] over a fixed variant list that records switches
#[derive(Default)]
pub struct StaticQualities {
    variants: Mutex<Vec<Variant>>,
    switches: Mutex<Vec<VariantToken>>,
}

impl StaticQualities {
    pub fn new(variants: Vec<Variant>) -> Self {
        Self {
            variants: Mutex::new(variants),
            switches: Mutex::new(Vec::new()),
        }
    }

    /// Tokens passed to `set_quality`, in order
    pub fn switches(&self) -> Vec<VariantToken> {
        lock(&self.switches).clone()
    }

    pub fn active(&self) -> Option<VariantToken> {
        lock(&self.variants).iter().find(|v| v.active).map(|v| v.token)
    }
}

impl QualityController for StaticQualities {
    fn available_qualities(&self) -> Result<Vec<QualityVariant>> {
        Ok(lock(&self.variants)
            .iter()
            .map(|variant| QualityVariant {
                label: labeler::label_for(variant),
                variant: variant.clone(),
            })
            .collect())
    }

    fn set_quality(&self, token: VariantToken) -> Result<()> {
        let mut variants = lock(&self.variants);
        if !variants.iter().any(|v| v.token == token) {
            return Err(Error::UnknownVariant(token.0));
        }
        for variant in variants.iter_mut() {
            variant.active = variant.token == token;
        }
        lock(&self.switches).push(token);
        Ok(())
    }
}

// =============================================================================
// Navigation
// =============================================================================

/// Navigator that remembers every request
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    requests: Mutex<Vec<Navigation>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<Navigation> {
        lock(&self.requests).clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, request: Navigation) {
        debug!(request = ?request, "Navigation requested");
        lock(&self.requests).push(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manifest_load_activates_first_variant() {
        let engine = SimulatedEngine::new().with_variants(vec![Variant::new(1, 100), Variant::new(2, 200)]);
        assert!(engine.load_manifest("https://cdn.example.com/a.mpd").await.is_err());

        engine.attach().await.unwrap();
        engine.load_manifest("https://cdn.example.com/a.mpd").await.unwrap();

        let active: Vec<_> = engine.variant_tracks().into_iter().filter(|v| v.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token, VariantToken(1));

        engine.select_variant(VariantToken(2)).unwrap();
        let active: Vec<_> = engine.variant_tracks().into_iter().filter(|v| v.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token, VariantToken(2));
        assert!(engine.select_variant(VariantToken(9)).is_err());
    }

    #[tokio::test]
    async fn test_listeners_receive_only_their_event() {
        let engine = SimulatedEngine::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = engine.add_event_listener(
            EngineEvent::Pause,
            Arc::new(move |event: EngineEvent| lock(&sink).push(event)),
        );

        engine.play().await.unwrap();
        engine.pause().await.unwrap();
        assert_eq!(*lock(&seen), vec![EngineEvent::Pause]);

        assert!(engine.remove_event_listener(id));
        assert!(!engine.remove_event_listener(id));
        assert_eq!(engine.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_playback_status_priority() {
        let engine = SimulatedEngine::new().with_duration(600.0);
        engine.attach().await.unwrap();
        engine.load_manifest("https://cdn.example.com/a.mpd").await.unwrap();
        assert_eq!(engine.duration(), Some(600.0));
        assert_eq!(engine.playback_status(), PlaybackStatus::Paused);

        engine.play().await.unwrap();
        engine.stall();
        assert_eq!(engine.playback_status(), PlaybackStatus::Waiting);

        engine.hold_seeks(true);
        engine.set_current_time(90.0);
        assert_eq!(engine.playback_status(), PlaybackStatus::Seeking);

        engine.complete_seek();
        engine.resume_from_stall();
        assert_eq!(engine.playback_status(), PlaybackStatus::Playing);
    }

    #[test]
    fn test_replace_variants_reports_change() {
        let engine = SimulatedEngine::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.add_event_listener(
            EngineEvent::VariantsChanged,
            Arc::new(move |event: EngineEvent| lock(&sink).push(event)),
        );

        engine.replace_variants(vec![Variant::new(5, 500)]);
        assert_eq!(*lock(&seen), vec![EngineEvent::VariantsChanged]);
        assert_eq!(engine.variant_tracks()[0].token, VariantToken(5));
    }

    #[test]
    fn test_deinitialize_sync_once() {
        let engine = SimulatedEngine::new();
        assert!(engine.deinitialize_sync(Duration::from_millis(10)));
        assert!(!engine.deinitialize_sync(Duration::from_millis(10)));
        assert!(engine.is_destroyed());
    }

    #[test]
    fn test_static_qualities_single_active() {
        let qualities = StaticQualities::new(vec![Variant::new(1, 100).activated(), Variant::new(2, 200)]);
        qualities.set_quality(VariantToken(2)).unwrap();

        assert_eq!(qualities.active(), Some(VariantToken(2)));
        assert_eq!(qualities.switches(), vec![VariantToken(2)]);
        assert!(matches!(
            qualities.set_quality(VariantToken(7)),
            Err(Error::UnknownVariant(7))
        ));
    }
}

//! Playback engine abstraction
//!
//! The decoding/ABR engine is an external collaborator. Anything that can
//! load a manifest, enumerate and select variants and text tracks, run
//! network filters and control playback can sit behind [`PlaybackEngine`].
//!
//! [`EngineConfig`] is the pure description of what `load()` applies to the
//! engine for a given source, settings and policy.

use crate::drm::DrmConfiguration;
use crate::filters::{RequestFilter, ResponseFilter};
use crate::types::*;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Media element events the engine reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineEvent {
    Playing,
    Pause,
    Seeked,
    Ended,
    Error,
    /// The variant ladder changed, e.g. after a manifest refresh
    VariantsChanged,
}

/// What the media element is doing while the adapter is `Ready`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Playing,
    Paused,
    /// A seek has been issued and not completed
    Seeking,
    /// Stalled waiting for data
    Waiting,
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackStatus::Playing => write!(f, "playing"),
            PlaybackStatus::Paused => write!(f, "paused"),
            PlaybackStatus::Seeking => write!(f, "seeking"),
            PlaybackStatus::Waiting => write!(f, "waiting"),
        }
    }
}

/// Handle returned when registering an event listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Callback invoked for engine events
pub type EventListener = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Underlying decoding engine
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Create the engine instance and bind it to the media element
    async fn attach(&self) -> Result<()>;

    /// Apply codec, streaming and ABR configuration
    fn configure(&self, config: &EngineConfig) -> Result<()>;

    /// Apply DRM servers and robustness. Errors mean the engine rejected it.
    fn configure_drm(&self, drm: &DrmConfiguration) -> Result<()>;

    fn clear_request_filters(&self);
    fn clear_response_filters(&self);
    fn register_request_filter(&self, filter: Arc<dyn RequestFilter>);
    fn register_response_filter(&self, filter: Arc<dyn ResponseFilter>);

    /// Fetch and parse the manifest
    async fn load_manifest(&self, uri: &str) -> Result<()>;

    fn set_autoplay(&self, autoplay: bool);

    fn variant_tracks(&self) -> Vec<Variant>;
    fn select_variant(&self, token: VariantToken) -> Result<()>;

    async fn add_text_track(&self, track: &TextTrack) -> Result<()>;
    fn text_tracks(&self) -> Vec<EngineTextTrack>;
    fn select_text_track(&self, id: u64) -> Result<()>;
    fn set_text_track_visibility(&self, visible: bool);
    fn is_text_track_visible(&self) -> bool;

    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    fn set_current_time(&self, seconds: f64);
    fn current_time(&self) -> f64;
    /// Media duration in seconds; `None` while unknown or for live streams
    fn duration(&self) -> Option<f64>;
    fn playback_status(&self) -> PlaybackStatus;

    fn add_event_listener(&self, event: EngineEvent, listener: EventListener) -> ListenerId;
    /// Returns false if the listener was not registered
    fn remove_event_listener(&self, id: ListenerId) -> bool;

    async fn detach(&self) -> Result<()>;
    async fn destroy(&self) -> Result<()>;

    /// Tear the media pipeline down without awaiting. Returns true on success.
    fn deinitialize_sync(&self, timeout: Duration) -> bool;
}

// =============================================================================
// Configuration applied on load
// =============================================================================

/// Resolution bounds for automatic variant switching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbrRestrictions {
    pub min_width: u32,
    pub min_height: u32,
    /// `None` leaves the bound to the engine (unbounded)
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

/// ABR section of the engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbrConfig {
    pub enabled: bool,
    pub restrictions: AbrRestrictions,
}

/// ABR ceiling on non-TV form factors, one pixel below 1920x1080
pub const NON_TV_MAX: Resolution = Resolution::new(1919, 1079);

/// Resolution policy for ABR restrictions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbrPolicy {
    /// Cap applied on non-TV form factors regardless of what the device reports
    pub non_tv_max: Resolution,
    /// Lower bound for automatic switching
    pub min: Resolution,
    /// Maximum used when the device reports none; `None` means unbounded
    #[serde(default)]
    pub default_max: Option<Resolution>,
}

impl Default for AbrPolicy {
    fn default() -> Self {
        Self {
            non_tv_max: NON_TV_MAX,
            min: Resolution::new(320, 240),
            default_max: None,
        }
    }
}

impl AbrPolicy {
    /// Compute restrictions for the given player settings
    pub fn restrictions(&self, settings: &PlayerSettings) -> AbrRestrictions {
        let device_width = settings
            .abr_max_width
            .or(self.default_max.map(|r| r.width));
        let device_height = settings
            .abr_max_height
            .or(self.default_max.map(|r| r.height));

        let (max_width, max_height) = match settings.form_factor {
            FormFactor::Tv => (device_width, device_height),
            FormFactor::NonTv => (
                Some(device_width.map_or(self.non_tv_max.width, |w| w.min(self.non_tv_max.width))),
                Some(device_height.map_or(self.non_tv_max.height, |h| h.min(self.non_tv_max.height))),
            ),
        };

        AbrRestrictions {
            min_width: self.min.width,
            min_height: self.min.height,
            max_width,
            max_height,
        }
    }
}

/// When the engine shows text tracks on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoShowText {
    Always,
    Never,
}

/// Streaming section of the engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub low_latency_mode: bool,
    pub inaccurate_manifest_tolerance: f64,
    /// Seconds buffered before resuming after a stall
    pub rebuffering_goal: f64,
    /// Seconds buffered ahead during steady playback
    pub buffering_goal: f64,
    pub always_stream_text: bool,
    pub retry_max_attempts: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            low_latency_mode: false,
            inaccurate_manifest_tolerance: 0.0,
            rebuffering_goal: 0.01,
            buffering_goal: 5.0,
            always_stream_text: true,
            retry_max_attempts: 3,
        }
    }
}

/// Everything `load()` applies to the engine before fetching the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub preferred_video_codecs: Vec<String>,
    pub preferred_audio_codecs: Vec<String>,
    pub streaming: StreamingConfig,
    pub abr: AbrConfig,
    pub auto_show_text: AutoShowText,
    /// Present only when the source names a DRM scheme
    pub drm: Option<DrmConfiguration>,
}

impl EngineConfig {
    /// Compute the configuration for a source
    pub fn for_source(source: &MediaSource, settings: &PlayerSettings, policy: &PlaybackPolicy) -> Self {
        let drm = match (source.drm_scheme(), source.drm_license_uri.as_deref()) {
            (Some(scheme), Some(license_uri)) => Some(DrmConfiguration::for_scheme(
                scheme,
                license_uri,
                source.secure || settings.secure,
            )),
            _ => None,
        };

        Self {
            preferred_video_codecs: source.video_codec.iter().cloned().collect(),
            preferred_audio_codecs: source.audio_codec.iter().cloned().collect(),
            streaming: StreamingConfig::default(),
            abr: AbrConfig {
                enabled: settings.abr_enabled,
                restrictions: policy.abr.restrictions(settings),
            },
            auto_show_text: AutoShowText::Always,
            drm,
        }
    }
}

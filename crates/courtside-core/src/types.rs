//! Core types for Courtside playback

use crate::engine::AbrPolicy;
use crate::error::LoadError;
use crate::selector::CodecPreferencePolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

/// Unique identifier for an adapter or session instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Media source
// =============================================================================

/// Container/format of a media source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Mp4,
    Dash,
    Hls,
}

impl FromStr for MediaFormat {
    type Err = LoadError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mp4" => Ok(MediaFormat::Mp4),
            "dash" => Ok(MediaFormat::Dash),
            "hls" => Ok(MediaFormat::Hls),
            other => Err(LoadError::InvalidSource(format!(
                "Unsupported video type '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaFormat::Mp4 => write!(f, "mp4"),
            MediaFormat::Dash => write!(f, "dash"),
            MediaFormat::Hls => write!(f, "hls"),
        }
    }
}

/// Ordered header set supplied by the caller
pub type HeaderSet = Vec<(String, String)>;

/// One playable asset. Immutable once handed to `load()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSource {
    /// Manifest or progressive URI
    pub uri: String,
    /// Container/format tag (`mp4`, `dash`, `hls`)
    pub format: String,
    /// Display title
    #[serde(default)]
    pub title: Option<String>,
    /// DRM key system, e.g. `com.widevine.alpha`
    #[serde(default)]
    pub drm_scheme: Option<String>,
    /// License server URI for `drm_scheme`
    #[serde(default)]
    pub drm_license_uri: Option<String>,
    /// Request hardware-backed DRM robustness
    #[serde(default)]
    pub secure: bool,
    /// Headers merged into license requests
    #[serde(default)]
    pub license_headers: Option<HeaderSet>,
    /// Headers merged into manifest and segment requests
    #[serde(default)]
    pub manifest_headers: Option<HeaderSet>,
    /// Preferred audio codec
    #[serde(default)]
    pub audio_codec: Option<String>,
    /// Preferred video codec
    #[serde(default)]
    pub video_codec: Option<String>,
    /// Out-of-band text tracks registered on load
    #[serde(default)]
    pub text_tracks: Vec<TextTrack>,
    /// Start playing once loaded
    #[serde(default)]
    pub autoplay: bool,
}

impl MediaSource {
    /// Create a clear (non-DRM) source
    pub fn new(uri: impl Into<String>, format: MediaFormat) -> Self {
        Self {
            uri: uri.into(),
            format: format.to_string(),
            title: None,
            drm_scheme: None,
            drm_license_uri: None,
            secure: false,
            license_headers: None,
            manifest_headers: None,
            audio_codec: None,
            video_codec: None,
            text_tracks: Vec::new(),
            autoplay: false,
        }
    }

    /// Protect the source with a DRM scheme and license server
    pub fn with_drm(mut self, scheme: &str, license_uri: &str) -> Self {
        self.drm_scheme = Some(scheme.to_string());
        self.drm_license_uri = Some(license_uri.to_string());
        self
    }

    /// Request hardware-backed robustness
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Add a header for license requests
    pub fn with_license_header(mut self, key: &str, value: &str) -> Self {
        self.license_headers
            .get_or_insert_with(Vec::new)
            .push((key.to_string(), value.to_string()));
        self
    }

    /// Add a header for manifest and segment requests
    pub fn with_manifest_header(mut self, key: &str, value: &str) -> Self {
        self.manifest_headers
            .get_or_insert_with(Vec::new)
            .push((key.to_string(), value.to_string()));
        self
    }

    /// Set codec preferences
    pub fn with_codecs(mut self, video: &str, audio: &str) -> Self {
        self.video_codec = Some(video.to_string());
        self.audio_codec = Some(audio.to_string());
        self
    }

    /// Add an out-of-band text track
    pub fn with_text_track(mut self, track: TextTrack) -> Self {
        self.text_tracks.push(track);
        self
    }

    /// DRM scheme, treating an empty string as absent
    pub fn drm_scheme(&self) -> Option<&str> {
        self.drm_scheme.as_deref().filter(|s| !s.is_empty())
    }

    /// Check the source before any engine work is done
    pub fn validate(&self) -> std::result::Result<MediaFormat, LoadError> {
        if self.uri.is_empty() || self.format.is_empty() {
            return Err(LoadError::InvalidSource("uri and format are required".into()));
        }

        let format = self.format.parse::<MediaFormat>()?;

        Url::parse(&self.uri)
            .map_err(|_| LoadError::InvalidSource("Invalid URI format".into()))?;

        let has_license = self
            .drm_license_uri
            .as_deref()
            .is_some_and(|uri| !uri.is_empty());
        match (self.drm_scheme(), has_license) {
            (Some(scheme), false) => Err(LoadError::InvalidSource(format!(
                "DRM scheme {scheme} has no license URI"
            ))),
            (None, true) => Err(LoadError::InvalidSource(
                "license URI given without a DRM scheme".into(),
            )),
            _ => Ok(format),
        }
    }
}

// =============================================================================
// Text tracks
// =============================================================================

/// Text track kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextTrackKind {
    Subtitles,
    Captions,
    Descriptions,
    Chapters,
    Metadata,
}

impl std::fmt::Display for TextTrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextTrackKind::Subtitles => write!(f, "subtitles"),
            TextTrackKind::Captions => write!(f, "captions"),
            TextTrackKind::Descriptions => write!(f, "descriptions"),
            TextTrackKind::Chapters => write!(f, "chapters"),
            TextTrackKind::Metadata => write!(f, "metadata"),
        }
    }
}

/// Out-of-band text track registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextTrack {
    pub uri: String,
    pub language: String,
    pub kind: TextTrackKind,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl TextTrack {
    pub fn new(uri: impl Into<String>, language: impl Into<String>, kind: TextTrackKind) -> Self {
        Self {
            uri: uri.into(),
            language: language.into(),
            kind,
            mime_type: None,
            codec: None,
            label: None,
        }
    }
}

/// Text track as enumerated by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTextTrack {
    /// Engine-assigned identifier
    pub id: u64,
    pub language: String,
    pub kind: TextTrackKind,
    pub label: Option<String>,
    pub mime_type: Option<String>,
    /// Currently selected by the engine
    pub active: bool,
}

// =============================================================================
// Variants
// =============================================================================

/// Opaque engine-specific token identifying a variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantToken(pub u64);

impl std::fmt::Display for VariantToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One selectable audio/video rendition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub token: VariantToken,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub frame_rate: Option<f32>,
    /// Bandwidth in bits per second
    pub bandwidth: u64,
    #[serde(default)]
    pub audio_codec: Option<String>,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub active: bool,
}

impl Variant {
    pub fn new(token: u64, bandwidth: u64) -> Self {
        Self {
            token: VariantToken(token),
            width: None,
            height: None,
            frame_rate: None,
            bandwidth,
            audio_codec: None,
            video_codec: None,
            active: false,
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: f32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn with_audio_codec(mut self, codec: &str) -> Self {
        self.audio_codec = Some(codec.to_string());
        self
    }

    pub fn with_video_codec(mut self, codec: &str) -> Self {
        self.video_codec = Some(codec.to_string());
        self
    }

    pub fn activated(mut self) -> Self {
        self.active = true;
        self
    }

    pub fn resolution(&self) -> Option<Resolution> {
        Some(Resolution::new(self.width?, self.height?))
    }

    /// Audio codec of this variant.
    ///
    /// Falls back to the second component of a combined codec string such
    /// as `"avc1.4d401f,mp4a.40.2"` carried on the video codec field.
    pub fn audio_codec_family(&self) -> Option<&str> {
        if let Some(codec) = self.audio_codec.as_deref().map(str::trim) {
            if !codec.is_empty() {
                return Some(codec);
            }
        }

        self.video_codec
            .as_deref()?
            .split(',')
            .nth(1)
            .map(str::trim)
            .filter(|codec| !codec.is_empty())
    }
}

/// A variant paired with its human-readable label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVariant {
    pub label: String,
    pub variant: Variant,
}

impl QualityVariant {
    pub fn token(&self) -> VariantToken {
        self.variant.token
    }
}

// =============================================================================
// Device audio capability
// =============================================================================

/// PCM sample formats reported by the audio sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSampleFormat {
    Pcm8,
    Pcm16,
    Pcm24,
    Pcm32,
    PcmFloat,
}

impl FromStr for AudioSampleFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm8" | "pcm_8_bit" => Ok(AudioSampleFormat::Pcm8),
            "pcm16" | "pcm_16_bit" => Ok(AudioSampleFormat::Pcm16),
            "pcm24" | "pcm_24_bit" => Ok(AudioSampleFormat::Pcm24),
            "pcm32" | "pcm_32_bit" => Ok(AudioSampleFormat::Pcm32),
            "pcm_float" | "float" => Ok(AudioSampleFormat::PcmFloat),
            other => Err(format!("unknown sample format '{other}'")),
        }
    }
}

impl std::fmt::Display for AudioSampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioSampleFormat::Pcm8 => write!(f, "PCM_8_BIT"),
            AudioSampleFormat::Pcm16 => write!(f, "PCM_16_BIT"),
            AudioSampleFormat::Pcm24 => write!(f, "PCM_24_BIT"),
            AudioSampleFormat::Pcm32 => write!(f, "PCM_32_BIT"),
            AudioSampleFormat::PcmFloat => write!(f, "PCM_FLOAT"),
        }
    }
}

/// Audio output device identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioDevice(pub String);

impl AudioDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Default for AudioDevice {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl std::fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attributes describing the playback stream when querying configurations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioAttributes {
    pub content_type: AudioContentType,
    pub usage: AudioUsage,
    pub tag: String,
}

impl Default for AudioAttributes {
    fn default() -> Self {
        Self {
            content_type: AudioContentType::Music,
            usage: AudioUsage::Media,
            tag: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioContentType {
    Music,
    Movie,
    Speech,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioUsage {
    Media,
    Game,
}

/// One supported playback configuration of an output device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub format: AudioSampleFormat,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u8>,
}

impl AudioConfig {
    pub fn new(format: AudioSampleFormat) -> Self {
        Self {
            format,
            sample_rate: None,
            channels: None,
        }
    }
}

/// Event delivered by the host audio subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub device: AudioDevice,
    /// Device was connected (as opposed to disconnected)
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEventKind {
    DeviceStateUpdate,
    FocusChange,
    VolumeChange,
}

/// Current audio capability of the host device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceAudioCapability {
    pub current_device: AudioDevice,
    pub supported_configurations: Option<Vec<AudioConfig>>,
    pub supported_formats: Vec<AudioSampleFormat>,
    pub last_event: Option<DeviceEvent>,
}

// =============================================================================
// Progress
// =============================================================================

/// Saved playback position for one media identifier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackProgress {
    /// Position in seconds
    pub current_time: f64,
    pub last_updated: DateTime<Utc>,
}

// =============================================================================
// Adapter state machine
// =============================================================================

/// Playback engine adapter lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterState {
    /// Constructed, nothing loaded
    Idle,
    /// `load()` in progress
    Loading,
    /// Manifest fetched and buffered text tracks flushed
    Ready,
    /// `load()` failed; the adapter must be discarded
    Failed,
    /// `unload()` was called; terminal
    Destroyed,
}

impl AdapterState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: AdapterState) -> bool {
        use AdapterState::*;
        matches!(
            (self, target),
            (Idle, Loading)
                | (Loading, Ready)
                | (Loading, Failed)
                | (Idle, Destroyed)
                | (Loading, Destroyed)
                | (Ready, Destroyed)
                | (Failed, Destroyed)
        )
    }

    /// No transition leaves this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, AdapterState::Destroyed)
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterState::Idle => write!(f, "idle"),
            AdapterState::Loading => write!(f, "loading"),
            AdapterState::Ready => write!(f, "ready"),
            AdapterState::Failed => write!(f, "failed"),
            AdapterState::Destroyed => write!(f, "destroyed"),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Device form factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormFactor {
    Tv,
    NonTv,
}

/// Per-player settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSettings {
    /// Request hardware-backed DRM
    pub secure: bool,
    /// Let the engine switch variants automatically
    pub abr_enabled: bool,
    /// Maximum width reported by the device, if any
    #[serde(default)]
    pub abr_max_width: Option<u32>,
    /// Maximum height reported by the device, if any
    #[serde(default)]
    pub abr_max_height: Option<u32>,
    pub form_factor: FormFactor,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            secure: false,
            abr_enabled: true,
            abr_max_width: None,
            abr_max_height: None,
            form_factor: FormFactor::Tv,
        }
    }
}

/// Business rules applied during load and track selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackPolicy {
    #[serde(default)]
    pub abr: AbrPolicy,
    #[serde(default)]
    pub codec_preferences: CodecPreferencePolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_codec_family() {
        let explicit = Variant::new(1, 100).with_audio_codec("mp4a.40.2");
        assert_eq!(explicit.audio_codec_family(), Some("mp4a.40.2"));

        let combined = Variant::new(2, 100).with_video_codec("avc1.4d401f, mp4a.40.5");
        assert_eq!(combined.audio_codec_family(), Some("mp4a.40.5"));

        let video_only = Variant::new(3, 100).with_video_codec("avc1.4d401f");
        assert_eq!(video_only.audio_codec_family(), None);

        let blank = Variant::new(4, 100).with_audio_codec("  ");
        assert_eq!(blank.audio_codec_family(), None);
    }

    #[test]
    fn test_source_validation() {
        let source = MediaSource::new("https://cdn.example.com/live.mpd", MediaFormat::Dash);
        assert_eq!(source.validate(), Ok(MediaFormat::Dash));

        let mut bad_format = source.clone();
        bad_format.format = "avi".into();
        assert!(matches!(bad_format.validate(), Err(LoadError::InvalidSource(_))));

        let relative = MediaSource::new("/live.mpd", MediaFormat::Dash);
        assert!(relative.validate().is_err());

        let mut half_drm = source.clone();
        half_drm.drm_scheme = Some("com.widevine.alpha".into());
        assert!(half_drm.validate().is_err());

        let drm = source.with_drm("com.widevine.alpha", "https://license.example.com/wv");
        assert!(drm.validate().is_ok());
    }

    #[test]
    fn test_empty_drm_scheme_is_absent() {
        let mut source = MediaSource::new("https://cdn.example.com/a.m3u8", MediaFormat::Hls);
        source.drm_scheme = Some(String::new());
        assert_eq!(source.drm_scheme(), None);
        assert!(source.validate().is_ok());
    }

    #[test]
    fn test_adapter_state_transitions() {
        assert!(AdapterState::Idle.can_transition_to(AdapterState::Loading));
        assert!(AdapterState::Loading.can_transition_to(AdapterState::Ready));
        assert!(AdapterState::Loading.can_transition_to(AdapterState::Failed));
        assert!(AdapterState::Ready.can_transition_to(AdapterState::Destroyed));

        assert!(!AdapterState::Ready.can_transition_to(AdapterState::Loading));
        assert!(!AdapterState::Failed.can_transition_to(AdapterState::Loading));
        assert!(!AdapterState::Destroyed.can_transition_to(AdapterState::Idle));
    }

    #[test]
    fn test_sample_format_parsing() {
        assert_eq!("pcm16".parse::<AudioSampleFormat>(), Ok(AudioSampleFormat::Pcm16));
        assert_eq!("PCM_24_BIT".parse::<AudioSampleFormat>(), Ok(AudioSampleFormat::Pcm24));
        assert!("dolby".parse::<AudioSampleFormat>().is_err());
    }
}

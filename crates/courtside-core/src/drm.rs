//! DRM - key system configuration applied on load
//!
//! Provides support for:
//! - Widevine (`com.widevine.alpha`)
//! - PlayReady (`com.microsoft.playready`)
//! - ClearKey (`org.w3.clearkey`)
//! - FairPlay (`com.apple.fps`)
//!
//! The configuration is only produced when a source names a DRM scheme.
//! Configuring DRM for clear content makes the engine run key-system
//! handshakes it does not need.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Software-backed robustness level (non-PlayReady)
pub const SW_SECURE_CRYPTO: &str = "SW_SECURE_CRYPTO";
/// Hardware-backed robustness level (non-PlayReady)
pub const HW_SECURE_ALL: &str = "HW_SECURE_ALL";
/// PlayReady software security level
pub const PLAYREADY_SL150: &str = "150";
/// PlayReady hardware security level
pub const PLAYREADY_SL3000: &str = "3000";

/// DRM system types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrmSystem {
    Widevine,
    PlayReady,
    ClearKey,
    FairPlay,
}

impl DrmSystem {
    /// Returns the EME key system string
    pub fn key_system(&self) -> &'static str {
        match self {
            DrmSystem::Widevine => "com.widevine.alpha",
            DrmSystem::PlayReady => "com.microsoft.playready",
            DrmSystem::ClearKey => "org.w3.clearkey",
            DrmSystem::FairPlay => "com.apple.fps",
        }
    }

    /// Parse a key system string
    pub fn from_key_system(key_system: &str) -> Option<Self> {
        match key_system {
            "com.widevine.alpha" => Some(DrmSystem::Widevine),
            "com.microsoft.playready" => Some(DrmSystem::PlayReady),
            "org.w3.clearkey" => Some(DrmSystem::ClearKey),
            "com.apple.fps" | "com.apple.fps.1_0" => Some(DrmSystem::FairPlay),
            _ => None,
        }
    }

    /// Video robustness string for this system
    pub fn video_robustness(&self, secure: bool) -> &'static str {
        match (self, secure) {
            (DrmSystem::PlayReady, true) => PLAYREADY_SL3000,
            (DrmSystem::PlayReady, false) => PLAYREADY_SL150,
            (_, true) => HW_SECURE_ALL,
            (_, false) => SW_SECURE_CRYPTO,
        }
    }
}

impl std::fmt::Display for DrmSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key_system())
    }
}

/// Per-key-system advanced settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancedDrmConfig {
    pub video_robustness: String,
    pub audio_robustness: String,
    pub persistent_state_required: bool,
}

/// DRM section of the engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrmConfiguration {
    /// key system -> license server URI
    pub servers: BTreeMap<String, String>,
    /// key system -> robustness settings
    pub advanced: BTreeMap<String, AdvancedDrmConfig>,
    pub preferred_key_systems: Vec<String>,
}

impl DrmConfiguration {
    /// Build the configuration for a scheme and its license server.
    ///
    /// Unknown scheme strings are passed through as-is and get the generic
    /// robustness table.
    pub fn for_scheme(scheme: &str, license_uri: &str, secure: bool) -> Self {
        let video_robustness = match DrmSystem::from_key_system(scheme) {
            Some(system) => system.video_robustness(secure),
            None if secure => HW_SECURE_ALL,
            None => SW_SECURE_CRYPTO,
        };

        let mut servers = BTreeMap::new();
        servers.insert(scheme.to_string(), license_uri.to_string());

        // Audio stays on software crypto even for secure playback.
        let advanced = [DrmSystem::Widevine, DrmSystem::PlayReady]
            .iter()
            .map(|system| {
                (
                    system.key_system().to_string(),
                    AdvancedDrmConfig {
                        video_robustness: video_robustness.to_string(),
                        audio_robustness: SW_SECURE_CRYPTO.to_string(),
                        persistent_state_required: false,
                    },
                )
            })
            .collect();

        Self {
            servers,
            advanced,
            preferred_key_systems: vec![scheme.to_string()],
        }
    }

    /// Robustness settings for a key system, if configured
    pub fn advanced_for(&self, system: DrmSystem) -> Option<&AdvancedDrmConfig> {
        self.advanced.get(system.key_system())
    }

    /// License server for the preferred key system
    pub fn license_server(&self) -> Option<&str> {
        let scheme = self.preferred_key_systems.first()?;
        self.servers.get(scheme).map(String::as_str)
    }
}

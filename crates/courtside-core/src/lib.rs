//! Courtside Core - Adaptive Playback for Courtside TV
//!
//! This crate wraps a decoding/ABR engine with the playback rules of the app:
//! - Engine lifecycle (load, play, pause, seek, unload) as a state machine
//! - DRM robustness and ABR restrictions derived from source and settings
//! - License URI rewriting with routing prefixes captured from manifests
//! - Audio variant selection driven by live device capability
//! - Deferred text-track registration
//! - Resume/save of playback progress across sessions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Courtside Core                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐         ┌──────────────┐   ┌──────────────┐   │
//! │  │   Progress   │◄────────┤   Session    ├──►│  Navigator   │   │
//! │  │    Store     │         │  Controller  │   └──────────────┘   │
//! │  └──────────────┘         └──────┬───────┘                      │
//! │                                  │                              │
//! │  ┌──────────────┐         ┌──────┴───────┐   ┌──────────────┐   │
//! │  │    Device    ├────────►│    Engine    ├──►│   Request    │   │
//! │  │  Capability  │ Track   │   Adapter    │   │   Filters    │   │
//! │  │   Monitor    │Selector └──────┬───────┘   └──────────────┘   │
//! │  └──────────────┘                │                              │
//! │                    ┌─────────────┼─────────────┐                │
//! │             ┌──────┴──────┐ ┌────┴─────┐ ┌─────┴──────┐         │
//! │             │ Text Track  │ │ Playback │ │   Track    │         │
//! │             │   Manager   │ │  Engine  │ │  Labeler   │         │
//! │             └─────────────┘ └──────────┘ └────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod labeler;
pub mod drm;
pub mod engine;
pub mod filters;
pub mod text_tracks;
pub mod selector;
pub mod capability;
pub mod adapter;
pub mod progress;
pub mod session;
pub mod sim;

pub use error::{Error, LoadError, Result};
pub use types::*;
pub use labeler::variant_label;
pub use drm::{DrmConfiguration, DrmSystem};
pub use engine::{AbrPolicy, EngineConfig, EngineEvent, PlaybackEngine, PlaybackStatus};
pub use filters::{RequestFilterPipeline, RequestType};
pub use text_tracks::TextTrackManager;
pub use selector::{select_variant, CodecPreferencePolicy, QualityController, TrackSelector};
pub use capability::{AudioCapabilityProvider, DeviceCapabilityMonitor};
pub use adapter::PlaybackEngineAdapter;
pub use progress::{ProgressPersistence, ProgressStore};
pub use session::{AppState, Navigation, Navigator, PlaybackSessionController, SessionPhase};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the playback library
pub fn init() {
    tracing::info!(version = VERSION, "Courtside Core initialized");
}

//! CLI command implementations

use anyhow::Context;
use courtside_core::labeler::label_for;
use courtside_core::selector::Selection;
use courtside_core::session::SessionParams;
use courtside_core::sim::{EngineCall, RecordingNavigator, SimulatedAudioDevice, SimulatedEngine};
use courtside_core::{
    select_variant, variant_label, AudioConfig, AudioDevice, AudioSampleFormat,
    DeviceCapabilityMonitor, EngineConfig, MediaSource, Navigation, PlaybackEngineAdapter,
    PlaybackPolicy, PlaybackSessionController, PlaybackStatus, PlayerSettings, ProgressStore,
    QualityVariant, TrackSelector, Variant,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::output::{to_json, variant_table, OutputFormat};

/// Simulated playback time between start and back press
const SIMULATED_WATCH_SECS: f64 = 30.0;

fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> anyhow::Result<T> {
    path.map(load_json::<T>).transpose().map(Option::unwrap_or_default)
}

/// Parse a comma separated format list, e.g. `pcm16,pcm24`
pub fn parse_formats(csv: &str) -> anyhow::Result<Vec<AudioSampleFormat>> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<AudioSampleFormat>().map_err(anyhow::Error::msg))
        .collect()
}

fn qualities(variants: &[Variant]) -> Vec<QualityVariant> {
    variants
        .iter()
        .map(|variant| QualityVariant {
            label: label_for(variant),
            variant: variant.clone(),
        })
        .collect()
}

/// Print the engine configuration a source would load with
pub fn inspect(
    source_path: &Path,
    settings_path: Option<&Path>,
    policy_path: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let source: MediaSource = load_json(source_path)?;
    let settings: PlayerSettings = load_or_default(settings_path)?;
    let policy: PlaybackPolicy = load_or_default(policy_path)?;

    let media_format = source.validate().context("source is not loadable")?;
    let config = EngineConfig::for_source(&source, &settings, &policy);

    if format == OutputFormat::Json {
        println!("{}", to_json(&config)?);
        return Ok(());
    }

    println!("Source: {} ({media_format})", source.uri);
    println!("\nABR:");
    println!("  Enabled: {}", config.abr.enabled);
    println!(
        "  Max resolution: {}x{}",
        config.abr.restrictions.max_width.map_or("-".into(), |w| w.to_string()),
        config.abr.restrictions.max_height.map_or("-".into(), |h| h.to_string()),
    );
    println!("\nCodecs:");
    println!("  Video: {:?}", config.preferred_video_codecs);
    println!("  Audio: {:?}", config.preferred_audio_codecs);

    match &config.drm {
        Some(drm) => {
            println!("\nDRM:");
            println!("  Key systems: {}", drm.preferred_key_systems.join(", "));
            println!("  License server: {}", drm.license_server().unwrap_or("-"));
            for (system, advanced) in &drm.advanced {
                println!(
                    "  {system}: video={} audio={}",
                    advanced.video_robustness, advanced.audio_robustness
                );
            }
        }
        None => println!("\nDRM: none"),
    }

    if !source.text_tracks.is_empty() {
        println!("\nText tracks:");
        for (i, track) in source.text_tracks.iter().enumerate() {
            println!("  {}. {} ({:?})", i + 1, track.language, track.kind);
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct SelectReport<'a> {
    formats: &'a [AudioSampleFormat],
    selection: Option<Selection>,
}

/// Pick the audio variant for a set of supported formats
pub fn select(
    variants_path: &Path,
    formats: &str,
    policy_path: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let variants: Vec<Variant> = load_json(variants_path)?;
    let formats = parse_formats(formats)?;
    let policy: PlaybackPolicy = load_or_default(policy_path)?;

    let selection = select_variant(&variants, &formats, &policy.codec_preferences);
    debug!(candidates = variants.len(), selected = ?selection.as_ref().map(|s| s.variant.token), "Ranked variants");

    match format {
        OutputFormat::Json => {
            let report = SelectReport {
                formats: &formats,
                selection,
            };
            println!("{}", to_json(&report)?);
        }
        OutputFormat::Table => {
            let chosen = selection.map(|s| s.variant.token);
            let marked: Vec<Variant> = variants
                .into_iter()
                .map(|mut v| {
                    v.active = Some(v.token) == chosen;
                    v
                })
                .collect();
            println!("{}", variant_table(&qualities(&marked)));
        }
        OutputFormat::Text => match selection {
            Some(selection) => println!(
                "Selected variant {} ({}) at {} bps: {:?}",
                selection.variant.token.0,
                label_for(&selection.variant),
                selection.variant.bandwidth,
                selection.reason,
            ),
            None => println!("No variant carries an audio codec"),
        },
    }

    Ok(())
}

/// Render the quality label for a resolution
pub fn label(width: u32, height: u32, fps: Option<f32>, format: OutputFormat) -> anyhow::Result<()> {
    let label = variant_label(Some(width), Some(height), fps);

    if format == OutputFormat::Json {
        println!("{}", to_json(&serde_json::json!({ "label": label }))?);
    } else {
        println!("{label}");
    }

    Ok(())
}

/// Playhead knobs for `simulate`
#[derive(Debug, Clone, Copy, Default)]
pub struct Timing {
    pub resume: Option<f64>,
    pub duration: Option<f64>,
    pub skip: Option<f64>,
}

#[derive(Serialize)]
struct SimulationReport {
    media_id: String,
    final_phase: String,
    active_variant: Option<QualityVariant>,
    status: Option<PlaybackStatus>,
    progress_percent: Option<f64>,
    saved_position: Option<f64>,
    navigation: Vec<Navigation>,
    calls: Vec<EngineCall>,
}

/// Run a load/play/back session against the simulated engine and report
/// what the engine saw
pub async fn simulate(
    source_path: &Path,
    variants_path: &Path,
    formats: &str,
    timing: Timing,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let source: MediaSource = load_json(source_path)?;
    let variants: Vec<Variant> = load_json(variants_path)?;
    let formats = parse_formats(formats)?;
    let policy = PlaybackPolicy::default();
    let media_id = source.title.clone().unwrap_or_else(|| source.uri.clone());

    let mut engine = SimulatedEngine::new().with_variants(variants);
    if let Some(duration) = timing.duration {
        engine = engine.with_duration(duration);
    }
    let engine = Arc::new(engine);
    let adapter = Arc::new(PlaybackEngineAdapter::new(
        engine.clone(),
        PlayerSettings::default(),
        policy.clone(),
    ));

    let device = Arc::new(SimulatedAudioDevice::new());
    let sink = AudioDevice::default();
    device.set_configurations(&sink, formats.iter().copied().map(AudioConfig::new).collect());

    let monitor = Arc::new(DeviceCapabilityMonitor::new(
        device,
        adapter.clone(),
        TrackSelector::new(policy.codec_preferences.clone()),
    ));
    monitor.mount().await?;

    let progress = ProgressStore::global().clone();
    if let Some(seconds) = timing.resume {
        progress.set_progress(&media_id, seconds).await;
    }

    let navigator = Arc::new(RecordingNavigator::new());
    let session = PlaybackSessionController::new(
        SessionParams::new(media_id.clone()),
        adapter.clone(),
        progress.clone(),
        navigator.clone(),
    )
    .with_capability_monitor(monitor);

    info!(media_id = %media_id, uri = %source.uri, "Starting simulated session");

    adapter.load(&source, source.autoplay).await?;
    session.on_engine_ready().await?;
    adapter.play().await?;

    if let Some(offset) = timing.skip {
        let target = adapter.seek_by(offset)?;
        debug!(offset, target, "Skipped");
    }
    let watched = adapter.current_time().unwrap_or(0.0) + SIMULATED_WATCH_SECS;
    engine.advance_to(match adapter.duration() {
        Some(duration) => watched.min(duration),
        None => watched,
    });
    adapter.pause().await?;

    let active_variant = adapter
        .available_qualities()?
        .into_iter()
        .find(|q| q.variant.active);
    let status = adapter.playback_status();
    let progress_percent = adapter.progress_percent();

    session.on_back_pressed().await;
    session.teardown().await;
    adapter.unload().await?;

    let report = SimulationReport {
        media_id: media_id.clone(),
        final_phase: session.phase().to_string(),
        active_variant,
        status,
        progress_percent,
        saved_position: progress.get_progress(&media_id).await,
        navigation: navigator.requests(),
        calls: engine.calls(),
    };

    match format {
        OutputFormat::Json => println!("{}", to_json(&report)?),
        OutputFormat::Text | OutputFormat::Table => {
            println!("Session: {} ({})", report.media_id, report.final_phase);
            match &report.active_variant {
                Some(q) => println!("Active variant: {} ({})", q.variant.token.0, q.label),
                None => println!("Active variant: none"),
            }
            if let Some(status) = report.status {
                println!("Status: {status}");
            }
            if let Some(percent) = report.progress_percent {
                println!("Progress: {percent:.1}%");
            }
            match report.saved_position {
                Some(t) => println!("Saved position: {t:.1}s"),
                None => println!("Saved position: none"),
            }
            println!("Navigation: {:?}", report.navigation);
            println!("\nEngine calls:");
            for (i, call) in report.calls.iter().enumerate() {
                println!("  {:>3}. {call:?}", i + 1);
            }
        }
    }

    Ok(())
}

//! Variant selection from device audio capability
//!
//! Selection is split in two:
//! - [`select_variant`]: pure ranking of a variant list against the sink's
//!   supported sample formats under a [`CodecPreferencePolicy`]
//! - [`TrackSelector`]: applies the result through a [`QualityController`],
//!   skipping the engine call when the choice is already active
//!
//! Ranking:
//! 1. Group variants by audio codec
//! 2. The first policy rule matching the supported formats names a preferred
//!    codec; the highest-bandwidth variant of that group wins
//! 3. Otherwise (no rule, or empty group) the highest-bandwidth variant with
//!    any known audio codec wins

use crate::labeler;
use crate::types::{AudioSampleFormat, QualityVariant, Variant, VariantToken};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// AAC-LC codec identifier
pub const BASELINE_AAC: &str = "mp4a.40.2";
/// HE-AAC codec identifier
pub const HE_AAC: &str = "mp4a.40.5";

/// Maps a set of supported sample formats to a preferred audio codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatRule {
    /// Every one of these must be supported
    #[serde(default)]
    pub all_of: Vec<AudioSampleFormat>,
    /// At least one of these must be supported (ignored when empty)
    #[serde(default)]
    pub any_of: Vec<AudioSampleFormat>,
    /// None of these may be supported
    #[serde(default)]
    pub none_of: Vec<AudioSampleFormat>,
    pub codec: String,
}

impl FormatRule {
    pub fn matches(&self, formats: &[AudioSampleFormat]) -> bool {
        self.all_of.iter().all(|f| formats.contains(f))
            && (self.any_of.is_empty() || self.any_of.iter().any(|f| formats.contains(f)))
            && !self.none_of.iter().any(|f| formats.contains(f))
    }
}

/// Ordered PCM-format to codec preference table. The first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecPreferencePolicy {
    pub rules: Vec<FormatRule>,
}

impl Default for CodecPreferencePolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                // 16-bit only sinks get AAC-LC
                FormatRule {
                    all_of: vec![AudioSampleFormat::Pcm16],
                    any_of: Vec::new(),
                    none_of: vec![AudioSampleFormat::Pcm8, AudioSampleFormat::Pcm32],
                    codec: BASELINE_AAC.to_string(),
                },
                // high-resolution sinks get HE-AAC
                FormatRule {
                    all_of: Vec::new(),
                    any_of: vec![AudioSampleFormat::Pcm24, AudioSampleFormat::Pcm32],
                    none_of: Vec::new(),
                    codec: HE_AAC.to_string(),
                },
            ],
        }
    }
}

impl CodecPreferencePolicy {
    /// Preferred codec for the supported formats, if any rule matches
    pub fn preferred_codec(&self, formats: &[AudioSampleFormat]) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matches(formats))
            .map(|rule| rule.codec.as_str())
    }
}

/// Why a variant was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    PreferredCodec,
    HighestBandwidth,
}

/// Result of ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub variant: Variant,
    pub reason: SelectionReason,
}

// First of the highest bandwidth in list order.
fn highest_bandwidth<'a>(variants: impl IntoIterator<Item = &'a Variant>) -> Option<&'a Variant> {
    variants.into_iter().fold(None, |best: Option<&Variant>, v| match best {
        Some(b) if b.bandwidth >= v.bandwidth => Some(b),
        _ => Some(v),
    })
}

/// Rank `variants` for the supported formats
pub fn select_variant(
    variants: &[Variant],
    formats: &[AudioSampleFormat],
    policy: &CodecPreferencePolicy,
) -> Option<Selection> {
    let mut by_codec: BTreeMap<&str, Vec<&Variant>> = BTreeMap::new();
    for variant in variants {
        if let Some(codec) = variant.audio_codec_family() {
            by_codec.entry(codec).or_default().push(variant);
        }
    }

    if let Some(codec) = policy.preferred_codec(formats) {
        if let Some(best) = by_codec.get(codec).and_then(|group| highest_bandwidth(group.iter().copied())) {
            return Some(Selection {
                variant: best.clone(),
                reason: SelectionReason::PreferredCodec,
            });
        }
        debug!(codec, "No variants for preferred codec, falling back");
    }

    highest_bandwidth(variants.iter().filter(|v| v.audio_codec_family().is_some())).map(|v| Selection {
        variant: v.clone(),
        reason: SelectionReason::HighestBandwidth,
    })
}

/// Engine-side surface the selector drives
pub trait QualityController: Send + Sync {
    fn available_qualities(&self) -> Result<Vec<QualityVariant>>;
    fn set_quality(&self, token: VariantToken) -> Result<()>;
}

/// Callback receiving every selection result
pub type SelectionObserver = Arc<dyn Fn(Option<&QualityVariant>) + Send + Sync>;

/// What one selection run did
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionOutcome {
    pub selected: Option<QualityVariant>,
    /// `set_quality` was issued
    pub switched: bool,
}

impl SelectionOutcome {
    fn none() -> Self {
        Self {
            selected: None,
            switched: false,
        }
    }
}

/// Applies [`select_variant`] to an engine
#[derive(Clone, Default)]
pub struct TrackSelector {
    policy: CodecPreferencePolicy,
    observer: Option<SelectionObserver>,
}

impl TrackSelector {
    pub fn new(policy: CodecPreferencePolicy) -> Self {
        Self {
            policy,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: SelectionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn policy(&self) -> &CodecPreferencePolicy {
        &self.policy
    }

    /// Select and apply the best variant. Never fails: errors are logged and
    /// count as "no selection".
    #[instrument(skip(self, controller))]
    pub fn run(&self, controller: &dyn QualityController, formats: &[AudioSampleFormat]) -> SelectionOutcome {
        match self.try_run(controller, formats) {
            Ok(outcome) => {
                if let Some(observer) = &self.observer {
                    observer(outcome.selected.as_ref());
                }
                outcome
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Track selection skipped");
                SelectionOutcome::none()
            }
        }
    }

    fn try_run(&self, controller: &dyn QualityController, formats: &[AudioSampleFormat]) -> Result<SelectionOutcome> {
        let qualities = controller.available_qualities()?;
        if qualities.is_empty() {
            debug!("No variant tracks available");
            return Ok(SelectionOutcome::none());
        }

        let variants: Vec<Variant> = qualities.iter().map(|q| q.variant.clone()).collect();
        let Some(selection) = select_variant(&variants, formats, &self.policy) else {
            return Ok(SelectionOutcome::none());
        };

        let token = selection.variant.token;
        let active = variants.iter().find(|v| v.active).map(|v| v.token);

        let switched = if active != Some(token) {
            controller.set_quality(token)?;
            info!(
                token = %token,
                bandwidth = selection.variant.bandwidth,
                codec = selection.variant.audio_codec_family().unwrap_or_default(),
                reason = ?selection.reason,
                "Variant switched"
            );
            true
        } else {
            debug!(token = %token, "Selected variant already active");
            false
        };

        let selected = qualities
            .into_iter()
            .find(|q| q.token() == token)
            .unwrap_or_else(|| QualityVariant {
                label: labeler::label_for(&selection.variant),
                variant: selection.variant,
            });

        Ok(SelectionOutcome {
            selected: Some(selected),
            switched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Mutex;
    use AudioSampleFormat::*;

    fn aac(token: u64, codec: &str, bandwidth: u64) -> Variant {
        Variant::new(token, bandwidth).with_audio_codec(codec)
    }

    struct FakeController {
        variants: Vec<Variant>,
        calls: Mutex<Vec<VariantToken>>,
        fail: bool,
    }

    impl FakeController {
        fn new(variants: Vec<Variant>) -> Self {
            Self {
                variants,
                calls: Mutex::new(Vec::new()),
                fail: false,
            }
        }
    }

    impl QualityController for FakeController {
        fn available_qualities(&self) -> Result<Vec<QualityVariant>> {
            if self.fail {
                return Err(Error::engine("variant enumeration failed"));
            }
            Ok(self
                .variants
                .iter()
                .map(|v| QualityVariant {
                    label: labeler::label_for(v),
                    variant: v.clone(),
                })
                .collect())
        }

        fn set_quality(&self, token: VariantToken) -> Result<()> {
            self.calls.lock().unwrap().push(token);
            Ok(())
        }
    }

    #[test]
    fn test_pcm16_prefers_baseline_aac() {
        let variants = vec![
            aac(1, BASELINE_AAC, 800),
            aac(2, BASELINE_AAC, 1600),
            aac(3, HE_AAC, 5000),
        ];
        let selection = select_variant(&variants, &[Pcm16], &CodecPreferencePolicy::default()).unwrap();
        assert_eq!(selection.variant.token, VariantToken(2));
        assert_eq!(selection.reason, SelectionReason::PreferredCodec);
    }

    #[test]
    fn test_pcm24_prefers_he_aac_over_bandwidth() {
        let variants = vec![aac(1, HE_AAC, 500), aac(2, HE_AAC, 1200), aac(3, BASELINE_AAC, 2000)];
        let selection = select_variant(&variants, &[Pcm24], &CodecPreferencePolicy::default()).unwrap();
        assert_eq!(selection.variant.token, VariantToken(2));
        assert_eq!(selection.variant.bandwidth, 1200);
    }

    #[test]
    fn test_pcm16_with_pcm32_uses_he_aac_rule() {
        let variants = vec![aac(1, BASELINE_AAC, 3000), aac(2, HE_AAC, 700)];
        let selection = select_variant(&variants, &[Pcm16, Pcm32], &CodecPreferencePolicy::default()).unwrap();
        assert_eq!(selection.variant.token, VariantToken(2));
    }

    #[test]
    fn test_fallback_to_global_maximum() {
        let variants = vec![
            aac(1, BASELINE_AAC, 800),
            aac(2, "ec-3", 6000),
            Variant::new(3, 9000), // no audio codec
        ];

        // rule matches but group is empty
        let selection = select_variant(&variants, &[Pcm24], &CodecPreferencePolicy::default()).unwrap();
        assert_eq!(selection.variant.token, VariantToken(2));
        assert_eq!(selection.reason, SelectionReason::HighestBandwidth);

        // no rule matches
        let selection = select_variant(&variants, &[Pcm8], &CodecPreferencePolicy::default()).unwrap();
        assert_eq!(selection.variant.token, VariantToken(2));
    }

    #[test]
    fn test_no_known_codec_selects_nothing() {
        let variants = vec![Variant::new(1, 100), Variant::new(2, 200)];
        assert!(select_variant(&variants, &[Pcm16], &CodecPreferencePolicy::default()).is_none());
        assert!(select_variant(&[], &[Pcm16], &CodecPreferencePolicy::default()).is_none());
    }

    #[test]
    fn test_equal_bandwidth_keeps_list_order() {
        let variants = vec![aac(5, BASELINE_AAC, 1000), aac(6, BASELINE_AAC, 1000)];
        let selection = select_variant(&variants, &[Pcm16], &CodecPreferencePolicy::default()).unwrap();
        assert_eq!(selection.variant.token, VariantToken(5));
    }

    #[test]
    fn test_custom_policy() {
        let policy = CodecPreferencePolicy {
            rules: vec![FormatRule {
                all_of: vec![PcmFloat],
                any_of: Vec::new(),
                none_of: Vec::new(),
                codec: "ec-3".into(),
            }],
        };
        let variants = vec![aac(1, "ec-3", 100), aac(2, BASELINE_AAC, 900)];
        let selection = select_variant(&variants, &[PcmFloat, Pcm16], &policy).unwrap();
        assert_eq!(selection.variant.token, VariantToken(1));
    }

    #[test]
    fn test_selector_is_idempotent() {
        let controller = FakeController::new(vec![aac(1, BASELINE_AAC, 800), aac(2, BASELINE_AAC, 1600).activated()]);
        let selector = TrackSelector::default();

        let outcome = selector.run(&controller, &[Pcm16]);
        assert!(!outcome.switched);
        assert_eq!(outcome.selected.unwrap().token(), VariantToken(2));
        assert!(controller.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_selector_switches_and_notifies() {
        let controller = FakeController::new(vec![aac(1, BASELINE_AAC, 800).activated(), aac(2, BASELINE_AAC, 1600)]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let selector = TrackSelector::default().with_observer(Arc::new(move |q: Option<&QualityVariant>| {
            sink.lock().unwrap().push(q.map(|q| q.token()));
        }));

        let outcome = selector.run(&controller, &[Pcm16]);
        assert!(outcome.switched);
        assert_eq!(*controller.calls.lock().unwrap(), vec![VariantToken(2)]);
        assert_eq!(*seen.lock().unwrap(), vec![Some(VariantToken(2))]);
    }

    #[test]
    fn test_selector_swallows_errors() {
        let mut controller = FakeController::new(vec![aac(1, BASELINE_AAC, 800)]);
        controller.fail = true;

        let outcome = TrackSelector::default().run(&controller, &[Pcm16]);
        assert_eq!(outcome, SelectionOutcome::none());
    }
}

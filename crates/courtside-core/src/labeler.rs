//! Human-readable labels for video variants

use crate::types::Variant;

const RESOLUTION_LABELS: &[(u32, u32, &str)] = &[
    (720, 480, "480p"),
    (720, 576, "576p"),
    (1280, 720, "720p HD"),
    (1920, 1080, "1080p FHD"),
    (3840, 2160, "4K UHD"),
    (7680, 4320, "8K UHD"),
];

const UNKNOWN_RESOLUTION: &str = "Unknown Resolution";

/// Label a variant from its exact resolution and optional frame rate,
/// e.g. `"1080p FHD 60fps"`.
pub fn variant_label(width: Option<u32>, height: Option<u32>, frame_rate: Option<f32>) -> String {
    let mut label = RESOLUTION_LABELS
        .iter()
        .find(|(w, h, _)| Some(*w) == width && Some(*h) == height)
        .map(|(_, _, label)| *label)
        .unwrap_or(UNKNOWN_RESOLUTION)
        .to_string();

    if let Some(fps) = frame_rate {
        label.push_str(&format!(" {fps}fps"));
    }

    label
}

/// Label for a full variant
pub fn label_for(variant: &Variant) -> String {
    variant_label(variant.width, variant.height, variant.frame_rate)
}

//! Output formatting for CLI

use clap::ValueEnum;
use courtside_core::QualityVariant;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

/// Pretty JSON for `--format json`
pub fn to_json<T: Serialize>(data: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(data)?)
}

#[derive(Tabled)]
struct VariantRow {
    #[tabled(rename = "Token")]
    token: u64,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Bandwidth")]
    bandwidth: String,
    #[tabled(rename = "Audio")]
    audio: String,
    #[tabled(rename = "Active")]
    active: &'static str,
}

impl From<&QualityVariant> for VariantRow {
    fn from(quality: &QualityVariant) -> Self {
        let variant = &quality.variant;
        Self {
            token: variant.token.0,
            label: if quality.label.is_empty() { "-".into() } else { quality.label.clone() },
            bandwidth: format_bandwidth(variant.bandwidth),
            audio: variant.audio_codec_family().unwrap_or("-").to_string(),
            active: if variant.active { "*" } else { "" },
        }
    }
}

/// Render a variant ladder as a table
pub fn variant_table(qualities: &[QualityVariant]) -> String {
    let rows: Vec<VariantRow> = qualities.iter().map(VariantRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

fn format_bandwidth(bps: u64) -> String {
    if bps >= 1_000_000 {
        format!("{:.1} Mbps", bps as f64 / 1_000_000.0)
    } else {
        format!("{} kbps", bps / 1_000)
    }
}

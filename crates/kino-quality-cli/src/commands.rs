//! CLI command implementations

use crate::output::{self, OutputFormat};
use anyhow::Context;
use kino_quality::{
    ConnectionHint, ConnectionSignal, DeviceCapability, DeviceProfile, DeviceSignals,
    EffectiveType, HlsVariantLocator, QualityLevel, QualityMode,
};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;
use url::Url;

#[cfg(feature = "simulate")]
use crate::scenario::{self, Scenario};
#[cfg(feature = "simulate")]
use kino_quality::ControllerConfig;
#[cfg(feature = "simulate")]
use std::path::PathBuf;

#[derive(Serialize)]
struct ProfileReport {
    capability: DeviceCapability,
    available_qualities: Vec<QualityMode>,
}

#[derive(Tabled)]
struct KeyValueRow {
    #[tabled(rename = "Property")]
    key: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

/// Show the capability computed for a device
pub fn profile(signals: &DeviceSignals, format: &str) -> anyhow::Result<()> {
    let capability = DeviceProfile::compute(signals);
    let report = ProfileReport {
        available_qualities: capability.available_qualities(),
        capability,
    };

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::to_json(&report)?),
        OutputFormat::Table => println!("{}", output::table(capability_rows(&report))),
        OutputFormat::Text => {
            println!("{}", output::heading("Device Profile"));
            for row in capability_rows(&report) {
                println!("  {}: {}", row.key, row.value);
            }
        }
    }
    Ok(())
}

fn capability_rows(report: &ProfileReport) -> Vec<KeyValueRow> {
    let menu = report
        .available_qualities
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    vec![
        KeyValueRow {
            key: "Max quality",
            value: report.capability.max_quality.to_string(),
        },
        KeyValueRow {
            key: "Mobile",
            value: report.capability.is_mobile.to_string(),
        },
        KeyValueRow {
            key: "High end",
            value: report.capability.is_high_end.to_string(),
        },
        KeyValueRow {
            key: "Screen",
            value: format!("{}px", report.capability.screen_max_dimension),
        },
        KeyValueRow {
            key: "Menu",
            value: menu,
        },
    ]
}

#[derive(Serialize)]
struct RecommendReport {
    hint: ConnectionHint,
    max_quality: QualityLevel,
    recommended: QualityLevel,
}

/// Evaluate the connection recommendation for a hint on a device
pub fn recommend(
    effective_type: &str,
    downlink_mbps: f32,
    data_saver: bool,
    signals: &DeviceSignals,
    format: &str,
) -> anyhow::Result<()> {
    let hint = ConnectionHint::new(EffectiveType::from_label(effective_type), downlink_mbps, data_saver);
    let capability = DeviceProfile::compute(signals);
    let report = RecommendReport {
        hint,
        max_quality: capability.max_quality,
        recommended: ConnectionSignal::recommend(&hint, &capability),
    };

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::to_json(&report)?),
        OutputFormat::Table => {
            let rows = vec![
                KeyValueRow {
                    key: "Effective type",
                    value: report.hint.effective_type.to_string(),
                },
                KeyValueRow {
                    key: "Downlink",
                    value: format!("{:.1} Mbps", report.hint.downlink_mbps),
                },
                KeyValueRow {
                    key: "Data saver",
                    value: report.hint.data_saver.to_string(),
                },
                KeyValueRow {
                    key: "Device cap",
                    value: report.max_quality.to_string(),
                },
                KeyValueRow {
                    key: "Recommended",
                    value: report.recommended.to_string(),
                },
            ];
            println!("{}", output::table(rows));
        }
        OutputFormat::Text => {
            println!(
                "{} {} ({} at {:.1} Mbps{}, cap {})",
                output::heading("Recommended:"),
                report.recommended,
                report.hint.effective_type,
                report.hint.downlink_mbps,
                if report.hint.data_saver { ", data saver" } else { "" },
                report.max_quality
            );
        }
    }
    Ok(())
}

#[derive(Serialize, Tabled)]
struct LadderRow {
    #[tabled(rename = "Quality")]
    quality: QualityLevel,
    #[tabled(rename = "Resolution")]
    resolution: String,
    #[tabled(rename = "Bandwidth")]
    bandwidth: u64,
    #[tabled(rename = "URL")]
    url: String,
}

/// Print the quality ladder resolved from an HLS master playlist
pub async fn ladder(master: &str, format: &str) -> anyhow::Result<()> {
    let locator = HlsVariantLocator::new()?;

    if master.starts_with("http://") || master.starts_with("https://") {
        let url = Url::parse(master)?;
        locator.fetch(master, &url).await?;
    } else {
        let path = Path::new(master)
            .canonicalize()
            .with_context(|| format!("reading {}", master))?;
        let url = Url::from_file_path(&path)
            .map_err(|_| anyhow::anyhow!("cannot build a URL for {}", path.display()))?;
        let content = std::fs::read(&path)?;
        locator.register(master, &url, &content).await?;
    }

    let rows: Vec<LadderRow> = locator
        .ladder(master)
        .await
        .into_iter()
        .map(|entry| LadderRow {
            quality: entry.quality,
            resolution: format!("{}x{}", entry.resolution.0, entry.resolution.1),
            bandwidth: entry.bandwidth,
            url: entry.url.to_string(),
        })
        .collect();

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::to_json(&rows)?),
        OutputFormat::Table => println!("{}", output::table(rows)),
        OutputFormat::Text => {
            println!("{}", output::heading("Quality Ladder"));
            for row in &rows {
                println!(
                    "  {:>5}  {:>9}  {:>9} bps  {}",
                    row.quality.to_string(),
                    row.resolution,
                    row.bandwidth,
                    row.url
                );
            }
        }
    }
    Ok(())
}

#[cfg(feature = "simulate")]
#[derive(Tabled)]
struct NotificationRow {
    #[tabled(rename = "Time")]
    at: String,
    #[tabled(rename = "Seq")]
    sequence: u64,
    #[tabled(rename = "Event")]
    event: String,
}

/// Replay a scenario file against the controller
#[cfg(feature = "simulate")]
pub async fn simulate(path: &Path, config: Option<PathBuf>, format: &str) -> anyhow::Result<()> {
    let scenario = Scenario::from_file(path)?;
    let config = match config {
        Some(config) => ControllerConfig::from_file(&config)
            .with_context(|| format!("loading config {}", config.display()))?,
        None => ControllerConfig::default(),
    };

    let report = scenario::run(scenario, config).await?;

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::to_json(&report)?),
        OutputFormat::Table => {
            let rows = report.notifications.iter().map(|n| NotificationRow {
                at: format!("{:.1}s", n.at_ms as f64 / 1000.0),
                sequence: n.record.sequence,
                event: console::strip_ansi_codes(&output::describe(&n.record)).to_string(),
            });
            println!("{}", output::table(rows));
        }
        OutputFormat::Text => {
            println!(
                "{} {}",
                output::heading("Scenario"),
                report.name.as_deref().unwrap_or(&path.display().to_string())
            );
            for n in &report.notifications {
                println!("  [{:>7.1}s] {}", n.at_ms as f64 / 1000.0, output::describe(&n.record));
            }
        }
    }

    if OutputFormat::from(format) != OutputFormat::Json {
        println!(
            "\nFinal: {} ({}), cap {}, {} switches, {} failures, {} user notices over {:.1}s",
            report.final_quality,
            report.final_mode,
            report.max_quality,
            report.switches,
            report.failures,
            report.user_notices,
            report.duration_ms as f64 / 1000.0
        );
    }
    Ok(())
}

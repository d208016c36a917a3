//! Output formatting for CLI

use console::style;
#[cfg(feature = "simulate")]
use kino_quality::{NotificationRecord, QualityEvent};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// Pretty JSON for `--format json`
pub fn to_json<T: Serialize>(data: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(data)?)
}

/// Rounded table for `--format table`
pub fn table<R: Tabled>(rows: impl IntoIterator<Item = R>) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn heading(text: &str) -> String {
    style(text).bold().cyan().to_string()
}

/// One-line description of a notification
#[cfg(feature = "simulate")]
pub fn describe(record: &NotificationRecord) -> String {
    match &record.event {
        QualityEvent::QualityChanged(changed) => format!(
            "{} {} -> {} ({})",
            style("switched").green(),
            changed.from,
            changed.to,
            changed.reason
        ),
        QualityEvent::SwitchFailed(failed) => format!(
            "{} {} [{}] {}",
            style("failed").red(),
            failed.attempted,
            failed.code,
            failed.cause
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("table"), OutputFormat::Table);
        assert_eq!(OutputFormat::from("anything"), OutputFormat::Text);
    }
}

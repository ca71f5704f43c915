//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of rows
pub fn print_table<T: Tabled>(rows: &[T]) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a latency sample; the probe-failure sentinel shows as a timeout
pub fn format_latency(ms: f64) -> String {
    if ms >= 1_000_000.0 {
        "timeout".to_string()
    } else {
        format!("{:.1}ms", ms)
    }
}

/// Mean of a sample list, `-` when empty
pub fn format_mean(samples: &[f64]) -> String {
    if samples.is_empty() {
        return "-".to_string();
    }
    format_latency(samples.iter().sum::<f64>() / samples.len() as f64)
}

pub fn format_kbps(kbps: f64) -> String {
    if kbps >= 1024.0 {
        format!("{:.2} MB/s", kbps / 1024.0)
    } else {
        format!("{:.1} KB/s", kbps)
    }
}

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Coarse age relative to `now`, e.g. `3m` or `2h`
pub fn format_age(since: &DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - *since).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "completed" | "joined" | "scale-up" | "healthy" | "running" => status.green().to_string(),
        "removed" | "scale-down" | "degraded" | "pending" => status.yellow().to_string(),
        "aborted" | "failed" | "unknown" | "crashloopbackoff" | "oomkilled" => {
            status.red().to_string()
        }
        _ => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_latency() {
        assert_eq!(format_latency(12.345), "12.3ms");
        assert_eq!(format_latency(1_000_000.0), "timeout");
        assert_eq!(format_mean(&[10.0, 20.0]), "15.0ms");
        assert_eq!(format_mean(&[]), "-");
    }

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(&(now - chrono::Duration::seconds(42)), now), "42s");
        assert_eq!(format_age(&(now - chrono::Duration::minutes(5)), now), "5m");
        assert_eq!(format_age(&(now - chrono::Duration::hours(30)), now), "1d");
        assert_eq!(format_age(&(now + chrono::Duration::seconds(5)), now), "0s");
    }

    #[test]
    fn test_format_kbps() {
        assert_eq!(format_kbps(150.0), "150.0 KB/s");
        assert_eq!(format_kbps(2048.0), "2.00 MB/s");
    }
}

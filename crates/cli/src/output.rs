//! Output formatting utilities

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

/// Print rows as a rounded table, or a note when there are none
pub fn print_table<T: Tabled>(items: &[T], empty_message: &str) {
    if items.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    println!("{}", Table::new(items).with(Style::rounded()));
}

/// Pretty-printed JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(50));
}

/// Seconds as milliseconds with two decimals, `-` when missing
pub fn format_ms(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) => format!("{:.2} ms", s * 1000.0),
        None => "-".to_string(),
    }
}

/// Requests per second with one decimal
pub fn format_rate(rate: f64) -> String {
    format!("{:.1}/s", rate)
}

/// Percentage of `part` in `total`, `-` for an empty total
pub fn format_ratio(part: u64, total: u64) -> String {
    if total == 0 {
        "-".to_string()
    } else {
        format!("{:.1}%", part as f64 / total as f64 * 100.0)
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "complete" | "finalized" | "sampling_and_loading" => {
            status.green().to_string()
        }
        "degraded" | "draining" | "idle" | "spike" => status.yellow().to_string(),
        "unhealthy" | "incomplete" | "failed" => status.red().to_string(),
        _ => status.to_string(),
    }
}

//! Output formatting utilities

use colored::*;
use serde::Serialize;

/// Print a value as pretty JSON
pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Print a labelled value
pub fn print_field(label: &str, value: impl std::fmt::Display) {
    println!("{:<14} {}", format!("{}:", label).bold(), value);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

//! Operator-facing output
//!
//! Phase transitions and failures are printed to stdout, in the same
//! channel, independently of the tracing log sink.

use colored::Colorize;

use crate::deploy::fsm::RebuildPhase;
use crate::models::deployment::Deployment;

pub fn phase(deployment: &Deployment, phase: RebuildPhase) {
    let tag = format!("[{}]", deployment).cyan().bold();
    match phase {
        RebuildPhase::Running => println!("{} {}", tag, phase.to_string().green().bold()),
        RebuildPhase::Failed => println!("{} {}", tag, phase.to_string().red().bold()),
        _ => println!("{} {}...", tag, phase),
    }
}

pub fn step(message: &str) {
    println!("{} {}", "==>".blue().bold(), message);
}

pub fn success(message: &str) {
    println!("{} {}", "[SUCCESS]".green().bold(), message);
}

pub fn warn(message: &str) {
    println!("{} {}", "[WARN]".yellow().bold(), message);
}

pub fn failure(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
}

/// Indented `label: value` line
pub fn field(label: &str, value: &str) {
    println!("  {:<12} {}", format!("{}:", label).dimmed(), value);
}

//! User-facing status lines.
//!
//! `[INFO]` goes to stdout, `[WARN]` and `[ERROR]` to stderr. Every line is
//! also sent to the logger so `RUST_LOG` captures the same story.

use crossterm::style::Stylize;
use std::io::IsTerminal;

fn colour_stdout() -> bool {
    std::io::stdout().is_terminal()
}

fn colour_stderr() -> bool {
    std::io::stderr().is_terminal()
}

pub fn info(message: &str) {
    log::info!("{}", message);
    if colour_stdout() {
        println!("{} {}", "[INFO]".green().bold(), message);
    } else {
        println!("[INFO] {}", message);
    }
}

pub fn warn(message: &str) {
    log::warn!("{}", message);
    if colour_stderr() {
        eprintln!("{} {}", "[WARN]".yellow().bold(), message);
    } else {
        eprintln!("[WARN] {}", message);
    }
}

pub fn error(message: &str) {
    log::error!("{}", message);
    if colour_stderr() {
        eprintln!("{} {}", "[ERROR]".red().bold(), message);
    } else {
        eprintln!("[ERROR] {}", message);
    }
}

/// Header printed when a step starts.
pub fn step(index: usize, total: usize, name: &str) {
    log::info!("Step {}/{}: {}", index, total, name);
    if colour_stdout() {
        println!("\n{} {}", format!("==> [{}/{}]", index, total).cyan().bold(), name.bold());
    } else {
        println!("\n==> [{}/{}] {}", index, total, name);
    }
}

//! Runtime settings read from the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `ARCHGAMER_PACMAN_FLAGS` | `--noconfirm --needed` | Flags added to every `pacman -S` |
//! | `ARCHGAMER_TARGET_ROOT` | `/mnt` | Mount point of the new system (full install) |
//! | `ARCHGAMER_ELEVATE` | `sudo` | Wrapper used to run privileged commands when not root |
//! | `ARCHGAMER_UI` | auto | `text` or `dialog` to force a prompt backend |
//! | `ARCHGAMER_MODE_HEURISTIC` | `privilege` | How the run mode is picked without `--mode` |
//! | `ARCHGAMER_SKIP_ROOT_CHECK` | unset | `1`/`true` pretends to be root (development only) |

use std::path::PathBuf;
use std::str::FromStr;

use strum::{Display, EnumString};

use crate::types::RunMode;

/// Which prompt backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum UiPreference {
    /// Dialog boxes when the terminal supports them, otherwise text
    #[default]
    Auto,
    Text,
    Dialog,
}

/// How to pick the run mode when `--mode` is not given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ModeHeuristic {
    /// Root implies a full install from the live ISO, anything else post-install
    #[default]
    Privilege,
    /// Always post-install
    PostInstall,
    /// Always full install
    FullInstall,
}

impl ModeHeuristic {
    pub fn pick(self, is_root: bool) -> RunMode {
        match self {
            Self::Privilege if is_root => RunMode::FullInstall,
            Self::Privilege => RunMode::PostInstall,
            Self::PostInstall => RunMode::PostInstall,
            Self::FullInstall => RunMode::FullInstall,
        }
    }
}

/// Resolve the run mode. A forced mode skips detection entirely.
pub fn resolve_run_mode(forced: Option<RunMode>, is_root: bool, heuristic: ModeHeuristic) -> RunMode {
    match forced {
        Some(mode) => {
            log::info!("Run mode forced: {}", mode);
            mode
        }
        None => {
            let mode = heuristic.pick(is_root);
            log::info!("Run mode detected via {} heuristic: {}", heuristic, mode);
            mode
        }
    }
}

/// Environment-driven runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub pacman_flags: Vec<String>,
    pub target_root: PathBuf,
    pub elevate: String,
    pub ui: UiPreference,
    pub mode_heuristic: ModeHeuristic,
    pub skip_root_check: bool,
    /// Print commands instead of running them (`--dry-run`)
    pub dry_run: bool,
    /// Print the validation report as JSON (`--json`)
    pub json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pacman_flags: vec!["--noconfirm".to_string(), "--needed".to_string()],
            target_root: PathBuf::from("/mnt"),
            elevate: "sudo".to_string(),
            ui: UiPreference::Auto,
            mode_heuristic: ModeHeuristic::Privilege,
            skip_root_check: false,
            dry_run: false,
            json: false,
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup (used by tests).
    ///
    /// Unparseable values are logged and replaced by the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(flags) = lookup("ARCHGAMER_PACMAN_FLAGS") {
            settings.pacman_flags = flags.split_whitespace().map(String::from).collect();
        }
        if let Some(root) = lookup("ARCHGAMER_TARGET_ROOT").filter(|r| !r.trim().is_empty()) {
            settings.target_root = PathBuf::from(root.trim());
        }
        if let Some(elevate) = lookup("ARCHGAMER_ELEVATE").filter(|e| !e.trim().is_empty()) {
            settings.elevate = elevate.trim().to_string();
        }
        if let Some(ui) = lookup("ARCHGAMER_UI") {
            settings.ui = parse_or_default("ARCHGAMER_UI", &ui);
        }
        if let Some(h) = lookup("ARCHGAMER_MODE_HEURISTIC") {
            settings.mode_heuristic = parse_or_default("ARCHGAMER_MODE_HEURISTIC", &h);
        }
        settings.skip_root_check = lookup("ARCHGAMER_SKIP_ROOT_CHECK")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        settings
    }
}

fn parse_or_default<T: FromStr + Default>(key: &str, value: &str) -> T {
    match value.trim().to_lowercase().parse() {
        Ok(v) => v,
        Err(_) => {
            log::warn!("Ignoring invalid value {:?} for {}", value, key);
            T::default()
        }
    }
}

//! Post-run validation report.
//!
//! Re-reads the live state of the target (installed packages, enabled units,
//! pacman.conf, swap) and compares it with what the configuration asked for.
//! Nothing here changes the system. Mismatches are reported with a literal
//! command that fixes them; optional components are never reported as FAIL.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::catalog::{self, Source};
use crate::config::InstallConfig;
use crate::hardware::{self, DetectedFacts};
use crate::runner::{CommandRunner, CommandSpec, Target};
use crate::sysfiles::{self, MultilibEdit};
use crate::types::{AurHelper, Desktop};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
    Info,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
            Self::Fail => "FAIL",
            Self::Info => "INFO",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub label: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ValidationResult {
    fn new(status: CheckStatus, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status,
            remediation: None,
        }
    }

    fn fix(mut self, command: impl Into<String>) -> Self {
        self.remediation = Some(command.into());
        self
    }
}

/// Counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub ok: usize,
    pub warn: usize,
    pub fail: usize,
    pub info: usize,
}

impl Tally {
    pub fn of(results: &[ValidationResult]) -> Self {
        results.iter().fold(Self::default(), |mut t, r| {
            match r.status {
                CheckStatus::Ok => t.ok += 1,
                CheckStatus::Warn => t.warn += 1,
                CheckStatus::Fail => t.fail += 1,
                CheckStatus::Info => t.info += 1,
            }
            t
        })
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ok, {} warnings, {} failures", self.ok, self.warn, self.fail)
    }
}

/// Prefix that runs a command on `target` with root rights.
fn root_prefix(target: &Target) -> String {
    match target.root() {
        Some(root) => format!("arch-chroot {} ", root.display()),
        None => "sudo ".to_string(),
    }
}

fn pacman_fix(target: &Target, packages: &[&str]) -> String {
    format!("{}pacman -S --needed {}", root_prefix(target), packages.join(" "))
}

fn installed_on(runner: &dyn CommandRunner, target: &Target, facts: &DetectedFacts) -> HashSet<String> {
    let mut spec = CommandSpec::new("pacman").arg("-Qq").query().within(target.root());
    spec.privileged = target.root().is_some();
    match runner.query_stdout(&spec) {
        Some(out) => hardware::parse_package_list(&out),
        None if target.is_host() => facts.installed.clone(),
        None => HashSet::new(),
    }
}

fn unit_enabled(runner: &dyn CommandRunner, target: &Target, unit: &str) -> bool {
    let spec = CommandSpec::new("systemctl")
        .args(["is-enabled", unit])
        .query()
        .within(target.root());
    runner
        .query_stdout(&spec)
        .is_some_and(|out| out.trim() == "enabled")
}

/// Check the target against `config`.
pub fn validate(
    config: &InstallConfig,
    facts: &DetectedFacts,
    runner: &dyn CommandRunner,
    target: &Target,
) -> Vec<ValidationResult> {
    let installed = installed_on(runner, target, facts);
    let mut results = Vec::new();

    // Multilib
    let pacman_conf = target.file("/etc/pacman.conf");
    let multilib = match std::fs::read_to_string(&pacman_conf) {
        Ok(content) => Some(sysfiles::enable_multilib(&content) == MultilibEdit::AlreadyEnabled),
        Err(e) => {
            log::debug!("Cannot read {}: {}", pacman_conf.display(), e);
            None
        }
    };
    results.push(match multilib {
        Some(true) => ValidationResult::new(CheckStatus::Ok, "Multilib repository enabled"),
        Some(false) if config.needs_multilib() || config.enable_multilib => {
            ValidationResult::new(CheckStatus::Warn, "Multilib repository disabled")
                .fix(format!("Uncomment [multilib] in /etc/pacman.conf, then {}pacman -Sy", root_prefix(target)))
        }
        Some(false) => ValidationResult::new(CheckStatus::Info, "Multilib repository disabled (not requested)"),
        None => ValidationResult::new(CheckStatus::Info, "Could not read pacman.conf"),
    });

    // GPU driver
    let driver = catalog::gpu_core_package(facts.gpu);
    results.push(if installed.contains(driver) {
        ValidationResult::new(CheckStatus::Ok, format!("{} GPU driver ({})", facts.gpu, driver))
    } else {
        ValidationResult::new(CheckStatus::Warn, format!("{} GPU driver ({}) missing", facts.gpu, driver))
            .fix(pacman_fix(target, catalog::gpu_packages(facts.gpu)))
    });

    // Desktop and display manager
    match catalog::desktop_profile(config.desktop) {
        None => results.push(ValidationResult::new(CheckStatus::Info, "No desktop selected")),
        Some(profile) => {
            results.push(if installed.contains(profile.core_package) {
                ValidationResult::new(CheckStatus::Ok, format!("Desktop {} installed", config.desktop))
            } else {
                ValidationResult::new(
                    CheckStatus::Fail,
                    format!("Desktop {} missing ({} not installed)", config.desktop, profile.core_package),
                )
                .fix(pacman_fix(target, profile.packages))
            });
            if let Some(dm) = profile.display_manager {
                results.push(if unit_enabled(runner, target, dm) {
                    ValidationResult::new(CheckStatus::Ok, format!("Display manager {} enabled", dm))
                } else {
                    ValidationResult::new(CheckStatus::Warn, format!("Display manager {} not enabled", dm))
                        .fix(format!("{}systemctl enable {}", root_prefix(target), dm))
                });
            }
        }
    }

    // Optional components
    for component in &config.components {
        let spec = catalog::component(*component);
        let package = spec.check_package();
        if installed.contains(package) {
            results.push(ValidationResult::new(CheckStatus::Ok, format!("{} installed", spec.label)));
            continue;
        }
        let missing = ValidationResult::new(CheckStatus::Warn, format!("{} not installed", spec.label));
        results.push(match spec.source {
            Source::Repo if spec.requires_multilib && multilib != Some(true) => missing.fix(format!(
                "Enable multilib, then {}",
                pacman_fix(target, spec.packages)
            )),
            Source::Repo => missing.fix(pacman_fix(target, spec.packages)),
            Source::Aur => {
                let helper = match config.aur_helper {
                    AurHelper::None => AurHelper::Yay,
                    chosen => chosen,
                };
                missing.fix(format!("{} -S --needed {}", helper, spec.packages.join(" ")))
            }
        });
    }

    // AUR helper
    if config.aur_helper != AurHelper::None {
        let helper = config.aur_helper.to_string();
        let present = installed.contains(&helper)
            || installed.contains(&format!("{}-bin", helper))
            || (target.is_host() && runner.find_program(&helper));
        results.push(if present {
            ValidationResult::new(CheckStatus::Ok, format!("AUR helper {} available", helper))
        } else {
            ValidationResult::new(CheckStatus::Warn, format!("AUR helper {} missing", helper)).fix(format!(
                "git clone https://aur.archlinux.org/{0}-bin.git && cd {0}-bin && makepkg -si",
                helper
            ))
        });
    }

    // Swap
    if config.swap_file_gib > 0 {
        results.push(swap_check(runner, target));
    }

    if config.desktop == Desktop::Skip && config.components.is_empty() {
        results.push(ValidationResult::new(CheckStatus::Info, "Nothing optional was selected"));
    }
    results
}

fn swap_check(runner: &dyn CommandRunner, target: &Target) -> ValidationResult {
    if target.is_host() {
        let spec = CommandSpec::new("swapon").args(["--show=NAME", "--noheadings"]).query();
        let active = runner
            .query_stdout(&spec)
            .is_some_and(|out| out.lines().any(|l| l.trim() == "/swapfile"));
        if active {
            ValidationResult::new(CheckStatus::Ok, "Swap file active")
        } else {
            ValidationResult::new(CheckStatus::Warn, "Swap file not active").fix("sudo swapon /swapfile")
        }
    } else {
        let fstab = std::fs::read_to_string(target.file("/etc/fstab")).unwrap_or_default();
        if sysfiles::append_fstab_swap(&fstab, "/swapfile").is_none() {
            ValidationResult::new(CheckStatus::Ok, "Swap file listed in fstab")
        } else {
            ValidationResult::new(CheckStatus::Warn, "Swap file missing from fstab")
                .fix("echo '/swapfile none swap defaults 0 0' >> /etc/fstab")
        }
    }
}

/// Aligned text table with a summary line.
pub fn render_table(results: &[ValidationResult]) -> String {
    let width = results.iter().map(|r| r.label.len()).max().unwrap_or(0).max(5);
    let mut out = format!("{:<8}{:<width$}  {}\n", "STATUS", "CHECK", "REMEDIATION", width = width);
    for r in results {
        let line = format!(
            "{:<8}{:<width$}  {}",
            format!("[{}]", r.status),
            r.label,
            r.remediation.as_deref().unwrap_or(""),
            width = width
        );
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.push_str(&format!("\n{}\n", Tally::of(results)));
    out
}

pub fn render_json(results: &[ValidationResult]) -> crate::error::Result<String> {
    Ok(serde_json::to_string_pretty(results)?)
}

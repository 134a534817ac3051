//! Install and configure steps.
//!
//! `full` holds the destructive full-install steps, `post` the configuration
//! steps shared by post-install runs and the continuation inside a freshly
//! installed system. Both sequences start with `Prerequisites`.

pub mod full;
pub mod post;

use std::path::Path;

use crate::config::InstallConfig;
use crate::error::{Result, SetupError};
use crate::prompt::Prompter;
use crate::runner::{CommandSpec, Target};
use crate::sequencer::{Environment, FailurePolicy, Step, StepContext, StepOutcome};
use crate::settings::Settings;
use crate::sysfiles::{self, EditOutcome, MultilibEdit};
use crate::types::RunMode;

// ============================================================================
// Shared helpers
// ============================================================================

/// `pacman -S` with the configured flags on `target`.
pub(crate) fn pacman_install(ctx: &StepContext<'_, '_>, target: &Target, packages: &[String]) -> Result<()> {
    if packages.is_empty() {
        return Ok(());
    }
    let spec = CommandSpec::new("pacman")
        .arg("-S")
        .args(ctx.settings.pacman_flags.iter().cloned())
        .args(packages.iter().cloned())
        .privileged()
        .within(target.root());
    ctx.runner.run_checked(&spec)?;
    Ok(())
}

pub(crate) fn enable_service(ctx: &StepContext<'_, '_>, target: &Target, unit: &str) -> Result<()> {
    let spec = CommandSpec::new("systemctl")
        .args(["enable", unit])
        .privileged()
        .within(target.root());
    ctx.runner.run_checked(&spec)?;
    Ok(())
}

/// Overwrite `path` (as seen from inside `target`) with `content`.
pub(crate) fn write_target_file(ctx: &StepContext<'_, '_>, target: &Target, path: &str, content: &str) -> Result<()> {
    let spec = CommandSpec::new("tee")
        .arg(path)
        .stdin(content)
        .privileged()
        .within(target.root())
        .captured();
    ctx.runner.run_checked(&spec)?;
    Ok(())
}

/// Apply `transform` to a system file. In dry-run mode the change is only reported.
pub(crate) fn edit_target_file<F>(ctx: &StepContext<'_, '_>, path: &Path, transform: F) -> Result<EditOutcome>
where
    F: FnOnce(&str) -> Option<String>,
{
    if !ctx.settings.dry_run {
        return sysfiles::edit_system_file(ctx.runner, path, transform);
    }
    let current = std::fs::read_to_string(path).unwrap_or_default();
    match transform(&current) {
        None => Ok(EditOutcome::Unchanged),
        Some(_) => {
            println!("[DRY RUN] edit {}", path.display());
            Ok(EditOutcome::Edited {
                backup: sysfiles::backup_path(path),
            })
        }
    }
}

/// Whether `[multilib]` is enabled in the target's pacman.conf.
///
/// A dry run never writes pacman.conf, so there the answer given earlier wins.
pub(crate) fn multilib_active(ctx: &StepContext<'_, '_>, target: &Target) -> bool {
    if ctx.settings.dry_run {
        return ctx.config.enable_multilib;
    }
    let conf = target.file("/etc/pacman.conf");
    match std::fs::read_to_string(&conf) {
        Ok(content) => sysfiles::enable_multilib(&content) == MultilibEdit::AlreadyEnabled,
        Err(e) => {
            log::debug!("Cannot read {}: {}", conf.display(), e);
            false
        }
    }
}

/// Warn about packages left out because multilib is off.
pub(crate) fn warn_dropped(dropped: &[String]) {
    if !dropped.is_empty() {
        crate::console::warn(&format!(
            "Multilib is disabled, skipping: {}",
            dropped.join(" ")
        ));
    }
}

// ============================================================================
// Prerequisites
// ============================================================================

/// Tools needed by a full install and the package providing each.
const FULL_INSTALL_TOOLS: &[(&str, &str)] = &[
    ("pacstrap", "arch-install-scripts"),
    ("genfstab", "arch-install-scripts"),
    ("arch-chroot", "arch-install-scripts"),
    ("sgdisk", "gptfdisk"),
    ("partprobe", "parted"),
    ("mkfs.fat", "dosfstools"),
    ("lsblk", "util-linux"),
];

const POST_INSTALL_TOOLS: &[(&str, &str)] = &[("pacman", "pacman"), ("systemctl", "systemd")];

/// Checks privileges and required tools before anything touches the system.
pub struct Prerequisites {
    pub mode: RunMode,
}

impl Step for Prerequisites {
    fn name(&self) -> &'static str {
        "Prerequisites"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        let is_root = ctx.runner.is_root() || ctx.settings.skip_root_check;
        let tools = match self.mode {
            RunMode::FullInstall => {
                if !is_root {
                    return Err(SetupError::privilege(
                        "full install must run as root from the Arch live environment",
                    ));
                }
                FULL_INSTALL_TOOLS
            }
            RunMode::PostInstall => POST_INSTALL_TOOLS,
        };

        for (tool, package) in tools {
            if !ctx.runner.find_program(tool) {
                return Err(SetupError::missing(*tool, *package));
            }
        }
        if !is_root && !ctx.runner.find_program(&ctx.settings.elevate) {
            return Err(SetupError::privilege(format!(
                "not running as root and '{}' is not installed",
                ctx.settings.elevate
            )));
        }
        log::debug!("Prerequisites satisfied for {}", self.mode);
        Ok(StepOutcome::Done)
    }
}

// ============================================================================
// Sequences
// ============================================================================

/// Steps of a post-install run on `target`.
pub fn post_install_steps(target: Target) -> Vec<Box<dyn Step>> {
    use post::*;
    vec![
        Box::new(Mirrors { target: target.clone() }),
        Box::new(Multilib { target: target.clone() }),
        Box::new(Kernel { target: target.clone() }),
        Box::new(Drivers { target: target.clone() }),
        Box::new(DesktopEnv { target: target.clone() }),
        Box::new(Gaming { target: target.clone() }),
        Box::new(Swapfile { target: target.clone() }),
        Box::new(Aur { target: target.clone() }),
        Box::new(Validation { target }),
    ]
}

/// Steps of a full install, including the continuation inside the new system.
pub fn full_install_steps(settings: &Settings) -> Vec<Box<dyn Step>> {
    use full::*;
    let root = settings.target_root.clone();
    let mut steps: Vec<Box<dyn Step>> = vec![
        Box::new(Prerequisites { mode: RunMode::FullInstall }),
        Box::new(SelectDisk),
        Box::new(Identity),
        Box::new(Partition),
        Box::new(Format),
        Box::new(Mount { root: root.clone() }),
        Box::new(Bootstrap { root: root.clone() }),
        Box::new(Configure { root: root.clone() }),
        Box::new(Bootloader { root: root.clone() }),
        Box::new(Continuation),
    ];
    steps.extend(
        post_install_steps(Target::Chroot(root))
            .into_iter()
            .map(|step| Box::new(InNewSystem(step)) as Box<dyn Step>),
    );
    steps
}

/// Steps for `mode`.
pub fn sequence_for(mode: RunMode, settings: &Settings) -> Vec<Box<dyn Step>> {
    match mode {
        RunMode::FullInstall => full_install_steps(settings),
        RunMode::PostInstall => {
            let mut steps: Vec<Box<dyn Step>> = vec![Box::new(Prerequisites { mode })];
            steps.extend(post_install_steps(Target::Host));
            steps
        }
    }
}

/// Runs `InstallConfig::continue_in_chroot`-gated steps inside the new system.
pub struct InNewSystem(pub Box<dyn Step>);

impl Step for InNewSystem {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Warn
    }

    fn prepare(
        &self,
        config: &mut InstallConfig,
        prompter: &mut dyn Prompter,
        env: &Environment<'_>,
    ) -> Result<()> {
        if config.continue_in_chroot {
            self.0.prepare(config, prompter, env)
        } else {
            Ok(())
        }
    }

    fn should_run(&self, config: &InstallConfig, env: &Environment<'_>) -> Option<String> {
        if !config.continue_in_chroot {
            return Some("continuation inside the new system declined".to_string());
        }
        self.0.should_run(config, env)
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        self.0.execute(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::DetectedFacts;
    use crate::prompt::ScriptedPrompter;
    use crate::runner::RecordingRunner;
    use crate::sequencer::Sequencer;
    use crate::types::BootMode;

    fn run_prerequisites(runner: &RecordingRunner, settings: &Settings, mode: RunMode) -> Result<()> {
        let facts = DetectedFacts::default();
        let env = Environment {
            facts: &facts,
            runner,
            settings,
        };
        let mut config = InstallConfig::new(mode, BootMode::Uefi);
        let mut prompter = ScriptedPrompter::new([]);
        let mut seq = Sequencer::new(vec![Box::new(Prerequisites { mode })]);
        seq.run(&mut config, &mut prompter, &env).map(|_| ())
    }

    #[test]
    fn test_full_install_requires_root() {
        let runner = RecordingRunner::new(false);
        let err = run_prerequisites(&runner, &Settings::default(), RunMode::FullInstall).unwrap_err();
        assert!(matches!(err, SetupError::Privilege(_)));
        assert_eq!(err.exit_code(), 3);
        assert!(runner.lines().is_empty());
    }

    #[test]
    fn test_skip_root_check_allows_full_install() {
        let runner = RecordingRunner::new(false);
        let settings = Settings {
            skip_root_check: true,
            ..Settings::default()
        };
        assert!(run_prerequisites(&runner, &settings, RunMode::FullInstall).is_ok());
    }

    #[test]
    fn test_missing_tool_names_package() {
        let runner = RecordingRunner::new(true).without_program("sgdisk");
        let err = run_prerequisites(&runner, &Settings::default(), RunMode::FullInstall).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("gptfdisk"));
    }

    #[test]
    fn test_post_install_without_sudo() {
        let runner = RecordingRunner::new(false).without_program("sudo");
        let err = run_prerequisites(&runner, &Settings::default(), RunMode::PostInstall).unwrap_err();
        assert!(matches!(err, SetupError::Privilege(_)));

        let runner = RecordingRunner::new(false);
        assert!(run_prerequisites(&runner, &Settings::default(), RunMode::PostInstall).is_ok());
    }

    #[test]
    fn test_sequence_order() {
        let settings = Settings::default();
        let post: Vec<_> = sequence_for(RunMode::PostInstall, &settings)
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(post.first(), Some(&"Prerequisites"));
        assert_eq!(post.last(), Some(&"Validation"));

        let full: Vec<_> = sequence_for(RunMode::FullInstall, &settings)
            .iter()
            .map(|s| s.name())
            .collect();
        let pos = |name: &str| full.iter().position(|n| *n == name).unwrap();
        assert!(pos("Select disk") < pos("Partition"));
        assert!(pos("Partition") < pos("Format"));
        assert!(pos("Format") < pos("Mount"));
        assert!(pos("Mount") < pos("Bootstrap"));
        assert!(pos("Bootloader") < pos("Continue in new system"));
        assert!(pos("Continue in new system") < pos("Desktop"));
    }
}

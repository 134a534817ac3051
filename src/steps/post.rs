//! Configuration steps for an installed system.
//!
//! Each step works on a `Target`: the running system for a post-install run,
//! or the freshly installed root when a full install continues inside it.

use std::collections::BTreeSet;

use super::{edit_target_file, multilib_active, pacman_install, warn_dropped};
use crate::catalog;
use crate::config::{self, InstallConfig};
use crate::console;
use crate::error::{Result, SetupError};
use crate::prompt::{self, Prompter};
use crate::runner::{CommandSpec, Target};
use crate::sequencer::{Environment, FailurePolicy, Step, StepContext, StepOutcome};
use crate::sysfiles::{self, EditOutcome, MultilibEdit};
use crate::types::{AurHelper, Desktop, ExtraKernel, Filesystem, GamingComponent};
use crate::validate::{self, Tally};

const MIRRORLIST: &str = "/etc/pacman.d/mirrorlist";
const SWAPFILE: &str = "/swapfile";
const GRUB_CFG: &str = "/boot/grub/grub.cfg";

/// Rank mirrors with reflector.
pub struct Mirrors {
    pub target: Target,
}

impl Step for Mirrors {
    fn name(&self) -> &'static str {
        "Mirrors"
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
        if self.target.is_host() && env.facts.network.is_online() {
            config.optimize_mirrors =
                prompter.ask_yes_no("Rank pacman mirrors by speed with reflector?", config.optimize_mirrors)?;
        }
        Ok(())
    }

    fn should_run(&self, config: &InstallConfig, env: &Environment<'_>) -> Option<String> {
        if !self.target.is_host() {
            Some("the new system uses the live environment's mirrorlist".to_string())
        } else if !env.facts.network.is_online() {
            Some("no network connection".to_string())
        } else if !config.optimize_mirrors {
            Some("disabled".to_string())
        } else {
            None
        }
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        if !ctx.runner.find_program("reflector") {
            return Err(SetupError::missing("reflector", "reflector"));
        }
        let backup = sysfiles::backup_file(ctx.runner, &self.target.file(MIRRORLIST))?;
        ctx.runner.run_checked(
            &CommandSpec::new("reflector")
                .args(["--latest", "20", "--protocol", "https", "--sort", "rate", "--save", MIRRORLIST])
                .privileged(),
        )?;
        Ok(StepOutcome::Note(format!("mirrorlist ranked (backup at {})", backup.display())))
    }
}

/// Enable the `[multilib]` repository.
pub struct Multilib {
    pub target: Target,
}

impl Step for Multilib {
    fn name(&self) -> &'static str {
        "Multilib"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Warn
    }

    fn prepare(
        &self,
        config: &mut InstallConfig,
        prompter: &mut dyn Prompter,
        _env: &Environment<'_>,
    ) -> Result<()> {
        config.enable_multilib = prompter.ask_yes_no(
            "Enable the multilib repository (32-bit libraries for Steam and Wine)?",
            config.enable_multilib,
        )?;
        Ok(())
    }

    fn should_run(&self, config: &InstallConfig, _env: &Environment<'_>) -> Option<String> {
        (!config.enable_multilib).then(|| "not requested".to_string())
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        let conf = self.target.file("/etc/pacman.conf");
        let outcome = edit_target_file(ctx, &conf, |content| match sysfiles::enable_multilib(content) {
            MultilibEdit::AlreadyEnabled => None,
            MultilibEdit::Enabled(updated) => Some(updated),
        })?;
        match outcome {
            EditOutcome::Unchanged => Ok(StepOutcome::Note("multilib already enabled".to_string())),
            EditOutcome::Edited { backup } => {
                ctx.runner.run_checked(
                    &CommandSpec::new("pacman")
                        .arg("-Sy")
                        .privileged()
                        .within(self.target.root()),
                )?;
                Ok(StepOutcome::Note(format!(
                    "multilib enabled (backup at {})",
                    backup.display()
                )))
            }
        }
    }
}

/// Optional second kernel next to `linux`.
pub struct Kernel {
    pub target: Target,
}

impl Step for Kernel {
    fn name(&self) -> &'static str {
        "Extra kernel"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Warn
    }

    fn prepare(
        &self,
        config: &mut InstallConfig,
        prompter: &mut dyn Prompter,
        _env: &Environment<'_>,
    ) -> Result<()> {
        let options = [None, Some(ExtraKernel::Zen), Some(ExtraKernel::Lts)];
        let labels: Vec<String> = options
            .iter()
            .map(|k| k.map_or_else(|| "none".to_string(), |k| k.to_string()))
            .collect();
        let default = options.iter().position(|k| *k == config.extra_kernel).unwrap_or(0);
        let idx = prompter.ask_choice("Additional kernel", &labels, default)?;
        config.extra_kernel = options[idx];
        Ok(())
    }

    fn should_run(&self, config: &InstallConfig, _env: &Environment<'_>) -> Option<String> {
        config
            .extra_kernel
            .is_none()
            .then(|| "no extra kernel selected".to_string())
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        let Some(kernel) = ctx.config.extra_kernel else {
            return Ok(StepOutcome::Done);
        };
        let packages: Vec<String> = catalog::kernel_packages(kernel)
            .iter()
            .map(|p| p.to_string())
            .collect();
        pacman_install(ctx, &self.target, &packages)?;

        if self.target.file(GRUB_CFG).exists() {
            ctx.runner.run_checked(
                &CommandSpec::new("grub-mkconfig")
                    .args(["-o", GRUB_CFG])
                    .privileged()
                    .within(self.target.root()),
            )?;
            Ok(StepOutcome::Note(format!("{} installed, GRUB menu updated", kernel)))
        } else {
            Ok(StepOutcome::Note(format!(
                "{} installed; add it to your boot loader",
                kernel
            )))
        }
    }
}

/// GPU driver stack for the detected vendor.
pub struct Drivers {
    pub target: Target,
}

impl Step for Drivers {
    fn name(&self) -> &'static str {
        "GPU drivers"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Warn
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        let gpu = ctx.facts.gpu;
        let resolved = catalog::resolve(
            catalog::gpu_packages(gpu).iter().copied(),
            multilib_active(ctx, &self.target),
        );
        warn_dropped(&resolved.dropped);
        pacman_install(ctx, &self.target, &resolved.install)?;
        Ok(StepOutcome::Note(format!("{} drivers: {}", gpu, resolved.install.join(" "))))
    }
}

/// Desktop environment and its display manager.
pub struct DesktopEnv {
    pub target: Target,
}

impl Step for DesktopEnv {
    fn name(&self) -> &'static str {
        "Desktop"
    }

    fn policy(&self) -> FailurePolicy {
        if self.target.is_host() {
            FailurePolicy::Fatal
        } else {
            FailurePolicy::Warn
        }
    }

    fn prepare(
        &self,
        config: &mut InstallConfig,
        prompter: &mut dyn Prompter,
        _env: &Environment<'_>,
    ) -> Result<()> {
        config.desktop = prompt::choose(prompter, "Desktop environment", config.desktop)?;
        Ok(())
    }

    fn should_run(&self, config: &InstallConfig, _env: &Environment<'_>) -> Option<String> {
        (config.desktop == Desktop::Skip).then(|| "no desktop selected".to_string())
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        let desktop = ctx.config.desktop;
        let profile = catalog::desktop_profile(desktop)
            .ok_or_else(|| SetupError::contract(format!("no package profile for {}", desktop)))?;
        let packages: Vec<String> = profile.packages.iter().map(|p| p.to_string()).collect();
        pacman_install(ctx, &self.target, &packages)?;

        if let Some(dm) = profile.display_manager {
            // --force replaces a previously enabled display-manager.service
            ctx.runner.run_checked(
                &CommandSpec::new("systemctl")
                    .args(["enable", "--force", dm])
                    .privileged()
                    .within(self.target.root()),
            )?;
        }
        Ok(StepOutcome::Note(format!("{} installed", desktop)))
    }
}

/// Components preselected when the user has not picked any yet.
fn default_components() -> BTreeSet<GamingComponent> {
    use GamingComponent as G;
    [G::Steam, G::Gamemode, G::Mangohud, G::Lutris, G::Wine]
        .into_iter()
        .collect()
}

/// Official-repo gaming packages.
pub struct Gaming {
    pub target: Target,
}

impl Step for Gaming {
    fn name(&self) -> &'static str {
        "Gaming stack"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Warn
    }

    fn prepare(
        &self,
        config: &mut InstallConfig,
        prompter: &mut dyn Prompter,
        _env: &Environment<'_>,
    ) -> Result<()> {
        let defaults = if config.components.is_empty() {
            default_components()
        } else {
            config.components.clone()
        };
        config.components = prompt::choose_many(prompter, "Gaming components", &defaults)?;
        if config.needs_multilib() && !config.enable_multilib {
            prompter.notice("Multilib is disabled: Steam, Wine and 32-bit libraries will be skipped")?;
        }
        Ok(())
    }

    fn should_run(&self, config: &InstallConfig, _env: &Environment<'_>) -> Option<String> {
        config
            .components
            .is_empty()
            .then(|| "no components selected".to_string())
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        let resolved = catalog::component_repo_packages(&ctx.config.components, multilib_active(ctx, &self.target));
        warn_dropped(&resolved.dropped);
        pacman_install(ctx, &self.target, &resolved.install)?;

        let aur = catalog::component_aur_packages(&ctx.config.components);
        if aur.is_empty() {
            Ok(StepOutcome::Done)
        } else {
            Ok(StepOutcome::Note(format!("left for the AUR step: {}", aur.join(" "))))
        }
    }
}

/// Swap file size answer: whole GiB, 0 to 64.
fn validate_swap_size(input: &str) -> std::result::Result<(), String> {
    match input.trim().parse::<u32>() {
        Ok(n) if n <= 64 => Ok(()),
        _ => Err("Enter a whole number of GiB between 0 and 64".to_string()),
    }
}

/// Swap file plus fstab entry.
pub struct Swapfile {
    pub target: Target,
}

impl Swapfile {
    fn root_is_btrfs(&self, ctx: &StepContext<'_, '_>) -> bool {
        if self.target.is_host() {
            let spec = CommandSpec::new("findmnt").args(["-no", "FSTYPE", "/"]).query();
            ctx.runner
                .query_stdout(&spec)
                .is_some_and(|out| out.trim() == "btrfs")
        } else {
            ctx.config.root_filesystem == Filesystem::Btrfs
        }
    }
}

impl Step for Swapfile {
    fn name(&self) -> &'static str {
        "Swap file"
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
        let suggested = match config.swap_file_gib {
            0 if env.facts.ram_mib > 0 && env.facts.ram_mib < 16 * 1024 => 4,
            n => n,
        };
        let answer = prompter.ask_text(
            "Swap file size in GiB (0 for none)",
            &suggested.to_string(),
            &validate_swap_size,
        )?;
        config.swap_file_gib = answer
            .trim()
            .parse()
            .map_err(|_| SetupError::validation(format!("invalid swap size '{}'", answer)))?;
        Ok(())
    }

    fn should_run(&self, config: &InstallConfig, _env: &Environment<'_>) -> Option<String> {
        (config.swap_file_gib == 0).then(|| "no swap file requested".to_string())
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        let size = ctx.config.swap_file_gib;
        let inside = |program: &str| CommandSpec::new(program).privileged().within(self.target.root());

        if self.target.file(SWAPFILE).exists() {
            console::info(&format!("{} already exists, keeping it", SWAPFILE));
        } else if self.root_is_btrfs(ctx) {
            ctx.runner.run_checked(&inside("btrfs").args([
                "filesystem".to_string(),
                "mkswapfile".to_string(),
                "--size".to_string(),
                format!("{}g", size),
                SWAPFILE.to_string(),
            ]))?;
        } else {
            ctx.runner
                .run_checked(&inside("fallocate").args(["-l".to_string(), format!("{}G", size), SWAPFILE.to_string()]))?;
            ctx.runner.run_checked(&inside("chmod").args(["600", SWAPFILE]))?;
            ctx.runner.run_checked(&inside("mkswap").arg(SWAPFILE))?;
        }

        edit_target_file(ctx, &self.target.file("/etc/fstab"), |c| {
            sysfiles::append_fstab_swap(c, SWAPFILE)
        })?;
        // Activated on first boot from fstab when installing into a chroot.
        if self.target.is_host() && !swap_active(ctx, SWAPFILE) {
            ctx.runner.run_checked(&inside("swapon").arg(SWAPFILE))?;
        }
        Ok(StepOutcome::Note(format!("{} GiB swap at {}", size, SWAPFILE)))
    }
}

/// Whether `swapon --show` lists `path` as an active swap area.
fn swap_active(ctx: &StepContext<'_, '_>, path: &str) -> bool {
    let spec = CommandSpec::new("swapon").args(["--show=NAME", "--noheadings"]).query();
    ctx.runner
        .query_stdout(&spec)
        .is_some_and(|out| out.lines().any(|line| line.trim() == path))
}

/// The user to build AUR packages as: `SUDO_USER`, then `USER`, never root.
fn invoking_user<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ["SUDO_USER", "USER"]
        .iter()
        .filter_map(|key| lookup(key))
        .find(|user| !user.is_empty() && user != "root")
        .unwrap_or_default()
}

/// AUR helper bootstrap and AUR components, built as an unprivileged user.
pub struct Aur {
    pub target: Target,
}

impl Step for Aur {
    fn name(&self) -> &'static str {
        "AUR"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Warn
    }

    fn prepare(
        &self,
        config: &mut InstallConfig,
        prompter: &mut dyn Prompter,
        _env: &Environment<'_>,
    ) -> Result<()> {
        config.aur_helper = prompt::choose(prompter, "AUR helper", config.aur_helper)?;
        if config.aur_helper != AurHelper::None && self.target.is_host() {
            let default = if config.username.is_empty() {
                invoking_user(|key| std::env::var(key).ok())
            } else {
                config.username.clone()
            };
            config.username =
                prompter.ask_text("Build AUR packages as user", &default, &config::validate_username)?;
        }
        Ok(())
    }

    fn should_run(&self, config: &InstallConfig, _env: &Environment<'_>) -> Option<String> {
        let no_aur_components = catalog::component_aur_packages(&config.components).is_empty();
        (config.aur_helper == AurHelper::None && no_aur_components)
            .then(|| "no AUR helper selected".to_string())
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        let config = ctx.config;
        let aur = catalog::component_aur_packages(&config.components);
        if config.aur_helper == AurHelper::None {
            return Ok(StepOutcome::Note(format!(
                "no AUR helper, skipped: {}",
                aur.join(" ")
            )));
        }
        let user = config.username.as_str();
        if config::validate_username(user).is_err() {
            return Err(SetupError::validation(
                "AUR packages must be built as a regular user",
            ));
        }

        let helper = config.aur_helper.to_string();
        let root = self.target.root();
        let present = self.target.is_host() && ctx.runner.find_program(&helper);
        if !present {
            pacman_install(ctx, &self.target, &["base-devel".to_string(), "git".to_string()])?;
            let dir = format!("/tmp/archgamer-{}-bin", helper);
            ctx.runner.run_checked(
                &CommandSpec::new("rm").args(["-rf", dir.as_str()]).privileged().within(root),
            )?;
            ctx.runner.run_checked(
                &CommandSpec::new("git")
                    .args([
                        "clone".to_string(),
                        format!("https://aur.archlinux.org/{}-bin.git", helper),
                        dir.clone(),
                    ])
                    .as_user(user)
                    .within(root),
            )?;
            ctx.runner.run_checked(
                &CommandSpec::new("bash")
                    .args(["-c".to_string(), format!("cd {} && makepkg -si --noconfirm", dir)])
                    .as_user(user)
                    .within(root),
            )?;
        }

        if aur.is_empty() {
            return Ok(StepOutcome::Note(format!("{} ready", helper)));
        }
        ctx.runner.run_checked(
            &CommandSpec::new(helper.as_str())
                .args(["-S", "--needed", "--noconfirm"])
                .args(aur.iter().cloned())
                .as_user(user)
                .within(root),
        )?;
        Ok(StepOutcome::Note(format!("{} installed {}", helper, aur.join(" "))))
    }
}

/// Read-only report comparing the target with the choices made.
pub struct Validation {
    pub target: Target,
}

impl Step for Validation {
    fn name(&self) -> &'static str {
        "Validation"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Warn
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        let results = validate::validate(ctx.config, ctx.facts, ctx.runner, &self.target);
        if ctx.settings.json {
            println!("{}", validate::render_json(&results)?);
        } else {
            println!("\n{}", validate::render_table(&results));
        }
        let tally = Tally::of(&results);
        if tally.fail > 0 || tally.warn > 0 {
            console::warn(&format!("Validation found problems on {}: {}", self.target, tally));
        }
        Ok(StepOutcome::Note(tally.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::DetectedFacts;
    use crate::prompt::{Answer, ScriptedPrompter};
    use crate::runner::RecordingRunner;
    use crate::sequencer::{Sequencer, StepStatus};
    use crate::settings::Settings;
    use crate::types::{BootMode, RunMode};
    use std::path::Path;

    fn run_on(
        step: Box<dyn Step>,
        runner: &RecordingRunner,
        answers: Vec<Answer>,
        config: &mut InstallConfig,
    ) -> Result<()> {
        run_with(step, runner, answers, config, &Settings::default()).map(|_| ())
    }

    fn run_with(
        step: Box<dyn Step>,
        runner: &RecordingRunner,
        answers: Vec<Answer>,
        config: &mut InstallConfig,
        settings: &Settings,
    ) -> Result<Sequencer> {
        let facts = DetectedFacts::default();
        let env = Environment {
            facts: &facts,
            runner,
            settings,
        };
        let mut prompter = ScriptedPrompter::new(answers);
        let mut seq = Sequencer::new(vec![step]);
        seq.run(config, &mut prompter, &env)?;
        Ok(seq)
    }

    fn dry_run() -> Settings {
        Settings {
            dry_run: true,
            ..Settings::default()
        }
    }

    fn new_root(pacman_conf: &str) -> (tempfile::TempDir, Target) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(dir.path().join("etc/pacman.conf"), pacman_conf).unwrap();
        std::fs::write(dir.path().join("etc/fstab"), "UUID=abc / ext4 rw 0 1\n").unwrap();
        let target = Target::Chroot(dir.path().to_path_buf());
        (dir, target)
    }

    fn config() -> InstallConfig {
        InstallConfig::new(RunMode::PostInstall, BootMode::Uefi)
    }

    #[test]
    fn test_multilib_already_enabled_touches_nothing() {
        let (_dir, target) = new_root("[multilib]\nInclude = /etc/pacman.d/mirrorlist\n");
        let runner = RecordingRunner::new(true);
        let mut cfg = config();
        run_on(Box::new(Multilib { target }), &runner, vec![Answer::Yes], &mut cfg).unwrap();
        assert!(runner.lines().is_empty());
    }

    #[test]
    fn test_multilib_enable_backs_up_then_refreshes() {
        let (dir, target) = new_root("#[multilib]\n#Include = /etc/pacman.d/mirrorlist\n");
        let runner = RecordingRunner::new(true);
        let mut cfg = config();
        run_on(Box::new(Multilib { target }), &runner, vec![Answer::Yes], &mut cfg).unwrap();

        let backup = runner.position("pacman.conf.bak-").unwrap();
        let refresh = runner.position("pacman -Sy").unwrap();
        assert!(backup < refresh);
        assert!(runner.ran(&format!("arch-chroot {} pacman -Sy", dir.path().display())));
    }

    #[test]
    fn test_desktop_skip_installs_nothing() {
        let runner = RecordingRunner::new(true);
        let mut cfg = config();
        run_on(
            Box::new(DesktopEnv { target: Target::Host }),
            &runner,
            vec![Answer::text("skip")],
            &mut cfg,
        )
        .unwrap();
        assert_eq!(cfg.desktop, Desktop::Skip);
        assert!(!runner.ran("pacman"));
        assert!(!runner.ran("systemctl enable"));
    }

    #[test]
    fn test_desktop_enables_display_manager() {
        let runner = RecordingRunner::new(false);
        let mut cfg = config();
        run_on(
            Box::new(DesktopEnv { target: Target::Host }),
            &runner,
            vec![Answer::text("gnome")],
            &mut cfg,
        )
        .unwrap();
        assert!(runner.ran("sudo pacman -S --noconfirm --needed gnome"));
        assert!(runner.ran("sudo systemctl enable --force gdm"));
    }

    #[test]
    fn test_desktop_failure_is_fatal_on_host() {
        let runner = RecordingRunner::new(true).fail_on("pacman -S", 1);
        let mut cfg = config();
        let err = run_on(
            Box::new(DesktopEnv { target: Target::Host }),
            &runner,
            vec![Answer::Default],
            &mut cfg,
        )
        .unwrap_err();
        assert!(matches!(err, SetupError::CommandFailed { .. }));
    }

    #[test]
    fn test_gaming_drops_multilib_packages() {
        let (_dir, target) = new_root("[core]\nInclude = x\n");
        let runner = RecordingRunner::new(true);
        let mut cfg = config();
        cfg.enable_multilib = false;
        run_on(
            Box::new(Gaming { target }),
            &runner,
            vec![Answer::text("steam lutris")],
            &mut cfg,
        )
        .unwrap();

        let install = runner.commands().into_iter().find(|c| c.line.contains("pacman -S")).unwrap();
        assert!(install.line.ends_with("lutris"));
        assert!(!install.line.contains("steam"));
    }

    #[test]
    fn test_gaming_defaults() {
        let (_dir, target) = new_root("[multilib]\nInclude = x\n");
        let runner = RecordingRunner::new(true);
        let mut cfg = config();
        run_on(Box::new(Gaming { target }), &runner, vec![Answer::Default], &mut cfg).unwrap();
        assert_eq!(cfg.components, default_components());
        assert!(runner.ran("lib32-gamemode"));
        assert!(runner.ran("steam"));
    }

    #[test]
    fn test_swapfile_in_chroot_writes_fstab_without_swapon() {
        let (dir, target) = new_root("");
        let runner = RecordingRunner::new(true);
        let mut cfg = config();
        run_on(Box::new(Swapfile { target }), &runner, vec![Answer::text("8")], &mut cfg).unwrap();

        assert_eq!(cfg.swap_file_gib, 8);
        assert!(runner.ran("fallocate -l 8G /swapfile"));
        assert!(runner.ran("mkswap /swapfile"));
        assert!(!runner.ran("swapon"));
        assert!(runner.position("fstab.bak-").is_some());
        let fstab = dir.path().join("etc/fstab");
        assert!(Path::new(&fstab).exists());
    }

    #[test]
    fn test_swapfile_writes_fstab_before_swapon() {
        let (_dir, target) = new_root("");
        let runner = RecordingRunner::new(true);
        let mut cfg = config();
        run_on(Box::new(Swapfile { target }), &runner, vec![Answer::text("4")], &mut cfg).unwrap();
        // no swapon in a chroot, so only the mkswap ordering can be checked here
        let fstab = runner.position("fstab.bak-").unwrap();
        assert!(runner.position("mkswap /swapfile").unwrap() < fstab);
    }

    #[test]
    fn test_swapfile_already_active_skips_swapon() {
        let runner = RecordingRunner::new(true)
            .respond("swapon --show", "/dev/zram0\n/swapfile\n")
            .fail_on("swapon /swapfile", 255);
        let mut cfg = config();
        let seq = run_with(
            Box::new(Swapfile { target: Target::Host }),
            &runner,
            vec![Answer::text("4")],
            &mut cfg,
            &dry_run(),
        )
        .unwrap();

        assert!(runner.ran("swapon --show=NAME --noheadings"));
        assert!(!runner.ran("swapon /swapfile"));
        assert!(matches!(seq.status_of("Swap file"), Some(StepStatus::Note(_))));
    }

    #[test]
    fn test_swapfile_inactive_runs_swapon() {
        let runner = RecordingRunner::new(true).respond("swapon --show", "/dev/zram0\n");
        let mut cfg = config();
        run_with(
            Box::new(Swapfile { target: Target::Host }),
            &runner,
            vec![Answer::text("4")],
            &mut cfg,
            &dry_run(),
        )
        .unwrap();
        assert!(runner.ran("swapon /swapfile"));
    }

    #[test]
    fn test_dry_run_drivers_follow_multilib_answer() {
        // Multilib was only switched on in memory; pacman.conf still has it commented
        let (_dir, target) = new_root("#[multilib]\n#Include = /etc/pacman.d/mirrorlist\n");
        let runner = RecordingRunner::new(true);
        let mut cfg = config();
        cfg.enable_multilib = true;
        run_with(Box::new(Drivers { target }), &runner, vec![], &mut cfg, &dry_run()).unwrap();
        assert!(runner.ran("lib32-mesa"));
    }

    #[test]
    fn test_swapfile_rejects_oversized_answer() {
        let runner = RecordingRunner::new(true);
        let mut cfg = config();
        run_on(
            Box::new(Swapfile { target: Target::Host }),
            &runner,
            vec![Answer::text("128"), Answer::text("0")],
            &mut cfg,
        )
        .unwrap();
        assert_eq!(cfg.swap_file_gib, 0);
        assert!(runner.lines().is_empty());
    }

    #[test]
    fn test_aur_builds_helper_as_user() {
        let (dir, target) = new_root("");
        let runner = RecordingRunner::new(true);
        let mut cfg = config();
        cfg.username = "gamer".to_string();
        cfg.components.insert(GamingComponent::Heroic);
        run_on(Box::new(Aur { target }), &runner, vec![Answer::text("paru")], &mut cfg).unwrap();

        let root = dir.path().display();
        assert!(runner.ran(&format!(
            "arch-chroot -u gamer {} git clone https://aur.archlinux.org/paru-bin.git /tmp/archgamer-paru-bin",
            root
        )));
        assert!(runner.ran("makepkg -si --noconfirm"));
        assert!(runner.ran(&format!(
            "arch-chroot -u gamer {} paru -S --needed --noconfirm heroic-games-launcher-bin",
            root
        )));
    }

    #[test]
    fn test_aur_without_helper_notes_skipped_packages() {
        let runner = RecordingRunner::new(true);
        let mut cfg = config();
        cfg.components.insert(GamingComponent::ProtonUpQt);
        run_on(Box::new(Aur { target: Target::Host }), &runner, vec![Answer::text("none")], &mut cfg).unwrap();
        assert!(runner.lines().is_empty());
    }

    #[test]
    fn test_invoking_user_skips_root() {
        let lookup = |key: &str| match key {
            "SUDO_USER" => Some("root".to_string()),
            "USER" => Some("gamer".to_string()),
            _ => None,
        };
        assert_eq!(invoking_user(lookup), "gamer");
        assert_eq!(invoking_user(|_| None), "");
    }

    #[test]
    fn test_mirrors_skipped_offline() {
        let runner = RecordingRunner::new(true);
        let mut cfg = config();
        run_on(Box::new(Mirrors { target: Target::Host }), &runner, vec![], &mut cfg).unwrap();
        assert!(runner.lines().is_empty());
    }
}

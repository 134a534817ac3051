//! Full install from the Arch live environment.
//!
//! Disk selection asks twice before anything is written; every destructive
//! step after it re-checks the recorded confirmation for the selected disk.

use std::path::{Path, PathBuf};

use super::{edit_target_file, enable_service, write_target_file};
use crate::catalog::{self, BASE_PACKAGES};
use crate::config::{self, InstallConfig, Secret, WipeConfirmation};
use crate::error::{Result, SetupError};
use crate::hardware;
use crate::prompt::{self, Prompter};
use crate::runner::{CommandSpec, Target};
use crate::sequencer::{Environment, FailurePolicy, Step, StepContext, StepOutcome};
use crate::sysfiles;
use crate::types::{BootMode, Filesystem};

/// Pick the target disk and root filesystem, then confirm the wipe twice.
pub struct SelectDisk;

impl Step for SelectDisk {
    fn name(&self) -> &'static str {
        "Select disk"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    fn prepare(
        &self,
        config: &mut InstallConfig,
        prompter: &mut dyn Prompter,
        env: &Environment<'_>,
    ) -> Result<()> {
        let disks = hardware::list_disks(env.runner);
        if disks.is_empty() {
            return Err(SetupError::general("no installable disks found"));
        }
        let labels: Vec<String> = disks.iter().map(ToString::to_string).collect();
        let idx = prompter.ask_choice("Disk to install Arch Linux on", &labels, 0)?;
        let disk = disks[idx].path.clone();
        config.set_disk(disk.clone());
        config.root_filesystem = prompt::choose(prompter, "Root filesystem", config.root_filesystem)?;

        let shown = disk.display().to_string();
        prompter.notice(&format!("ALL DATA ON {} WILL BE DESTROYED", shown))?;
        if !prompter.ask_yes_no(&format!("Erase {} and install Arch Linux?", shown), false)? {
            return Err(SetupError::declined(format!("wipe of {} declined", shown)));
        }
        let typed = prompter.ask_text(
            &format!("Type {} to confirm", shown),
            "",
            &prompt::any_input,
        )?;
        if typed.trim() != shown {
            return Err(SetupError::declined(format!(
                "confirmation '{}' does not match {}",
                typed.trim(),
                shown
            )));
        }

        config.record_wipe_confirmation(WipeConfirmation::accepted(disk));
        config.set_partition_paths()?;
        Ok(())
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        let layout = ctx.config.partitions()?;
        Ok(StepOutcome::Note(format!(
            "{} selected ({} boot, {} root)",
            layout.disk.display(),
            layout.boot_mode,
            ctx.config.root_filesystem
        )))
    }
}

/// Hostname, user account, passwords and locale settings.
pub struct Identity;

impl Step for Identity {
    fn name(&self) -> &'static str {
        "Identity"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    fn prepare(
        &self,
        config: &mut InstallConfig,
        prompter: &mut dyn Prompter,
        _env: &Environment<'_>,
    ) -> Result<()> {
        config.hostname = prompter.ask_text("Hostname", &config.hostname, &config::validate_hostname)?;
        config.username = prompter.ask_text("Username", &config.username, &config::validate_username)?;
        config.user_password = Secret::new(prompter.ask_secret(&format!("Password for {}", config.username))?);
        config.root_password = Secret::new(prompter.ask_secret("Root password")?);
        config.timezone = prompter.ask_text("Timezone (Region/City)", &config.timezone, &config::validate_timezone)?;
        config.locale = prompter.ask_text("Locale", &config.locale, &config::validate_locale)?;
        config.keymap = prompter.ask_text("Console keymap", &config.keymap, &config::validate_keymap)?;
        Ok(())
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        Ok(StepOutcome::Note(format!(
            "{}@{} ({}, {})",
            ctx.config.username, ctx.config.hostname, ctx.config.timezone, ctx.config.locale
        )))
    }
}

/// GPT layout: boot partition (EFI or BIOS boot) then root.
pub struct Partition;

impl Step for Partition {
    fn name(&self) -> &'static str {
        "Partition"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        let disk = ctx.config.ensure_wipe_confirmed()?;
        let layout = ctx.config.partitions()?;

        ctx.runner
            .run_checked(&CommandSpec::new("sgdisk").arg("--zap-all").path_arg(disk).privileged())?;

        let boot: [&str; 6] = match layout.boot_mode {
            BootMode::Uefi => ["-n", "1:0:+512M", "-t", "1:ef00", "-c", "1:EFI"],
            BootMode::Bios => ["-n", "1:0:+1M", "-t", "1:ef02", "-c", "1:BIOSBOOT"],
        };
        let create = CommandSpec::new("sgdisk")
            .args(boot)
            .args(["-n", "2:0:0", "-t", "2:8300", "-c", "2:root"])
            .path_arg(disk)
            .privileged();
        ctx.runner.run_checked(&create)?;
        ctx.runner
            .run_checked(&CommandSpec::new("partprobe").path_arg(disk).privileged())?;
        Ok(StepOutcome::Done)
    }
}

fn mkfs_package(fs: Filesystem) -> &'static str {
    match fs {
        Filesystem::Ext4 => "e2fsprogs",
        Filesystem::Btrfs => "btrfs-progs",
    }
}

pub struct Format;

impl Step for Format {
    fn name(&self) -> &'static str {
        "Format"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        ctx.config.ensure_wipe_confirmed()?;
        let layout = ctx.config.partitions()?;
        let fs = ctx.config.root_filesystem;
        let (mkfs, force) = fs.mkfs();
        if !ctx.runner.find_program(mkfs) {
            return Err(SetupError::missing(mkfs, mkfs_package(fs)));
        }

        // The BIOS boot partition stays raw; GRUB embeds its core image there.
        if let Some(efi) = layout.efi() {
            ctx.runner.run_checked(
                &CommandSpec::new("mkfs.fat").arg("-F32").path_arg(efi).privileged(),
            )?;
        }
        ctx.runner
            .run_checked(&CommandSpec::new(mkfs).arg(force).path_arg(&layout.root).privileged())?;
        Ok(StepOutcome::Done)
    }
}

/// Mount root (and the ESP at /boot) under the target root.
pub struct Mount {
    pub root: PathBuf,
}

impl Step for Mount {
    fn name(&self) -> &'static str {
        "Mount"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        ctx.config.ensure_wipe_confirmed()?;
        let layout = ctx.config.partitions()?;
        ctx.guard_mounts(&self.root);

        ctx.runner.run_checked(
            &CommandSpec::new("mount")
                .arg("--mkdir")
                .path_arg(&layout.root)
                .path_arg(&self.root)
                .privileged(),
        )?;
        if let Some(efi) = layout.efi() {
            ctx.runner.run_checked(
                &CommandSpec::new("mount")
                    .arg("--mkdir")
                    .path_arg(efi)
                    .path_arg(&self.root.join("boot"))
                    .privileged(),
            )?;
        }
        Ok(StepOutcome::Note(format!("mounted at {}", self.root.display())))
    }
}

/// Guard against running chroot steps on an unmounted root.
fn ensure_mounted(ctx: &StepContext<'_, '_>, root: &Path) -> Result<()> {
    if ctx.is_guarded(root) {
        Ok(())
    } else {
        Err(SetupError::contract(format!("{} is not mounted", root.display())))
    }
}

/// pacstrap the base system and write fstab.
pub struct Bootstrap {
    pub root: PathBuf,
}

impl Step for Bootstrap {
    fn name(&self) -> &'static str {
        "Bootstrap"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        ensure_mounted(ctx, &self.root)?;
        let mut packages: Vec<String> = BASE_PACKAGES.iter().map(|p| p.to_string()).collect();
        if let Some(ucode) = catalog::microcode_package(ctx.facts.cpu) {
            packages.push(ucode.to_string());
        }
        if ctx.config.root_filesystem == Filesystem::Btrfs {
            packages.push("btrfs-progs".to_string());
        }

        ctx.runner.run_checked(
            &CommandSpec::new("pacstrap")
                .arg("-K")
                .path_arg(&self.root)
                .args(packages)
                .privileged(),
        )?;

        let fstab = ctx.runner.run_checked(
            &CommandSpec::new("genfstab")
                .arg("-U")
                .path_arg(&self.root)
                .privileged()
                .captured(),
        )?;
        ctx.runner.run_checked(
            &CommandSpec::new("tee")
                .arg("-a")
                .path_arg(&self.root.join("etc/fstab"))
                .stdin(fstab.stdout)
                .privileged()
                .captured(),
        )?;
        Ok(StepOutcome::Done)
    }
}

/// Clock, locale, hostname, users and services inside the new system.
pub struct Configure {
    pub root: PathBuf,
}

impl Step for Configure {
    fn name(&self) -> &'static str {
        "Configure"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        ensure_mounted(ctx, &self.root)?;
        let config = ctx.config;
        let target = Target::Chroot(self.root.clone());
        let inside = |program: &str| CommandSpec::new(program).privileged().within(target.root());

        ctx.runner.run_checked(&inside("ln").args([
            "-sf".to_string(),
            format!("/usr/share/zoneinfo/{}", config.timezone),
            "/etc/localtime".to_string(),
        ]))?;
        ctx.runner.run_checked(&inside("hwclock").arg("--systohc"))?;

        edit_target_file(ctx, &target.file("/etc/locale.gen"), |c| {
            sysfiles::enable_locale(c, &config.locale)
        })?;
        ctx.runner.run_checked(&inside("locale-gen"))?;
        write_target_file(ctx, &target, "/etc/locale.conf", &format!("LANG={}\n", config.locale))?;
        write_target_file(ctx, &target, "/etc/vconsole.conf", &format!("KEYMAP={}\n", config.keymap))?;
        write_target_file(ctx, &target, "/etc/hostname", &format!("{}\n", config.hostname))?;
        write_target_file(
            ctx,
            &target,
            "/etc/hosts",
            &format!(
                "127.0.0.1   localhost\n::1         localhost\n127.0.1.1   {0}.localdomain {0}\n",
                config.hostname
            ),
        )?;

        ctx.runner.run_checked(
            &inside("useradd").args(["-m", "-G", "wheel", "-s", "/bin/bash", config.username.as_str()]),
        )?;
        let passwords = format!(
            "{}:{}\nroot:{}\n",
            config.username,
            config.user_password.expose(),
            config.root_password.expose()
        );
        ctx.runner.run_checked(&inside("chpasswd").stdin(passwords))?;

        edit_target_file(ctx, &target.file("/etc/sudoers"), sysfiles::enable_wheel_sudo)?;
        enable_service(ctx, &target, "NetworkManager")?;
        Ok(StepOutcome::Done)
    }
}

/// GRUB for the firmware mode of the layout.
pub struct Bootloader {
    pub root: PathBuf,
}

impl Step for Bootloader {
    fn name(&self) -> &'static str {
        "Bootloader"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        ensure_mounted(ctx, &self.root)?;
        let layout = ctx.config.partitions()?;
        let root = Some(self.root.as_path());

        let install = match layout.boot_mode {
            BootMode::Uefi => CommandSpec::new("grub-install").args([
                "--target=x86_64-efi",
                "--efi-directory=/boot",
                "--bootloader-id=GRUB",
            ]),
            BootMode::Bios => CommandSpec::new("grub-install")
                .arg("--target=i386-pc")
                .path_arg(&layout.disk),
        };
        ctx.runner.run_checked(&install.privileged().within(root))?;
        ctx.runner.run_checked(
            &CommandSpec::new("grub-mkconfig")
                .args(["-o", "/boot/grub/grub.cfg"])
                .privileged()
                .within(root),
        )?;
        Ok(StepOutcome::Note(format!("GRUB installed ({})", layout.boot_mode)))
    }
}

/// Ask whether the desktop and gaming setup should run inside the new system.
pub struct Continuation;

impl Step for Continuation {
    fn name(&self) -> &'static str {
        "Continue in new system"
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
        config.continue_in_chroot = prompter.ask_yes_no(
            "Base system installed. Set up drivers, desktop and gaming inside it now?",
            true,
        )?;
        Ok(())
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome> {
        if ctx.config.continue_in_chroot {
            Ok(StepOutcome::Done)
        } else {
            Ok(StepOutcome::Note(
                "base system only; run archgamer again after rebooting".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::DetectedFacts;
    use crate::prompt::{Answer, ScriptedPrompter};
    use crate::runner::RecordingRunner;
    use crate::sequencer::Sequencer;
    use crate::settings::Settings;
    use crate::types::RunMode;

    const LSBLK: &str = "/dev/sda 500G disk Samsung SSD\n/dev/sr0 1G rom DVD\n";

    fn disk_answers() -> Vec<Answer> {
        vec![
            Answer::Choice(0),
            Answer::Default,
            Answer::Yes,
            Answer::text("/dev/sda"),
        ]
    }

    fn run(
        steps: Vec<Box<dyn Step>>,
        runner: &RecordingRunner,
        answers: Vec<Answer>,
        mode: BootMode,
    ) -> (Result<()>, InstallConfig) {
        let facts = DetectedFacts::default();
        let settings = Settings::default();
        let env = Environment {
            facts: &facts,
            runner,
            settings: &settings,
        };
        let mut config = InstallConfig::new(RunMode::FullInstall, mode);
        let mut prompter = ScriptedPrompter::new(answers);
        let mut seq = Sequencer::new(steps);
        let result = seq.run(&mut config, &mut prompter, &env).map(|_| ());
        (result, config)
    }

    #[test]
    fn test_select_disk_records_confirmation() {
        let runner = RecordingRunner::new(true).respond("lsblk", LSBLK);
        let (result, config) = run(vec![Box::new(SelectDisk)], &runner, disk_answers(), BootMode::Uefi);
        result.unwrap();
        assert_eq!(config.ensure_wipe_confirmed().unwrap(), Path::new("/dev/sda"));
        assert_eq!(config.partitions().unwrap().root, PathBuf::from("/dev/sda2"));
    }

    #[test]
    fn test_mistyped_confirmation_declines() {
        let runner = RecordingRunner::new(true).respond("lsblk", LSBLK);
        let answers = vec![
            Answer::Choice(0),
            Answer::Default,
            Answer::Yes,
            Answer::text("/dev/sdb"),
        ];
        let steps: Vec<Box<dyn Step>> = vec![Box::new(SelectDisk), Box::new(Partition)];
        let (result, config) = run(steps, &runner, answers, BootMode::Uefi);
        assert!(matches!(result, Err(SetupError::Declined(_))));
        assert!(config.ensure_wipe_confirmed().is_err());
        assert!(!runner.ran("sgdisk"));
    }

    #[test]
    fn test_no_disks_is_fatal() {
        let runner = RecordingRunner::new(true).respond("lsblk", "/dev/sr0 1G rom DVD\n");
        let (result, _) = run(vec![Box::new(SelectDisk)], &runner, vec![], BootMode::Uefi);
        assert!(result.is_err());
    }

    #[test]
    fn test_partition_without_confirmation_is_contract_violation() {
        let runner = RecordingRunner::new(true);
        let (result, _) = run(vec![Box::new(Partition)], &runner, vec![], BootMode::Uefi);
        assert!(matches!(result, Err(SetupError::Contract(_))));
        assert!(runner.lines().is_empty());
    }

    #[test]
    fn test_uefi_partition_and_format() {
        let runner = RecordingRunner::new(true).respond("lsblk", LSBLK);
        let steps: Vec<Box<dyn Step>> = vec![Box::new(SelectDisk), Box::new(Partition), Box::new(Format)];
        let (result, _) = run(steps, &runner, disk_answers(), BootMode::Uefi);
        result.unwrap();

        let lines = runner.lines();
        assert!(lines.contains(&"sgdisk --zap-all /dev/sda".to_string()));
        assert!(lines.iter().any(|l| l.contains("-t 1:ef00") && l.contains("-t 2:8300")));
        assert!(lines.contains(&"mkfs.fat -F32 /dev/sda1".to_string()));
        assert!(lines.contains(&"mkfs.ext4 -F /dev/sda2".to_string()));
        assert!(runner.position("partprobe") < runner.position("mkfs.fat"));
    }

    #[test]
    fn test_bios_layout_leaves_boot_partition_raw() {
        let runner = RecordingRunner::new(true).respond("lsblk", LSBLK);
        let steps: Vec<Box<dyn Step>> = vec![Box::new(SelectDisk), Box::new(Partition), Box::new(Format)];
        let (result, _) = run(steps, &runner, disk_answers(), BootMode::Bios);
        result.unwrap();

        assert!(runner.lines().iter().any(|l| l.contains("-t 1:ef02")));
        assert!(!runner.ran("mkfs.fat"));
        assert!(!runner.ran("/dev/sda1"));
    }

    #[test]
    fn test_missing_mkfs_for_btrfs() {
        let runner = RecordingRunner::new(true)
            .respond("lsblk", LSBLK)
            .without_program("mkfs.btrfs");
        let answers = vec![
            Answer::Choice(0),
            Answer::text("btrfs"),
            Answer::Yes,
            Answer::text("/dev/sda"),
        ];
        let steps: Vec<Box<dyn Step>> = vec![Box::new(SelectDisk), Box::new(Format)];
        let (result, _) = run(steps, &runner, answers, BootMode::Uefi);
        let err = result.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("btrfs-progs"));
        assert!(!runner.ran("mkfs"));
    }

    #[test]
    fn test_bootstrap_requires_mount() {
        let runner = RecordingRunner::new(true);
        let steps: Vec<Box<dyn Step>> = vec![Box::new(Bootstrap { root: PathBuf::from("/mnt") })];
        let (result, _) = run(steps, &runner, vec![], BootMode::Uefi);
        assert!(matches!(result, Err(SetupError::Contract(_))));
        assert!(!runner.ran("pacstrap"));
    }

    #[test]
    fn test_bootloader_bios_targets_disk() {
        let root = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new(true).respond("lsblk", LSBLK);
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(SelectDisk),
            Box::new(Mount { root: root.path().to_path_buf() }),
            Box::new(Bootloader { root: root.path().to_path_buf() }),
        ];
        let (result, _) = run(steps, &runner, disk_answers(), BootMode::Bios);
        result.unwrap();

        let root = root.path().display();
        assert!(runner.ran(&format!("arch-chroot {} grub-install --target=i386-pc /dev/sda", root)));
        assert!(runner.ran(&format!("arch-chroot {} grub-mkconfig -o /boot/grub/grub.cfg", root)));
        assert!(runner.ran(&format!("umount -R {}", root)));
    }

    #[test]
    fn test_configure_writes_identity_and_passwords() {
        let root = tempfile::tempdir().unwrap();
        let etc = root.path().join("etc");
        std::fs::create_dir_all(&etc).unwrap();
        std::fs::write(etc.join("locale.gen"), "#en_US.UTF-8 UTF-8\n").unwrap();
        std::fs::write(etc.join("sudoers"), "%wheel ALL=(ALL:ALL) ALL\n").unwrap();

        let runner = RecordingRunner::new(true).respond("lsblk", LSBLK);
        let mut answers = disk_answers();
        answers.extend([
            Answer::text("rig"),
            Answer::text("gamer"),
            Answer::secret("pw1"),
            Answer::secret("pw1"),
            Answer::secret("rootpw"),
            Answer::secret("rootpw"),
            Answer::text("UTC"),
            Answer::Default,
            Answer::Default,
        ]);
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(SelectDisk),
            Box::new(Identity),
            Box::new(Mount { root: root.path().to_path_buf() }),
            Box::new(Configure { root: root.path().to_path_buf() }),
        ];
        let (result, config) = run(steps, &runner, answers, BootMode::Uefi);
        result.unwrap();
        assert_eq!(config.hostname, "rig");

        let commands = runner.commands();
        let chpasswd = commands.iter().find(|c| c.line.ends_with("chpasswd")).unwrap();
        assert_eq!(chpasswd.stdin.as_deref(), Some("gamer:pw1\nroot:rootpw\n"));
        assert!(!chpasswd.line.contains("pw1"));

        let hostname = commands.iter().find(|c| c.line.ends_with("tee /etc/hostname")).unwrap();
        assert_eq!(hostname.stdin.as_deref(), Some("rig\n"));
        assert!(runner.ran("useradd -m -G wheel -s /bin/bash gamer"));
        assert!(runner.ran("systemctl enable NetworkManager"));
        // sudoers already allows wheel
        assert!(!runner.ran("sudoers.bak"));
        assert!(runner.ran("locale.gen.bak"));
    }

    #[test]
    fn test_declined_continuation_is_a_note() {
        let runner = RecordingRunner::new(true);
        let (result, config) = run(vec![Box::new(Continuation)], &runner, vec![Answer::No], BootMode::Uefi);
        result.unwrap();
        assert!(!config.continue_in_chroot);
    }
}

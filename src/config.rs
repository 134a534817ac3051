//! Installation configuration state.
//!
//! `InstallConfig` is the single record of user choices for a run. It is filled
//! in by hardware detection (defaults) and the prompter (answers), then handed to each
//! step by shared reference while the step executes.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, SetupError};
use crate::types::{
    AurHelper, BootMode, Desktop, ExtraKernel, Filesystem, GamingComponent, RunMode,
};

/// A password held in memory only. Never printed, logged or serialized.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// The partition that makes the disk bootable. Exactly one exists per layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BootPartition {
    /// EFI System Partition, formatted FAT32 and mounted at /boot
    Efi(PathBuf),
    /// 1 MiB BIOS boot partition for GRUB's core image on GPT, never formatted
    BiosBoot(PathBuf),
}

/// Partition paths derived from a disk and a boot mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionLayout {
    pub disk: PathBuf,
    pub boot_mode: BootMode,
    pub boot: BootPartition,
    pub root: PathBuf,
}

impl PartitionLayout {
    pub fn efi(&self) -> Option<&Path> {
        match &self.boot {
            BootPartition::Efi(p) => Some(p.as_path()),
            BootPartition::BiosBoot(_) => None,
        }
    }

    pub fn bios_boot(&self) -> Option<&Path> {
        match &self.boot {
            BootPartition::BiosBoot(p) => Some(p.as_path()),
            BootPartition::Efi(_) => None,
        }
    }
}

/// Build the device path of partition `number` on `disk`.
///
/// Devices whose name ends in a digit (`nvme0n1`, `mmcblk0`, `loop0`) take a
/// `p` separator before the partition number; `sda`-style names do not.
pub fn partition_path(disk: &Path, number: u32) -> PathBuf {
    let disk_str = disk.to_string_lossy();
    let name = disk_str.rsplit('/').next().unwrap_or(&disk_str);
    let needs_separator = ["nvme", "mmcblk", "loop"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
        || name.ends_with(|c: char| c.is_ascii_digit());

    if needs_separator {
        PathBuf::from(format!("{}p{}", disk_str, number))
    } else {
        PathBuf::from(format!("{}{}", disk_str, number))
    }
}

/// Proof that the user confirmed wiping a specific disk.
///
/// Only the disk selection step creates one, after the double confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipeConfirmation {
    disk: PathBuf,
}

impl WipeConfirmation {
    pub(crate) fn accepted(disk: PathBuf) -> Self {
        Self { disk }
    }

    pub fn disk(&self) -> &Path {
        &self.disk
    }
}

/// Installation configuration for one run.
#[derive(Debug, Clone, Serialize)]
pub struct InstallConfig {
    pub run_mode: RunMode,

    // Locale & identity
    pub hostname: String,
    pub username: String,
    #[serde(skip)]
    pub user_password: Secret,
    #[serde(skip)]
    pub root_password: Secret,
    pub timezone: String,
    pub locale: String,
    pub keymap: String,

    // Disk
    pub boot_mode: BootMode,
    pub disk: Option<PathBuf>,
    pub root_filesystem: Filesystem,
    partitions: Option<PartitionLayout>,
    #[serde(skip)]
    wipe_confirmation: Option<WipeConfirmation>,

    // Software
    pub desktop: Desktop,
    pub components: BTreeSet<GamingComponent>,
    pub aur_helper: AurHelper,
    pub extra_kernel: Option<ExtraKernel>,
    pub optimize_mirrors: bool,
    pub enable_multilib: bool,
    /// Swap file size in GiB; 0 disables the swap file step
    pub swap_file_gib: u32,
    /// Full install only: run the desktop/gaming steps inside the new system
    pub continue_in_chroot: bool,
}

impl InstallConfig {
    pub fn new(run_mode: RunMode, boot_mode: BootMode) -> Self {
        Self {
            run_mode,
            hostname: "archgamer".to_string(),
            username: String::new(),
            user_password: Secret::default(),
            root_password: Secret::default(),
            timezone: "UTC".to_string(),
            locale: "en_US.UTF-8".to_string(),
            keymap: "us".to_string(),
            boot_mode,
            disk: None,
            root_filesystem: Filesystem::default(),
            partitions: None,
            wipe_confirmation: None,
            desktop: Desktop::default(),
            components: BTreeSet::new(),
            aur_helper: AurHelper::default(),
            extra_kernel: None,
            optimize_mirrors: true,
            enable_multilib: true,
            swap_file_gib: 0,
            continue_in_chroot: true,
        }
    }

    /// Select the target disk. Clears any layout and confirmation for the old disk.
    pub fn set_disk(&mut self, disk: impl Into<PathBuf>) {
        let disk = disk.into();
        if self.disk.as_ref() != Some(&disk) {
            self.partitions = None;
            self.wipe_confirmation = None;
        }
        self.disk = Some(disk);
    }

    /// Change the boot mode. Clears the layout, which depends on it.
    pub fn set_boot_mode(&mut self, mode: BootMode) {
        if self.boot_mode != mode {
            self.partitions = None;
        }
        self.boot_mode = mode;
    }

    /// Derive partition paths for the current disk and boot mode.
    ///
    /// Layout is always: partition 1 = boot (EFI or BIOS boot), partition 2 = root.
    pub fn set_partition_paths(&mut self) -> Result<&PartitionLayout> {
        let disk = self
            .disk
            .clone()
            .ok_or_else(|| SetupError::contract("no target disk selected"))?;

        let first = partition_path(&disk, 1);
        let boot = match self.boot_mode {
            BootMode::Uefi => BootPartition::Efi(first),
            BootMode::Bios => BootPartition::BiosBoot(first),
        };
        let layout = PartitionLayout {
            root: partition_path(&disk, 2),
            disk,
            boot_mode: self.boot_mode,
            boot,
        };
        log::debug!("Partition layout: {:?}", layout);
        Ok(&*self.partitions.insert(layout))
    }

    /// Partition paths, valid only after `set_partition_paths` for the current
    /// disk/boot-mode pair.
    pub fn partitions(&self) -> Result<&PartitionLayout> {
        match (&self.partitions, &self.disk) {
            (Some(layout), Some(disk)) if &layout.disk == disk && layout.boot_mode == self.boot_mode => {
                Ok(layout)
            }
            _ => Err(SetupError::contract(
                "partition paths read before set_partition_paths ran for the selected disk",
            )),
        }
    }

    pub(crate) fn record_wipe_confirmation(&mut self, confirmation: WipeConfirmation) {
        self.wipe_confirmation = Some(confirmation);
    }

    /// Fails unless the user confirmed wiping the currently selected disk.
    pub fn ensure_wipe_confirmed(&self) -> Result<&Path> {
        match (&self.wipe_confirmation, &self.disk) {
            (Some(c), Some(disk)) if c.disk() == disk => Ok(disk),
            _ => Err(SetupError::contract(
                "destructive disk operation attempted without confirmation",
            )),
        }
    }

    /// True when any selected component needs the multilib repository.
    pub fn needs_multilib(&self) -> bool {
        self.components
            .iter()
            .any(|c| crate::catalog::component(*c).requires_multilib)
    }
}

// ============================================================================
// Input validators
// ============================================================================

/// Hostname: 1-63 chars, alphanumeric and '-', no leading/trailing '-'.
pub fn validate_hostname(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() || name.len() > 63 {
        return Err("Hostname must be 1-63 characters".to_string());
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err("Hostname cannot start or end with '-'".to_string());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("Hostname may only contain letters, digits and '-'".to_string());
    }
    Ok(())
}

/// Username: lowercase letter or '_' first, then lowercase letters, digits, '_' or '-'.
pub fn validate_username(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() || name.len() > 32 {
        return Err("Username must be 1-32 characters".to_string());
    }
    if name == "root" {
        return Err("Choose a name other than 'root'".to_string());
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    if !first_ok
        || !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(
            "Username must start with a lowercase letter and contain only a-z, 0-9, '_' or '-'"
                .to_string(),
        );
    }
    Ok(())
}

/// Timezone: `Region/City` or `UTC`, resolvable under /usr/share/zoneinfo when present.
pub fn validate_timezone(tz: &str) -> std::result::Result<(), String> {
    if tz.is_empty() || tz.contains("..") || tz.starts_with('/') {
        return Err(format!("'{}' is not a valid timezone", tz));
    }
    let zoneinfo = Path::new("/usr/share/zoneinfo");
    if zoneinfo.is_dir() && !zoneinfo.join(tz).is_file() {
        return Err(format!("Timezone '{}' not found in /usr/share/zoneinfo", tz));
    }
    Ok(())
}

/// Locale: `xx_YY.UTF-8` style names.
pub fn validate_locale(locale: &str) -> std::result::Result<(), String> {
    let valid = locale.len() >= 5
        && locale
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '@'));
    if valid {
        Ok(())
    } else {
        Err(format!("'{}' is not a valid locale name", locale))
    }
}

/// Keymap: a single token such as `us` or `de-latin1`.
pub fn validate_keymap(keymap: &str) -> std::result::Result<(), String> {
    if !keymap.is_empty()
        && keymap
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        Ok(())
    } else {
        Err(format!("'{}' is not a valid keymap", keymap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_path_sda() {
        assert_eq!(partition_path(Path::new("/dev/sda"), 1), PathBuf::from("/dev/sda1"));
        assert_eq!(partition_path(Path::new("/dev/sda"), 2), PathBuf::from("/dev/sda2"));
        assert_eq!(partition_path(Path::new("/dev/vdb"), 2), PathBuf::from("/dev/vdb2"));
    }

    #[test]
    fn test_partition_path_nvme_mmc_loop() {
        assert_eq!(
            partition_path(Path::new("/dev/nvme0n1"), 1),
            PathBuf::from("/dev/nvme0n1p1")
        );
        assert_eq!(
            partition_path(Path::new("/dev/nvme0n1"), 2),
            PathBuf::from("/dev/nvme0n1p2")
        );
        assert_eq!(
            partition_path(Path::new("/dev/mmcblk0"), 1),
            PathBuf::from("/dev/mmcblk0p1")
        );
        assert_eq!(partition_path(Path::new("/dev/loop0"), 2), PathBuf::from("/dev/loop0p2"));
    }

    #[test]
    fn test_uefi_layout_has_only_efi() {
        let mut config = InstallConfig::new(RunMode::FullInstall, BootMode::Uefi);
        config.set_disk("/dev/nvme0n1");
        let layout = config.set_partition_paths().unwrap().clone();
        assert_eq!(layout.efi(), Some(Path::new("/dev/nvme0n1p1")));
        assert_eq!(layout.bios_boot(), None);
        assert_eq!(layout.root, PathBuf::from("/dev/nvme0n1p2"));
    }

    #[test]
    fn test_bios_layout_has_only_bios_boot() {
        let mut config = InstallConfig::new(RunMode::FullInstall, BootMode::Bios);
        config.set_disk("/dev/sda");
        let layout = config.set_partition_paths().unwrap().clone();
        assert_eq!(layout.efi(), None);
        assert_eq!(layout.bios_boot(), Some(Path::new("/dev/sda1")));
    }

    #[test]
    fn test_partitions_before_set_is_contract_violation() {
        let mut config = InstallConfig::new(RunMode::FullInstall, BootMode::Uefi);
        assert!(matches!(config.partitions(), Err(SetupError::Contract(_))));
        config.set_disk("/dev/sda");
        assert!(config.partitions().is_err());
        config.set_partition_paths().unwrap();
        assert!(config.partitions().is_ok());
    }

    #[test]
    fn test_changing_disk_or_mode_invalidates_layout() {
        let mut config = InstallConfig::new(RunMode::FullInstall, BootMode::Uefi);
        config.set_disk("/dev/sda");
        config.set_partition_paths().unwrap();

        config.set_boot_mode(BootMode::Bios);
        assert!(config.partitions().is_err());

        config.set_partition_paths().unwrap();
        config.set_disk("/dev/sdb");
        assert!(config.partitions().is_err());
    }

    #[test]
    fn test_set_partition_paths_without_disk_fails() {
        let mut config = InstallConfig::new(RunMode::FullInstall, BootMode::Uefi);
        assert!(config.set_partition_paths().is_err());
    }

    #[test]
    fn test_wipe_confirmation_tracks_disk() {
        let mut config = InstallConfig::new(RunMode::FullInstall, BootMode::Uefi);
        config.set_disk("/dev/sda");
        assert!(config.ensure_wipe_confirmed().is_err());

        config.record_wipe_confirmation(WipeConfirmation::accepted(PathBuf::from("/dev/sda")));
        assert_eq!(config.ensure_wipe_confirmed().unwrap(), Path::new("/dev/sda"));

        config.set_disk("/dev/sdb");
        assert!(config.ensure_wipe_confirmed().is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_config_serialization_skips_passwords() {
        let mut config = InstallConfig::new(RunMode::PostInstall, BootMode::Uefi);
        config.user_password = Secret::new("topsecret");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("topsecret"));
        assert!(json.contains("\"hostname\""));
    }

    #[test]
    fn test_validate_hostname() {
        assert!(validate_hostname("archgamer").is_ok());
        assert!(validate_hostname("my-box-01").is_ok());
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("-bad").is_err());
        assert!(validate_hostname("bad_name").is_err());
        assert!(validate_hostname(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("gamer").is_ok());
        assert!(validate_username("_svc-1").is_ok());
        assert!(validate_username("root").is_err());
        assert!(validate_username("Gamer").is_err());
        assert!(validate_username("1gamer").is_err());
        assert!(validate_username("").is_err());
    }

    #[test]
    fn test_validate_locale_and_keymap() {
        assert!(validate_locale("en_US.UTF-8").is_ok());
        assert!(validate_locale("de DE").is_err());
        assert!(validate_keymap("de-latin1").is_ok());
        assert!(validate_keymap("us intl").is_err());
    }

    #[test]
    fn test_validate_timezone_rejects_traversal() {
        assert!(validate_timezone("../etc/passwd").is_err());
        assert!(validate_timezone("/etc/localtime").is_err());
        assert!(validate_timezone("").is_err());
    }
}

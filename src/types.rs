//! Type-safe configuration types for archgamer
//!
//! Every user choice that has a closed set of values is an enum here, so the
//! sequencer can match exhaustively instead of comparing strings.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Boot firmware mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum BootMode {
    #[strum(to_string = "uefi", serialize = "UEFI")]
    Uefi,
    #[strum(to_string = "bios", serialize = "BIOS")]
    Bios,
}

/// Which top-level sequence the run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum RunMode {
    /// Configure an already installed Arch system
    #[strum(to_string = "postinstall", serialize = "post-install")]
    PostInstall,
    /// Install Arch onto a disk from the live environment
    #[strum(to_string = "fullinstall", serialize = "full-install")]
    FullInstall,
}

/// Filesystem for the root partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Filesystem {
    #[default]
    Ext4,
    Btrfs,
}

impl Filesystem {
    /// mkfs program and its force flag
    pub fn mkfs(self) -> (&'static str, &'static str) {
        match self {
            Self::Ext4 => ("mkfs.ext4", "-F"),
            Self::Btrfs => ("mkfs.btrfs", "-f"),
        }
    }
}

/// Desktop environment selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Desktop {
    #[default]
    Kde,
    Gnome,
    Xfce,
    Hyprland,
    /// Install no desktop and leave the display manager alone
    Skip,
}

/// AUR helper selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum AurHelper {
    #[default]
    Yay,
    Paru,
    None,
}

/// Additional kernel installed alongside the default `linux`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum ExtraKernel {
    #[strum(serialize = "linux-zen")]
    Zen,
    #[strum(serialize = "linux-lts")]
    Lts,
}

/// CPU vendor as reported by /proc/cpuinfo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum CpuVendor {
    Intel,
    Amd,
    #[default]
    Unknown,
}

/// GPU vendor of the primary display adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum GpuVendor {
    #[strum(serialize = "NVIDIA")]
    Nvidia,
    #[strum(serialize = "AMD")]
    Amd,
    Intel,
    #[default]
    Unknown,
}

/// Optional gaming software the user can pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum GamingComponent {
    Steam,
    Lutris,
    Wine,
    Gamemode,
    Mangohud,
    Gamescope,
    Heroic,
    #[strum(serialize = "protonup-qt")]
    ProtonUpQt,
    Discord,
    Obs,
}

//! Package catalog and resolver.
//!
//! Translates high-level choices (desktop, GPU vendor, gaming components,
//! extra kernel) into concrete package and service names.
//!
//! # Multilib gating
//!
//! Packages that live in `[multilib]` (every `lib32-*` package, plus `steam`
//! and `wine-staging`) are dropped from the resolved set when multilib is not
//! enabled on the target. The caller receives the dropped names so it can warn.

use std::collections::BTreeSet;

use crate::types::{CpuVendor, Desktop, ExtraKernel, GamingComponent, GpuVendor};

/// Packages installed by `pacstrap` on every full install.
pub const BASE_PACKAGES: &[&str] = &[
    "base",
    "base-devel",
    "linux",
    "linux-headers",
    "linux-firmware",
    "networkmanager",
    "sudo",
    "git",
    "vim",
    "grub",
    "efibootmgr",
];

/// Packages that exist only in the multilib repository despite lacking a `lib32-` prefix.
const MULTILIB_ONLY: &[&str] = &["steam", "wine-staging"];

/// Returns true if `package` can only be installed with multilib enabled.
pub fn is_multilib_package(package: &str) -> bool {
    package.starts_with("lib32-") || MULTILIB_ONLY.contains(&package)
}

/// CPU microcode package for the detected vendor.
pub fn microcode_package(cpu: CpuVendor) -> Option<&'static str> {
    match cpu {
        CpuVendor::Intel => Some("intel-ucode"),
        CpuVendor::Amd => Some("amd-ucode"),
        CpuVendor::Unknown => None,
    }
}

// ============================================================================
// Desktop profiles
// ============================================================================

/// Packages and display manager for a desktop choice.
#[derive(Debug, Clone, Copy)]
pub struct DesktopProfile {
    pub packages: &'static [&'static str],
    /// Package whose presence proves the desktop is installed
    pub core_package: &'static str,
    pub display_manager: Option<&'static str>,
}

pub fn desktop_profile(desktop: Desktop) -> Option<DesktopProfile> {
    let profile = match desktop {
        Desktop::Kde => DesktopProfile {
            packages: &["plasma-meta", "konsole", "dolphin", "ark", "sddm", "pipewire", "pipewire-pulse", "firefox"],
            core_package: "plasma-meta",
            display_manager: Some("sddm"),
        },
        Desktop::Gnome => DesktopProfile {
            packages: &["gnome", "gnome-tweaks", "gdm", "pipewire", "pipewire-pulse", "firefox"],
            core_package: "gnome",
            display_manager: Some("gdm"),
        },
        Desktop::Xfce => DesktopProfile {
            packages: &["xfce4", "xfce4-goodies", "lightdm", "lightdm-gtk-greeter", "pipewire", "pipewire-pulse", "firefox"],
            core_package: "xfce4",
            display_manager: Some("lightdm"),
        },
        Desktop::Hyprland => DesktopProfile {
            packages: &["hyprland", "xdg-desktop-portal-hyprland", "waybar", "kitty", "wofi", "mako", "sddm", "pipewire", "pipewire-pulse"],
            core_package: "hyprland",
            display_manager: Some("sddm"),
        },
        Desktop::Skip => return None,
    };
    Some(profile)
}

// ============================================================================
// GPU drivers
// ============================================================================

pub fn gpu_packages(gpu: GpuVendor) -> &'static [&'static str] {
    match gpu {
        GpuVendor::Nvidia => &[
            "nvidia-dkms",
            "nvidia-utils",
            "nvidia-settings",
            "lib32-nvidia-utils",
        ],
        GpuVendor::Amd => &[
            "mesa",
            "vulkan-radeon",
            "xf86-video-amdgpu",
            "lib32-mesa",
            "lib32-vulkan-radeon",
        ],
        GpuVendor::Intel => &["mesa", "vulkan-intel", "lib32-mesa", "lib32-vulkan-intel"],
        GpuVendor::Unknown => &["mesa", "lib32-mesa"],
    }
}

/// Package whose presence proves the driver stack for `gpu` is installed.
pub fn gpu_core_package(gpu: GpuVendor) -> &'static str {
    match gpu {
        GpuVendor::Nvidia => "nvidia-utils",
        GpuVendor::Amd => "vulkan-radeon",
        GpuVendor::Intel => "vulkan-intel",
        GpuVendor::Unknown => "mesa",
    }
}

pub fn kernel_packages(kernel: ExtraKernel) -> &'static [&'static str] {
    match kernel {
        ExtraKernel::Zen => &["linux-zen", "linux-zen-headers"],
        ExtraKernel::Lts => &["linux-lts", "linux-lts-headers"],
    }
}

// ============================================================================
// Gaming components
// ============================================================================

/// Where a component's packages come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Official repositories, installed with pacman
    Repo,
    /// AUR, installed with the selected helper
    Aur,
}

/// Catalog entry for one gaming component.
#[derive(Debug, Clone, Copy)]
pub struct ComponentSpec {
    pub component: GamingComponent,
    pub label: &'static str,
    pub packages: &'static [&'static str],
    pub source: Source,
    pub requires_multilib: bool,
}

impl ComponentSpec {
    /// Package checked by the validation report
    pub fn check_package(&self) -> &'static str {
        self.packages[0]
    }
}

pub fn component(c: GamingComponent) -> ComponentSpec {
    use GamingComponent as G;
    let (label, packages, source, requires_multilib): (_, &'static [&'static str], _, _) = match c {
        G::Steam => ("Steam", &["steam"], Source::Repo, true),
        G::Lutris => ("Lutris", &["lutris"], Source::Repo, false),
        G::Wine => ("Wine (staging) + winetricks", &["wine-staging", "winetricks"], Source::Repo, true),
        G::Gamemode => ("Feral GameMode", &["gamemode", "lib32-gamemode"], Source::Repo, false),
        G::Mangohud => ("MangoHud overlay", &["mangohud", "lib32-mangohud"], Source::Repo, false),
        G::Gamescope => ("Gamescope compositor", &["gamescope"], Source::Repo, false),
        G::Heroic => ("Heroic Games Launcher", &["heroic-games-launcher-bin"], Source::Aur, false),
        G::ProtonUpQt => ("ProtonUp-Qt", &["protonup-qt"], Source::Aur, false),
        G::Discord => ("Discord", &["discord"], Source::Repo, false),
        G::Obs => ("OBS Studio", &["obs-studio"], Source::Repo, false),
    };
    ComponentSpec {
        component: c,
        label,
        packages,
        source,
        requires_multilib,
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Result of resolving a package set against the multilib state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolved {
    /// Packages to install, deduplicated and sorted
    pub install: Vec<String>,
    /// Packages removed because multilib is disabled
    pub dropped: Vec<String>,
}

impl Resolved {
    pub fn is_empty(&self) -> bool {
        self.install.is_empty()
    }
}

/// Filter a package list by multilib availability and deduplicate it.
pub fn resolve<'a, I>(packages: I, multilib: bool) -> Resolved
where
    I: IntoIterator<Item = &'a str>,
{
    let mut install = BTreeSet::new();
    let mut dropped = BTreeSet::new();
    for pkg in packages {
        if !multilib && is_multilib_package(pkg) {
            dropped.insert(pkg.to_string());
        } else {
            install.insert(pkg.to_string());
        }
    }
    Resolved {
        install: install.into_iter().collect(),
        dropped: dropped.into_iter().collect(),
    }
}

/// Official-repo packages for the selected components.
pub fn component_repo_packages(components: &BTreeSet<GamingComponent>, multilib: bool) -> Resolved {
    resolve(
        components
            .iter()
            .map(|c| component(*c))
            .filter(|spec| spec.source == Source::Repo)
            .flat_map(|spec| spec.packages.iter().copied()),
        multilib,
    )
}

/// AUR packages for the selected components.
pub fn component_aur_packages(components: &BTreeSet<GamingComponent>) -> Vec<String> {
    components
        .iter()
        .map(|c| component(*c))
        .filter(|spec| spec.source == Source::Aur)
        .flat_map(|spec| spec.packages.iter().map(|p| p.to_string()))
        .collect()
}

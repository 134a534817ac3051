//! Environment detection
//!
//! Collects the facts archgamer uses to pick defaults: firmware mode, CPU and
//! GPU vendor, RAM, network reachability and the installed package set.
//!
//! # Design
//!
//! - **Read-only**: detection never mutates the system or the configuration
//! - **Degrades**: every probe is optional; a missing tool or unreadable file
//!   logs a warning and yields `Unknown`/empty instead of failing the run
//! - **Pure parsers**: `/proc` and tool output are parsed by plain functions so
//!   they can be tested against captured text

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runner::{CommandRunner, CommandSpec};
use crate::types::{BootMode, CpuVendor, GpuVendor};

/// Host used for the connectivity check
const NETWORK_PROBE: &str = "archlinux.org:443";
const NETWORK_TIMEOUT: Duration = Duration::from_secs(3);

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetworkState {
    /// TCP connection to archlinux.org:443 succeeded
    Online,
    /// Connection failed or timed out
    Offline,
}

impl NetworkState {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "Online"),
            Self::Offline => write!(f, "Offline"),
        }
    }
}

/// Facts about the host, gathered once at startup.
///
/// These are defaults only; explicit answers in `InstallConfig` win.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedFacts {
    pub cpu: CpuVendor,
    pub gpu: GpuVendor,
    /// Total RAM in MiB, 0 when unknown
    pub ram_mib: u64,
    pub network: NetworkState,
    pub firmware: BootMode,
    /// Names from `pacman -Qq`; empty when pacman is unavailable
    #[serde(skip)]
    pub installed: HashSet<String>,
}

impl Default for DetectedFacts {
    fn default() -> Self {
        Self {
            cpu: CpuVendor::Unknown,
            gpu: GpuVendor::Unknown,
            ram_mib: 0,
            network: NetworkState::Offline,
            firmware: BootMode::Bios,
            installed: HashSet::new(),
        }
    }
}

impl DetectedFacts {
    /// Probe the host.
    pub fn detect(runner: &dyn CommandRunner) -> Self {
        let facts = Self {
            cpu: detect_cpu(),
            gpu: detect_gpu(runner),
            ram_mib: detect_ram_mib(),
            network: detect_internet(),
            firmware: detect_firmware_mode(),
            installed: detect_installed(runner),
        };
        log::info!("Detected: {}", facts);
        facts
    }
}

impl fmt::Display for DetectedFacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "firmware={}, cpu={}, gpu={}, ram={} MiB, network={}, packages={}",
            self.firmware,
            self.cpu,
            self.gpu,
            self.ram_mib,
            self.network,
            self.installed.len()
        )
    }
}

// ============================================================================
// Detection
// ============================================================================

/// Firmware mode from the EFI sysfs directory, which the kernel only exposes
/// when booted through UEFI.
pub fn detect_firmware_mode() -> BootMode {
    firmware_mode_at(Path::new("/sys/firmware/efi"))
}

fn firmware_mode_at(efi_dir: &Path) -> BootMode {
    if efi_dir.exists() {
        log::info!("UEFI firmware detected ({} exists)", efi_dir.display());
        BootMode::Uefi
    } else {
        log::info!("BIOS firmware detected ({} not found)", efi_dir.display());
        BootMode::Bios
    }
}

/// Network reachability via a plain TCP connect.
pub fn detect_internet() -> NetworkState {
    let addrs = match NETWORK_PROBE.to_socket_addrs() {
        Ok(addrs) => addrs.collect::<Vec<_>>(),
        Err(e) => {
            log::warn!("Could not resolve {}: {}", NETWORK_PROBE, e);
            return NetworkState::Offline;
        }
    };

    for addr in addrs {
        match TcpStream::connect_timeout(&addr, NETWORK_TIMEOUT) {
            Ok(_stream) => {
                log::info!("Network connectivity confirmed (TCP to {})", addr);
                return NetworkState::Online;
            }
            Err(e) => log::debug!("TCP connect to {} failed: {}", addr, e),
        }
    }
    log::warn!("Network connectivity check failed for {}", NETWORK_PROBE);
    NetworkState::Offline
}

fn detect_cpu() -> CpuVendor {
    match std::fs::read_to_string("/proc/cpuinfo") {
        Ok(text) => parse_cpu_vendor(&text),
        Err(e) => {
            log::warn!("Could not read /proc/cpuinfo: {}", e);
            CpuVendor::Unknown
        }
    }
}

fn detect_ram_mib() -> u64 {
    match std::fs::read_to_string("/proc/meminfo") {
        Ok(text) => parse_meminfo_mib(&text).unwrap_or_else(|| {
            log::warn!("MemTotal missing from /proc/meminfo");
            0
        }),
        Err(e) => {
            log::warn!("Could not read /proc/meminfo: {}", e);
            0
        }
    }
}

fn detect_gpu(runner: &dyn CommandRunner) -> GpuVendor {
    match runner.query_stdout(&CommandSpec::new("lspci").query()) {
        Some(out) => parse_gpu_vendor(&out),
        None => {
            log::warn!("lspci unavailable, GPU vendor unknown (install pciutils)");
            GpuVendor::Unknown
        }
    }
}

fn detect_installed(runner: &dyn CommandRunner) -> HashSet<String> {
    match runner.query_stdout(&CommandSpec::new("pacman").arg("-Qq").query()) {
        Some(out) => parse_package_list(&out),
        None => {
            log::warn!("pacman -Qq failed, installed package set unknown");
            HashSet::new()
        }
    }
}

// ============================================================================
// Disks
// ============================================================================

/// A whole disk offered for installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskInfo {
    pub path: PathBuf,
    pub size: String,
    pub model: String,
}

impl fmt::Display for DiskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.model.is_empty() {
            write!(f, "{} ({})", self.path.display(), self.size)
        } else {
            write!(f, "{} ({}, {})", self.path.display(), self.size, self.model)
        }
    }
}

/// Disks from `lsblk`, whole disks only.
pub fn list_disks(runner: &dyn CommandRunner) -> Vec<DiskInfo> {
    let spec = CommandSpec::new("lsblk")
        .args(["-dpno", "NAME,SIZE,TYPE,MODEL"])
        .query();
    match runner.query_stdout(&spec) {
        Some(out) => parse_lsblk(&out),
        None => {
            log::warn!("lsblk failed, no disks listed");
            Vec::new()
        }
    }
}

// ============================================================================
// Parsers
// ============================================================================

pub fn parse_cpu_vendor(cpuinfo: &str) -> CpuVendor {
    let vendor = cpuinfo
        .lines()
        .find(|line| line.starts_with("vendor_id"))
        .and_then(|line| line.split(':').nth(1))
        .map(str::trim);
    match vendor {
        Some("GenuineIntel") => CpuVendor::Intel,
        Some("AuthenticAMD") => CpuVendor::Amd,
        _ => CpuVendor::Unknown,
    }
}

/// Vendor of the first display controller in `lspci` output.
///
/// NVIDIA wins over anything else when several adapters are present, since a
/// discrete card drives the driver choice.
pub fn parse_gpu_vendor(lspci: &str) -> GpuVendor {
    let adapters: Vec<String> = lspci
        .lines()
        .filter(|line| {
            line.contains("VGA compatible controller")
                || line.contains("3D controller")
                || line.contains("Display controller")
        })
        .map(str::to_lowercase)
        .collect();

    if adapters.iter().any(|l| l.contains("nvidia")) {
        GpuVendor::Nvidia
    } else if adapters
        .iter()
        .any(|l| l.contains("advanced micro devices") || l.contains("amd/ati") || l.contains("radeon"))
    {
        GpuVendor::Amd
    } else if adapters.iter().any(|l| l.contains("intel")) {
        GpuVendor::Intel
    } else {
        GpuVendor::Unknown
    }
}

pub fn parse_meminfo_mib(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kib| kib.parse::<u64>().ok())
        .map(|kib| kib / 1024)
}

pub fn parse_package_list(output: &str) -> HashSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Parse `lsblk -dpno NAME,SIZE,TYPE,MODEL`. The model column may contain spaces.
pub fn parse_lsblk(output: &str) -> Vec<DiskInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let size = fields.next()?;
            let kind = fields.next()?;
            if kind != "disk" {
                return None;
            }
            Some(DiskInfo {
                path: PathBuf::from(name),
                size: size.to_string(),
                model: fields.collect::<Vec<_>>().join(" "),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RecordingRunner;

    #[test]
    fn test_parse_cpu_vendor() {
        let intel = "processor\t: 0\nvendor_id\t: GenuineIntel\ncpu family\t: 6\n";
        let amd = "processor\t: 0\nvendor_id\t: AuthenticAMD\n";
        assert_eq!(parse_cpu_vendor(intel), CpuVendor::Intel);
        assert_eq!(parse_cpu_vendor(amd), CpuVendor::Amd);
        assert_eq!(parse_cpu_vendor("processor : 0\n"), CpuVendor::Unknown);
    }

    #[test]
    fn test_parse_gpu_vendor() {
        let nvidia = "01:00.0 VGA compatible controller: NVIDIA Corporation GA104 [GeForce RTX 3070] (rev a1)\n";
        let amd = "03:00.0 VGA compatible controller: Advanced Micro Devices, Inc. [AMD/ATI] Navi 21\n";
        let intel = "00:02.0 VGA compatible controller: Intel Corporation UHD Graphics 620\n";
        assert_eq!(parse_gpu_vendor(nvidia), GpuVendor::Nvidia);
        assert_eq!(parse_gpu_vendor(amd), GpuVendor::Amd);
        assert_eq!(parse_gpu_vendor(intel), GpuVendor::Intel);
        assert_eq!(parse_gpu_vendor("00:1f.3 Audio device: Intel Corporation\n"), GpuVendor::Unknown);
    }

    #[test]
    fn test_hybrid_laptop_prefers_nvidia() {
        let hybrid = "00:02.0 VGA compatible controller: Intel Corporation UHD Graphics\n\
                      01:00.0 3D controller: NVIDIA Corporation TU117M\n";
        assert_eq!(parse_gpu_vendor(hybrid), GpuVendor::Nvidia);
    }

    #[test]
    fn test_parse_meminfo() {
        let meminfo = "MemTotal:       16303588 kB\nMemFree:         1234 kB\n";
        assert_eq!(parse_meminfo_mib(meminfo), Some(15921));
        assert_eq!(parse_meminfo_mib("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn test_parse_package_list() {
        let set = parse_package_list("base\nlinux\n\nsteam\n");
        assert_eq!(set.len(), 3);
        assert!(set.contains("steam"));
    }

    #[test]
    fn test_parse_lsblk_keeps_disks_only() {
        let out = "/dev/sda 500G disk Samsung SSD 860\n\
                   /dev/sr0 1024M rom QEMU DVD-ROM\n\
                   /dev/nvme0n1 1.8T disk WD_BLACK SN850X 2000GB\n\
                   /dev/loop0 800M loop\n";
        let disks = parse_lsblk(out);
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].path, PathBuf::from("/dev/sda"));
        assert_eq!(disks[0].model, "Samsung SSD 860");
        assert_eq!(disks[1].size, "1.8T");
        assert_eq!(disks[1].to_string(), "/dev/nvme0n1 (1.8T, WD_BLACK SN850X 2000GB)");
    }

    #[test]
    fn test_firmware_mode_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(firmware_mode_at(dir.path()), BootMode::Uefi);
        assert_eq!(firmware_mode_at(&dir.path().join("missing")), BootMode::Bios);
    }

    #[test]
    fn test_missing_tools_degrade_to_unknown() {
        let runner = RecordingRunner::new(false)
            .fail_on("lspci", 127)
            .fail_on("pacman -Qq", 127);
        assert_eq!(detect_gpu(&runner), GpuVendor::Unknown);
        assert!(detect_installed(&runner).is_empty());
    }

    #[test]
    fn test_list_disks_through_runner() {
        let runner = RecordingRunner::new(true).respond("lsblk", "/dev/vda 20G disk\n");
        let disks = list_disks(&runner);
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].to_string(), "/dev/vda (20G)");
    }
}

//! Process and mount lifecycle management
//!
//! Child commands (pacstrap, sgdisk, makepkg...) must not outlive archgamer, and
//! a target root that was mounted must be unmounted on every exit path.
//!
//! - Children that never touch the terminal get their own process group;
//!   children that may prompt (sudo, makepkg, pacman) stay in the foreground
//!   group, since a background group is stopped by SIGTTIN/SIGTTOU
//! - Every running child is tracked in a global registry
//! - Target roots are registered when mounting begins (see `MountGuard`)
//! - SIGINT/SIGTERM/SIGHUP terminate all tracked process groups, unmount every
//!   registered root and exit with `128 + signal`

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static CLEANUP_REGISTRY: OnceLock<Arc<Mutex<CleanupRegistry>>> = OnceLock::new();

/// How a child relates to archgamer's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildGroup {
    /// Leader of its own process group; signalled as a group
    Own,
    /// Shares archgamer's foreground group; signalled by PID only
    Foreground,
}

/// Everything that has to be torn down if the process dies unexpectedly.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    /// Children currently running
    pids: HashMap<u32, ChildGroup>,
    /// Target roots with filesystems mounted below them
    mounts: BTreeSet<PathBuf>,
}

impl CleanupRegistry {
    /// Get or create the global registry
    pub fn global() -> Arc<Mutex<CleanupRegistry>> {
        CLEANUP_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(CleanupRegistry::default())))
            .clone()
    }

    pub fn register_child(&mut self, pid: u32, group: ChildGroup) {
        self.pids.insert(pid, group);
        log::debug!("Registered child process PID {} ({:?})", pid, group);
    }

    pub fn unregister_child(&mut self, pid: u32) {
        self.pids.remove(&pid);
        log::debug!("Unregistered child process PID {}", pid);
    }

    pub fn register_mount(&mut self, root: &Path) {
        self.mounts.insert(root.to_path_buf());
        log::debug!("Registered mount root {}", root.display());
    }

    pub fn unregister_mount(&mut self, root: &Path) {
        self.mounts.remove(root);
        log::debug!("Unregistered mount root {}", root.display());
    }

    pub fn child_count(&self) -> usize {
        self.pids.len()
    }

    pub fn is_tracked(&self, pid: u32) -> bool {
        self.pids.contains_key(&pid)
    }

    pub fn mounted_roots(&self) -> impl Iterator<Item = &Path> {
        self.mounts.iter().map(PathBuf::as_path)
    }

    /// Terminate all tracked children.
    /// Sends SIGTERM first, waits up to `grace_period`, then SIGKILL.
    pub fn terminate_children(&mut self, grace_period: Duration) {
        if self.pids.is_empty() {
            return;
        }
        log::info!("Terminating {} child process(es)...", self.pids.len());

        let children: Vec<(u32, ChildGroup)> = self.pids.drain().collect();
        for &(pid, group) in &children {
            signal_child(pid, group, Signal::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if children.iter().all(|&(pid, _)| !is_process_alive(pid)) {
                log::info!("All child processes terminated gracefully");
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &(pid, group) in &children {
            if is_process_alive(pid) {
                log::warn!("Child {} did not terminate, sending SIGKILL", pid);
                signal_child(pid, group, Signal::SIGKILL);
            }
        }
    }

    /// Unmount every registered root, deepest mounts first via `umount -R`.
    ///
    /// Runs outside the command runner: it is called from the signal thread.
    pub fn unmount_all(&mut self) {
        let roots: Vec<PathBuf> = std::mem::take(&mut self.mounts).into_iter().collect();
        for root in roots.iter().rev() {
            emergency_unmount(root);
        }
    }
}

fn emergency_unmount(root: &Path) {
    log::info!("Unmounting {} during cleanup", root.display());
    let _ = Command::new("swapoff")
        .arg(root.join("swapfile"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match Command::new("umount")
        .arg("-R")
        .arg(root)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
    {
        Ok(out) if out.status.success() => log::info!("Unmounted {}", root.display()),
        Ok(out) => log::warn!(
            "umount -R {} failed: {}",
            root.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        ),
        Err(e) => log::warn!("Could not run umount for {}: {}", root.display(), e),
    }
}

fn signal_child(pid: u32, group: ChildGroup, signal: Signal) {
    if group == ChildGroup::Own {
        match send_signal_to_group(pid, signal) {
            Ok(()) => return,
            Err(e) => log::warn!("Failed to send {} to process group {}: {}", signal, pid, e),
        }
    }
    // Never the group here: a foreground child shares it with archgamer
    let _ = send_signal(pid, signal);
}

/// Send a signal to a process
fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Send a signal to an entire process group (negative PID)
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Check if a process is still alive (not dead or zombie)
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    // Field 3 of /proc/<pid>/stat is the state; Z and X are not running
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        if let Some(state) = stat.rsplit(')').next().and_then(|rest| rest.split_whitespace().next()) {
            return !matches!(state, "Z" | "X");
        }
    }
    true
}

/// Install handlers for SIGINT (Ctrl+C), SIGTERM and SIGHUP.
/// Call this once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };
            log::info!("Received {}, cleaning up...", name);
            // The prompt backend may hold the terminal in raw mode
            let _ = crossterm::terminal::disable_raw_mode();
            eprintln!();
            eprintln!("[ERROR] Interrupted by {}, cleaning up", name);

            if let Ok(mut registry) = CleanupRegistry::global().lock() {
                registry.terminate_children(Duration::from_secs(3));
                registry.unmount_all();
            }
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command in its own process group and let it die with the parent.
    fn in_new_process_group(&mut self) -> &mut Self;

    /// Keep the command in the caller's process group but let it die with the parent.
    fn die_with_parent(&mut self) -> &mut Self;

    /// Set up the command for `group`.
    fn in_group(&mut self, group: ChildGroup) -> &mut Self {
        match group {
            ChildGroup::Own => self.in_new_process_group(),
            ChildGroup::Foreground => self.die_with_parent(),
        }
    }
}

impl CommandProcessGroup for Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: setpgid is async-signal-safe
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                Ok(())
            });
        }
        self.die_with_parent()
    }

    fn die_with_parent(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: prctl is async-signal-safe
        unsafe {
            self.pre_exec(|| {
                // Child dies if archgamer dies mid-operation (e.g. during sgdisk)
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

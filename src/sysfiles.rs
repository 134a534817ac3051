//! In-place edits of system configuration files.
//!
//! Edits are split in two: a pure transform from old to new content, and
//! `edit_system_file`, which does the privileged I/O. A transform returning
//! `None` means the file already has the wanted content and nothing is touched.
//!
//! Every real edit is preceded by a timestamped backup next to the file
//! (`pacman.conf.bak-20250101-120000`).

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, SetupError};
use crate::runner::{CommandRunner, CommandSpec};

/// What `edit_system_file` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Unchanged,
    Edited { backup: PathBuf },
}

/// Path of the backup taken right now for `path`.
pub fn backup_path(path: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    PathBuf::from(format!("{}.bak-{}", path.display(), stamp))
}

/// Read a file, falling back to a privileged `cat` when it is root-only (sudoers).
pub fn read_system_file(runner: &dyn CommandRunner, path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            log::debug!("{} not readable, retrying with elevation", path.display());
            let spec = CommandSpec::new("cat").path_arg(path).privileged().query();
            let out = runner.run_checked(&spec)?;
            Ok(out.stdout)
        }
        Err(e) => Err(SetupError::Io(e)),
    }
}

/// Apply `transform` to the file at `path`, backing it up first.
pub fn edit_system_file<F>(runner: &dyn CommandRunner, path: &Path, transform: F) -> Result<EditOutcome>
where
    F: FnOnce(&str) -> Option<String>,
{
    let current = read_system_file(runner, path)?;
    let Some(updated) = transform(&current) else {
        log::info!("{} already up to date", path.display());
        return Ok(EditOutcome::Unchanged);
    };

    let backup = backup_path(path);
    runner.run_checked(
        &CommandSpec::new("cp")
            .arg("-a")
            .path_arg(path)
            .path_arg(&backup)
            .privileged(),
    )?;

    let mut staged = tempfile::NamedTempFile::new()?;
    staged.write_all(updated.as_bytes())?;
    staged.flush()?;
    runner.run_checked(
        &CommandSpec::new("cp")
            .path_arg(staged.path())
            .path_arg(path)
            .privileged(),
    )?;

    log::info!("Edited {} (backup at {})", path.display(), backup.display());
    Ok(EditOutcome::Edited { backup })
}

/// Copy `path` to a timestamped backup without editing it.
pub fn backup_file(runner: &dyn CommandRunner, path: &Path) -> Result<PathBuf> {
    let backup = backup_path(path);
    runner.run_checked(
        &CommandSpec::new("cp")
            .arg("-a")
            .path_arg(path)
            .path_arg(&backup)
            .privileged(),
    )?;
    Ok(backup)
}

// ============================================================================
// Transforms
// ============================================================================

/// Result of the multilib transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultilibEdit {
    AlreadyEnabled,
    Enabled(String),
}

const MULTILIB_INCLUDE: &str = "Include = /etc/pacman.d/mirrorlist";

fn uncommented(line: &str) -> &str {
    line.trim_start().trim_start_matches('#').trim()
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn join_like(lines: &[String], original: &str) -> String {
    let mut out = lines.join("\n");
    if original.ends_with('\n') || original.is_empty() {
        out.push('\n');
    }
    out
}

fn append_line(original: &str, line: &str) -> String {
    let mut out = original.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(line);
    out.push('\n');
    out
}

/// Enable `[multilib]` in pacman.conf.
///
/// Uncomments the section header and its `Include` line when present in
/// commented form, otherwise appends the section.
pub fn enable_multilib(pacman_conf: &str) -> MultilibEdit {
    let lines: Vec<&str> = pacman_conf.lines().collect();
    if lines.iter().any(|l| l.trim() == "[multilib]") {
        return MultilibEdit::AlreadyEnabled;
    }

    let header = lines
        .iter()
        .position(|l| is_comment(l) && uncommented(l) == "[multilib]");

    let Some(header) = header else {
        let section = format!("\n[multilib]\n{}", MULTILIB_INCLUDE);
        return MultilibEdit::Enabled(append_line(pacman_conf, &section));
    };

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    out[header] = "[multilib]".to_string();
    if let Some(next) = out.get_mut(header + 1) {
        if is_comment(next) && uncommented(next).starts_with("Include") {
            *next = uncommented(next).to_string();
        }
    }
    MultilibEdit::Enabled(join_like(&out, pacman_conf))
}

const WHEEL_RULE: &str = "%wheel ALL=(ALL:ALL) ALL";

fn squash(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Let members of `wheel` use sudo.
pub fn enable_wheel_sudo(sudoers: &str) -> Option<String> {
    let lines: Vec<&str> = sudoers.lines().collect();
    if lines.iter().any(|l| !is_comment(l) && squash(l) == WHEEL_RULE) {
        return None;
    }
    match lines
        .iter()
        .position(|l| is_comment(l) && squash(uncommented(l)) == WHEEL_RULE)
    {
        Some(idx) => {
            let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
            out[idx] = WHEEL_RULE.to_string();
            Some(join_like(&out, sudoers))
        }
        None => Some(append_line(sudoers, WHEEL_RULE)),
    }
}

/// Uncomment `locale` in locale.gen, appending it when absent.
pub fn enable_locale(locale_gen: &str, locale: &str) -> Option<String> {
    let matches_locale = |l: &str| uncommented(l).split_whitespace().next() == Some(locale);
    let lines: Vec<&str> = locale_gen.lines().collect();

    if lines.iter().any(|l| !is_comment(l) && matches_locale(l)) {
        return None;
    }
    match lines.iter().position(|l| is_comment(l) && matches_locale(l)) {
        Some(idx) => {
            let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
            out[idx] = uncommented(lines[idx]).to_string();
            Some(join_like(&out, locale_gen))
        }
        None => {
            let charset = locale.split_once('.').map(|(_, cs)| cs).unwrap_or("UTF-8");
            Some(append_line(locale_gen, &format!("{} {}", locale, charset)))
        }
    }
}

/// Add a swap entry for `swap_path` (path as seen from inside the system).
pub fn append_fstab_swap(fstab: &str, swap_path: &str) -> Option<String> {
    let present = fstab
        .lines()
        .filter(|l| !is_comment(l))
        .any(|l| l.split_whitespace().next() == Some(swap_path));
    if present {
        None
    } else {
        Some(append_line(fstab, &format!("{} none swap defaults 0 0", swap_path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RecordingRunner;

    const PACMAN_CONF: &str = "[core]\nInclude = /etc/pacman.d/mirrorlist\n\n#[multilib-testing]\n#Include = /etc/pacman.d/mirrorlist\n\n#[multilib]\n#Include = /etc/pacman.d/mirrorlist\n";

    #[test]
    fn test_enable_multilib_uncomments_section() {
        let MultilibEdit::Enabled(out) = enable_multilib(PACMAN_CONF) else {
            panic!("expected an edit");
        };
        assert!(out.contains("\n[multilib]\nInclude = /etc/pacman.d/mirrorlist\n"));
        assert!(out.contains("#[multilib-testing]"));
        assert_eq!(enable_multilib(&out), MultilibEdit::AlreadyEnabled);
    }

    #[test]
    fn test_enable_multilib_appends_when_missing() {
        let MultilibEdit::Enabled(out) = enable_multilib("[core]\nInclude = x") else {
            panic!("expected an edit");
        };
        assert!(out.ends_with("[multilib]\nInclude = /etc/pacman.d/mirrorlist\n"));
    }

    #[test]
    fn test_enable_wheel_sudo() {
        let sudoers = "root ALL=(ALL:ALL) ALL\n# %wheel ALL=(ALL:ALL) ALL\n";
        let out = enable_wheel_sudo(sudoers).unwrap();
        assert!(out.contains("\n%wheel ALL=(ALL:ALL) ALL\n"));
        assert_eq!(enable_wheel_sudo(&out), None);
        assert!(enable_wheel_sudo("").unwrap().contains(WHEEL_RULE));
    }

    #[test]
    fn test_enable_locale() {
        let locale_gen = "#en_GB.UTF-8 UTF-8\n#en_US.UTF-8 UTF-8\n#en_US ISO-8859-1\n";
        let out = enable_locale(locale_gen, "en_US.UTF-8").unwrap();
        assert!(out.contains("\nen_US.UTF-8 UTF-8\n"));
        assert!(out.contains("#en_US ISO-8859-1"));
        assert_eq!(enable_locale(&out, "en_US.UTF-8"), None);
        assert_eq!(enable_locale("", "de_DE.UTF-8").unwrap(), "de_DE.UTF-8 UTF-8\n");
    }

    #[test]
    fn test_append_fstab_swap() {
        let fstab = "# /dev/sda2\nUUID=abc / ext4 rw 0 1\n";
        let out = append_fstab_swap(fstab, "/swapfile").unwrap();
        assert!(out.ends_with("/swapfile none swap defaults 0 0\n"));
        assert_eq!(append_fstab_swap(&out, "/swapfile"), None);
    }

    #[test]
    fn test_backup_path_format() {
        let backup = backup_path(Path::new("/etc/pacman.conf"));
        let name = backup.to_string_lossy();
        assert!(name.starts_with("/etc/pacman.conf.bak-"));
        assert_eq!(name.len(), "/etc/pacman.conf.bak-".len() + "YYYYmmdd-HHMMSS".len());
    }

    #[test]
    fn test_edit_unchanged_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pacman.conf");
        std::fs::write(&path, "[multilib]\nInclude = x\n").unwrap();

        let runner = RecordingRunner::new(false);
        let outcome = edit_system_file(&runner, &path, |c| match enable_multilib(c) {
            MultilibEdit::AlreadyEnabled => None,
            MultilibEdit::Enabled(s) => Some(s),
        })
        .unwrap();
        assert_eq!(outcome, EditOutcome::Unchanged);
        assert!(runner.lines().is_empty());
    }

    #[test]
    fn test_edit_backs_up_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sudoers");
        std::fs::write(&path, "# %wheel ALL=(ALL:ALL) ALL\n").unwrap();

        let runner = RecordingRunner::new(false);
        let outcome = edit_system_file(&runner, &path, enable_wheel_sudo).unwrap();
        let EditOutcome::Edited { backup } = outcome else {
            panic!("expected an edit");
        };

        let lines = runner.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("sudo cp -a "));
        assert!(lines[0].ends_with(&backup.display().to_string()));
        assert!(lines[1].starts_with("sudo cp "));
        assert!(lines[1].ends_with(&path.display().to_string()));
    }

    #[test]
    fn test_edit_missing_file_fails() {
        let runner = RecordingRunner::new(true);
        let result = edit_system_file(&runner, Path::new("/nonexistent/archgamer.conf"), |_| None);
        assert!(matches!(result, Err(SetupError::Io(_))));
    }
}

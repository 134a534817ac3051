//! External command execution.
//!
//! Every tool archgamer drives (pacman, sgdisk, mkfs, arch-chroot, systemctl,
//! grub-install...) goes through a `CommandRunner`. Steps describe *what* to
//! run with a `CommandSpec`; the runner decides *how*:
//!
//! - chrooted commands are wrapped in `arch-chroot <root>`
//! - privileged commands get the elevation wrapper (`sudo`) when the process
//!   is not already root
//! - children run in their own process group and are registered for cleanup
//!
//! Execution is synchronous: one child at a time, the caller blocks until it
//! exits. A non-zero exit is returned as data (`CommandOutput`), never as an
//! `Err`; the calling step applies its own failure policy.

use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Result, SetupError};
use crate::process_guard::{ChildGroup, CleanupRegistry, CommandProcessGroup};

/// Description of one external command.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Needs root (pacman -S, mount, systemctl enable...)
    pub privileged: bool,
    /// Run inside this mounted root via arch-chroot
    pub chroot: Option<PathBuf>,
    /// Run as this unprivileged user (makepkg refuses root)
    pub as_user: Option<String>,
    /// Fed to the child's stdin; never logged
    pub stdin: Option<String>,
    /// Capture stdout/stderr instead of streaming them to the terminal
    pub capture: bool,
    /// Safe to execute in dry-run mode (queries only)
    pub read_only: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            privileged: false,
            chroot: None,
            as_user: None,
            stdin: None,
            capture: false,
            read_only: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Run inside `root` when given, on the host otherwise.
    pub fn within(mut self, root: Option<&Path>) -> Self {
        self.chroot = root.map(Path::to_path_buf);
        self
    }

    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.as_user = Some(user.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Capture output without echoing it to the terminal.
    pub fn captured(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Capture output and mark the command as a harmless query.
    pub fn query(mut self) -> Self {
        self.capture = true;
        self.read_only = true;
        self
    }

    /// The command line as the user would type it, without wrappers.
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("privileged", &self.privileged)
            .field("chroot", &self.chroot)
            .field("as_user", &self.as_user)
            .field("stdin", &self.stdin.as_ref().map(|_| "***"))
            .field("capture", &self.capture)
            .finish()
    }
}

/// The system a step operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The running system
    Host,
    /// A freshly installed system mounted at this root
    Chroot(PathBuf),
}

impl Target {
    /// Root to chroot into, None for the host.
    pub fn root(&self) -> Option<&Path> {
        match self {
            Self::Host => None,
            Self::Chroot(root) => Some(root.as_path()),
        }
    }

    /// Host path of `path`, given as seen from inside the target.
    pub fn file(&self, path: &str) -> PathBuf {
        match self {
            Self::Host => PathBuf::from(path),
            Self::Chroot(root) => root.join(path.trim_start_matches('/')),
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "this system"),
            Self::Chroot(root) => write!(f, "the new system at {}", root.display()),
        }
    }
}

/// Build the final argv for `spec`.
///
/// | Situation | Result |
/// |-----------|--------|
/// | chroot    | `arch-chroot [-u user] <root> prog args` |
/// | as_user on host, running as root | `runuser -u user -- prog args` |
/// | privileged or chroot, not root | `<elevate> ...` prepended |
pub fn resolve_argv(spec: &CommandSpec, is_root: bool, elevate: &str) -> Vec<String> {
    let mut argv: Vec<String> = std::iter::once(spec.program.clone())
        .chain(spec.args.iter().cloned())
        .collect();

    if let Some(root) = &spec.chroot {
        let mut wrapped = vec!["arch-chroot".to_string()];
        if let Some(user) = &spec.as_user {
            wrapped.push("-u".to_string());
            wrapped.push(user.clone());
        }
        wrapped.push(root.display().to_string());
        wrapped.extend(argv);
        argv = wrapped;
    } else if let Some(user) = &spec.as_user {
        if is_root {
            let mut wrapped = vec![
                "runuser".to_string(),
                "-u".to_string(),
                user.clone(),
                "--".to_string(),
            ];
            wrapped.extend(argv);
            argv = wrapped;
        }
    }

    let needs_root = spec.privileged || spec.chroot.is_some();
    if needs_root && !is_root {
        argv.insert(0, elevate.to_string());
    }
    argv
}

/// Output from one command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured stdout (empty when streamed to the terminal)
    pub stdout: String,
    /// Captured stderr (empty when streamed to the terminal)
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
            success: false,
        }
    }

    /// Turn a non-zero exit into `SetupError::CommandFailed`.
    pub fn ensure_success(self, spec: &CommandSpec) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(SetupError::CommandFailed {
                command: spec.display_line(),
                code: self.exit_code.unwrap_or(-1),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Executes external commands on behalf of steps.
pub trait CommandRunner {
    /// Run `spec` to completion. `Err` only when the command could not be started.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Whether the current process already has root privileges.
    fn is_root(&self) -> bool;

    /// Whether `program` can be found on PATH.
    fn find_program(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    /// Run and fail on non-zero exit.
    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.run(spec)?.ensure_success(spec)
    }

    /// Run a query and return its stdout, or None when it failed.
    fn query_stdout(&self, spec: &CommandSpec) -> Option<String> {
        match self.run(spec) {
            Ok(out) if out.success => Some(out.stdout),
            Ok(out) => {
                log::debug!("Query `{}` exited with {:?}", spec.display_line(), out.exit_code);
                None
            }
            Err(e) => {
                log::debug!("Query `{}` could not run: {}", spec.display_line(), e);
                None
            }
        }
    }
}

// ============================================================================
// System runner
// ============================================================================

/// Runs commands on the real system.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    is_root: bool,
    elevate: String,
    dry_run: bool,
}

impl SystemRunner {
    pub fn new(is_root: bool, elevate: impl Into<String>, dry_run: bool) -> Self {
        Self {
            is_root,
            elevate: elevate.into(),
            dry_run,
        }
    }
}

impl CommandRunner for SystemRunner {
    fn is_root(&self) -> bool {
        self.is_root
    }

    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let argv = resolve_argv(spec, self.is_root, &self.elevate);
        log::info!("exec: {}", argv.join(" "));

        if self.dry_run && !spec.read_only {
            println!("[DRY RUN] {}", argv.join(" "));
            return Ok(CommandOutput::ok(""));
        }

        // Anything that may prompt on the terminal (sudo, makepkg, pacman)
        // stays in the foreground group; background groups stop on tty reads.
        let elevated = !self.is_root && (spec.privileged || spec.chroot.is_some());
        let group = if spec.stdin.is_some() && !elevated {
            ChildGroup::Own
        } else {
            ChildGroup::Foreground
        };

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).in_group(group);
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        if spec.capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SetupError::missing(argv[0].clone(), argv[0].clone())
            } else {
                SetupError::Io(e)
            }
        })?;
        let pid = child.id();
        if let Ok(mut registry) = CleanupRegistry::global().lock() {
            registry.register_child(pid, group);
        }

        // stdin is fed from its own thread so a child filling its stdout pipe
        // cannot deadlock against us
        let pipe = child.stdin.take();
        let output = std::thread::scope(|scope| {
            if let (Some(input), Some(mut pipe)) = (spec.stdin.as_deref(), pipe) {
                scope.spawn(move || {
                    if let Err(e) = pipe.write_all(input.as_bytes()) {
                        log::debug!("stdin of `{}` closed early: {}", spec.display_line(), e);
                    }
                });
            }
            child.wait_with_output()
        });
        if let Ok(mut registry) = CleanupRegistry::global().lock() {
            registry.unregister_child(pid);
        }
        let output = output?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };
        if !result.success {
            log::info!("`{}` exited with {:?}", spec.display_line(), result.exit_code);
        }
        Ok(result)
    }
}

// ============================================================================
// Recording runner
// ============================================================================

/// A runner that records resolved command lines instead of executing them.
///
/// Responses are matched by substring against the resolved command line; the
/// first matching rule wins, unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    is_root: bool,
    rules: Vec<(String, CommandOutput)>,
    missing: Vec<String>,
    log: RefCell<Vec<RecordedCommand>>,
}

/// One command seen by `RecordingRunner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub line: String,
    pub stdin: Option<String>,
}

impl RecordingRunner {
    pub fn new(is_root: bool) -> Self {
        Self {
            is_root,
            ..Self::default()
        }
    }

    /// Respond to commands containing `pattern` with `stdout`.
    pub fn respond(mut self, pattern: &str, stdout: &str) -> Self {
        self.rules.push((pattern.to_string(), CommandOutput::ok(stdout)));
        self
    }

    /// Make commands containing `pattern` exit with `code`.
    pub fn fail_on(mut self, pattern: &str, code: i32) -> Self {
        self.rules
            .push((pattern.to_string(), CommandOutput::failed(code, format!("{pattern} failed"))));
        self
    }

    /// Pretend `program` is not installed.
    pub fn without_program(mut self, program: &str) -> Self {
        self.missing.push(program.to_string());
        self
    }

    /// Resolved command lines in execution order.
    pub fn lines(&self) -> Vec<String> {
        self.log.borrow().iter().map(|c| c.line.clone()).collect()
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.log.borrow().clone()
    }

    /// Index of the first recorded line containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.log.borrow().iter().position(|c| c.line.contains(pattern))
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.position(pattern).is_some()
    }
}

impl CommandRunner for RecordingRunner {
    fn is_root(&self) -> bool {
        self.is_root
    }

    fn find_program(&self, program: &str) -> bool {
        !self.missing.iter().any(|m| m == program)
    }

    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let line = resolve_argv(spec, self.is_root, "sudo").join(" ");
        let output = self
            .rules
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| CommandOutput::ok(""));
        self.log.borrow_mut().push(RecordedCommand {
            line,
            stdin: spec.stdin.clone(),
        });
        Ok(output)
    }
}

// ============================================================================
// Mount cleanup
// ============================================================================

/// Unmounts a target root when dropped.
///
/// Created right before the first mount under `root`, so every exit path after
/// that point (success, fatal step, cancellation, panic unwinding) unmounts it.
/// The root is also registered globally so the signal handler can unmount it.
pub struct MountGuard<'r> {
    runner: &'r dyn CommandRunner,
    root: PathBuf,
}

impl<'r> MountGuard<'r> {
    pub fn register(runner: &'r dyn CommandRunner, root: &Path) -> Self {
        if let Ok(mut registry) = CleanupRegistry::global().lock() {
            registry.register_mount(root);
        }
        Self {
            runner,
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        log::debug!("MountGuard dropped, unmounting {}", self.root.display());
        let swap = self.root.join("swapfile");
        if swap.exists() {
            let _ = self.runner.run(&CommandSpec::new("swapoff").path_arg(&swap).privileged());
        }
        let umount = CommandSpec::new("umount").arg("-R").path_arg(&self.root).privileged();
        match self.runner.run(&umount) {
            Ok(out) if out.success => log::info!("Unmounted {}", self.root.display()),
            Ok(out) => log::warn!("umount -R {} failed: {}", self.root.display(), out.stderr.trim()),
            Err(e) => log::warn!("Could not unmount {}: {}", self.root.display(), e),
        }
        if let Ok(mut registry) = CleanupRegistry::global().lock() {
            registry.unregister_mount(&self.root);
        }
    }
}

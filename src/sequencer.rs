//! Step sequencer
//!
//! Runs an ordered list of `Step`s against one `InstallConfig`.
//!
//! # Step lifecycle
//!
//! ```text
//! prepare (may prompt, mutates config)
//!     ↓
//! should_run (may skip with a reason)
//!     ↓
//! execute (config is read-only, runs commands)
//! ```
//!
//! # Sequence states
//!
//! ```text
//! NotStarted → Running(0) → Running(1) → ... → Completed
//!                   ↓            ↓
//!              Aborted { step, reason }
//! ```
//!
//! A failing `Fatal` step aborts the sequence. A failing `Warn` step prints a
//! warning and the sequence moves on. Cancellation, a declined confirmation,
//! a privilege error or a contract violation abort regardless of policy.
//!
//! Mount guards taken by steps live until the sequence returns, so every
//! mounted target root is unmounted on both the success and the abort path.

use std::fmt;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::config::InstallConfig;
use crate::console;
use crate::error::{Result, SetupError};
use crate::hardware::DetectedFacts;
use crate::prompt::Prompter;
use crate::runner::{CommandRunner, MountGuard};
use crate::settings::Settings;

/// What happens to the run when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailurePolicy {
    /// Abort the sequence
    Fatal,
    /// Print a warning and continue with the next step
    Warn,
}

/// Successful result of `Step::execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// Done, with something worth telling the user
    Note(String),
}

/// Final status of one step in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum StepStatus {
    Done,
    Note(String),
    Skipped(String),
    Warned(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub name: &'static str,
    #[serde(flatten)]
    pub status: StepStatus,
}

/// Host facts and collaborators shared by every step.
#[derive(Clone, Copy)]
pub struct Environment<'r> {
    pub facts: &'r DetectedFacts,
    pub runner: &'r dyn CommandRunner,
    pub settings: &'r Settings,
}

/// Everything a step may touch while executing.
pub struct StepContext<'a, 'r> {
    pub config: &'a InstallConfig,
    pub facts: &'r DetectedFacts,
    pub runner: &'r dyn CommandRunner,
    pub settings: &'r Settings,
    guards: &'a mut Vec<MountGuard<'r>>,
}

impl<'r> StepContext<'_, 'r> {
    /// Make sure `root` is unmounted when the sequence ends.
    /// Call before the first mount below `root`.
    pub fn guard_mounts(&mut self, root: &Path) {
        if !self.guards.iter().any(|g| g.root() == root) {
            self.guards.push(MountGuard::register(self.runner, root));
        }
    }

    pub fn is_guarded(&self, root: &Path) -> bool {
        self.guards.iter().any(|g| g.root() == root)
    }
}

/// One unit of the install/configure pipeline.
pub trait Step {
    fn name(&self) -> &'static str;

    fn policy(&self) -> FailurePolicy;

    /// Ask the questions this step needs. The only phase that may change `config`.
    fn prepare(
        &self,
        _config: &mut InstallConfig,
        _prompter: &mut dyn Prompter,
        _env: &Environment<'_>,
    ) -> Result<()> {
        Ok(())
    }

    /// `Some(reason)` skips the step.
    fn should_run(&self, _config: &InstallConfig, _env: &Environment<'_>) -> Option<String> {
        None
    }

    fn execute(&self, ctx: &mut StepContext<'_, '_>) -> Result<StepOutcome>;
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SequenceState {
    NotStarted,
    Running(usize),
    Completed,
    Aborted { step: usize, reason: String },
}

impl SequenceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted { .. })
    }
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Running(i) => write!(f, "running step {}", i + 1),
            Self::Completed => write!(f, "completed"),
            Self::Aborted { step, reason } => write!(f, "aborted at step {}: {}", step + 1, reason),
        }
    }
}

/// Invalid state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot move from {from} to step {to} (steps run in order)")]
    OutOfOrder { from: SequenceState, to: usize },

    #[error("Cannot transition from terminal state '{from}'")]
    FromTerminalState { from: SequenceState },

    #[error("Cannot complete while {from}")]
    NotRunning { from: SequenceState },
}

impl SequenceState {
    /// Enter step `index`. Steps must be entered in order starting at 0.
    pub fn enter(&mut self, index: usize) -> std::result::Result<(), TransitionError> {
        let expected = match self {
            Self::NotStarted => 0,
            Self::Running(i) => *i + 1,
            _ => return Err(TransitionError::FromTerminalState { from: self.clone() }),
        };
        if index != expected {
            return Err(TransitionError::OutOfOrder {
                from: self.clone(),
                to: index,
            });
        }
        *self = Self::Running(index);
        Ok(())
    }

    pub fn complete(&mut self) -> std::result::Result<(), TransitionError> {
        match self {
            Self::Running(_) | Self::NotStarted => {
                *self = Self::Completed;
                Ok(())
            }
            _ => Err(TransitionError::NotRunning { from: self.clone() }),
        }
    }

    pub fn abort(&mut self, reason: impl Into<String>) -> std::result::Result<(), TransitionError> {
        match self {
            Self::Running(step) => {
                *self = Self::Aborted {
                    step: *step,
                    reason: reason.into(),
                };
                Ok(())
            }
            _ => Err(TransitionError::NotRunning { from: self.clone() }),
        }
    }
}

impl From<TransitionError> for SetupError {
    fn from(e: TransitionError) -> Self {
        SetupError::contract(e.to_string())
    }
}

// ============================================================================
// Sequencer
// ============================================================================

/// Runs a fixed list of steps.
pub struct Sequencer {
    steps: Vec<Box<dyn Step>>,
    state: SequenceState,
    records: Vec<StepRecord>,
}

impl Sequencer {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            steps,
            state: SequenceState::NotStarted,
            records: Vec::new(),
        }
    }

    pub fn state(&self) -> &SequenceState {
        &self.state
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Status of the step called `name`, if it was reached.
    pub fn status_of(&self, name: &str) -> Option<&StepStatus> {
        self.records.iter().find(|r| r.name == name).map(|r| &r.status)
    }

    fn record(&mut self, name: &'static str, status: StepStatus) {
        self.records.push(StepRecord { name, status });
    }

    fn fail(&mut self, name: &'static str, error: SetupError) -> SetupError {
        let reason = error.to_string();
        console::error(&format!("{}: {}", name, reason));
        self.record(name, StepStatus::Failed(reason.clone()));
        if let Err(e) = self.state.abort(reason) {
            log::error!("{}", e);
        }
        error
    }

    /// Run every step in order.
    pub fn run<'r>(
        &mut self,
        config: &mut InstallConfig,
        prompter: &mut dyn Prompter,
        env: &Environment<'r>,
    ) -> Result<&[StepRecord]> {
        let mut guards: Vec<MountGuard<'r>> = Vec::new();
        let steps = std::mem::take(&mut self.steps);
        let result = self.run_steps(&steps, config, prompter, env, &mut guards);
        self.steps = steps;
        // Unmount before reporting
        drop(guards);
        result?;
        Ok(&self.records)
    }

    fn run_steps<'r>(
        &mut self,
        steps: &[Box<dyn Step>],
        config: &mut InstallConfig,
        prompter: &mut dyn Prompter,
        env: &Environment<'r>,
        guards: &mut Vec<MountGuard<'r>>,
    ) -> Result<()> {
        let total = steps.len();
        for (index, step) in steps.iter().enumerate() {
            let name = step.name();
            self.state.enter(index)?;
            console::step(index + 1, total, name);

            if let Err(e) = step.prepare(config, prompter, env) {
                if step.policy() == FailurePolicy::Fatal || e.always_aborts() {
                    return Err(self.fail(name, e));
                }
                console::warn(&format!("{}: {} (continuing)", name, e));
                self.record(name, StepStatus::Warned(e.to_string()));
                continue;
            }

            if let Some(reason) = step.should_run(config, env) {
                console::info(&format!("Skipping {}: {}", name, reason));
                self.record(name, StepStatus::Skipped(reason));
                continue;
            }

            let mut ctx = StepContext {
                config: &*config,
                facts: env.facts,
                runner: env.runner,
                settings: env.settings,
                guards: &mut *guards,
            };
            match step.execute(&mut ctx) {
                Ok(StepOutcome::Done) => {
                    console::info(&format!("{} done", name));
                    self.record(name, StepStatus::Done);
                }
                Ok(StepOutcome::Note(note)) => {
                    console::info(&format!("{}: {}", name, note));
                    self.record(name, StepStatus::Note(note));
                }
                Err(e) if step.policy() == FailurePolicy::Fatal || e.always_aborts() => {
                    return Err(self.fail(name, e));
                }
                Err(e) => {
                    console::warn(&format!("{} failed: {} (continuing)", name, e));
                    self.record(name, StepStatus::Warned(e.to_string()));
                }
            }
        }
        self.state.complete()?;
        Ok(())
    }
}

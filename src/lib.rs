//! archgamer library
//!
//! Guided setup of Arch Linux as a desktop and gaming machine: either a full
//! install from the live environment or post-install configuration of an
//! existing system. The binary in `main.rs` only wires these modules together.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod hardware;
pub mod process_guard;
pub mod prompt;
pub mod runner;
pub mod sequencer;
pub mod settings;
pub mod steps;
pub mod sysfiles;
pub mod theme;
pub mod types;
pub mod validate;

// Re-export main types for convenience
pub use config::{InstallConfig, PartitionLayout, Secret};
pub use error::{Result, SetupError};
pub use hardware::{DetectedFacts, NetworkState};
pub use process_guard::{ChildGroup, CleanupRegistry, CommandProcessGroup};
pub use prompt::{Answer, Prompter, ScriptedPrompter, TextPrompter};
pub use runner::{CommandRunner, CommandSpec, MountGuard, RecordingRunner, SystemRunner, Target};
pub use sequencer::{Environment, FailurePolicy, SequenceState, Sequencer, Step, StepStatus};
pub use settings::Settings;
pub use types::{AurHelper, BootMode, Desktop, GamingComponent, GpuVendor, RunMode};

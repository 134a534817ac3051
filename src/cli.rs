use clap::Parser;

use crate::console;
use crate::settings::{Settings, UiPreference};
use crate::types::RunMode;

/// archgamer - set up Arch Linux as a desktop and gaming machine
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "archgamer")]
#[command(about = "Installs Arch Linux or turns an existing install into a gaming desktop")]
#[command(version)]
pub struct Cli {
    /// Force the run mode instead of detecting it (postinstall or fullinstall)
    #[arg(long, value_name = "MODE")]
    pub mode: Option<RunMode>,

    /// Use plain text prompts even when the terminal can show dialogs
    #[arg(long)]
    pub text: bool,

    /// Dry-run mode: print every command that would change the system.
    ///
    /// Read-only queries (lsblk, pacman -Qq, systemctl is-enabled) still run
    /// so the prompts and the validation report stay realistic.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the validation report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Flags `Cli` understands. Anything else is reported and dropped.
const KNOWN_FLAGS: &[&str] = &[
    "--mode",
    "--text",
    "--dry-run",
    "--json",
    "-h",
    "--help",
    "-V",
    "--version",
];

/// Split argv into what clap should parse and what gets ignored.
///
/// The program name is always kept. `--mode` keeps its value whether it is
/// written `--mode X` or `--mode=X`.
pub fn split_known_args<I>(args: I) -> (Vec<String>, Vec<String>)
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut known: Vec<String> = args.next().into_iter().collect();
    let mut ignored = Vec::new();

    while let Some(arg) = args.next() {
        let (flag, inline_value) = match arg.split_once('=') {
            Some((flag, _)) => (flag.to_string(), true),
            None => (arg.clone(), false),
        };
        if !KNOWN_FLAGS.contains(&flag.as_str()) {
            ignored.push(arg);
            continue;
        }
        known.push(arg);
        if flag == "--mode" && !inline_value {
            if let Some(value) = args.next() {
                known.push(value);
            }
        }
    }
    (known, ignored)
}

impl Cli {
    /// Parse `args`, warning about and skipping unknown arguments.
    pub fn parse_lenient<I>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = String>,
    {
        let (known, ignored) = split_known_args(args);
        for arg in &ignored {
            console::warn(&format!("Ignoring unknown argument '{}'", arg));
        }
        Self::try_parse_from(known)
    }

    /// Fold command-line flags into the environment settings.
    pub fn apply(&self, settings: &mut Settings) {
        settings.dry_run |= self.dry_run;
        settings.json |= self.json;
        if self.text {
            settings.ui = UiPreference::Text;
        }
    }
}

//! archgamer - main entry point

use anyhow::Context;
use log::{debug, info};

use archgamer::cli::Cli;
use archgamer::sequencer::{Environment, Sequencer, StepStatus};
use archgamer::settings::{self, Settings};
use archgamer::{console, process_guard, prompt, steps};
use archgamer::{CommandRunner, DetectedFacts, InstallConfig, SetupError, SystemRunner};

/// Initialize the logger with appropriate settings
fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env() // Allows RUST_LOG env var to override
        .init();
}

fn main() {
    init_logger();
    info!("archgamer {} starting up", env!("CARGO_PKG_VERSION"));

    // Children and mounts are cleaned up on SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        log::warn!("Failed to initialize signal handlers: {}", e);
    }

    let cli = match Cli::parse_lenient(std::env::args()) {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    debug!("CLI arguments parsed: {:?}", cli);

    let code = match run(&cli) {
        Ok(()) => 0,
        Err(e) => match e.downcast_ref::<SetupError>() {
            // Already reported by the sequencer
            Some(setup) => setup.exit_code(),
            None => {
                console::error(&format!("{:#}", e));
                1
            }
        },
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut settings = Settings::from_env();
    cli.apply(&mut settings);

    let is_root = nix::unistd::geteuid().is_root();
    let mode = settings::resolve_run_mode(
        cli.mode,
        is_root || settings.skip_root_check,
        settings.mode_heuristic,
    );
    let runner = SystemRunner::new(is_root, settings.elevate.clone(), settings.dry_run);
    console::info(&format!("archgamer {}: {}", env!("CARGO_PKG_VERSION"), mode));
    if settings.dry_run {
        console::info("Dry run: commands that change the system are printed, not executed");
    }

    let facts = DetectedFacts::detect(&runner);
    console::info(&format!("Detected {}", facts));
    let mut config = InstallConfig::new(mode, facts.firmware);
    let mut prompter = prompt::select_prompter(settings.ui, cli.text);

    let env = Environment {
        facts: &facts,
        runner: &runner as &dyn CommandRunner,
        settings: &settings,
    };
    let mut sequencer = Sequencer::new(steps::sequence_for(mode, &settings));
    let records = sequencer.run(&mut config, prompter.as_mut(), &env)?;

    if !settings.json {
        println!("\nSummary:");
        for record in records {
            let detail = match &record.status {
                StepStatus::Done => "done".to_string(),
                StepStatus::Note(note) => note.clone(),
                StepStatus::Skipped(reason) => format!("skipped ({})", reason),
                StepStatus::Warned(reason) => format!("warning: {}", reason),
                StepStatus::Failed(reason) => format!("failed: {}", reason),
            };
            println!("  {:<24} {}", record.name, detail);
        }
    }
    let config_json = serde_json::to_string(&config).context("serializing the final configuration")?;
    debug!("Final configuration: {}", config_json);
    Ok(())
}

//! `sightline` – command line entry point for the visual assistant.
//!
//! - `sightline run` wires the camera, detector, Piper and `aplay` into the
//!   orchestrator and narrates until Ctrl-C.
//! - `sightline observe` tails new detections and spoken messages from the
//!   audit database, typically from a second terminal.
//! - `sightline config show|init` prints or writes the configuration.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use sightline_hal::{AplaySink, PiperSynthesizer, StreamCamera};
use sightline_memory::{AuditObserver, AuditStore, ObservedBatch};
use sightline_perception::CommandDetector;
use sightline_runtime::telemetry::{TelemetryConfig, init_tracing};
use sightline_runtime::{NarrationManager, Orchestrator};
use sightline_types::SightError;

use crate::config::Config;

/// Sightline visual assistant
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the config file (default: ~/.sightline/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the capture → detect → narrate loop until Ctrl-C
    Run,

    /// Print new detections and spoken messages as they are recorded
    Observe {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Maximum rows fetched per table per poll
        #[arg(long, default_value_t = 20)]
        page_size: usize,

        /// Emit one JSON object per row instead of text
        #[arg(long)]
        json: bool,

        /// Replay rows already in the database before tailing
        #[arg(long)]
        from_start: bool,
    },

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _telemetry = init_tracing(&TelemetryConfig::from_env("sightline"));
    let config_path = cli.config.clone().unwrap_or_else(config::config_path);

    let result = match cli.command {
        Command::Run => cmd_run(&config_path),
        Command::Observe {
            interval_ms,
            page_size,
            json,
            from_start,
        } => cmd_observe(&config_path, Duration::from_millis(interval_ms), page_size, json, from_start),
        Command::Config(ConfigCommand::Show) => cmd_config_show(&config_path),
        Command::Config(ConfigCommand::Init { force }) => cmd_config_init(&config_path, force),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_run(config_path: &Path) -> Result<(), SightError> {
    let cfg = config::load_from(config_path)?;
    print_banner();
    println!("  Database: {}", cfg.db_path.display().to_string().bold());
    println!("  Speaker:  {}", cfg.output_device.bold());
    println!();

    let shutdown = install_ctrlc_handler();

    let store = AuditStore::open(&cfg.db_path)?;
    let camera = StreamCamera::spawn("camera0", &cfg.camera_command, cfg.frame_width, cfg.frame_height)?;
    let detector = CommandDetector::spawn(&cfg.detector_command)?;
    let narrator = NarrationManager::new(
        Box::new(PiperSynthesizer::new(&cfg.piper_bin, &cfg.piper_model, &cfg.piper_config)),
        Box::new(AplaySink::new(cfg.output_device.clone(), cfg.alsa_device.clone())),
        cfg.language_code.clone(),
    );

    let mut orchestrator = Orchestrator::new(
        cfg.orchestrator_config(),
        Box::new(camera),
        Box::new(detector),
        narrator,
        store,
    )?;
    orchestrator.run(&shutdown)?;

    println!("{}", "  ✓ Session closed.".green());
    Ok(())
}

fn cmd_observe(
    config_path: &Path,
    interval: Duration,
    page_size: usize,
    json: bool,
    from_start: bool,
) -> Result<(), SightError> {
    let cfg = config::load_from(config_path)?;
    let store = AuditStore::open(&cfg.db_path)?;
    let mut observer = if from_start {
        AuditObserver::new(page_size)
    } else {
        AuditObserver::from_tail(&store, page_size)?
    };
    let shutdown = install_ctrlc_handler();

    info!(db = %cfg.db_path.display(), "observing audit database");
    while !shutdown.load(Ordering::SeqCst) {
        let batch = observer.poll(&store)?;
        print_batch(&batch, json);
        // A full page means more rows are waiting.
        if batch.detections.len() < page_size && batch.messages.len() < page_size {
            std::thread::sleep(interval);
        }
    }
    Ok(())
}

fn cmd_config_show(config_path: &Path) -> Result<(), SightError> {
    let cfg = config::load_from(config_path)?;
    let raw = toml::to_string_pretty(&cfg).map_err(|e| SightError::Config(e.to_string()))?;
    println!("# {}", config_path.display());
    print!("{raw}");
    Ok(())
}

fn cmd_config_init(config_path: &Path, force: bool) -> Result<(), SightError> {
    if config_path.exists() && !force {
        return Err(SightError::Config(format!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        )));
    }
    config::save_to(&Config::default(), config_path)?;
    println!(
        "  {} Config saved to {}",
        "✓".green().bold(),
        config_path.display().to_string().bold()
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn install_ctrlc_handler() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – finishing current cycle …".yellow().bold());
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process with SIGKILL");
    }
    shutdown
}

fn print_batch(batch: &ObservedBatch, json: bool) {
    for d in &batch.detections {
        if json {
            match serde_json::to_string(d) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "failed to encode detection"),
            }
        } else {
            println!(
                "{} id={} label={} conf={:.2}",
                "[DETECTION]".cyan(),
                d.id,
                d.label.bold(),
                d.confidence
            );
        }
    }
    for m in &batch.messages {
        if json {
            match serde_json::to_string(m) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "failed to encode message"),
            }
        } else {
            println!(
                "{} id={} lang={} text={}",
                "[SPOKEN]".green(),
                m.id,
                m.language_code,
                m.text
            );
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   _____ _       __    __  ___          "#.bold().cyan());
    println!("{}", r#"  / ___/(_)___ _/ /_  / /_/ (_)___  ___ "#.bold().cyan());
    println!("{}", r#"  \__ \/ / __ `/ __ \/ __/ / / __ \/ _ \"#.bold().cyan());
    println!("{}", r#" ___/ / / /_/ / / / / /_/ / / / / /  __/"#.bold().cyan());
    println!("{}", r#"/____/_/\__, /_/ /_/\__/_/_/_/ /_/\___/ "#.bold().cyan());
    println!("{}", r#"       /____/                           "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Sightline".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Visual assistant: see, name, speak");
    println!();
}

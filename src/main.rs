//! Breath Monitor CLI
//!
//! Runs the breath detector against a synthetic sensor and manages the
//! persisted calibration.

use breath_monitor::{
    calibration::{Calibration, CalibrationStore, FileCalibrationStore},
    config::Config,
    core::{BreathDetector, SharedState},
    protocol::{CalibrationProtocol, ConsoleCommand},
    transparency::create_shared_log_with_persistence,
    AlarmKind, AlarmPanel, BreathingPattern, Monitor, SyntheticBreathing, VERSION,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "breath-monitor")]
#[command(version = VERSION)]
#[command(about = "Breath detection and apnea alarm engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detector against a synthetic breathing sensor
    Run {
        /// Stop after this many seconds (runs until Ctrl+C otherwise)
        #[arg(long)]
        duration: Option<u64>,

        /// Period of the synthetic breaths
        #[arg(long, default_value = "3000")]
        breath_period_ms: u32,

        /// Stop breathing after this many breaths to exercise the apnea alarm
        #[arg(long)]
        stop_after: Option<u32>,

        /// Serve the calibration protocol over HTTP on this port
        #[cfg(feature = "server")]
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show or adjust the persisted calibration
    Calibration {
        #[command(subcommand)]
        action: CalibrationAction,
    },

    /// Show persisted breath statistics
    Status,

    /// Show configuration
    Config,
}

#[derive(Subcommand)]
enum CalibrationAction {
    /// Print the calibration table
    Show,

    /// Set the breath trigger level
    SetTrigger {
        /// Level in millipascals
        #[arg(allow_hyphen_values = true)]
        millipascals: i32,
    },

    /// Set the exhalation detection level
    SetExhalation {
        /// Level in millipascals
        #[arg(allow_hyphen_values = true)]
        millipascals: i32,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            duration,
            breath_period_ms,
            stop_after,
            #[cfg(feature = "server")]
            port,
        } => {
            let pattern = BreathingPattern {
                period_ms: breath_period_ms,
                stop_after,
                ..BreathingPattern::default()
            };
            #[cfg(feature = "server")]
            cmd_run(pattern, duration.map(Duration::from_secs), port);
            #[cfg(not(feature = "server"))]
            cmd_run(pattern, duration.map(Duration::from_secs));
        }
        Commands::Calibration { action } => {
            cmd_calibration(action);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn cmd_run(
    pattern: BreathingPattern,
    duration: Option<Duration>,
    #[cfg(feature = "server")] port: Option<u16>,
) {
    println!("Breath Monitor v{VERSION}");
    println!();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config from {:?}: {e}", Config::config_path());
            std::process::exit(1);
        }
    };
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let store = open_calibration(&config);
    if store.get_calibration() == Calibration::default() {
        // Uncalibrated: zero against the synthetic baseline
        let seeded = Calibration {
            zero_offset: i32::from(pattern.baseline),
            trigger_level: -i32::from(pattern.dip_depth / 4),
            exhalation_detect_level: i32::from(pattern.dip_depth / 8),
        };
        tracing::info!(?seeded, "No calibration found, using synthetic baseline");
        store.set_calibration(seeded);
    }

    let shared = Arc::new(SharedState::new(store));
    let alarms = Arc::new(AlarmPanel::new());
    let breath_log = create_shared_log_with_persistence(config.stats_path());

    println!("Starting detector...");
    println!("  Sample rate: {} Hz", config.sampling.sample_rate_hz);
    println!(
        "  Tick interval: {} ms",
        config.sampling.tick_interval.as_millis()
    );
    println!("  Synthetic breath period: {} ms", pattern.period_ms);
    if let Some(n) = pattern.stop_after {
        println!("  Breathing stops after {n} breaths");
    }
    println!(
        "  Apnea detection period: {} ms",
        config.timing.apnea_detection_period_ms
    );

    let detector = BreathDetector::new(
        &config,
        shared.clone(),
        alarms.clone(),
        breath_log.clone(),
    );
    let source = SyntheticBreathing::paced(pattern, config.sampling.sample_period_ms());
    let mut monitor = Monitor::new(detector, source, config.sampling.tick_interval);
    let events = monitor.breath_events(64);

    #[cfg(feature = "server")]
    let server = port.and_then(|port| start_server(port, &shared, &config));

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    if let Err(e) = monitor.enable() {
        eprintln!("Error starting detector: {e}");
        std::process::exit(1);
    }

    let started = Instant::now();
    let mut apnea_shown = false;

    while running.load(Ordering::SeqCst) {
        if duration.is_some_and(|d| started.elapsed() >= d) {
            break;
        }

        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                println!(
                    "[{}] Breath: {} ms (reported {} ms){}",
                    Local::now().format("%H:%M:%S%.3f"),
                    event.clamped_period_ms,
                    event.observed_period_ms,
                    if event.simulated { " [simulated]" } else { "" }
                );
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                eprintln!("Detector disconnected unexpectedly");
                break;
            }
        }

        let apnea = alarms.is_active(AlarmKind::Apnea);
        if apnea != apnea_shown {
            apnea_shown = apnea;
            println!(
                "[{}] APNEA ALARM {}",
                Local::now().format("%H:%M:%S%.3f"),
                if apnea { "ACTIVE" } else { "CLEARED" }
            );
        }
    }

    println!();
    println!("Stopping detector...");
    monitor.disable();

    #[cfg(feature = "server")]
    if let Some((_runtime, shutdown_tx)) = server {
        let _ = shutdown_tx.send(());
    }

    if let Err(e) = breath_log.save() {
        eprintln!("Warning: Could not save breath statistics: {e}");
    }

    let status = alarms.status();
    println!();
    println!("{}", breath_log.summary());
    println!(
        "Apnea alarms: {} raised, {} cleared",
        status.apnea_activations, status.apnea_clears
    );
}

fn cmd_calibration(action: CalibrationAction) {
    let config = Config::load().unwrap_or_default();
    let shared = Arc::new(SharedState::new(open_calibration(&config)));
    let protocol = CalibrationProtocol::new(shared, config.pressure);

    let command = match action {
        CalibrationAction::Show => ConsoleCommand::ShowCal,
        CalibrationAction::SetTrigger { millipascals } => ConsoleCommand::SetTrigger { millipascals },
        CalibrationAction::SetExhalation { millipascals } => {
            ConsoleCommand::SetExhalation { millipascals }
        }
    };

    print!("{}", protocol.console(command));
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Breath Monitor Status");
    println!("=====================");
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        match std::fs::read_to_string(&stats_path)
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        {
            Some(stats) => {
                println!("Cumulative Statistics:");
                if let Some(breaths) = stats.get("breaths_reported") {
                    println!("  Breaths reported: {breaths}");
                }
                if let Some(samples) = stats.get("samples_processed") {
                    println!("  Samples processed: {samples}");
                }
                if let Some(updated) = stats.get("last_updated") {
                    println!("  Last updated: {updated}");
                }
            }
            None => eprintln!("Could not read statistics from {stats_path:?}"),
        }
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!("Calibration file: {:?}", config.calibration_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn open_calibration(config: &Config) -> Arc<FileCalibrationStore> {
    match FileCalibrationStore::open(config.calibration_path()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Error loading calibration: {e}");
            std::process::exit(1);
        }
    }
}

/// Start the calibration server on its own runtime.
#[cfg(feature = "server")]
fn start_server(
    port: u16,
    shared: &Arc<SharedState>,
    config: &Config,
) -> Option<(tokio::runtime::Runtime, tokio::sync::oneshot::Sender<()>)> {
    use breath_monitor::server::{run, ServerConfig};

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Warning: Could not start server runtime: {e}");
            return None;
        }
    };

    let protocol = CalibrationProtocol::new(shared.clone(), config.pressure);
    match runtime.block_on(run(ServerConfig::new(port), protocol)) {
        Ok((addr, shutdown_tx)) => {
            println!("  Calibration server: http://{addr}");
            Some((runtime, shutdown_tx))
        }
        Err(e) => {
            eprintln!("Warning: Could not start calibration server: {e}");
            None
        }
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}

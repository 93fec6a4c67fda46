//! `workcell` – command line entry point for the work-cell monitor.
//!
//! ```text
//! workcell [run]                       connect to rosbridge and monitor the cell
//! workcell replay <file> [--pace-ms N] feed a recorded NDJSON session through the monitor
//! workcell init                        write the default config file
//! ```
//!
//! Ctrl-C flips the shared shutdown signal; every task drains and the final
//! competition summary is printed.

mod config;
mod replay;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::sync::watch;
use tracing::{info, warn};

use config::Config;
use workcell_middleware::rosbridge::joint_trajectory_frame;
use workcell_middleware::{
    BusCommandPublisher, CompetitionStarter, EventBus, FeedAdapter, RosbridgeLink, Topic,
    feed_subscriptions,
};
use workcell_perception::{FrameBuffer, SharedFrameBuffer};
use workcell_runtime::monitor::report_start_outcome;
use workcell_runtime::{CellMonitor, MonitorState, init_tracing};
use workcell_types::{ArmId, EventPayload, WorkcellError};

const DEFAULT_REPLAY_PACE: Duration = Duration::from_millis(10);

enum Command {
    Run,
    Replay { path: PathBuf, pace: Duration },
    Init,
    Help,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    match args.first().map(String::as_str) {
        None | Some("run") => Ok(Command::Run),
        Some("init") => Ok(Command::Init),
        Some("help" | "-h" | "--help") => Ok(Command::Help),
        Some("replay") => {
            let path = args
                .get(1)
                .ok_or_else(|| "replay needs a recording path".to_string())?;
            let pace = match args.get(2).map(String::as_str) {
                None => DEFAULT_REPLAY_PACE,
                Some("--pace-ms") => {
                    let ms = args
                        .get(3)
                        .and_then(|v| v.parse::<u64>().ok())
                        .ok_or_else(|| "--pace-ms needs a number of milliseconds".to_string())?;
                    Duration::from_millis(ms)
                }
                Some(other) => return Err(format!("unexpected argument '{other}'")),
            };
            Ok(Command::Replay {
                path: PathBuf::from(path),
                pace,
            })
        }
        Some(other) => Err(format!("unknown command '{other}'")),
    }
}

fn main() -> ExitCode {
    let _telemetry = init_tracing("workcell");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Help => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Command::Init => return init_config(),
        Command::Run | Command::Replay { .. } => {}
    }

    print_banner();

    let cfg = match config::load() {
        Ok(cfg) => {
            println!(
                "  Config: {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Shutdown signal ───────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let ctrlc_tx = Arc::clone(&shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        ctrlc_tx.send_replace(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: failed to start runtime: {e}", "error".red().bold());
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(run(command, cfg, shutdown_tx, shutdown_rx));
    match outcome {
        Ok(state) => {
            print_summary(&state);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(
    command: Command,
    cfg: Config,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<Arc<MonitorState>, WorkcellError> {
    let frames = SharedFrameBuffer::new(FrameBuffer::new(cfg.frame_cache_duration()));
    for (parent, child, transform) in cfg.static_transforms()? {
        frames.set_static_transform(&parent, &child, transform);
    }

    let bus = EventBus::default();
    let publisher = Arc::new(BusCommandPublisher::new(bus.clone()));
    let monitor_config = cfg.monitor_config();
    let poll = monitor_config.retry.backoff.max(Duration::from_millis(10));
    let monitor = CellMonitor::start(
        bus.clone(),
        frames.clone(),
        publisher,
        monitor_config,
        shutdown_rx.clone(),
    );
    let state = monitor.state();
    let adapter = FeedAdapter::new(bus.clone(), frames);

    let result = match command {
        Command::Replay { path, pace } => {
            println!("  Replaying {}", path.display().to_string().bold());
            let logger = tokio::spawn(log_arm_commands(bus.clone(), shutdown_rx.clone()));
            let replayed = replay::replay_file(&path, &adapter, pace, &shutdown_rx).await;
            if replayed.is_ok() {
                // Give the dispatchers a moment to hand the last batches over.
                tokio::time::sleep(poll).await;
            }
            let abandoned = monitor.wait_idle(poll, shutdown_rx.clone()).await;
            if abandoned > 0 {
                warn!(abandoned, "shutting down with detection batches still pending");
            }
            shutdown_tx.send_replace(true);
            if let Err(e) = logger.await {
                warn!(error = %e, "command logger failed");
            }
            replayed.map(|_| ())
        }
        _ => {
            println!("  Connecting to {}", cfg.rosbridge_url.bold());
            let link = RosbridgeLink::new(
                cfg.rosbridge_url.clone(),
                adapter,
                bus.clone(),
                feed_subscriptions(&cfg.camera_topics()),
            );
            if cfg.auto_start {
                let client = link.client();
                tokio::spawn(async move {
                    report_start_outcome(client.start_competition().await);
                });
            }
            let linked = link.run(shutdown_rx.clone()).await;
            shutdown_tx.send_replace(true);
            linked
        }
    };

    monitor.join().await;
    info!("monitor stopped");
    result.map(|()| state)
}

/// Stand-in for the arm controllers during replay: logs every command as
/// the rosbridge frame that would have been sent.
async fn log_arm_commands(bus: EventBus, mut shutdown: watch::Receiver<bool>) {
    let mut commands = bus.subscribe_to(Topic::ArmCommands);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = commands.recv() => match event {
                Ok(event) => {
                    if let EventPayload::ArmCommand(command) = event.payload {
                        info!(frame = %joint_trajectory_frame(&command), "arm command");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "command logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

fn init_config() -> ExitCode {
    let path = config::config_path();
    if path.exists() {
        println!(
            "  Config already exists at {}",
            path.display().to_string().bold()
        );
        return ExitCode::SUCCESS;
    }
    match config::save(&Config::default()) {
        Ok(path) => {
            println!(
                "{}",
                format!("  ✓ Default config written to {}", path.display()).green()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", "  ╔══════════════════════════════════╗".cyan());
    println!("{}", "  ║        WORKCELL  MONITOR         ║".cyan().bold());
    println!("{}", "  ╚══════════════════════════════════╝".cyan());
    println!();
}

fn print_usage() {
    println!("Usage:");
    println!("  workcell [run]                        monitor a live cell over rosbridge");
    println!("  workcell replay <file> [--pace-ms N]  replay a recorded NDJSON session");
    println!("  workcell init                         write the default config file");
}

fn print_summary(state: &MonitorState) {
    println!();
    println!("{}", "  Session summary".bold());
    println!(
        "    Competition state: {}",
        state
            .competition_state()
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!("    Score:             {}", state.score());
    println!("    Ended:             {}", state.competition_ended());
    for arm in ArmId::ALL {
        println!("    {arm}:              {:?}", state.arm_state(arm));
    }
    let orders = state.orders();
    println!("    Orders received:   {}", orders.len());
    for order in &orders {
        println!(
            "      • {}",
            order.order_id.as_deref().unwrap_or("(unnamed)")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_means_run() {
        assert!(matches!(parse_args(&[]), Ok(Command::Run)));
    }

    #[test]
    fn replay_defaults_its_pace() {
        match parse_args(&args(&["replay", "session.ndjson"])) {
            Ok(Command::Replay { path, pace }) => {
                assert_eq!(path, PathBuf::from("session.ndjson"));
                assert_eq!(pace, DEFAULT_REPLAY_PACE);
            }
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn replay_accepts_explicit_pace() {
        match parse_args(&args(&["replay", "s.ndjson", "--pace-ms", "0"])) {
            Ok(Command::Replay { pace, .. }) => assert_eq!(pace, Duration::ZERO),
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(parse_args(&args(&["replay"])).is_err());
        assert!(parse_args(&args(&["replay", "s", "--pace-ms", "soon"])).is_err());
        assert!(parse_args(&args(&["fly"])).is_err());
    }
}

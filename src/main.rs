//! Stock scanner: binary entrypoint.
//! Loads the monitor config, starts the polling scheduler and prints one
//! line per completed poll. Type `n` + Enter to poll now, `c` + Enter to
//! clear error markers, `q` + Enter (or Ctrl-C) to quit.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stockscan::metrics::Metrics;
use stockscan::notify::{AlertObserver, ConsoleObserver, LogAlertSink};
use stockscan::{load_config_default, Scheduler};

/// Logs go to stderr so they do not interleave with the status lines.
/// `STOCKSCAN_LOG_JSON=1` switches to JSON output.
fn init_tracing() {
    let json = std::env::var("STOCKSCAN_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stockscan=info,scan=info,alert=info,warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

enum Command {
    PollNow,
    ClearErrors,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "n" | "now" => Some(Command::PollNow),
        "c" | "clear" => Some(Command::ClearErrors),
        "q" | "quit" => Some(Command::Quit),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let once = std::env::args().skip(1).any(|a| a == "--once");

    let cfg = load_config_default().context("loading monitor config")?;
    Metrics::serve_from_env()?;

    let sources = cfg.build_sources()?;
    let source_count = sources.len();
    let scheduler = Scheduler::new(sources, cfg.scheduler_cfg());
    scheduler.register_observer(Arc::new(ConsoleObserver::stdout()));
    scheduler.register_observer(Arc::new(AlertObserver::new(
        source_count,
        cfg.alert_max_failures,
        LogAlertSink,
    )));

    tracing::info!(
        target: "stockscan",
        sources = source_count,
        interval_secs = cfg.interval_secs,
        once,
        "starting"
    );

    if once {
        let res = scheduler.run_once().await;
        scheduler.stop().await;
        return res;
    }

    scheduler.start()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_command(&line) {
                    Some(Command::PollNow) => scheduler.poll_now(),
                    Some(Command::ClearErrors) => {
                        let cleared = scheduler.clear_errors();
                        tracing::info!(target: "stockscan", cleared, "error markers cleared");
                    }
                    Some(Command::Quit) => break,
                    None => {}
                },
                // Stdin closed (e.g. running detached): keep polling until Ctrl-C.
                Ok(None) => {
                    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
                    break;
                }
                Err(e) => {
                    tracing::warn!(target: "stockscan", error = %e, "stdin read failed");
                    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
                    break;
                }
            },
        }
    }

    tracing::info!(target: "stockscan", "stopping");
    scheduler.stop().await;
    Ok(())
}

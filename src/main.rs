//! LOTTO: recurring pot-based Lightning raffle.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the gateway and round engine, then runs the round timer and
//! HTTP server until Ctrl+C.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use lotto::config::AppConfig;
use lotto::engine::Lottery;
use lotto::gateway::simulated::SimulatedGateway;
use lotto::gateway::PaymentGateway;
use lotto::server;

const CONFIG_PATH: &str = "config.toml";

const BANNER: &str = r#"
 _     ___ _____ _____ ___
| |   / _ \_   _|_   _/ _ \
| |  | | | || |   | || | | |
| |__| |_| || |   | || |_| |
|_____\___/ |_|   |_| \___/

  Pot-based Lightning raffle
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = if Path::new(CONFIG_PATH).exists() {
        AppConfig::load(CONFIG_PATH)?
    } else {
        AppConfig::default()
    };

    init_logging();

    println!("{BANNER}");
    info!(
        name = %cfg.lottery.name,
        round_secs = cfg.lottery.round_duration_secs,
        payout_ratio = %cfg.lottery.payout_ratio,
        gateway = %cfg.gateway.kind,
        "LOTTO starting up"
    );
    if !Path::new(CONFIG_PATH).exists() {
        warn!(path = CONFIG_PATH, "No config file found, using defaults");
    }

    // -- Initialise components -------------------------------------------

    let gateway = Arc::new(SimulatedGateway::from_config(&cfg.gateway));
    info!(
        gateway = gateway.name(),
        auto_settle_ms = cfg.gateway.auto_settle_ms,
        fail_payments = cfg.gateway.fail_payments,
        "Payment gateway ready"
    );
    let lottery = Arc::new(Lottery::new(&cfg, gateway));

    let timer = lottery.spawn_timer();

    let server = if cfg.server.enabled {
        let state = Arc::clone(&lottery);
        let port = cfg.server.port;
        let shutdown = lottery.shutdown_signal();
        Some(tokio::spawn(async move {
            if let Err(e) = server::serve(state, port, shutdown).await {
                error!(error = %e, "Server stopped");
            }
        }))
    } else {
        None
    };

    info!(
        round_secs = cfg.lottery.round_duration_secs,
        "Rounds running. Press Ctrl+C to stop."
    );

    // -- Wait for shutdown -----------------------------------------------

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C, shutting down");
    }
    info!("Shutdown signal received.");
    lottery.shutdown();

    let ticks = match timer.await {
        Ok(ticks) => ticks,
        Err(e) => {
            error!(error = %e, "Round timer task failed");
            0
        }
    };
    if let Some(server) = server {
        if let Err(e) = server.await {
            error!(error = %e, "Server task failed");
        }
    }

    let snapshot = lottery.snapshot().await;
    info!(
        settlements = ticks,
        round = snapshot.round_index,
        open_pot = snapshot.pot,
        winners = snapshot.winners.len(),
        "LOTTO shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lotto=info"));

    let json_logging = std::env::var("LOTTO_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

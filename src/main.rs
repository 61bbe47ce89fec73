use sniper::config::Config;
use sniper::engine::metrics::ScanMetrics;
use sniper::engine::scanner::Scanner;
use sniper::execution::clob_client::{ClobClient, DryRunOrderApi, OrderApi};
use sniper::feeds::odds_feed::OddsFeed;
use sniper::feeds::price_feed::PriceFeed;
use sniper::risk::balance::BalanceManager;
use sniper::settlement::reconciler::Reconciler;
use sniper::settlement::redeemer::{spawn_redeem_worker, CommandRedeemer, NullRedeemer, Redeemer};
use sniper::signals::ev::EvCalculator;
use sniper::storage::trade_store::{MemoryTradeStore, TradeStore};
use sniper::telemetry::stats::StatsReporter;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("================================================");
    info!("  SNIPER — Polymarket 5m BTC up/down engine");
    info!("================================================");

    let config = Config::load_or_default();
    if let Err(e) = config.validate() {
        error!("Config validation failed: {e}");
        anyhow::bail!("invalid configuration");
    }

    let dry_run = config.is_dry_run();
    if dry_run {
        warn!("DRY RUN MODE — orders are simulated, no live I/O");
    }

    // Shutdown fan-out for every background task.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // === Data feeds ===
    let price_feed = Arc::new(PriceFeed::new(config.oracle.ws_url.clone()));
    price_feed.start(&shutdown_tx);
    info!("Oracle price feed started");

    let odds_feed = Arc::new(OddsFeed::new(
        config.polymarket.gamma_api_host.clone(),
        config.polymarket.clob_host.clone(),
        config.sniper.odds_prefetch_interval_ms,
        config.sniper.http_timeout_ms,
    ));
    odds_feed.start(&shutdown_tx);
    info!(
        "Odds prefetcher started ({}ms cadence)",
        config.sniper.odds_prefetch_interval_ms
    );

    // === Execution ===
    let orders: Arc<dyn OrderApi> = if dry_run {
        Arc::new(DryRunOrderApi)
    } else {
        let clob = Arc::new(ClobClient::new(
            &config.polymarket,
            config.sniper.http_timeout_ms,
        )?);
        info!("CLOB client ready for {}", clob.address());
        // Open the TLS connection before the first order needs it.
        let warm = clob.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            warm.warm_up().await;
        });
        clob
    };

    // === Balance ===
    let balance = Arc::new(BalanceManager::new(
        dry_run,
        config.sniper.initial_balance,
        orders.clone(),
    ));
    balance.init_live().await?;
    balance.spawn_sync_task(&shutdown_tx);
    info!("Starting balance: ${:.2}", balance.balance());

    // === Storage & telemetry ===
    let store: Arc<dyn TradeStore> = MemoryTradeStore::shared();
    let metrics = Arc::new(ScanMetrics::new());

    let stats = Arc::new(StatsReporter::new(
        store.clone(),
        balance.clone(),
        config.telemetry.stats_interval_secs,
    ));
    stats.clone().start(&shutdown_tx);

    // === Settlement ===
    let redeemer: Arc<dyn Redeemer> = match (&config.sniper.redeem_command, dry_run) {
        (Some(command), false) => Arc::new(CommandRedeemer::new(command.clone())),
        (None, false) => {
            warn!("No SNIPER_REDEEM_COMMAND set — wins rely on external redemption");
            Arc::new(NullRedeemer)
        }
        _ => Arc::new(NullRedeemer),
    };
    let redeem_tx = spawn_redeem_worker(redeemer, &shutdown_tx);

    let reconciler = Arc::new(Reconciler::new(
        config.polymarket.gamma_api_host.clone(),
        config.oracle.klines_host.clone(),
        dry_run,
        store.clone(),
        balance.clone(),
        price_feed.clone(),
        redeem_tx,
    ));
    reconciler.start(&shutdown_tx);
    info!("Reconciler started (5s cadence)");

    // === Scanner ===
    let ev_calc = EvCalculator::new(
        config.sniper.min_bet,
        config.sniper.max_bet,
        balance.initial_balance(),
    );
    let enabled = Arc::new(AtomicBool::new(true));

    let scanner = Scanner::new(
        config.sniper.scan_interval_ms,
        ev_calc,
        enabled.clone(),
        price_feed.clone(),
        odds_feed.clone(),
        balance.clone(),
        orders.clone(),
        store.clone(),
        metrics.clone(),
    );
    tokio::spawn(scanner.run(shutdown_tx.subscribe()));

    info!("=== SNIPER running — Ctrl+C to stop ===");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    // Give tasks a beat to observe shutdown, then print the final summary.
    tokio::time::sleep(tokio::time::Duration::from_millis(300)).await;
    stats.log_summary().await;
    info!(
        "Final scan metrics: {} scans, last filter '{}'",
        metrics.snapshot().total_scans,
        metrics.snapshot().last_filter
    );
    info!("SNIPER shutdown complete");
    Ok(())
}

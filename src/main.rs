use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pair_screener::api::health::HealthState;
use pair_screener::api::routes::{router, ApiState};
use pair_screener::config::Config;
use pair_screener::error::Result;
use pair_screener::fetcher::{DexScreenerSource, DexToolsSource, GeckoTerminalSource, PairSource};
use pair_screener::pipeline::{Admitted, ScreeningPipeline};
use pair_screener::scheduler::{BackoffSignal, Scheduler};
use pair_screener::types::SourceKind;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!(
        "Screening {} chains: {} (min_liq=${:.0}, momentum>={}, pair_cd={}m, token_cd={}m)",
        cfg.enabled_chains.len(),
        cfg.enabled_chains.join(", "),
        cfg.filter.min_liquidity,
        cfg.filter.momentum_score_threshold,
        cfg.dedup.pair_cooldown_minutes,
        cfg.dedup.token_cooldown_minutes,
    );

    // --- Core components ---
    let scheduler = Scheduler::new(&cfg.scheduler);
    let (output_tx, output_rx) = mpsc::channel(cfg.output_queue_capacity);
    let pipeline = ScreeningPipeline::new(&cfg, Arc::clone(&scheduler), output_tx);

    // --- Sources ---
    let sources = build_sources(&cfg, &scheduler)?;
    info!(
        "Sources enabled: {}",
        sources
            .iter()
            .map(|s| s.kind().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let cancel = CancellationToken::new();

    // --- Spawn tasks ---

    // Output consumer: verification hand-off point
    let consumer_health = Arc::clone(pipeline.health());
    let consumer = tokio::spawn(async move {
        output_consumer(output_rx, consumer_health).await;
    });

    // Source loops + cleanup
    let runner = tokio::spawn(Arc::clone(&pipeline).run(sources.clone(), cancel.clone()));

    // Ctrl-C → cancel everything
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("ctrl_c listener failed: {e}");
            return;
        }
        info!("Shutdown requested");
        shutdown.cancel();
    });

    // HTTP API server
    let app = router(ApiState {
        pipeline: Arc::clone(&pipeline),
        sources,
    });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    let server_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_cancel.cancelled().await })
        .await?;

    if let Err(e) = runner.await {
        error!("pipeline task failed: {e}");
    }
    drop(pipeline);
    if tokio::time::timeout(Duration::from_secs(5), consumer).await.is_err() {
        warn!("Output consumer did not drain within 5s");
    }

    let s = scheduler.stats();
    for src in &s {
        info!(
            "[SCHEDULER] {}: scans={} found={} errors={}",
            src.source, src.scans_performed, src.pairs_found, src.errors
        );
    }
    Ok(())
}

fn build_sources(cfg: &Config, scheduler: &Arc<Scheduler>) -> Result<Vec<Arc<dyn PairSource>>> {
    let signal = |kind: SourceKind| Some(BackoffSignal::new(Arc::clone(scheduler), kind.as_str()));

    let mut sources: Vec<Arc<dyn PairSource>> = vec![
        Arc::new(DexScreenerSource::new(
            cfg.dexscreener_api_url.clone(),
            signal(SourceKind::DexScreener),
        )?),
        Arc::new(GeckoTerminalSource::new(
            cfg.geckoterminal_api_url.clone(),
            signal(SourceKind::GeckoTerminal),
        )?),
    ];

    match cfg.dextools_api_key.as_deref() {
        Some(key) => sources.push(Arc::new(DexToolsSource::new(
            cfg.dextools_api_url.clone(),
            key,
            signal(SourceKind::DexTools),
        )?)),
        None => warn!("DEXTOOLS_API_KEY not set, DEXTools rankings will not be polled."),
    }

    Ok(sources)
}

/// Takes admitted events off the bounded queue. Verification is out of process;
/// this logs the hand-off.
async fn output_consumer(mut rx: mpsc::Receiver<Admitted>, health: Arc<HealthState>) {
    while let Some((event, verdict)) = rx.recv().await {
        health.dec_queue_pending();
        info!(
            event = "PAIR_ADMITTED",
            source = %event.source,
            chain = %event.chain,
            pair = %event.pair_address,
            token = %event.token0,
            event_type = %event.event_type,
            tier = %verdict.tier,
            tier_score = verdict.tier_score,
            reason = %verdict.reason,
            "ADMITTED | {} {} on {} | tier: {} ({}) | liq: ${:.0} | vol24h: ${:.0}",
            event.token_symbol.as_deref().unwrap_or("?"),
            event.pair_address,
            event.chain,
            verdict.tier,
            verdict.tier_score,
            event.liquidity,
            event.volume_24h,
        );
    }
    info!("Output consumer stopped");
}

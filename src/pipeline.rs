//! Composition root: fetch → normalize → pair dedup → filter → token dedup → tier → queue.
//!
//! The pipeline owns exactly one of each component. Only HIGH-tier events that
//! request verification are cached and pushed onto the bounded output queue;
//! the push awaits, so a slow consumer throttles admission.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::config::{Config, SchedulerConfig};
use crate::error::{AppError, Result};
use crate::fetcher::PairSource;
use crate::filter::{Filter, FilterStatsSnapshot};
use crate::normalizer::{Normalizer, Rejection};
use crate::scheduler::{Scheduler, SourceStats};
use crate::state::{Cache, CacheStats, DedupStats, Deduplicator, MomentumSnapshot};
use crate::types::{
    now_ms, FilterReason, FilterVerdict, NormalizedPairEvent, RawPairRecord, SourceKind, Tier,
};

/// What the output queue carries.
pub type Admitted = (NormalizedPairEvent, FilterVerdict);

/// Where a single record ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Malformed(Rejection),
    DuplicatePair,
    Filtered(FilterReason),
    DuplicateToken,
    /// HIGH tier with verification requested: cached and queued.
    Queued,
    /// MID, or HIGH without a verification request.
    NotifyOnly(Tier),
    LowTier,
    /// Output receiver is gone.
    QueueClosed,
}

impl Outcome {
    /// Made it through filter and both dedup stages.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Outcome::Queued | Outcome::NotifyOnly(_) | Outcome::LowTier)
    }
}

#[derive(Default)]
struct PipelineCounters {
    raw_records: AtomicU64,
    malformed: AtomicU64,
    duplicate_pairs: AtomicU64,
    filtered: AtomicU64,
    duplicate_tokens: AtomicU64,
    queued: AtomicU64,
    notify_eligible: AtomicU64,
    low_tier: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub raw_records: u64,
    pub malformed: u64,
    pub duplicate_pairs: u64,
    pub filtered: u64,
    pub duplicate_tokens: u64,
    pub queued: u64,
    pub notify_eligible: u64,
    pub low_tier: u64,
    /// Share of raw records that never reached the output queue.
    pub noise_reduction_pct: f64,
    pub filter: FilterStatsSnapshot,
    pub dedup: DedupStats,
    pub cache: CacheStats,
    pub scheduler: Vec<SourceStats>,
}

pub struct ScreeningPipeline {
    normalizer: Normalizer,
    filter: Filter,
    dedup: Deduplicator,
    cache: Cache<NormalizedPairEvent>,
    scheduler: Arc<Scheduler>,
    scheduler_cfg: SchedulerConfig,
    chains: Vec<String>,
    output: mpsc::Sender<Admitted>,
    counters: PipelineCounters,
    health: Arc<HealthState>,
}

impl ScreeningPipeline {
    pub fn new(cfg: &Config, scheduler: Arc<Scheduler>, output: mpsc::Sender<Admitted>) -> Arc<Self> {
        Arc::new(Self {
            normalizer: Normalizer::new(cfg.normalizer.clone()),
            filter: Filter::new(cfg.filter.clone()),
            dedup: Deduplicator::new(&cfg.dedup),
            cache: Cache::new(&cfg.cache),
            scheduler,
            scheduler_cfg: cfg.scheduler.clone(),
            chains: cfg.enabled_chains.clone(),
            output,
            counters: PipelineCounters::default(),
            health: Arc::new(HealthState::new()),
        })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    // -----------------------------------------------------------------------
    // Per-record path
    // -----------------------------------------------------------------------

    pub async fn process_record(&self, raw: &RawPairRecord, source: SourceKind) -> Outcome {
        let event = match self.normalizer.normalize(raw, source) {
            Ok(e) => e,
            Err(rejection) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                debug!(%source, %rejection, "[PIPELINE] record dropped");
                return Outcome::Malformed(rejection);
            }
        };

        let momentum = MomentumSnapshot {
            volume_1h: event.volume_1h,
            price_change_1h: event.price_change_1h,
        };
        if self
            .dedup
            .is_duplicate_with_momentum(&event.pair_address, &event.chain, momentum)
        {
            self.counters.duplicate_pairs.fetch_add(1, Ordering::Relaxed);
            return Outcome::DuplicatePair;
        }

        let verdict = self.filter.apply_filters(&event);
        if !verdict.passed {
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            return Outcome::Filtered(verdict.reason);
        }

        if self.dedup.is_token_duplicate(&event.token0, &event.chain) {
            self.counters.duplicate_tokens.fetch_add(1, Ordering::Relaxed);
            debug!(
                token = %event.token0,
                chain = %event.chain,
                pair = %event.pair_address,
                "[PIPELINE] token seen within cooldown"
            );
            return Outcome::DuplicateToken;
        }

        match verdict.tier {
            Tier::Low => {
                self.counters.low_tier.fetch_add(1, Ordering::Relaxed);
                info!(
                    %source,
                    chain = %event.chain,
                    pair = %event.pair_address,
                    tier_score = verdict.tier_score,
                    "[PIPELINE] LOW tier, logged only"
                );
                Outcome::LowTier
            }
            tier => {
                self.counters.notify_eligible.fetch_add(1, Ordering::Relaxed);
                if tier == Tier::High && verdict.verify_requested {
                    self.enqueue(event, verdict).await
                } else {
                    info!(
                        %source,
                        chain = %event.chain,
                        pair = %event.pair_address,
                        symbol = event.token_symbol.as_deref().unwrap_or("?"),
                        %tier,
                        tier_score = verdict.tier_score,
                        "[PIPELINE] notify-eligible"
                    );
                    Outcome::NotifyOnly(tier)
                }
            }
        }
    }

    async fn enqueue(&self, event: NormalizedPairEvent, verdict: FilterVerdict) -> Outcome {
        info!(
            source = %event.source,
            chain = %event.chain,
            pair = %event.pair_address,
            symbol = event.token_symbol.as_deref().unwrap_or("?"),
            event_type = %event.event_type,
            tier_score = verdict.tier_score,
            momentum_score = verdict.momentum_score,
            "[PIPELINE] HIGH tier queued for verification"
        );
        let cached = event.clone();
        self.health.inc_queue_pending();
        if self.output.send((event, verdict)).await.is_err() {
            self.health.dec_queue_pending();
            warn!("[PIPELINE] output queue closed");
            return Outcome::QueueClosed;
        }
        // Only events that actually reached the queue are served from the cache.
        self.cache.set(cached.pair_address.clone(), cached);
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        self.health.set_last_queued_at_ms(now_ms());
        Outcome::Queued
    }

    // -----------------------------------------------------------------------
    // Scans and loops
    // -----------------------------------------------------------------------

    /// One poll of `source` across the enabled chains. Returns the number of admitted events.
    pub async fn scan(&self, source: &dyn PairSource) -> Result<usize> {
        let kind = source.kind();
        let records = source.fetch(&self.chains).await;
        self.counters
            .raw_records
            .fetch_add(records.len() as u64, Ordering::Relaxed);

        let mut admitted = 0usize;
        for raw in &records {
            match self.process_record(raw, kind).await {
                Outcome::QueueClosed => {
                    return Err(AppError::Scan(format!("{kind}: output queue closed")));
                }
                outcome if outcome.is_admitted() => admitted += 1,
                _ => {}
            }
        }
        debug!(source = %kind, raw = records.len(), admitted, "[PIPELINE] scan done");
        Ok(admitted)
    }

    /// Sweep cache and deduplicator. Returns `(cache_removed, dedup_removed)`.
    pub fn cleanup(&self) -> (usize, usize) {
        let cache_removed = self.cache.cleanup_expired();
        let dedup_removed = self.dedup.cleanup_expired();
        if cache_removed > 0 || dedup_removed > 0 {
            info!(cache_removed, dedup_removed, "[PIPELINE] cleanup");
        }
        (cache_removed, dedup_removed)
    }

    async fn cleanup_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.scheduler_cfg.cleanup_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.cleanup();
                }
            }
        }
    }

    /// Run one scheduler loop per source plus the cleanup loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, sources: Vec<Arc<dyn PairSource>>, cancel: CancellationToken) {
        let mut tasks: Vec<BoxFuture<'static, ()>> = Vec::with_capacity(sources.len() + 1);

        for source in sources {
            let pipeline = Arc::clone(&self);
            let cancel = cancel.clone();
            let kind = source.kind();
            let schedule = self.scheduler_cfg.schedule_for(kind);
            tasks.push(
                async move {
                    let scheduler = Arc::clone(&pipeline.scheduler);
                    scheduler
                        .schedule(kind.as_str(), schedule, cancel, || {
                            let pipeline = Arc::clone(&pipeline);
                            let source = Arc::clone(&source);
                            async move { pipeline.scan(source.as_ref()).await }
                        })
                        .await;
                }
                .boxed(),
            );
        }

        let pipeline = Arc::clone(&self);
        let cleanup_cancel = cancel.clone();
        tasks.push(async move { pipeline.cleanup_loop(cleanup_cancel).await }.boxed());

        info!(loops = tasks.len(), chains = ?self.chains, "[PIPELINE] started");
        self.health.set_pipeline_running(true);
        join_all(tasks).await;
        self.health.set_pipeline_running(false);
        info!("[PIPELINE] stopped");
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn cached(&self, pair_address: &str) -> Option<NormalizedPairEvent> {
        self.cache.get(pair_address)
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        let raw_records = c.raw_records.load(Ordering::Relaxed);
        let queued = c.queued.load(Ordering::Relaxed);
        PipelineStats {
            raw_records,
            malformed: c.malformed.load(Ordering::Relaxed),
            duplicate_pairs: c.duplicate_pairs.load(Ordering::Relaxed),
            filtered: c.filtered.load(Ordering::Relaxed),
            duplicate_tokens: c.duplicate_tokens.load(Ordering::Relaxed),
            queued,
            notify_eligible: c.notify_eligible.load(Ordering::Relaxed),
            low_tier: c.low_tier.load(Ordering::Relaxed),
            noise_reduction_pct: if raw_records == 0 {
                0.0
            } else {
                (1.0 - queued as f64 / raw_records as f64) * 100.0
            },
            filter: self.filter.stats(),
            dedup: self.dedup.stats(),
            cache: self.cache.stats(),
            scheduler: self.scheduler.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceSchedule;
    use crate::fetcher::FetchStats;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const NOW_MS: u64 = 1_700_000_000_000;

    struct PairFixture<'a> {
        pair: &'a str,
        token: &'a str,
        liquidity: f64,
        volume_24h: f64,
        tx_24h: u64,
        volume_1h: f64,
        tx_1h: u64,
        pc_1h: f64,
        pc_24h: f64,
    }

    fn dexscreener_raw(p: PairFixture<'_>) -> RawPairRecord {
        RawPairRecord::new(
            json!({
                "chainId": "base",
                "dexId": "aerodrome",
                "pairAddress": p.pair,
                "baseToken": {"address": p.token, "symbol": "TKN"},
                "quoteToken": {"address": "0xweth", "symbol": "WETH"},
                "priceChange": {"h1": p.pc_1h, "h24": p.pc_24h},
                "volume": {"h1": p.volume_1h, "h24": p.volume_24h},
                "liquidity": {"usd": p.liquidity},
                "txns": {
                    "h1": {"buys": p.tx_1h, "sells": 0},
                    "h24": {"buys": p.tx_24h, "sells": 0}
                }
            }),
            Some("base".to_string()),
            NOW_MS,
        )
    }

    fn high(pair: &str, token: &str) -> RawPairRecord {
        dexscreener_raw(PairFixture {
            pair,
            token,
            liquidity: 150_000.0,
            volume_24h: 250_000.0,
            tx_24h: 400,
            volume_1h: 10_000.0,
            tx_1h: 40,
            pc_1h: 12.0,
            pc_24h: 60.0,
        })
    }

    /// liquidity 85k, vol_1h 55, tx_1h 4, +8.5% 1h, +25.3% 24h → MID (51).
    fn mid(pair: &str, token: &str) -> RawPairRecord {
        dexscreener_raw(PairFixture {
            pair,
            token,
            liquidity: 85_000.0,
            volume_24h: 0.0,
            tx_24h: 0,
            volume_1h: 55.0,
            tx_1h: 4,
            pc_1h: 8.5,
            pc_24h: 25.3,
        })
    }

    fn low(pair: &str, token: &str) -> RawPairRecord {
        dexscreener_raw(PairFixture {
            pair,
            token,
            liquidity: 12_000.0,
            volume_24h: 300.0,
            tx_24h: 6,
            volume_1h: 60.0,
            tx_1h: 3,
            pc_1h: 1.0,
            pc_24h: 2.0,
        })
    }

    fn pipeline_with_capacity(cap: usize) -> (Arc<ScreeningPipeline>, mpsc::Receiver<Admitted>) {
        let cfg = Config::default();
        let (tx, rx) = mpsc::channel(cap);
        let scheduler = Scheduler::new(&cfg.scheduler);
        (ScreeningPipeline::new(&cfg, scheduler, tx), rx)
    }

    fn pipeline() -> (Arc<ScreeningPipeline>, mpsc::Receiver<Admitted>) {
        pipeline_with_capacity(16)
    }

    struct StaticSource {
        kind: SourceKind,
        records: Vec<RawPairRecord>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PairSource for StaticSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn fetch(&self, _chains: &[String]) -> Vec<RawPairRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.records.clone()
        }

        fn fetch_stats(&self) -> FetchStats {
            FetchStats::default()
        }
    }

    #[tokio::test]
    async fn high_tier_is_cached_and_queued() {
        let (p, mut rx) = pipeline();
        let outcome = p.process_record(&high("0xhigh", "0xt1"), SourceKind::DexScreener).await;
        assert_eq!(outcome, Outcome::Queued);

        let (event, verdict) = rx.try_recv().expect("queued event");
        assert_eq!(event.pair_address, "0xhigh");
        assert_eq!(verdict.tier, Tier::High);
        assert!(verdict.verify_requested);
        assert_eq!(p.cached("0xhigh").map(|e| e.token0), Some("0xt1".to_string()));
        assert_eq!(p.health().queue_pending(), 1);
        assert!(p.health().last_queued_at_ms().is_some());
    }

    #[tokio::test]
    async fn mid_tier_is_counted_but_not_queued() {
        let (p, mut rx) = pipeline();
        let outcome = p.process_record(&mid("0xmid", "0xt1"), SourceKind::DexScreener).await;
        assert_eq!(outcome, Outcome::NotifyOnly(Tier::Mid));
        assert!(rx.try_recv().is_err());
        assert!(p.cached("0xmid").is_none());
        assert_eq!(p.stats().notify_eligible, 1);
    }

    #[tokio::test]
    async fn low_tier_is_logged_only() {
        let (p, mut rx) = pipeline();
        let outcome = p.process_record(&low("0xlow", "0xt1"), SourceKind::DexScreener).await;
        assert_eq!(outcome, Outcome::LowTier);
        assert!(rx.try_recv().is_err());
        let s = p.stats();
        assert_eq!((s.low_tier, s.notify_eligible), (1, 0));
    }

    #[tokio::test]
    async fn malformed_and_filtered_records_are_dropped() {
        let (p, _rx) = pipeline();
        let bad = RawPairRecord::new(json!({"pairAddress": "0xp"}), None, NOW_MS);
        assert_eq!(
            p.process_record(&bad, SourceKind::DexScreener).await,
            Outcome::Malformed(Rejection::MissingTokenAddress)
        );

        let thin = dexscreener_raw(PairFixture {
            pair: "0xthin",
            token: "0xt2",
            liquidity: 5_000.0,
            volume_24h: 0.0,
            tx_24h: 0,
            volume_1h: 0.0,
            tx_1h: 0,
            pc_1h: 0.0,
            pc_24h: 0.0,
        });
        assert!(matches!(
            p.process_record(&thin, SourceKind::DexScreener).await,
            Outcome::Filtered(FilterReason::LowLiquidity { .. })
        ));
        let s = p.stats();
        assert_eq!((s.malformed, s.filtered), (1, 1));
    }

    #[tokio::test]
    async fn second_pair_for_same_token_is_a_token_duplicate() {
        let (p, mut rx) = pipeline();
        assert_eq!(p.process_record(&high("0xp1", "0xtok"), SourceKind::DexScreener).await, Outcome::Queued);
        assert_eq!(
            p.process_record(&high("0xp2", "0xtok"), SourceKind::DexScreener).await,
            Outcome::DuplicateToken
        );
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn same_pair_twice_is_a_pair_duplicate() {
        let (p, _rx) = pipeline();
        let raw = mid("0xp1", "0xtok");
        p.process_record(&raw, SourceKind::DexScreener).await;
        assert_eq!(p.process_record(&raw, SourceKind::DexScreener).await, Outcome::DuplicatePair);
        assert_eq!(p.stats().filter.evaluated, 1);
    }

    #[tokio::test]
    async fn guaranteed_rank_is_queued_without_metrics() {
        let (p, mut rx) = pipeline();
        let raw = RawPairRecord::new(
            json!({"id": {"pair": "0xgain", "token": "0xgt", "chain": "base"}, "dextools_rank": 1}),
            None,
            NOW_MS,
        );
        assert_eq!(p.process_record(&raw, SourceKind::DexTools).await, Outcome::Queued);
        let (_, verdict) = rx.try_recv().unwrap();
        assert!(verdict.is_bypass());
    }

    #[tokio::test]
    async fn scan_reports_admitted_count_and_noise_reduction() {
        let (p, _rx) = pipeline();
        let source = StaticSource {
            kind: SourceKind::DexScreener,
            records: vec![
                high("0xa", "0xta"),
                mid("0xb", "0xtb"),
                low("0xc", "0xtc"),
                RawPairRecord::new(json!("junk"), None, NOW_MS),
            ],
            calls: AtomicUsize::new(0),
        };
        assert_eq!(p.scan(&source).await.unwrap(), 3);
        let s = p.stats();
        assert_eq!(s.raw_records, 4);
        assert_eq!(s.queued, 1);
        assert!((s.noise_reduction_pct - 75.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn scan_fails_when_output_is_closed() {
        let (p, rx) = pipeline();
        drop(rx);
        let source = StaticSource {
            kind: SourceKind::DexScreener,
            records: vec![high("0xa", "0xta")],
            calls: AtomicUsize::new(0),
        };
        assert!(matches!(p.scan(&source).await, Err(AppError::Scan(_))));
        assert!(p.cached("0xa").is_none());
        assert_eq!(p.stats().cache.size, 0);
        assert_eq!(p.health().queue_pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_blocks_admission() {
        let (p, mut rx) = pipeline_with_capacity(1);
        assert_eq!(p.process_record(&high("0xa", "0xta"), SourceKind::DexScreener).await, Outcome::Queued);

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            p.process_record(&high("0xb", "0xtb"), SourceKind::DexScreener),
        )
        .await;
        assert!(blocked.is_err(), "second push should wait for the consumer");

        rx.recv().await.unwrap();
        assert_eq!(p.process_record(&high("0xc", "0xtc"), SourceKind::DexScreener).await, Outcome::Queued);
    }

    #[tokio::test]
    async fn cleanup_sweeps_nothing_when_fresh() {
        let (p, _rx) = pipeline();
        p.process_record(&high("0xa", "0xta"), SourceKind::DexScreener).await;
        assert_eq!(p.cleanup(), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_every_source_until_cancelled() {
        let mut cfg = Config::default();
        cfg.scheduler.dexscreener = SourceSchedule::new(10, 10, 30);
        cfg.scheduler.dextools = SourceSchedule::new(20, 20, 30);
        let (tx, mut rx) = mpsc::channel(64);
        let p = ScreeningPipeline::new(&cfg, Scheduler::new(&cfg.scheduler), tx);

        let ds = Arc::new(StaticSource {
            kind: SourceKind::DexScreener,
            records: vec![high("0xa", "0xta")],
            calls: AtomicUsize::new(0),
        });
        let dt = Arc::new(StaticSource {
            kind: SourceKind::DexTools,
            records: vec![],
            calls: AtomicUsize::new(0),
        });
        let sources: Vec<Arc<dyn PairSource>> = vec![ds.clone(), dt.clone()];

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&p).run(sources, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(25)).await;
        // dexscreener at 0, 10, 20; dextools at 0, 20
        assert_eq!(ds.calls.load(Ordering::SeqCst), 3);
        assert_eq!(dt.calls.load(Ordering::SeqCst), 2);
        // Only the first sighting gets through; later scans hit the pair cooldown.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        assert!(p.health().pipeline_running());
        cancel.cancel();
        handle.await.unwrap();
        assert!(!p.health().pipeline_running());
        let names: Vec<_> = p.stats().scheduler.into_iter().map(|s| s.source).collect();
        assert_eq!(names, vec!["dexscreener", "dextools"]);
    }
}

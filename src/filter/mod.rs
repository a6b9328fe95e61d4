//! Multi-level admission cascade.
//!
//! Order: guaranteed-rank bypass → L0 viability → L1 momentum → L2 fake liquidity,
//! then a separate 0-100 tier score for events that made it through.

pub mod cascade;
pub mod tier;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

use crate::config::FilterConfig;
use crate::types::{FilterReason, FilterVerdict, LevelStatus, NormalizedPairEvent, Tier};

pub use cascade::momentum_score;
pub use tier::tier_score;

/// Per-instance counters. Updated on every `apply_filters` call.
#[derive(Default)]
pub struct FilterStats {
    evaluated: AtomicU64,
    bypassed: AtomicU64,
    level0_filtered: AtomicU64,
    level1_filtered: AtomicU64,
    level2_filtered: AtomicU64,
    passed: AtomicU64,
    passed_high: AtomicU64,
    passed_mid: AtomicU64,
    passed_low: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStatsSnapshot {
    pub evaluated: u64,
    pub bypassed: u64,
    pub level0_filtered: u64,
    pub level1_filtered: u64,
    pub level2_filtered: u64,
    pub passed: u64,
    pub passed_high: u64,
    pub passed_mid: u64,
    pub passed_low: u64,
}

impl FilterStatsSnapshot {
    /// Share of evaluated events that did not pass, as a percentage.
    pub fn filter_rate_pct(&self) -> f64 {
        if self.evaluated == 0 {
            return 0.0;
        }
        (self.evaluated - self.passed) as f64 / self.evaluated as f64 * 100.0
    }
}

pub struct Filter {
    cfg: FilterConfig,
    stats: FilterStats,
}

impl Filter {
    pub fn new(cfg: FilterConfig) -> Self {
        Self { cfg, stats: FilterStats::default() }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.cfg
    }

    /// Run the cascade on one event. Never fails; the verdict carries pass/fail and the reason.
    pub fn apply_filters(&self, event: &NormalizedPairEvent) -> FilterVerdict {
        self.stats.evaluated.fetch_add(1, Ordering::Relaxed);

        if let Some(rank) = self.guaranteed_rank(event) {
            self.stats.bypassed.fetch_add(1, Ordering::Relaxed);
            let verdict = self.admit(
                event,
                FilterReason::GuaranteedRank { rank },
                LevelStatus::Bypass,
                LevelStatus::Bypass,
                LevelStatus::Bypass,
                cascade::momentum_score(event),
                Tier::High,
                true,
            );
            debug!(
                pair = %event.pair_address,
                rank,
                tier_score = verdict.tier_score,
                "[FILTER] guaranteed rank bypass"
            );
            return verdict;
        }

        if let Err(reason) = cascade::level0(event, &self.cfg) {
            self.stats.level0_filtered.fetch_add(1, Ordering::Relaxed);
            return self.reject(event, reason, LevelStatus::Fail, LevelStatus::Skipped, LevelStatus::Skipped, 0);
        }

        let (score, l1) = cascade::level1(event, &self.cfg);
        if let Err(reason) = l1 {
            self.stats.level1_filtered.fetch_add(1, Ordering::Relaxed);
            return self.reject(event, reason, LevelStatus::Pass, LevelStatus::Fail, LevelStatus::Skipped, score);
        }

        if let Err(reason) = cascade::level2(event, &self.cfg) {
            self.stats.level2_filtered.fetch_add(1, Ordering::Relaxed);
            return self.reject(event, reason, LevelStatus::Pass, LevelStatus::Pass, LevelStatus::Fail, score);
        }

        let tier = Tier::from_score(tier::tier_score(event));
        let verdict = self.admit(
            event,
            FilterReason::Passed,
            LevelStatus::Pass,
            LevelStatus::Pass,
            LevelStatus::Pass,
            score,
            tier,
            false,
        );
        debug!(
            pair = %event.pair_address,
            chain = %event.chain,
            momentum_score = score,
            tier_score = verdict.tier_score,
            tier = %verdict.tier,
            "[FILTER] passed"
        );
        verdict
    }

    pub fn stats(&self) -> FilterStatsSnapshot {
        let s = &self.stats;
        FilterStatsSnapshot {
            evaluated: s.evaluated.load(Ordering::Relaxed),
            bypassed: s.bypassed.load(Ordering::Relaxed),
            level0_filtered: s.level0_filtered.load(Ordering::Relaxed),
            level1_filtered: s.level1_filtered.load(Ordering::Relaxed),
            level2_filtered: s.level2_filtered.load(Ordering::Relaxed),
            passed: s.passed.load(Ordering::Relaxed),
            passed_high: s.passed_high.load(Ordering::Relaxed),
            passed_mid: s.passed_mid.load(Ordering::Relaxed),
            passed_low: s.passed_low.load(Ordering::Relaxed),
        }
    }

    fn guaranteed_rank(&self, event: &NormalizedPairEvent) -> Option<u32> {
        if !event.source.is_rank_based() {
            return None;
        }
        event.rank.filter(|r| *r <= self.cfg.top_rank_cutoff)
    }

    #[allow(clippy::too_many_arguments)]
    fn admit(
        &self,
        event: &NormalizedPairEvent,
        reason: FilterReason,
        level0: LevelStatus,
        level1: LevelStatus,
        level2: LevelStatus,
        momentum_score: u8,
        tier: Tier,
        force_verify: bool,
    ) -> FilterVerdict {
        let tier_score = tier::tier_score(event);
        self.stats.passed.fetch_add(1, Ordering::Relaxed);
        let counter = match tier {
            Tier::High => &self.stats.passed_high,
            Tier::Mid => &self.stats.passed_mid,
            Tier::Low => &self.stats.passed_low,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        FilterVerdict {
            passed: true,
            reason,
            level0,
            level1,
            level2,
            momentum_score,
            tier_score,
            tier,
            verify_requested: force_verify || tier_score >= self.cfg.verify_threshold,
        }
    }

    fn reject(
        &self,
        event: &NormalizedPairEvent,
        reason: FilterReason,
        level0: LevelStatus,
        level1: LevelStatus,
        level2: LevelStatus,
        momentum_score: u8,
    ) -> FilterVerdict {
        debug!(pair = %event.pair_address, chain = %event.chain, %reason, "[FILTER] rejected");
        FilterVerdict {
            passed: false,
            reason,
            level0,
            level1,
            level2,
            momentum_score,
            tier_score: 0,
            tier: Tier::Low,
            verify_requested: false,
        }
    }
}

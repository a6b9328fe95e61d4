//! Time-windowed "seen" trackers, keyed per chain.
//!
//! Pair and token tracking are independent. A check-and-record runs under a
//! single DashMap entry lock, so two concurrent sightings of the same key
//! cannot both report "new".

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::config::DedupConfig;

type ChainKey = (String, String);

fn key(chain: &str, address: &str) -> ChainKey {
    (chain.to_string(), address.to_string())
}

/// 1h activity at the moment a pair was sighted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MomentumSnapshot {
    pub volume_1h: Option<f64>,
    pub price_change_1h: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct PairSighting {
    seen_at: Instant,
    momentum: MomentumSnapshot,
}

#[derive(Default)]
struct DedupCounters {
    pairs_checked: AtomicU64,
    pairs_blocked: AtomicU64,
    tokens_checked: AtomicU64,
    tokens_blocked: AtomicU64,
    momentum_readmits: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupStats {
    pub pairs_checked: u64,
    pub pairs_blocked: u64,
    pub tokens_checked: u64,
    pub tokens_blocked: u64,
    pub momentum_readmits: u64,
    pub tracked_pairs: usize,
    pub tracked_tokens: usize,
    pub dedup_rate_pct: f64,
}

pub struct Deduplicator {
    pairs: DashMap<ChainKey, PairSighting>,
    tokens: DashMap<ChainKey, Instant>,
    pair_cooldown: Duration,
    token_cooldown: Duration,
    momentum_volume_ratio: f64,
    momentum_price_delta: f64,
    counters: DedupCounters,
}

impl Deduplicator {
    pub fn new(cfg: &DedupConfig) -> Self {
        Self {
            pairs: DashMap::new(),
            tokens: DashMap::new(),
            pair_cooldown: cfg.pair_cooldown(),
            token_cooldown: cfg.token_cooldown(),
            momentum_volume_ratio: cfg.momentum_volume_ratio,
            momentum_price_delta: cfg.momentum_price_delta,
            counters: DedupCounters::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Pair tracker
    // -----------------------------------------------------------------------

    /// True if the pair was seen within the pair cooldown. Otherwise records it and returns false.
    pub fn is_duplicate(&self, pair_address: &str, chain: &str) -> bool {
        self.is_duplicate_at(pair_address, chain, Instant::now())
    }

    pub fn is_duplicate_at(&self, pair_address: &str, chain: &str, now: Instant) -> bool {
        self.check_pair(pair_address, chain, None, now)
    }

    /// Like `is_duplicate`, but a pair still inside its cooldown is re-admitted when its
    /// 1h volume multiplied by `momentum_volume_ratio` or its 1h price change rose by
    /// `momentum_price_delta` points since the recorded sighting.
    pub fn is_duplicate_with_momentum(
        &self,
        pair_address: &str,
        chain: &str,
        snapshot: MomentumSnapshot,
    ) -> bool {
        self.is_duplicate_with_momentum_at(pair_address, chain, snapshot, Instant::now())
    }

    pub fn is_duplicate_with_momentum_at(
        &self,
        pair_address: &str,
        chain: &str,
        snapshot: MomentumSnapshot,
        now: Instant,
    ) -> bool {
        self.check_pair(pair_address, chain, Some(snapshot), now)
    }

    fn check_pair(
        &self,
        pair_address: &str,
        chain: &str,
        snapshot: Option<MomentumSnapshot>,
        now: Instant,
    ) -> bool {
        self.counters.pairs_checked.fetch_add(1, Ordering::Relaxed);
        let sighting = PairSighting { seen_at: now, momentum: snapshot.unwrap_or_default() };

        match self.pairs.entry(key(chain, pair_address)) {
            Entry::Occupied(mut o)
                if now.saturating_duration_since(o.get().seen_at) < self.pair_cooldown =>
            {
                let surged = snapshot.is_some_and(|s| self.momentum_shift(&o.get().momentum, &s));
                if surged {
                    o.insert(sighting);
                    self.counters.momentum_readmits.fetch_add(1, Ordering::Relaxed);
                    debug!(pair = pair_address, chain, "[DEDUP] momentum shift, re-admitting pair");
                    false
                } else {
                    self.counters.pairs_blocked.fetch_add(1, Ordering::Relaxed);
                    true
                }
            }
            Entry::Occupied(mut o) => {
                o.insert(sighting);
                false
            }
            Entry::Vacant(v) => {
                v.insert(sighting);
                false
            }
        }
    }

    fn momentum_shift(&self, prev: &MomentumSnapshot, cur: &MomentumSnapshot) -> bool {
        let volume_jump = match (prev.volume_1h, cur.volume_1h) {
            (Some(p), Some(c)) if p > 0.0 => c >= p * self.momentum_volume_ratio,
            _ => false,
        };
        let price_jump = match (prev.price_change_1h, cur.price_change_1h) {
            (Some(p), Some(c)) => c - p >= self.momentum_price_delta,
            _ => false,
        };
        volume_jump || price_jump
    }

    // -----------------------------------------------------------------------
    // Token tracker
    // -----------------------------------------------------------------------

    /// True if the token was seen within the token cooldown. No bypass of any kind.
    pub fn is_token_duplicate(&self, token_address: &str, chain: &str) -> bool {
        self.is_token_duplicate_at(token_address, chain, Instant::now())
    }

    pub fn is_token_duplicate_at(&self, token_address: &str, chain: &str, now: Instant) -> bool {
        self.counters.tokens_checked.fetch_add(1, Ordering::Relaxed);
        match self.tokens.entry(key(chain, token_address)) {
            Entry::Occupied(o) if now.saturating_duration_since(*o.get()) < self.token_cooldown => {
                self.counters.tokens_blocked.fetch_add(1, Ordering::Relaxed);
                true
            }
            Entry::Occupied(mut o) => {
                o.insert(now);
                false
            }
            Entry::Vacant(v) => {
                v.insert(now);
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    /// Drop every record older than its tracker's cooldown. Returns the number removed.
    pub fn cleanup_expired_at(&self, now: Instant) -> usize {
        let mut removed = 0usize;
        self.pairs.retain(|_, s| {
            let keep = now.saturating_duration_since(s.seen_at) < self.pair_cooldown;
            if !keep {
                removed += 1;
            }
            keep
        });
        self.tokens.retain(|_, seen_at| {
            let keep = now.saturating_duration_since(*seen_at) < self.token_cooldown;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn clear(&self) {
        self.pairs.clear();
        self.tokens.clear();
    }

    pub fn stats(&self) -> DedupStats {
        let c = &self.counters;
        let pairs_checked = c.pairs_checked.load(Ordering::Relaxed);
        let pairs_blocked = c.pairs_blocked.load(Ordering::Relaxed);
        let tokens_checked = c.tokens_checked.load(Ordering::Relaxed);
        let tokens_blocked = c.tokens_blocked.load(Ordering::Relaxed);
        let checked = pairs_checked + tokens_checked;
        DedupStats {
            pairs_checked,
            pairs_blocked,
            tokens_checked,
            tokens_blocked,
            momentum_readmits: c.momentum_readmits.load(Ordering::Relaxed),
            tracked_pairs: self.pairs.len(),
            tracked_tokens: self.tokens.len(),
            dedup_rate_pct: if checked == 0 {
                0.0
            } else {
                (pairs_blocked + tokens_blocked) as f64 / checked as f64 * 100.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_secs(60);

    fn dedup() -> Deduplicator {
        Deduplicator::new(&DedupConfig::default())
    }

    #[test]
    fn pair_is_new_once_per_cooldown_window() {
        let d = dedup();
        let t0 = Instant::now();
        assert!(!d.is_duplicate_at("0xpair", "base", t0));
        assert!(d.is_duplicate_at("0xpair", "base", t0 + 5 * MIN));
        assert!(d.is_duplicate_at("0xpair", "base", t0 + 14 * MIN));
        assert!(!d.is_duplicate_at("0xpair", "base", t0 + 15 * MIN));
        assert!(d.is_duplicate_at("0xpair", "base", t0 + 16 * MIN));
    }

    #[test]
    fn chains_are_tracked_independently() {
        let d = dedup();
        let t0 = Instant::now();
        assert!(!d.is_duplicate_at("0xpair", "base", t0));
        assert!(!d.is_duplicate_at("0xpair", "ethereum", t0));
        assert!(!d.is_token_duplicate_at("0xpair", "base", t0));
    }

    #[test]
    fn token_seen_ten_minutes_apart_is_duplicate() {
        let d = dedup();
        let t0 = Instant::now();
        assert!(!d.is_token_duplicate_at("0xtoken", "base", t0));
        assert!(d.is_token_duplicate_at("0xtoken", "base", t0 + 10 * MIN));
        assert!(!d.is_token_duplicate_at("0xtoken", "base", t0 + 30 * MIN));
    }

    #[test]
    fn volume_doubling_readmits_pair_inside_cooldown() {
        let d = dedup();
        let t0 = Instant::now();
        let first = MomentumSnapshot { volume_1h: Some(1_000.0), price_change_1h: Some(5.0) };
        let flat = MomentumSnapshot { volume_1h: Some(1_500.0), price_change_1h: Some(6.0) };
        let surge = MomentumSnapshot { volume_1h: Some(2_000.0), price_change_1h: Some(5.0) };

        assert!(!d.is_duplicate_with_momentum_at("0xpair", "base", first, t0));
        assert!(d.is_duplicate_with_momentum_at("0xpair", "base", flat, t0 + MIN));
        assert!(!d.is_duplicate_with_momentum_at("0xpair", "base", surge, t0 + 2 * MIN));
        // The surge refreshed the record, so the same numbers are now a duplicate.
        assert!(d.is_duplicate_with_momentum_at("0xpair", "base", surge, t0 + 3 * MIN));
        assert_eq!(d.stats().momentum_readmits, 1);
    }

    #[test]
    fn price_change_jump_readmits_pair() {
        let d = dedup();
        let t0 = Instant::now();
        let first = MomentumSnapshot { volume_1h: None, price_change_1h: Some(2.0) };
        let jump = MomentumSnapshot { volume_1h: None, price_change_1h: Some(5.0) };
        assert!(!d.is_duplicate_with_momentum_at("0xpair", "base", first, t0));
        assert!(!d.is_duplicate_with_momentum_at("0xpair", "base", jump, t0 + MIN));
    }

    #[test]
    fn plain_pair_check_never_bypasses() {
        let d = dedup();
        let t0 = Instant::now();
        let first = MomentumSnapshot { volume_1h: Some(10.0), price_change_1h: None };
        assert!(!d.is_duplicate_with_momentum_at("0xpair", "base", first, t0));
        assert!(d.is_duplicate_at("0xpair", "base", t0 + MIN));
    }

    #[test]
    fn zero_previous_volume_cannot_trigger_bypass() {
        let d = dedup();
        let t0 = Instant::now();
        let first = MomentumSnapshot { volume_1h: Some(0.0), price_change_1h: None };
        let later = MomentumSnapshot { volume_1h: Some(1e9), price_change_1h: None };
        assert!(!d.is_duplicate_with_momentum_at("0xpair", "base", first, t0));
        assert!(d.is_duplicate_with_momentum_at("0xpair", "base", later, t0 + MIN));
    }

    #[test]
    fn cleanup_sweeps_by_tracker_cooldown() {
        let d = dedup();
        let t0 = Instant::now();
        d.is_duplicate_at("0xpair", "base", t0);
        d.is_token_duplicate_at("0xtoken", "base", t0);

        // Pair cooldown (15m) elapsed, token cooldown (30m) not yet.
        assert_eq!(d.cleanup_expired_at(t0 + 20 * MIN), 1);
        let s = d.stats();
        assert_eq!((s.tracked_pairs, s.tracked_tokens), (0, 1));
        assert_eq!(d.cleanup_expired_at(t0 + 31 * MIN), 1);
        assert_eq!(d.stats().tracked_tokens, 0);
    }

    #[test]
    fn stats_report_dedup_rate() {
        let d = dedup();
        let t0 = Instant::now();
        d.is_token_duplicate_at("0xtoken", "base", t0);
        d.is_token_duplicate_at("0xtoken", "base", t0 + MIN);
        let s = d.stats();
        assert_eq!((s.tokens_checked, s.tokens_blocked), (2, 1));
        assert!((s.dedup_rate_pct - 50.0).abs() < 1e-9);
        d.clear();
        assert_eq!(d.stats().tracked_tokens, 0);
    }
}

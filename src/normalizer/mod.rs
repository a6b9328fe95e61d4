//! Source-specific raw records → `NormalizedPairEvent`.
//!
//! Normalization is a pure function of the record: the observation time travels
//! inside `RawPairRecord`, so no clock is read here.

pub mod chain;
mod dexscreener;
mod dextools;
mod geckoterminal;

pub use chain::{normalize_chain, source_chain_id};
pub use geckoterminal::parse_iso_to_unix_secs;

use serde_json::Value;

use crate::config::NormalizerConfig;
use crate::types::{EventType, NormalizedPairEvent, RawPairRecord, SourceKind};

/// Pairs younger than this are NEW_PAIR regardless of activity.
const NEW_PAIR_MAX_AGE_MINUTES: f64 = 60.0;
const PRICE_SPIKE_5M_PCT: f64 = 50.0;
const PRICE_SPIKE_1H_PCT: f64 = 200.0;
const VOLUME_SPIKE_5M_USD: f64 = 50_000.0;

/// Why a record could not become an event. Counted by the pipeline, never surfaced as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotAnObject,
    MissingPairAddress,
    MissingTokenAddress,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::NotAnObject => write!(f, "payload is not a JSON object"),
            Rejection::MissingPairAddress => write!(f, "missing pair address"),
            Rejection::MissingTokenAddress => write!(f, "missing base token address"),
        }
    }
}

/// Fields every source parser extracts before the shared scoring step.
#[derive(Debug, Default)]
struct PairFields {
    chain: String,
    dex: String,
    pair_address: String,
    token0: String,
    token1: Option<String>,
    token_name: Option<String>,
    token_symbol: Option<String>,
    quote_symbol: Option<String>,
    price_usd: Option<f64>,
    price_change_5m: Option<f64>,
    price_change_1h: Option<f64>,
    price_change_6h: Option<f64>,
    price_change_24h: Option<f64>,
    volume_5m: Option<f64>,
    volume_1h: Option<f64>,
    volume_24h: Option<f64>,
    liquidity: Option<f64>,
    tx_5m: Option<u64>,
    tx_1h: Option<u64>,
    tx_24h: Option<u64>,
    /// Pair creation time, unix milliseconds.
    created_at_ms: Option<u64>,
    rank: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    cfg: NormalizerConfig,
}

impl Normalizer {
    pub fn new(cfg: NormalizerConfig) -> Self {
        Self { cfg }
    }

    pub fn normalize(
        &self,
        raw: &RawPairRecord,
        source: SourceKind,
    ) -> Result<NormalizedPairEvent, Rejection> {
        if !raw.payload.is_object() {
            return Err(Rejection::NotAnObject);
        }
        let fields = match source {
            SourceKind::DexScreener => dexscreener::extract(raw),
            SourceKind::GeckoTerminal => geckoterminal::extract(raw),
            SourceKind::DexTools => dextools::extract(raw),
        };

        if fields.pair_address.is_empty() {
            return Err(Rejection::MissingPairAddress);
        }
        if fields.token0.is_empty() {
            return Err(Rejection::MissingTokenAddress);
        }
        Ok(self.finish(fields, source, raw.fetched_at_ms))
    }

    fn finish(&self, f: PairFields, source: SourceKind, fetched_at_ms: u64) -> NormalizedPairEvent {
        let liquidity = f.liquidity.unwrap_or(0.0);
        let volume_24h = f.volume_24h.unwrap_or(0.0);
        let tx_24h = f.tx_24h.unwrap_or(0);
        let age_minutes = f.created_at_ms.map(|created| age_minutes(fetched_at_ms, created));

        let confidence = if source.is_rank_based() {
            rank_confidence(f.rank, liquidity, volume_24h)
        } else {
            let has_price_change = f.price_change_5m.is_some()
                || f.price_change_1h.is_some()
                || f.price_change_6h.is_some()
                || f.price_change_24h.is_some();
            feed_confidence(liquidity, volume_24h, tx_24h, has_price_change)
        };

        let event_type = match f.rank {
            Some(rank) if rank <= self.cfg.top_gainer_cutoff => EventType::DextoolsTopGainer,
            _ => classify_event(age_minutes, f.price_change_5m, f.price_change_1h, f.volume_5m),
        };

        NormalizedPairEvent {
            chain: f.chain,
            dex: f.dex,
            pair_address: f.pair_address,
            token0: f.token0,
            token1: f.token1,
            token_name: f.token_name,
            token_symbol: f.token_symbol,
            quote_symbol: f.quote_symbol,
            price_usd: f.price_usd,
            price_change_5m: f.price_change_5m,
            price_change_1h: f.price_change_1h,
            price_change_6h: f.price_change_6h,
            price_change_24h: f.price_change_24h,
            volume_5m: f.volume_5m,
            volume_1h: f.volume_1h,
            volume_24h,
            liquidity,
            tx_5m: f.tx_5m,
            tx_1h: f.tx_1h,
            tx_24h,
            source,
            confidence,
            event_type,
            age_minutes,
            rank: f.rank,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Completeness score for feed-shaped sources, clamped to [0, 1].
pub fn feed_confidence(liquidity: f64, volume_24h: f64, tx_24h: u64, has_price_change: bool) -> f64 {
    let mut score: f64 = 0.0;

    score += if liquidity >= 50_000.0 {
        0.3
    } else if liquidity >= 20_000.0 {
        0.2
    } else if liquidity >= 5_000.0 {
        0.1
    } else {
        0.0
    };

    score += if volume_24h >= 100_000.0 {
        0.3
    } else if volume_24h >= 50_000.0 {
        0.2
    } else if volume_24h >= 10_000.0 {
        0.1
    } else {
        0.0
    };

    score += if tx_24h >= 100 {
        0.2
    } else if tx_24h >= 50 {
        0.15
    } else if tx_24h >= 20 {
        0.1
    } else {
        0.0
    };

    if has_price_change {
        score += 0.2;
    }

    score.clamp(0.0, 1.0)
}

/// Rank-led score for curated lists, clamped to [0, 1].
pub fn rank_confidence(rank: Option<u32>, liquidity: f64, volume_24h: f64) -> f64 {
    let mut score: f64 = match rank {
        Some(r) if r <= 10 => 0.5,
        Some(r) if r <= 30 => 0.4,
        Some(r) if r <= 50 => 0.3,
        Some(r) if r <= 100 => 0.2,
        _ => 0.0,
    };

    score += if liquidity >= 50_000.0 {
        0.3
    } else if liquidity >= 20_000.0 {
        0.2
    } else {
        0.0
    };

    score += if volume_24h >= 100_000.0 {
        0.2
    } else if volume_24h >= 50_000.0 {
        0.1
    } else {
        0.0
    };

    score.clamp(0.0, 1.0)
}

/// First matching rule wins. Absent inputs never trigger a rule.
pub fn classify_event(
    age_minutes: Option<f64>,
    price_change_5m: Option<f64>,
    price_change_1h: Option<f64>,
    volume_5m: Option<f64>,
) -> EventType {
    if age_minutes.is_some_and(|a| a < NEW_PAIR_MAX_AGE_MINUTES) {
        return EventType::NewPair;
    }
    if price_change_5m.is_some_and(|p| p.abs() >= PRICE_SPIKE_5M_PCT)
        || price_change_1h.is_some_and(|p| p >= PRICE_SPIKE_1H_PCT)
    {
        return EventType::PriceSpike;
    }
    if volume_5m.is_some_and(|v| v >= VOLUME_SPIKE_5M_USD) {
        return EventType::VolumeSpike;
    }
    EventType::SecondaryMarket
}

fn age_minutes(observed_ms: u64, created_ms: u64) -> f64 {
    observed_ms.saturating_sub(created_ms) as f64 / 60_000.0
}

// ---------------------------------------------------------------------------
// Defensive JSON access
// ---------------------------------------------------------------------------

/// Walk nested object keys.
fn path<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().try_fold(v, |cur, k| cur.get(*k))
}

/// Number from a JSON number or a numeric string. Non-finite values are dropped.
fn num(v: Option<&Value>) -> Option<f64> {
    let v = v?;
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
        .filter(|n| n.is_finite())
}

fn count(v: Option<&Value>) -> Option<u64> {
    num(v).filter(|n| *n >= 0.0).map(|n| n as u64)
}

/// Non-empty string field.
fn text(v: Option<&Value>) -> Option<String> {
    v.and_then(|s| s.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `{buys, sells}` bucket summed. A present bucket with missing sides counts them as 0.
fn buys_plus_sells(bucket: Option<&Value>) -> Option<u64> {
    let bucket = bucket.filter(|b| b.is_object())?;
    let buys = count(bucket.get("buys")).unwrap_or(0);
    let sells = count(bucket.get("sells")).unwrap_or(0);
    Some(buys + sells)
}

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    DexScreener,
    GeckoTerminal,
    DexTools,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::DexScreener,
        SourceKind::GeckoTerminal,
        SourceKind::DexTools,
    ];

    /// Rank-based sources publish ordered lists (gainers, hot pairs) instead of raw feeds.
    pub fn is_rank_based(self) -> bool {
        matches!(self, SourceKind::DexTools)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::DexScreener => "dexscreener",
            SourceKind::GeckoTerminal => "geckoterminal",
            SourceKind::DexTools => "dextools",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// One source-shaped record as returned by a fetcher. Consumed once by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPairRecord {
    pub payload: serde_json::Value,
    /// Chain the record was queried for, when the payload itself may not carry it.
    pub chain: Option<String>,
    /// Unix milliseconds at which the fetcher observed the record.
    pub fetched_at_ms: u64,
}

impl RawPairRecord {
    pub fn new(payload: serde_json::Value, chain: Option<String>, fetched_at_ms: u64) -> Self {
        Self { payload, chain, fetched_at_ms }
    }

    /// Stamp a payload with the current wall clock.
    pub fn observed_now(payload: serde_json::Value, chain: Option<String>) -> Self {
        Self::new(payload, chain, now_ms())
    }
}

// ---------------------------------------------------------------------------
// Normalized event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    NewPair,
    PriceSpike,
    VolumeSpike,
    SecondaryMarket,
    DextoolsTopGainer,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::NewPair => "NEW_PAIR",
            EventType::PriceSpike => "PRICE_SPIKE",
            EventType::VolumeSpike => "VOLUME_SPIKE",
            EventType::SecondaryMarket => "SECONDARY_MARKET",
            EventType::DextoolsTopGainer => "DEXTOOLS_TOP_GAINER",
        };
        write!(f, "{s}")
    }
}

/// Canonical pair snapshot. Built once by the normalizer and never mutated.
///
/// Optional numerics stay `None` when the source did not report them. Only
/// `volume_24h` and `tx_24h` fall back to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPairEvent {
    pub chain: String,
    pub dex: String,
    pub pair_address: String,
    /// Base (non-quote) token address.
    pub token0: String,
    /// Quote token address.
    pub token1: Option<String>,
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
    pub quote_symbol: Option<String>,

    pub price_usd: Option<f64>,
    pub price_change_5m: Option<f64>,
    pub price_change_1h: Option<f64>,
    pub price_change_6h: Option<f64>,
    pub price_change_24h: Option<f64>,

    pub volume_5m: Option<f64>,
    pub volume_1h: Option<f64>,
    pub volume_24h: f64,
    pub liquidity: f64,

    pub tx_5m: Option<u64>,
    pub tx_1h: Option<u64>,
    pub tx_24h: u64,

    pub source: SourceKind,
    pub confidence: f64,
    pub event_type: EventType,
    pub age_minutes: Option<f64>,
    pub rank: Option<u32>,
}

// ---------------------------------------------------------------------------
// Filter verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Low,
    Mid,
    High,
}

impl Tier {
    pub const HIGH_MIN_SCORE: u8 = 70;
    pub const MID_MIN_SCORE: u8 = 50;

    pub fn from_score(score: u8) -> Self {
        if score >= Self::HIGH_MIN_SCORE {
            Tier::High
        } else if score >= Self::MID_MIN_SCORE {
            Tier::Mid
        } else {
            Tier::Low
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Low => "LOW",
            Tier::Mid => "MID",
            Tier::High => "HIGH",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStatus {
    Pass,
    Fail,
    Bypass,
    /// Not evaluated because an earlier level failed.
    Skipped,
}

impl std::fmt::Display for LevelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelStatus::Pass => write!(f, "pass"),
            LevelStatus::Fail => write!(f, "fail"),
            LevelStatus::Bypass => write!(f, "bypass"),
            LevelStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why the cascade admitted or dropped an event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FilterReason {
    /// Rank-based source inside the guaranteed cutoff.
    GuaranteedRank { rank: u32 },
    Passed,
    LowLiquidity { liquidity: f64 },
    NoActivity,
    LowMomentum { score: u8 },
    FakeLiquidity { liquidity: f64 },
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterReason::GuaranteedRank { rank } => write!(f, "guaranteed rank #{rank}"),
            FilterReason::Passed => write!(f, "passed all levels"),
            FilterReason::LowLiquidity { liquidity } => {
                write!(f, "L0: liquidity ${liquidity:.0} below minimum")
            }
            FilterReason::NoActivity => write!(f, "L0: no 24h activity"),
            FilterReason::LowMomentum { score } => write!(f, "L1: momentum score {score}"),
            FilterReason::FakeLiquidity { liquidity } => {
                write!(f, "L2: ${liquidity:.0} liquidity with no trading")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterVerdict {
    pub passed: bool,
    pub reason: FilterReason,
    pub level0: LevelStatus,
    pub level1: LevelStatus,
    pub level2: LevelStatus,
    /// Level-1 gate score. Not comparable with `tier_score`.
    pub momentum_score: u8,
    /// 0-100 weighted score, computed only for admitted events.
    pub tier_score: u8,
    pub tier: Tier,
    pub verify_requested: bool,
}

impl FilterVerdict {
    pub fn is_bypass(&self) -> bool {
        matches!(self.reason, FilterReason::GuaranteedRank { .. })
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

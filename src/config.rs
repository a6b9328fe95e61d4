use std::time::Duration;

use crate::error::{AppError, Result};
use crate::normalizer::normalize_chain;
use crate::types::SourceKind;

pub const DEXSCREENER_API_URL: &str = "https://api.dexscreener.com";
pub const GECKOTERMINAL_API_URL: &str = "https://api.geckoterminal.com/api/v2";
pub const DEXTOOLS_API_URL: &str = "https://public-api.dextools.io/trial/v2";

/// Capacity of the admitted-event output queue.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Interval multiplier while a source is under rate-limit backoff.
pub const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Adaptive scaling factors applied after each successful scan.
pub const ADAPTIVE_SPEEDUP: f64 = 0.8;
pub const ADAPTIVE_SLOWDOWN: f64 = 1.2;

/// Default pause applied to a source after an HTTP 429.
pub const RATE_LIMIT_BACKOFF_SECS: u64 = 120;

/// Per-request HTTP timeout for the pair feeds.
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// Minimum spacing between two requests to the same feed.
pub const MIN_REQUEST_SPACING_MS: u64 = 200;

/// Upper bounds accepted from the environment. Larger values overflow `Instant` arithmetic.
pub const MAX_COOLDOWN_MINUTES: u64 = 7 * 24 * 60;
pub const MAX_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
pub const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Level-0 hard floor in USD (FILTER_MIN_LIQUIDITY)
    pub min_liquidity: f64,
    /// Level-1 gate (FILTER_MOMENTUM_THRESHOLD)
    pub momentum_score_threshold: u8,
    /// Level-2 trigger: liquidity above this with no trading is suspicious
    pub fake_liq_threshold: f64,
    pub fake_liq_min_volume_24h: f64,
    pub fake_liq_min_tx_24h: u64,
    /// Rank-based sources at or above this rank skip the cascade
    pub top_rank_cutoff: u32,
    /// tier_score at which downstream verification is requested
    pub verify_threshold: u8,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_liquidity: 10_000.0,
            momentum_score_threshold: 3,
            fake_liq_threshold: 500_000.0,
            fake_liq_min_volume_24h: 200.0,
            fake_liq_min_tx_24h: 10,
            top_rank_cutoff: 50,
            verify_threshold: 55,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 300, max_size: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupConfig {
    pub pair_cooldown_minutes: u64,
    pub token_cooldown_minutes: u64,
    /// A pair inside its cooldown is re-admitted when volume_1h reaches previous × ratio.
    pub momentum_volume_ratio: f64,
    /// ... or when price_change_1h rose by at least this many points.
    pub momentum_price_delta: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            pair_cooldown_minutes: 15,
            token_cooldown_minutes: 30,
            momentum_volume_ratio: 2.0,
            momentum_price_delta: 3.0,
        }
    }
}

impl DedupConfig {
    pub fn pair_cooldown(&self) -> Duration {
        Duration::from_secs(self.pair_cooldown_minutes.min(MAX_COOLDOWN_MINUTES) * 60)
    }

    pub fn token_cooldown(&self) -> Duration {
        Duration::from_secs(self.token_cooldown_minutes.min(MAX_COOLDOWN_MINUTES) * 60)
    }
}

/// Poll pacing for a single source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSchedule {
    pub interval_min: Duration,
    pub interval_max: Duration,
    /// Fixed pause after a failed scan.
    pub error_backoff: Duration,
}

impl SourceSchedule {
    pub fn new(min_secs: u64, max_secs: u64, error_backoff_secs: u64) -> Self {
        Self {
            interval_min: Duration::from_secs(min_secs),
            interval_max: Duration::from_secs(max_secs),
            error_backoff: Duration::from_secs(error_backoff_secs),
        }
    }

    pub fn default_for(source: SourceKind) -> Self {
        match source {
            SourceKind::DexScreener => Self::new(30, 60, 60),
            SourceKind::GeckoTerminal => Self::new(60, 120, 60),
            SourceKind::DexTools => Self::new(90, 180, 120),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub dexscreener: SourceSchedule,
    pub geckoterminal: SourceSchedule,
    pub dextools: SourceSchedule,
    pub adaptive_scaling: bool,
    /// Admitted events per scan that count as an active market.
    pub activity_threshold: usize,
    pub cleanup_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dexscreener: SourceSchedule::default_for(SourceKind::DexScreener),
            geckoterminal: SourceSchedule::default_for(SourceKind::GeckoTerminal),
            dextools: SourceSchedule::default_for(SourceKind::DexTools),
            adaptive_scaling: true,
            activity_threshold: 5,
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl SchedulerConfig {
    pub fn schedule_for(&self, source: SourceKind) -> SourceSchedule {
        match source {
            SourceKind::DexScreener => self.dexscreener,
            SourceKind::GeckoTerminal => self.geckoterminal,
            SourceKind::DexTools => self.dextools,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizerConfig {
    /// Ranks at or above this become DEXTOOLS_TOP_GAINER events.
    pub top_gainer_cutoff: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self { top_gainer_cutoff: 50 }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub api_port: u16,
    /// Chains polled by every source (ENABLED_CHAINS, comma-separated)
    pub enabled_chains: Vec<String>,
    pub dexscreener_api_url: String,
    pub geckoterminal_api_url: String,
    pub dextools_api_url: String,
    /// DEXTools is skipped when unset (DEXTOOLS_API_KEY)
    pub dextools_api_key: Option<String>,
    pub output_queue_capacity: usize,
    pub filter: FilterConfig,
    pub cache: CacheConfig,
    pub dedup: DedupConfig,
    pub scheduler: SchedulerConfig,
    pub normalizer: NormalizerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            api_port: 3000,
            enabled_chains: vec!["base".to_string(), "ethereum".to_string(), "solana".to_string()],
            dexscreener_api_url: DEXSCREENER_API_URL.to_string(),
            geckoterminal_api_url: GECKOTERMINAL_API_URL.to_string(),
            dextools_api_url: DEXTOOLS_API_URL.to_string(),
            dextools_api_key: None,
            output_queue_capacity: CHANNEL_CAPACITY,
            filter: FilterConfig::default(),
            cache: CacheConfig::default(),
            dedup: DedupConfig::default(),
            scheduler: SchedulerConfig::default(),
            normalizer: NormalizerConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Config::default();
        let env = Env { lookup: &lookup };

        let enabled_chains = match lookup("ENABLED_CHAINS") {
            Some(raw) => {
                let mut chains: Vec<String> = Vec::new();
                for chain in raw.split(',').map(normalize_chain).filter(|c| !c.is_empty()) {
                    if !chains.contains(&chain) {
                        chains.push(chain);
                    }
                }
                chains
            }
            None => d.enabled_chains,
        };

        let filter = FilterConfig {
            min_liquidity: env.parse("FILTER_MIN_LIQUIDITY", d.filter.min_liquidity)?,
            momentum_score_threshold: env
                .parse("FILTER_MOMENTUM_THRESHOLD", d.filter.momentum_score_threshold)?,
            fake_liq_threshold: env.parse("FILTER_FAKE_LIQ_THRESHOLD", d.filter.fake_liq_threshold)?,
            fake_liq_min_volume_24h: env
                .parse("FILTER_FAKE_LIQ_MIN_VOLUME_24H", d.filter.fake_liq_min_volume_24h)?,
            fake_liq_min_tx_24h: env.parse("FILTER_FAKE_LIQ_MIN_TX_24H", d.filter.fake_liq_min_tx_24h)?,
            top_rank_cutoff: env.parse("FILTER_TOP_RANK_CUTOFF", d.filter.top_rank_cutoff)?,
            verify_threshold: env.parse("FILTER_VERIFY_THRESHOLD", d.filter.verify_threshold)?,
        };

        let cache = CacheConfig {
            ttl_seconds: env.parse("CACHE_TTL_SECONDS", d.cache.ttl_seconds)?,
            max_size: env.parse("CACHE_MAX_SIZE", d.cache.max_size)?,
        };

        let dedup = DedupConfig {
            pair_cooldown_minutes: env.parse("DEDUP_PAIR_COOLDOWN_MINUTES", d.dedup.pair_cooldown_minutes)?,
            token_cooldown_minutes: env
                .parse("DEDUP_TOKEN_COOLDOWN_MINUTES", d.dedup.token_cooldown_minutes)?,
            momentum_volume_ratio: env
                .parse("DEDUP_MOMENTUM_VOLUME_RATIO", d.dedup.momentum_volume_ratio)?,
            momentum_price_delta: env.parse("DEDUP_MOMENTUM_PRICE_DELTA", d.dedup.momentum_price_delta)?,
        };

        let scheduler = SchedulerConfig {
            dexscreener: env.schedule("DEXSCREENER", d.scheduler.dexscreener)?,
            geckoterminal: env.schedule("GECKOTERMINAL", d.scheduler.geckoterminal)?,
            dextools: env.schedule("DEXTOOLS", d.scheduler.dextools)?,
            adaptive_scaling: env.parse("SCHEDULER_ADAPTIVE_SCALING", d.scheduler.adaptive_scaling)?,
            activity_threshold: env
                .parse("SCHEDULER_ACTIVITY_THRESHOLD", d.scheduler.activity_threshold)?,
            cleanup_interval: Duration::from_secs(env.parse(
                "SCHEDULER_CLEANUP_INTERVAL_SECS",
                d.scheduler.cleanup_interval.as_secs(),
            )?),
        };

        let normalizer = NormalizerConfig {
            top_gainer_cutoff: env.parse("NORMALIZER_TOP_GAINER_CUTOFF", d.normalizer.top_gainer_cutoff)?,
        };

        let cfg = Self {
            log_level: lookup("LOG_LEVEL").unwrap_or(d.log_level),
            api_port: lookup("API_PORT")
                .unwrap_or_else(|| d.api_port.to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            enabled_chains,
            dexscreener_api_url: lookup("DEXSCREENER_API_URL").unwrap_or(d.dexscreener_api_url),
            geckoterminal_api_url: lookup("GECKOTERMINAL_API_URL").unwrap_or(d.geckoterminal_api_url),
            dextools_api_url: lookup("DEXTOOLS_API_URL").unwrap_or(d.dextools_api_url),
            dextools_api_key: lookup("DEXTOOLS_API_KEY").filter(|k| !k.trim().is_empty()),
            output_queue_capacity: env.parse("OUTPUT_QUEUE_CAPACITY", d.output_queue_capacity)?,
            filter,
            cache,
            dedup,
            scheduler,
            normalizer,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the runtime cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.enabled_chains.is_empty() {
            return Err(AppError::Config("ENABLED_CHAINS must name at least one chain".to_string()));
        }
        if self.cache.max_size == 0 {
            return Err(AppError::Config("CACHE_MAX_SIZE must be greater than zero".to_string()));
        }
        if self.output_queue_capacity == 0 {
            return Err(AppError::Config("OUTPUT_QUEUE_CAPACITY must be greater than zero".to_string()));
        }
        if self.cache.ttl_seconds == 0 || self.cache.ttl_seconds > MAX_CACHE_TTL_SECS {
            return Err(AppError::Config(format!(
                "CACHE_TTL_SECONDS must be within 1-{MAX_CACHE_TTL_SECS}"
            )));
        }
        for (key, minutes) in [
            ("DEDUP_PAIR_COOLDOWN_MINUTES", self.dedup.pair_cooldown_minutes),
            ("DEDUP_TOKEN_COOLDOWN_MINUTES", self.dedup.token_cooldown_minutes),
        ] {
            if minutes > MAX_COOLDOWN_MINUTES {
                return Err(AppError::Config(format!("{key} must be at most {MAX_COOLDOWN_MINUTES}")));
            }
        }
        if !(self.dedup.momentum_volume_ratio > 1.0 && self.dedup.momentum_volume_ratio.is_finite()) {
            return Err(AppError::Config("DEDUP_MOMENTUM_VOLUME_RATIO must be above 1.0".to_string()));
        }
        if !(self.dedup.momentum_price_delta > 0.0 && self.dedup.momentum_price_delta.is_finite()) {
            return Err(AppError::Config(
                "DEDUP_MOMENTUM_PRICE_DELTA must be a positive number".to_string(),
            ));
        }
        if self.filter.verify_threshold > 100 {
            return Err(AppError::Config("FILTER_VERIFY_THRESHOLD must be within 0-100".to_string()));
        }
        for source in SourceKind::ALL {
            let s = self.scheduler.schedule_for(source);
            if s.interval_min.is_zero() || s.interval_min > s.interval_max {
                return Err(AppError::Config(format!(
                    "{source}: interval bounds must satisfy 0 < min <= max (got {:?}..{:?})",
                    s.interval_min, s.interval_max
                )));
            }
            if s.interval_max.as_secs() > MAX_INTERVAL_SECS || s.error_backoff.as_secs() > MAX_INTERVAL_SECS {
                return Err(AppError::Config(format!(
                    "{source}: intervals and error backoff must be at most {MAX_INTERVAL_SECS}s"
                )));
            }
        }
        let cleanup = self.scheduler.cleanup_interval.as_secs();
        if cleanup == 0 || cleanup > MAX_INTERVAL_SECS {
            return Err(AppError::Config(format!(
                "SCHEDULER_CLEANUP_INTERVAL_SECS must be within 1-{MAX_INTERVAL_SECS}"
            )));
        }
        Ok(())
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T> {
        match (self.lookup)(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
            None => Ok(default),
        }
    }

    /// `<PREFIX>_INTERVAL_MIN_SECS`, `<PREFIX>_INTERVAL_MAX_SECS`, `<PREFIX>_ERROR_BACKOFF_SECS`
    fn schedule(&self, prefix: &str, default: SourceSchedule) -> Result<SourceSchedule> {
        let min = self.parse(&format!("{prefix}_INTERVAL_MIN_SECS"), default.interval_min.as_secs())?;
        let max = self.parse(&format!("{prefix}_INTERVAL_MAX_SECS"), default.interval_max.as_secs())?;
        let err = self.parse(
            &format!("{prefix}_ERROR_BACKOFF_SECS"),
            default.error_backoff.as_secs(),
        )?;
        Ok(SourceSchedule::new(min, max, err))
    }
}

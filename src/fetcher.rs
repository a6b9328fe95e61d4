//! HTTP pair feeds. Each source turns one poll into a list of raw records and
//! swallows transient failures into an empty list; only a 429 reaches the
//! scheduler, through the source's `BackoffSignal`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{HTTP_TIMEOUT_SECS, MIN_REQUEST_SPACING_MS, RATE_LIMIT_BACKOFF_SECS};
use crate::error::{AppError, Result};
use crate::normalizer::{normalize_chain, source_chain_id};
use crate::scheduler::BackoffSignal;
use crate::types::{RawPairRecord, SourceKind};

#[async_trait]
pub trait PairSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// One poll across `chains`. Never fails: errors are logged and yield fewer records.
    async fn fetch(&self, chains: &[String]) -> Vec<RawPairRecord>;

    fn fetch_stats(&self) -> FetchStats;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub source: String,
    pub requests: u64,
    pub failures: u64,
    pub rate_limited: u64,
    pub records: u64,
}

// ---------------------------------------------------------------------------
// Shared HTTP plumbing
// ---------------------------------------------------------------------------

pub struct FeedClient {
    source: SourceKind,
    http: reqwest::Client,
    spacing: Duration,
    /// Earliest instant the next request may start.
    next_slot: Mutex<Instant>,
    backoff: Option<BackoffSignal>,
    requests: AtomicU64,
    failures: AtomicU64,
    rate_limited: AtomicU64,
    records: AtomicU64,
}

impl FeedClient {
    pub fn new(source: SourceKind, backoff: Option<BackoffSignal>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            source,
            http,
            spacing: Duration::from_millis(MIN_REQUEST_SPACING_MS),
            next_slot: Mutex::new(Instant::now()),
            backoff,
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            records: AtomicU64::new(0),
        })
    }

    /// Reserve the next request slot, then wait for it outside the lock.
    async fn wait_for_slot(&self) {
        let wait = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let start = (*next).max(now);
            *next = start + self.spacing;
            start - now
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    async fn get_json(&self, url: &str, headers: &[(&str, &str)]) -> Result<Value> {
        self.wait_for_slot().await;
        self.requests.fetch_add(1, Ordering::Relaxed);

        let mut req = self.http.get(url).header("Accept", "application/json");
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let resp = req.send().await?;

        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
                warn!(source = %self.source, url, "[FETCH] rate limited");
                if let Some(signal) = &self.backoff {
                    signal.fire(Duration::from_secs(RATE_LIMIT_BACKOFF_SECS));
                }
                Err(AppError::RateLimited(self.source.to_string()))
            }
            status if !status.is_success() => {
                Err(AppError::Fetch(format!("{} returned HTTP {status}", self.source)))
            }
            _ => Ok(resp.json::<Value>().await?),
        }
    }

    /// `get_json` with failures logged and counted instead of returned.
    async fn get_json_or_log(&self, url: &str, headers: &[(&str, &str)]) -> Option<Value> {
        match self.get_json(url, headers).await {
            Ok(v) => Some(v),
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                if !matches!(e, AppError::RateLimited(_)) {
                    warn!(source = %self.source, url, "[FETCH] request failed: {e}");
                }
                None
            }
        }
    }

    fn count_records(&self, n: usize) {
        self.records.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            source: self.source.to_string(),
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Keep the first item per key; items without a key are dropped.
fn unique_by<F>(items: Vec<Value>, key: F) -> Vec<Value>
where
    F: Fn(&Value) -> Option<String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| match key(item) {
            Some(k) => seen.insert(k),
            None => false,
        })
        .collect()
}

fn array_at(body: &Value, field: &str) -> Vec<Value> {
    body.get(field)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

/// DexScreener search returns pairs from every chain; keep the requested one.
fn pairs_for_chain(body: &Value, chain: &str) -> Vec<Value> {
    let pairs = array_at(body, "pairs")
        .into_iter()
        .filter(|p| {
            p.get("chainId")
                .and_then(|c| c.as_str())
                .is_some_and(|c| normalize_chain(c) == chain)
        })
        .collect();
    unique_by(pairs, |p| p.get("pairAddress").and_then(|a| a.as_str()).map(str::to_string))
}

fn pool_key(pool: &Value) -> Option<String> {
    pool.get("id")
        .and_then(|id| id.as_str())
        .or_else(|| pool.pointer("/attributes/address").and_then(|a| a.as_str()))
        .map(str::to_string)
}

/// DEXTools lists come as `{data: [...]}` or a bare array. Entries without a rank get their 1-based position.
fn ranked_entries(body: &Value) -> Vec<Value> {
    let list = match body {
        Value::Array(items) => items.clone(),
        _ => array_at(body, "data"),
    };
    list.into_iter()
        .enumerate()
        .filter_map(|(i, mut entry)| {
            let obj = entry.as_object_mut()?;
            if !obj.contains_key("rank") && !obj.contains_key("dextools_rank") {
                obj.insert("dextools_rank".to_string(), Value::from(i as u64 + 1));
            }
            Some(entry)
        })
        .collect()
}

fn wrap(items: Vec<Value>, chain: &str) -> Vec<RawPairRecord> {
    items
        .into_iter()
        .map(|v| RawPairRecord::observed_now(v, Some(chain.to_string())))
        .collect()
}

// ---------------------------------------------------------------------------
// DexScreener
// ---------------------------------------------------------------------------

pub struct DexScreenerSource {
    base_url: String,
    client: FeedClient,
}

impl DexScreenerSource {
    pub fn new(base_url: impl Into<String>, backoff: Option<BackoffSignal>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            client: FeedClient::new(SourceKind::DexScreener, backoff)?,
        })
    }
}

#[async_trait]
impl PairSource for DexScreenerSource {
    fn kind(&self) -> SourceKind {
        SourceKind::DexScreener
    }

    async fn fetch(&self, chains: &[String]) -> Vec<RawPairRecord> {
        let mut out = Vec::new();
        for chain in chains {
            let id = source_chain_id(SourceKind::DexScreener, chain);
            let url = format!("{}/latest/dex/search?q={id}", self.base_url);
            let Some(body) = self.client.get_json_or_log(&url, &[]).await else {
                continue;
            };
            let pairs = pairs_for_chain(&body, chain);
            debug!(chain = %chain, pairs = pairs.len(), "[FETCH] dexscreener");
            self.client.count_records(pairs.len());
            out.extend(wrap(pairs, chain));
        }
        out
    }

    fn fetch_stats(&self) -> FetchStats {
        self.client.stats()
    }
}

// ---------------------------------------------------------------------------
// GeckoTerminal
// ---------------------------------------------------------------------------

pub struct GeckoTerminalSource {
    base_url: String,
    client: FeedClient,
}

impl GeckoTerminalSource {
    pub fn new(base_url: impl Into<String>, backoff: Option<BackoffSignal>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            client: FeedClient::new(SourceKind::GeckoTerminal, backoff)?,
        })
    }
}

#[async_trait]
impl PairSource for GeckoTerminalSource {
    fn kind(&self) -> SourceKind {
        SourceKind::GeckoTerminal
    }

    async fn fetch(&self, chains: &[String]) -> Vec<RawPairRecord> {
        let mut out = Vec::new();
        for chain in chains {
            let network = source_chain_id(SourceKind::GeckoTerminal, chain);
            let mut pools = Vec::new();
            for list in ["new_pools", "trending_pools"] {
                let url = format!("{}/networks/{network}/{list}", self.base_url);
                if let Some(body) = self.client.get_json_or_log(&url, &[]).await {
                    pools.extend(array_at(&body, "data"));
                }
            }
            let pools = unique_by(pools, pool_key);
            debug!(chain = %chain, pools = pools.len(), "[FETCH] geckoterminal");
            self.client.count_records(pools.len());
            out.extend(wrap(pools, chain));
        }
        out
    }

    fn fetch_stats(&self) -> FetchStats {
        self.client.stats()
    }
}

// ---------------------------------------------------------------------------
// DEXTools
// ---------------------------------------------------------------------------

pub struct DexToolsSource {
    base_url: String,
    api_key: String,
    client: FeedClient,
}

impl DexToolsSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        backoff: Option<BackoffSignal>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AppError::Config("DEXTools requires an API key".to_string()));
        }
        Ok(Self {
            base_url: base_url.into(),
            api_key,
            client: FeedClient::new(SourceKind::DexTools, backoff)?,
        })
    }
}

#[async_trait]
impl PairSource for DexToolsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::DexTools
    }

    async fn fetch(&self, chains: &[String]) -> Vec<RawPairRecord> {
        let mut out = Vec::new();
        let headers = [("X-API-KEY", self.api_key.as_str())];
        for chain in chains {
            let id = source_chain_id(SourceKind::DexTools, chain);
            let url = format!("{}/ranking/{id}/gainers", self.base_url);
            let Some(body) = self.client.get_json_or_log(&url, &headers).await else {
                continue;
            };
            let entries = ranked_entries(&body);
            debug!(chain = %chain, entries = entries.len(), "[FETCH] dextools");
            self.client.count_records(entries.len());
            out.extend(wrap(entries, chain));
        }
        out
    }

    fn fetch_stats(&self) -> FetchStats {
        self.client.stats()
    }
}

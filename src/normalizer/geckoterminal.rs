//! GeckoTerminal JSON:API pool objects (`data[]` of `new_pools` / `trending_pools`).

use serde_json::Value;

use super::{buys_plus_sells, normalize_chain, num, path, text, PairFields};
use crate::types::RawPairRecord;

pub(super) fn extract(raw: &RawPairRecord) -> PairFields {
    let v = &raw.payload;
    let attrs = v.get("attributes").unwrap_or(&Value::Null);

    // Ids are "<network>_<address>"; network names may themselves contain '_'.
    let pool_id = text(v.get("id"));
    let network = pool_id
        .as_deref()
        .and_then(|id| id.rsplit_once('_'))
        .map(|(net, _)| net.to_string());

    let chain = raw
        .chain
        .clone()
        .or(network)
        .map(|c| normalize_chain(&c))
        .unwrap_or_else(|| "unknown".to_string());

    let pair_address = text(attrs.get("address"))
        .or_else(|| pool_id.as_deref().and_then(strip_network))
        .unwrap_or_default();

    let (token_symbol, quote_symbol) = match text(attrs.get("name")) {
        Some(name) => split_pool_name(&name),
        None => (None, None),
    };

    let created_at_ms = text(attrs.get("pool_created_at"))
        .and_then(|s| parse_iso_to_unix_secs(&s))
        .filter(|secs| *secs >= 0.0)
        .map(|secs| (secs * 1000.0) as u64);

    PairFields {
        chain,
        dex: text(path(v, &["relationships", "dex", "data", "id"]))
            .unwrap_or_else(|| "unknown".to_string()),
        pair_address,
        token0: text(path(v, &["relationships", "base_token", "data", "id"]))
            .as_deref()
            .and_then(strip_network)
            .unwrap_or_default(),
        token1: text(path(v, &["relationships", "quote_token", "data", "id"]))
            .as_deref()
            .and_then(strip_network),
        token_name: None,
        token_symbol,
        quote_symbol,
        price_usd: num(attrs.get("base_token_price_usd")),
        price_change_5m: num(path(attrs, &["price_change_percentage", "m5"])),
        price_change_1h: num(path(attrs, &["price_change_percentage", "h1"])),
        price_change_6h: num(path(attrs, &["price_change_percentage", "h6"])),
        price_change_24h: num(path(attrs, &["price_change_percentage", "h24"])),
        volume_5m: num(path(attrs, &["volume_usd", "m5"])),
        volume_1h: num(path(attrs, &["volume_usd", "h1"])),
        volume_24h: num(path(attrs, &["volume_usd", "h24"])),
        liquidity: num(attrs.get("reserve_in_usd")),
        tx_5m: buys_plus_sells(path(attrs, &["transactions", "m5"])),
        tx_1h: buys_plus_sells(path(attrs, &["transactions", "h1"])),
        tx_24h: buys_plus_sells(path(attrs, &["transactions", "h24"])),
        created_at_ms,
        rank: None,
    }
}

fn strip_network(id: &str) -> Option<String> {
    id.rsplit_once('_')
        .map(|(_, addr)| addr)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
}

/// "PEPE / WETH" → (Some("PEPE"), Some("WETH")).
fn split_pool_name(name: &str) -> (Option<String>, Option<String>) {
    let mut parts = name.split(" / ").map(str::trim).filter(|s| !s.is_empty());
    let base = parts.next().map(str::to_string);
    let quote = parts.next().map(str::to_string);
    (base, quote)
}

/// Parse an RFC 3339 / ISO 8601 UTC timestamp string to Unix seconds.
pub fn parse_iso_to_unix_secs(s: &str) -> Option<f64> {
    let s = s.trim();
    let s = s.strip_suffix('Z').unwrap_or(s);
    let s = if let Some(dot) = s.find('.') { &s[..dot] } else { s };
    let s = if s.len() > 19 {
        let b = s.as_bytes()[19];
        if b == b'+' || b == b'-' { &s[..19] } else { s }
    } else {
        s
    };
    if !s.is_ascii() {
        return None;
    }
    let (year, month, day, hour, minute, second): (i64, i64, i64, i64, i64, i64) =
        if s.len() == 10 {
            (s[0..4].parse().ok()?, s[5..7].parse().ok()?, s[8..10].parse().ok()?, 0, 0, 0)
        } else if s.len() >= 19 {
            (s[0..4].parse().ok()?, s[5..7].parse().ok()?, s[8..10].parse().ok()?,
             s[11..13].parse().ok()?, s[14..16].parse().ok()?, s[17..19].parse().ok()?)
        } else {
            return None;
        };

    let a = (14 - month) / 12;
    let y = year + 4800 - a;
    let m = month + 12 * a - 3;
    let jdn = day + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045;
    let unix_days = jdn - 2_440_588;
    Some((unix_days * 86400 + hour * 3600 + minute * 60 + second) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalizerConfig;
    use crate::normalizer::Normalizer;
    use crate::types::{EventType, SourceKind};
    use serde_json::json;

    fn pool(created: &str) -> serde_json::Value {
        json!({
            "id": "eth_0xpool",
            "type": "pool",
            "attributes": {
                "address": "0xpool",
                "name": "PEPE / WETH",
                "base_token_price_usd": "0.0001",
                "reserve_in_usd": "80000.5",
                "pool_created_at": created,
                "price_change_percentage": {"m5": "0.5", "h1": "4", "h6": "10", "h24": "22"},
                "volume_usd": {"m5": "70000", "h1": "90000", "h24": "150000"},
                "transactions": {
                    "h1": {"buys": 30, "sells": 25, "buyers": 20, "sellers": 18},
                    "h24": {"buys": 300, "sells": 250}
                }
            },
            "relationships": {
                "base_token": {"data": {"id": "eth_0xbase", "type": "token"}},
                "quote_token": {"data": {"id": "eth_0xweth", "type": "token"}},
                "dex": {"data": {"id": "uniswap_v3", "type": "dex"}}
            }
        })
    }

    #[test]
    fn iso_timestamps_parse() {
        assert_eq!(parse_iso_to_unix_secs("1970-01-01T00:00:00Z"), Some(0.0));
        assert_eq!(parse_iso_to_unix_secs("2023-11-14T22:13:20Z"), Some(1_700_000_000.0));
        assert_eq!(parse_iso_to_unix_secs("2023-11-14T22:13:20.123+00:00"), Some(1_700_000_000.0));
        assert_eq!(parse_iso_to_unix_secs("garbage"), None);
    }

    #[test]
    fn pool_is_normalized() {
        let raw = RawPairRecord::new(pool("2023-11-14T20:13:20Z"), None, 1_700_000_000_000);
        let e = Normalizer::new(NormalizerConfig::default())
            .normalize(&raw, SourceKind::GeckoTerminal)
            .unwrap();
        assert_eq!(e.chain, "ethereum");
        assert_eq!(e.dex, "uniswap_v3");
        assert_eq!(e.pair_address, "0xpool");
        assert_eq!(e.token0, "0xbase");
        assert_eq!(e.token1.as_deref(), Some("0xweth"));
        assert_eq!(e.token_symbol.as_deref(), Some("PEPE"));
        assert_eq!(e.quote_symbol.as_deref(), Some("WETH"));
        assert_eq!(e.liquidity, 80_000.5);
        assert_eq!(e.tx_1h, Some(55));
        assert_eq!(e.tx_5m, None);
        assert_eq!(e.tx_24h, 550);
        assert_eq!(e.age_minutes, Some(120.0));
        assert_eq!(e.event_type, EventType::VolumeSpike);
        assert!((e.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn network_with_underscore_is_split_from_the_right() {
        let mut p = pool("2023-11-14T20:13:20Z");
        p["id"] = json!("polygon_pos_0xpool");
        p["attributes"]["address"] = json!(null);
        p["relationships"]["base_token"]["data"]["id"] = json!("polygon_pos_0xbase");
        let raw = RawPairRecord::new(p, None, 1_700_000_000_000);
        let e = Normalizer::new(NormalizerConfig::default())
            .normalize(&raw, SourceKind::GeckoTerminal)
            .unwrap();
        assert_eq!(e.chain, "polygon");
        assert_eq!(e.pair_address, "0xpool");
        assert_eq!(e.token0, "0xbase");
    }
}

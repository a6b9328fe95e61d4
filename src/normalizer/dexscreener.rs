//! DexScreener `pairs[]` objects.

use super::{buys_plus_sells, count, normalize_chain, num, path, text, PairFields};
use crate::types::RawPairRecord;

pub(super) fn extract(raw: &RawPairRecord) -> PairFields {
    let v = &raw.payload;

    let chain = text(v.get("chainId"))
        .or_else(|| raw.chain.clone())
        .map(|c| normalize_chain(&c))
        .unwrap_or_else(|| "unknown".to_string());

    PairFields {
        chain,
        dex: text(v.get("dexId")).unwrap_or_else(|| "unknown".to_string()),
        pair_address: text(v.get("pairAddress")).unwrap_or_default(),
        token0: text(path(v, &["baseToken", "address"])).unwrap_or_default(),
        token1: text(path(v, &["quoteToken", "address"])),
        token_name: text(path(v, &["baseToken", "name"])),
        token_symbol: text(path(v, &["baseToken", "symbol"])),
        quote_symbol: text(path(v, &["quoteToken", "symbol"])),
        price_usd: num(v.get("priceUsd")),
        price_change_5m: num(path(v, &["priceChange", "m5"])),
        price_change_1h: num(path(v, &["priceChange", "h1"])),
        price_change_6h: num(path(v, &["priceChange", "h6"])),
        price_change_24h: num(path(v, &["priceChange", "h24"])),
        volume_5m: num(path(v, &["volume", "m5"])),
        volume_1h: num(path(v, &["volume", "h1"])),
        volume_24h: num(path(v, &["volume", "h24"])),
        liquidity: num(path(v, &["liquidity", "usd"])),
        tx_5m: buys_plus_sells(path(v, &["txns", "m5"])),
        tx_1h: buys_plus_sells(path(v, &["txns", "h1"])),
        tx_24h: buys_plus_sells(path(v, &["txns", "h24"])),
        created_at_ms: count(v.get("pairCreatedAt")),
        rank: None,
    }
}

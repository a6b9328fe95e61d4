//! DEXTools ranked entries (gainers / hot pairs).
//!
//! Two layouts are accepted: the flat `id{pair,token,chain}` + `metrics{}` form and
//! the v2 ranking form (`address`, `mainToken`, `sideToken`, `exchange`, `variation24h`).
//! The fetcher injects `dextools_rank` from list position when the entry has no `rank`.

use super::{count, normalize_chain, num, path, text, PairFields};
use crate::types::RawPairRecord;

pub(super) fn extract(raw: &RawPairRecord) -> PairFields {
    let v = &raw.payload;

    let chain = text(path(v, &["id", "chain"]))
        .or_else(|| raw.chain.clone())
        .map(|c| normalize_chain(&c))
        .unwrap_or_else(|| "unknown".to_string());

    let rank = count(v.get("dextools_rank"))
        .or_else(|| count(v.get("rank")))
        .and_then(|r| u32::try_from(r).ok());

    PairFields {
        chain,
        dex: text(path(v, &["dex", "name"]))
            .or_else(|| text(path(v, &["exchange", "name"])))
            .unwrap_or_else(|| "unknown".to_string()),
        pair_address: text(path(v, &["id", "pair"]))
            .or_else(|| text(v.get("address")))
            .unwrap_or_default(),
        token0: text(path(v, &["id", "token"]))
            .or_else(|| text(path(v, &["mainToken", "address"])))
            .unwrap_or_default(),
        token1: text(path(v, &["sideToken", "address"])),
        token_name: text(v.get("name")).or_else(|| text(path(v, &["mainToken", "name"]))),
        token_symbol: text(v.get("symbol")).or_else(|| text(path(v, &["mainToken", "symbol"]))),
        quote_symbol: text(path(v, &["sideToken", "symbol"])),
        price_usd: num(v.get("price")),
        price_change_1h: num(path(v, &["metrics", "price_change_1h"])),
        price_change_24h: num(path(v, &["metrics", "price_change_24h"]))
            .or_else(|| num(v.get("variation24h"))),
        volume_24h: num(path(v, &["metrics", "volume_24h"])),
        liquidity: num(path(v, &["metrics", "liquidity"])),
        rank,
        ..PairFields::default()
    }
}

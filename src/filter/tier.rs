//! 0-100 admission score used only for tiering and verification requests.

use crate::types::NormalizedPairEvent;

const LIQUIDITY_BUCKETS: &[(f64, u8)] = &[
    (100_000.0, 35),
    (50_000.0, 28),
    (20_000.0, 21),
    (10_000.0, 14),
    (5_000.0, 7),
];

const VOLUME_BUCKETS: &[(f64, u8)] = &[
    (100_000.0, 25),
    (20_000.0, 20),
    (5_000.0, 15),
    (500.0, 10),
    (50.0, 5),
];

const PRICE_BUCKETS: &[(f64, u8)] = &[
    (100.0, 25),
    (50.0, 20),
    (20.0, 15),
    (10.0, 10),
    (5.0, 5),
];

const TX_BUCKETS: &[(f64, u8)] = &[
    (200.0, 15),
    (50.0, 12),
    (20.0, 9),
    (5.0, 6),
    (1.0, 3),
];

/// Points for the first bucket whose floor `value` reaches. Buckets are sorted descending.
fn bucket(value: f64, buckets: &[(f64, u8)]) -> u8 {
    buckets
        .iter()
        .find(|(floor, _)| value >= *floor)
        .map(|(_, points)| *points)
        .unwrap_or(0)
}

/// Weighted sum: liquidity 35, volume 25, price 25, tx 15.
pub fn tier_score(e: &NormalizedPairEvent) -> u8 {
    let volume = e.volume_24h.max(e.volume_1h.unwrap_or(0.0));
    let price = e
        .price_change_1h
        .unwrap_or(0.0)
        .max(e.price_change_24h.unwrap_or(0.0));
    let tx = e.tx_24h.max(e.tx_1h.unwrap_or(0)) as f64;

    let total = bucket(e.liquidity, LIQUIDITY_BUCKETS)
        + bucket(volume, VOLUME_BUCKETS)
        + bucket(price, PRICE_BUCKETS)
        + bucket(tx, TX_BUCKETS);
    total.min(100)
}

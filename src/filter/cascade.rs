//! Level gates. Each is a pure function of the event and the filter config.
//! Absent numerics count as zero here.

use crate::config::FilterConfig;
use crate::types::{FilterReason, NormalizedPairEvent};

/// Level-0 viability: liquidity floor, then "anything happened in 24h".
pub fn level0(e: &NormalizedPairEvent, cfg: &FilterConfig) -> Result<(), FilterReason> {
    if e.liquidity < cfg.min_liquidity {
        return Err(FilterReason::LowLiquidity { liquidity: e.liquidity });
    }
    let pc24 = e.price_change_24h.unwrap_or(0.0);
    if e.volume_24h < 100.0 && e.tx_24h < 5 && pc24 == 0.0 {
        return Err(FilterReason::NoActivity);
    }
    Ok(())
}

/// Additive 1h momentum score. Every rule only adds, so raising any input never lowers it.
pub fn momentum_score(e: &NormalizedPairEvent) -> u8 {
    let mut score = 0u8;

    let vol_1h = e.volume_1h.unwrap_or(0.0);
    if vol_1h >= 50.0 {
        score += 2;
    } else if vol_1h >= 20.0 {
        score += 1;
    }

    let tx_1h = e.tx_1h.unwrap_or(0);
    if tx_1h >= 3 {
        score += 2;
    } else if tx_1h >= 1 {
        score += 1;
    }

    if e.price_change_1h.unwrap_or(0.0) > 0.0 {
        score += 1;
    }
    if e.price_change_24h.unwrap_or(0.0) > 5.0 {
        score += 1;
    }

    score
}

pub fn level1(e: &NormalizedPairEvent, cfg: &FilterConfig) -> (u8, Result<(), FilterReason>) {
    let score = momentum_score(e);
    if score >= cfg.momentum_score_threshold {
        (score, Ok(()))
    } else {
        (score, Err(FilterReason::LowMomentum { score }))
    }
}

/// Level-2: deep liquidity with no trading behind it.
pub fn level2(e: &NormalizedPairEvent, cfg: &FilterConfig) -> Result<(), FilterReason> {
    if e.liquidity > cfg.fake_liq_threshold
        && e.volume_24h < cfg.fake_liq_min_volume_24h
        && e.tx_24h < cfg.fake_liq_min_tx_24h
    {
        return Err(FilterReason::FakeLiquidity { liquidity: e.liquidity });
    }
    Ok(())
}

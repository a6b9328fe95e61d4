//! Off-chain pair screening: polls DEX feeds, normalizes pairs, filters noise,
//! and queues high-tier candidates for on-chain verification.

pub mod api;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod normalizer;
pub mod pipeline;
pub mod scheduler;
pub mod state;
pub mod types;

//! Chain identifier aliasing shared by every source.

use crate::types::SourceKind;

/// `(alias, canonical)` pairs. Anything not listed is lowercased and passed through.
const CHAIN_ALIASES: &[(&str, &str)] = &[
    ("eth", "ethereum"),
    ("ether", "ethereum"),
    ("mainnet", "ethereum"),
    ("arb", "arbitrum"),
    ("op", "optimism"),
    ("matic", "polygon"),
    ("polygon_pos", "polygon"),
    ("sol", "solana"),
    ("bnb", "bsc"),
    ("avax", "avalanche"),
];

/// Map a source-specific chain id onto the canonical lowercase name.
pub fn normalize_chain(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    CHAIN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lower)
}

/// Reverse lookup: the chain id a given source expects in its URLs.
pub fn source_chain_id(source: SourceKind, canonical: &str) -> String {
    match (source, canonical) {
        (SourceKind::DexTools, "ethereum") => "ether".to_string(),
        (SourceKind::GeckoTerminal, "ethereum") => "eth".to_string(),
        (SourceKind::GeckoTerminal, "polygon") => "polygon_pos".to_string(),
        (_, other) => other.to_string(),
    }
}

use crate::{CoinType, LendingError};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

pub const UNKNOWN_SYMBOL: &str = "unknown";

/// Display metadata of a coin type
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CoinMetadata {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    #[serde(default)]
    pub icon_url: Option<String>,
}

/// Shared coin metadata cache keyed by coin type.
///
/// Metadata for a coin type never changes on chain, so entries stay valid until they are
/// explicitly invalidated. Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct CoinMetadataCache {
    entries: Arc<RwLock<HashMap<CoinType, CoinMetadata>>>,
}

impl CoinMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = (CoinType, CoinMetadata)>) -> Self {
        let cache = Self::new();
        for (coin_type, metadata) in entries {
            cache.insert(coin_type, metadata);
        }
        cache
    }

    pub fn insert(&self, coin_type: CoinType, metadata: CoinMetadata) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(coin_type, metadata);
    }

    pub fn get(&self, coin_type: &CoinType) -> Result<CoinMetadata, LendingError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(coin_type)
            .cloned()
            .ok_or_else(|| LendingError::MissingMetadata(coin_type.to_string()))
    }

    pub fn contains(&self, coin_type: &CoinType) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(coin_type)
    }

    // Missing metadata is a soft error, render it as unknown
    pub fn symbol_or_unknown(&self, coin_type: &CoinType) -> String {
        match self.get(coin_type) {
            Ok(metadata) => metadata.symbol,
            Err(e) => {
                debug!("{}", e);
                UNKNOWN_SYMBOL.to_string()
            }
        }
    }

    pub fn name_or_unknown(&self, coin_type: &CoinType) -> String {
        self.get(coin_type).map(|m| m.name).unwrap_or_else(|_| UNKNOWN_SYMBOL.to_string())
    }

    pub fn invalidate(&self, coin_type: &CoinType) -> Option<CoinMetadata> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(coin_type)
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Format large numbers for display
pub fn format_large_number(num: f64) -> String {
    const BILLION: f64 = 1_000_000_000.0;
    const MILLION: f64 = 1_000_000.0;
    const THOUSAND: f64 = 1_000.0;

    match num {
        n if n >= BILLION => format!("{:.2}bn", n / BILLION),
        n if n >= MILLION => format!("{:.2}m", n / MILLION),
        n if n >= THOUSAND => format!("{:.2}k", n / THOUSAND),
        _ => format!("{:.2}", num),
    }
}

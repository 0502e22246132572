use crate::models::{PriceSource, PriceUpdate, Reserve};
use common::{CoinType, LendingError, PriceIdentifier};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Primary price oracle, keyed by feed identifier
pub trait PriceOracle {
    /// Feed the oracle currently expects for `coin_type`, if it knows the coin
    fn expected_identifier(&self, coin_type: &CoinType) -> Option<PriceIdentifier>;

    fn get_price(&self, identifier: &PriceIdentifier, now_s: u64) -> Result<PriceUpdate, LendingError>;
}

/// Secondary price source used when a reserve's configured feed is not the expected one
pub trait FallbackPriceSource {
    fn fallback_price(&self, coin_type: &CoinType, now_s: u64) -> Result<PriceUpdate, LendingError>;
}

/// In-memory oracle serving fixed prices, for snapshots and tests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticPriceOracle {
    #[serde(default)]
    pub feeds: HashMap<CoinType, PriceIdentifier>,
    #[serde(default)]
    pub prices: HashMap<PriceIdentifier, PriceUpdate>,
    #[serde(default)]
    pub fallback_prices: HashMap<CoinType, PriceUpdate>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, coin_type: CoinType, identifier: PriceIdentifier, update: PriceUpdate) -> Self {
        self.feeds.insert(coin_type, identifier.clone());
        self.prices.insert(identifier, update);
        self
    }

    pub fn with_fallback(mut self, coin_type: CoinType, update: PriceUpdate) -> Self {
        self.fallback_prices.insert(coin_type, update);
        self
    }
}

impl PriceOracle for StaticPriceOracle {
    fn expected_identifier(&self, coin_type: &CoinType) -> Option<PriceIdentifier> {
        self.feeds.get(coin_type).cloned()
    }

    fn get_price(&self, identifier: &PriceIdentifier, _now_s: u64) -> Result<PriceUpdate, LendingError> {
        self.prices
            .get(identifier)
            .cloned()
            .ok_or_else(|| LendingError::PriceNotFound(identifier.to_string()))
    }
}

impl FallbackPriceSource for StaticPriceOracle {
    fn fallback_price(&self, coin_type: &CoinType, _now_s: u64) -> Result<PriceUpdate, LendingError> {
        self.fallback_prices
            .get(coin_type)
            .cloned()
            .ok_or_else(|| LendingError::PriceNotFound(coin_type.to_string()))
    }
}

fn check_update(reserve: &Reserve, update: &PriceUpdate, now_s: u64, max_staleness_s: u64) -> Result<(), LendingError> {
    if update.price.is_zero() || update.smoothed_price.is_zero() {
        return Err(LendingError::InvalidPrice(reserve.coin_type.to_string()));
    }
    if now_s.saturating_sub(update.publish_time_s) > max_staleness_s {
        return Err(LendingError::StalePrice {
            coin_type: reserve.coin_type.to_string(),
            publish_time_s: update.publish_time_s,
            now_s,
        });
    }
    Ok(())
}

/// Price one reserve, from the primary oracle when its configured feed is the expected
/// one and from the fallback source otherwise.
pub fn refresh_price(
    reserve: &Reserve,
    oracle: &dyn PriceOracle,
    fallback: &dyn FallbackPriceSource,
    now_s: u64,
    max_staleness_s: u64,
) -> Result<Reserve, LendingError> {
    let configured = &reserve.price_identifier;
    let expected = oracle.expected_identifier(&reserve.coin_type);

    let (update, source) = match expected {
        Some(expected) if expected != *configured => {
            warn!(
                "reserve {} ({}) is configured with feed {} but the oracle expects {}, using fallback price",
                reserve.array_index, reserve.coin_type, configured, expected
            );
            let update = fallback.fallback_price(&reserve.coin_type, now_s)?;
            (update, PriceSource::Fallback { configured: configured.clone(), expected })
        }
        _ => (oracle.get_price(configured, now_s)?, PriceSource::Primary),
    };

    check_update(reserve, &update, now_s, max_staleness_s)?;
    debug!("reserve {} priced at {:.6} ({:?})", reserve.array_index, update.price, source);
    Ok(reserve.with_price(&update, source))
}

/// Price every reserve; failures are reported per reserve.
pub fn refresh_prices(
    reserves: &[Reserve],
    oracle: &dyn PriceOracle,
    fallback: &dyn FallbackPriceSource,
    now_s: u64,
    max_staleness_s: u64,
) -> Vec<Result<Reserve, LendingError>> {
    reserves
        .iter()
        .map(|reserve| refresh_price(reserve, oracle, fallback, now_s, max_staleness_s))
        .collect()
}

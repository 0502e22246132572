//! One refresh cycle: compound interest, reprice, update reward accumulators, then
//! recompute every obligation from the refreshed reserves.
//!
//! Each cycle works on fresh copies of the snapshot, so readers of a previous
//! [`RefreshCycle`] never observe a half-refreshed state.

use crate::math::Decimal;
use crate::models::{
    claimable_rewards, refresh_obligation, HealthStatus, Obligation, ParsedObligation,
    PoolRewardManager, PriceSource, Reserve,
};
use crate::oracle::{refresh_price, FallbackPriceSource, PriceOracle};
use crate::utils::consts::MILLIS_PER_SECOND;
use common::asset_utils::CoinMetadataCache;
use common::{CoinType, LendingError};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Collaborators and settings shared by every cycle
pub struct RefreshContext<'a> {
    pub oracle: &'a dyn PriceOracle,
    pub fallback: &'a dyn FallbackPriceSource,
    pub metadata: &'a CoinMetadataCache,
    pub max_price_staleness_s: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedPoolReward {
    pub reward_index: usize,
    pub coin_type: CoinType,
    pub symbol: String,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    pub total_rewards: u64,
    pub allocated_rewards: Decimal,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReserve {
    pub array_index: u64,
    pub coin_type: CoinType,
    pub symbol: String,
    pub name: String,
    pub mint_decimals: u8,
    pub price: Decimal,
    pub smoothed_price: Decimal,
    pub price_source: PriceSource,
    pub available_amount: u64,
    pub borrowed_amount: Decimal,
    pub total_supply: Decimal,
    pub utilization: Decimal,
    pub borrow_apr: Decimal,
    pub supply_apr: Decimal,
    pub ctoken_ratio: Decimal,
    pub deposited_value_usd: Decimal,
    pub borrowed_value_usd: Decimal,
    pub open_ltv_pct: u8,
    pub close_ltv_pct: u8,
    pub isolated: bool,
    pub deposit_rewards: Vec<ParsedPoolReward>,
    pub borrow_rewards: Vec<ParsedPoolReward>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveFailure {
    pub array_index: u64,
    pub coin_type: CoinType,
    pub error: LendingError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObligationFailure {
    pub obligation_id: String,
    pub error: LendingError,
}

/// Output of one refresh at `snapshot_time_ms`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshCycle {
    pub snapshot_time_ms: u64,
    /// Refreshed reserves, ordered by array index
    pub reserves: Vec<Reserve>,
    pub parsed_reserves: Vec<ParsedReserve>,
    pub obligations: Vec<ParsedObligation>,
    pub reserve_failures: Vec<ReserveFailure>,
    pub obligation_failures: Vec<ObligationFailure>,
}

impl RefreshCycle {
    pub fn obligation(&self, id: &str) -> Option<&ParsedObligation> {
        self.obligations.iter().find(|obligation| obligation.id == id)
    }

    pub fn liquidatable(&self) -> impl Iterator<Item = &ParsedObligation> {
        self.obligations.iter().filter(|obligation| obligation.health == HealthStatus::Liquidatable)
    }
}

fn parse_pool_rewards(
    manager: &PoolRewardManager,
    metadata: &CoinMetadataCache,
    now_ms: u64,
) -> Vec<ParsedPoolReward> {
    manager
        .pool_rewards
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| slot.as_ref().map(|reward| (index, reward)))
        .map(|(reward_index, reward)| ParsedPoolReward {
            reward_index,
            coin_type: reward.coin_type.clone(),
            symbol: metadata.symbol_or_unknown(&reward.coin_type),
            start_time_ms: reward.start_time_ms,
            end_time_ms: reward.end_time_ms,
            total_rewards: reward.total_rewards,
            allocated_rewards: reward.allocated_rewards,
            is_active: reward.is_active(now_ms),
        })
        .collect()
}

/// View model of a refreshed reserve
pub fn parse_reserve(
    reserve: &Reserve,
    metadata: &CoinMetadataCache,
    now_ms: u64,
) -> Result<ParsedReserve, LendingError> {
    let total_supply = reserve.total_supply()?;
    Ok(ParsedReserve {
        array_index: reserve.array_index,
        coin_type: reserve.coin_type.clone(),
        symbol: metadata.symbol_or_unknown(&reserve.coin_type),
        name: metadata.name_or_unknown(&reserve.coin_type),
        mint_decimals: reserve.mint_decimals,
        price: reserve.price,
        smoothed_price: reserve.smoothed_price,
        price_source: reserve.price_source.clone(),
        available_amount: reserve.available_amount,
        borrowed_amount: reserve.borrowed_amount,
        total_supply,
        utilization: reserve.utilization()?,
        borrow_apr: reserve.current_borrow_apr()?,
        supply_apr: reserve.current_supply_apr()?,
        ctoken_ratio: reserve.ctoken_ratio()?,
        deposited_value_usd: reserve.market_value(total_supply)?,
        borrowed_value_usd: reserve.market_value(reserve.borrowed_amount)?,
        open_ltv_pct: reserve.config.open_ltv_pct,
        close_ltv_pct: reserve.config.close_ltv_pct,
        isolated: reserve.config.isolated,
        deposit_rewards: parse_pool_rewards(&reserve.deposits_pool_reward_manager, metadata, now_ms),
        borrow_rewards: parse_pool_rewards(&reserve.borrows_pool_reward_manager, metadata, now_ms),
    })
}

// Interest, price and reward accumulators of one reserve, in that order
fn refresh_reserve(reserve: &Reserve, ctx: &RefreshContext<'_>, now_ms: u64) -> (Reserve, Vec<LendingError>) {
    let now_s = now_ms / MILLIS_PER_SECOND;
    let mut errors = Vec::new();

    let mut refreshed = match reserve.validate().and_then(|_| reserve.compound_interest(now_s)) {
        Ok(compounded) => compounded,
        Err(e) => {
            errors.push(e);
            reserve.clone()
        }
    };

    match refresh_price(&refreshed, ctx.oracle, ctx.fallback, now_s, ctx.max_price_staleness_s) {
        Ok(priced) => refreshed = priced,
        Err(e) => errors.push(e),
    }

    match refreshed.update_pool_reward_managers(now_ms) {
        Ok(updated) => refreshed = updated,
        Err(e) => errors.push(e),
    }

    (refreshed, errors)
}

// First failure of any reserve the obligation deposits into or borrows from
fn failed_dependency(obligation: &Obligation, failed: &HashMap<u64, LendingError>) -> Option<LendingError> {
    obligation
        .deposits
        .iter()
        .map(|deposit| deposit.reserve_array_index)
        .chain(obligation.borrows.iter().map(|borrow| borrow.reserve_array_index))
        .find_map(|index| failed.get(&index).cloned())
}

/// Run a full refresh of `reserves` and `obligations` at `now_ms`.
///
/// Failures are per entity: a reserve that fails keeps its previous state and every
/// obligation depending on it fails with that reserve's first error.
pub fn refresh_cycle(
    reserves: &[Reserve],
    obligations: &[Obligation],
    ctx: &RefreshContext<'_>,
    now_ms: u64,
) -> RefreshCycle {
    let now_s = now_ms / MILLIS_PER_SECOND;
    let mut ordered: Vec<&Reserve> = reserves.iter().collect();
    ordered.sort_by_key(|reserve| reserve.array_index);

    let mut refreshed_reserves = Vec::with_capacity(ordered.len());
    let mut parsed_reserves = Vec::with_capacity(ordered.len());
    let mut reserve_failures: Vec<ReserveFailure> = Vec::new();

    for reserve in ordered {
        let (refreshed, errors) = refresh_reserve(reserve, ctx, now_ms);
        for error in errors {
            warn!("reserve {} ({}) failed to refresh: {}", reserve.array_index, reserve.coin_type, error);
            reserve_failures.push(ReserveFailure {
                array_index: reserve.array_index,
                coin_type: reserve.coin_type.clone(),
                error,
            });
        }

        match parse_reserve(&refreshed, ctx.metadata, now_ms) {
            Ok(parsed) => parsed_reserves.push(parsed),
            Err(error) => {
                warn!("reserve {} could not be parsed: {}", refreshed.array_index, error);
                reserve_failures.push(ReserveFailure {
                    array_index: refreshed.array_index,
                    coin_type: refreshed.coin_type.clone(),
                    error,
                });
            }
        }
        refreshed_reserves.push(refreshed);
    }

    let mut failed: HashMap<u64, LendingError> = HashMap::new();
    for failure in &reserve_failures {
        failed.entry(failure.array_index).or_insert_with(|| failure.error.clone());
    }

    let mut parsed_obligations = Vec::with_capacity(obligations.len());
    let mut obligation_failures = Vec::new();
    for obligation in obligations {
        let parsed = match failed_dependency(obligation, &failed) {
            Some(error) => Err(error),
            None => refresh_obligation(obligation, &refreshed_reserves, now_s, ctx.max_price_staleness_s)
                .and_then(|mut parsed| {
                    parsed.rewards = claimable_rewards(obligation, &refreshed_reserves, now_ms)?;
                    Ok(parsed)
                }),
        };
        match parsed {
            Ok(parsed) => parsed_obligations.push(parsed),
            Err(error) => {
                warn!("obligation {} failed to refresh: {}", obligation.id, error);
                obligation_failures.push(ObligationFailure { obligation_id: obligation.id.clone(), error });
            }
        }
    }

    info!(
        "refreshed {} reserves ({} failures) and {} obligations ({} failures) at {}ms",
        parsed_reserves.len(),
        reserve_failures.len(),
        parsed_obligations.len(),
        obligation_failures.len(),
        now_ms
    );

    RefreshCycle {
        snapshot_time_ms: now_ms,
        reserves: refreshed_reserves,
        parsed_reserves,
        obligations: parsed_obligations,
        reserve_failures,
        obligation_failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reserve::tests::test_reserve;
    use crate::models::{Borrow, Deposit, PoolReward, PriceUpdate};
    use crate::oracle::StaticPriceOracle;
    use common::asset_utils::{CoinMetadata, UNKNOWN_SYMBOL};

    const NOW_MS: u64 = 2_000_000;

    fn price(value: u64, publish_time_s: u64) -> PriceUpdate {
        PriceUpdate {
            price: Decimal::from(value),
            smoothed_price: Decimal::from(value),
            publish_time_s,
        }
    }

    fn market() -> (Vec<Reserve>, Vec<Obligation>, StaticPriceOracle) {
        let mut usdc = test_reserve(0, 1_000, 0);
        usdc.deposits_pool_reward_manager.pool_rewards =
            vec![Some(PoolReward::new(CoinType::from("0x2::sui::SUI"), 1_000_000, 3_000_000, 100))];
        let sui = test_reserve(1, 500, 500);

        let oracle = StaticPriceOracle::new()
            .with_feed(usdc.coin_type.clone(), usdc.price_identifier.clone(), price(1, 1_995))
            .with_feed(sui.coin_type.clone(), sui.price_identifier.clone(), price(2, 1_990));

        let healthy = Obligation {
            id: "0xhealthy".to_string(),
            owner: "0xalice".to_string(),
            deposits: vec![Deposit {
                reserve_array_index: 0,
                coin_type: usdc.coin_type.clone(),
                deposited_ctoken_amount: 100,
            }],
            borrows: vec![Borrow {
                reserve_array_index: 1,
                coin_type: sui.coin_type.clone(),
                borrowed_amount: Decimal::from(10u64),
                cumulative_borrow_rate: Decimal::one(),
            }],
            user_reward_managers: Vec::new(),
        };
        let dangling = Obligation {
            id: "0xdangling".to_string(),
            owner: "0xbob".to_string(),
            deposits: vec![Deposit {
                reserve_array_index: 9,
                coin_type: CoinType::from("0x9::coin::COIN"),
                deposited_ctoken_amount: 1,
            }],
            borrows: Vec::new(),
            user_reward_managers: Vec::new(),
        };

        // out of order on purpose
        (vec![sui, usdc], vec![healthy, dangling], oracle)
    }

    #[test]
    fn test_full_cycle() {
        let (reserves, obligations, oracle) = market();
        let metadata = CoinMetadataCache::with_entries([(
            reserves[1].coin_type.clone(),
            CoinMetadata { symbol: "USDC".into(), name: "USD Coin".into(), decimals: 0, icon_url: None },
        )]);
        let ctx = RefreshContext {
            oracle: &oracle,
            fallback: &oracle,
            metadata: &metadata,
            max_price_staleness_s: 60,
        };

        let cycle = refresh_cycle(&reserves, &obligations, &ctx, NOW_MS);

        assert!(cycle.reserve_failures.is_empty());
        assert_eq!(cycle.reserves[0].array_index, 0);
        assert_eq!(cycle.reserves[1].price, Decimal::from(2u64));
        // sui reserve accrued interest over 1000s at 50% utilization
        assert!(cycle.reserves[1].cumulative_borrow_rate > Decimal::one());
        assert_eq!(cycle.reserves[1].interest_last_update_timestamp_s, 2_000);
        assert_eq!(cycle.reserves[0].deposits_pool_reward_manager.last_update_time_ms, NOW_MS);

        assert_eq!(cycle.parsed_reserves[0].symbol, "USDC");
        assert_eq!(cycle.parsed_reserves[1].symbol, UNKNOWN_SYMBOL);
        assert_eq!(cycle.parsed_reserves[0].deposit_rewards[0].symbol, UNKNOWN_SYMBOL);
        assert!(cycle.parsed_reserves[0].deposit_rewards[0].is_active);
        assert_eq!(cycle.parsed_reserves[0].deposit_rewards[0].allocated_rewards, Decimal::from(50u64));

        let healthy = cycle.obligation("0xhealthy").unwrap();
        assert_eq!(healthy.health, HealthStatus::Healthy);
        assert_eq!(healthy.spot.deposited_value_usd, Decimal::from(100u64));
        assert!(healthy.borrows[0].borrowed_amount > Decimal::from(10u64));

        assert_eq!(cycle.obligation_failures.len(), 1);
        assert_eq!(cycle.obligation_failures[0].obligation_id, "0xdangling");
        assert_eq!(cycle.obligation_failures[0].error, LendingError::ReserveNotFound(9));
        assert_eq!(cycle.liquidatable().count(), 0);
    }

    #[test]
    fn test_stale_price_is_reported_not_masked() {
        let (reserves, obligations, _) = market();
        let oracle = StaticPriceOracle::new()
            .with_feed(reserves[1].coin_type.clone(), reserves[1].price_identifier.clone(), price(1, 1_995))
            .with_feed(reserves[0].coin_type.clone(), reserves[0].price_identifier.clone(), price(5, 100));
        let metadata = CoinMetadataCache::new();
        let ctx = RefreshContext {
            oracle: &oracle,
            fallback: &oracle,
            metadata: &metadata,
            max_price_staleness_s: 60,
        };

        let cycle = refresh_cycle(&reserves, &obligations[..1], &ctx, NOW_MS);
        assert_eq!(cycle.reserve_failures.len(), 1);
        assert_eq!(cycle.reserve_failures[0].array_index, 1);
        assert!(matches!(cycle.reserve_failures[0].error, LendingError::StalePrice { .. }));
        // the previous price is kept
        assert_eq!(cycle.reserves[1].price, Decimal::one());

        assert!(cycle.obligations.is_empty());
        assert!(matches!(cycle.obligation_failures[0].error, LendingError::StalePrice { .. }));
    }

    #[test]
    fn test_invalid_reserve_fails_dependent_obligations() {
        let (mut reserves, obligations, oracle) = market();
        // usdc, deposited by the healthy obligation
        reserves[1].config.open_ltv_pct = 95;
        let mut untouched = obligations[0].clone();
        untouched.id = "0xborrow_only".to_string();
        untouched.deposits.clear();

        let metadata = CoinMetadataCache::new();
        let ctx = RefreshContext {
            oracle: &oracle,
            fallback: &oracle,
            metadata: &metadata,
            max_price_staleness_s: 60,
        };

        let cycle = refresh_cycle(&reserves, &[obligations[0].clone(), untouched], &ctx, NOW_MS);
        assert_eq!(cycle.reserve_failures.len(), 1);
        assert_eq!(cycle.reserve_failures[0].array_index, 0);
        assert!(cycle.reserve_failures[0].error.is_configuration_error());

        assert!(cycle.obligation("0xhealthy").is_none());
        assert_eq!(cycle.obligation_failures.len(), 1);
        assert_eq!(cycle.obligation_failures[0].obligation_id, "0xhealthy");
        assert_eq!(cycle.obligation_failures[0].error, cycle.reserve_failures[0].error);
        assert!(cycle.obligation("0xborrow_only").is_some());
    }
}

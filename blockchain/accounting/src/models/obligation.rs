//! Obligation risk: aggregates deposits and borrows across reserves into USD values,
//! borrow limits and liquidation thresholds.

use super::liquidity_mining::{update_user_reward_manager, UserRewardManager};
use super::reserve::Reserve;
use crate::math::{Decimal, TryAdd, TryDiv, TryMul};
use crate::utils::serde_helpers::serde_u64;
use common::{CoinType, LendingError, RewardSide};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    #[serde(with = "serde_u64")]
    pub reserve_array_index: u64,
    pub coin_type: CoinType,
    #[serde(with = "serde_u64")]
    pub deposited_ctoken_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Borrow {
    #[serde(with = "serde_u64")]
    pub reserve_array_index: u64,
    pub coin_type: CoinType,
    pub borrowed_amount: Decimal,
    /// Reserve rate at the borrow's last interaction
    pub cumulative_borrow_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: String,
    pub owner: String,
    #[serde(default)]
    pub deposits: Vec<Deposit>,
    #[serde(default)]
    pub borrows: Vec<Borrow>,
    #[serde(default)]
    pub user_reward_managers: Vec<UserRewardManager>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    BorrowLimitExceeded,
    Liquidatable,
}

/// Aggregated USD values of an obligation at one set of prices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub deposited_value_usd: Decimal,
    pub unweighted_borrowed_value_usd: Decimal,
    pub weighted_borrowed_value_usd: Decimal,
    pub allowed_borrow_value_usd: Decimal,
    pub unhealthy_borrow_value_usd: Decimal,
    pub super_unhealthy_borrow_value_usd: Decimal,
}

impl RiskMetrics {
    pub fn is_liquidatable(&self) -> bool {
        !self.weighted_borrowed_value_usd.is_zero()
            && self.weighted_borrowed_value_usd >= self.unhealthy_borrow_value_usd
    }

    pub fn exceeds_borrow_limit(&self) -> bool {
        !self.weighted_borrowed_value_usd.is_zero()
            && self.weighted_borrowed_value_usd >= self.allowed_borrow_value_usd
    }

    /// Weighted borrows over allowed borrows, `None` without borrowing power
    pub fn borrow_limit_usage(&self) -> Option<Decimal> {
        self.weighted_borrowed_value_usd.try_div(self.allowed_borrow_value_usd).ok()
    }

    pub fn net_value_usd(&self) -> Decimal {
        self.deposited_value_usd.saturating_sub(self.unweighted_borrowed_value_usd)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDeposit {
    pub reserve_array_index: u64,
    pub coin_type: CoinType,
    pub deposited_ctoken_amount: u64,
    pub deposited_amount: Decimal,
    pub deposited_value_usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedBorrow {
    pub reserve_array_index: u64,
    pub coin_type: CoinType,
    /// Debt compounded up to the reserve's current rate
    pub borrowed_amount: Decimal,
    pub borrowed_value_usd: Decimal,
    pub weighted_borrowed_value_usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationReward {
    pub reserve_array_index: u64,
    pub side: RewardSide,
    pub reward_index: usize,
    pub coin_type: CoinType,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedObligation {
    pub id: String,
    pub owner: String,
    pub deposits: Vec<ParsedDeposit>,
    pub borrows: Vec<ParsedBorrow>,
    /// At spot prices
    pub spot: RiskMetrics,
    /// Collateral at the lower and debt at the upper of spot and smoothed price
    pub conservative: RiskMetrics,
    pub health: HealthStatus,
    #[serde(default)]
    pub rewards: Vec<ObligationReward>,
}

fn find_reserve(reserves: &[Reserve], array_index: u64) -> Result<&Reserve, LendingError> {
    usize::try_from(array_index)
        .ok()
        .and_then(|index| reserves.get(index))
        .filter(|reserve| reserve.array_index == array_index)
        .ok_or(LendingError::ReserveNotFound(array_index))
}

/// Borrow amount compounded from the borrow's snapshotted rate to the reserve's rate
pub fn compound_debt(borrow: &Borrow, reserve: &Reserve) -> Result<Decimal, LendingError> {
    if reserve.cumulative_borrow_rate < borrow.cumulative_borrow_rate {
        return Err(LendingError::InvalidSnapshot(format!(
            "borrow rate of reserve {} regressed from {} to {}",
            reserve.array_index, borrow.cumulative_borrow_rate, reserve.cumulative_borrow_rate
        )));
    }
    borrow
        .borrowed_amount
        .try_mul(reserve.cumulative_borrow_rate.try_div(borrow.cumulative_borrow_rate)?)
}

// Contribution of one deposit to a borrow threshold, isolated reserves are capped
fn capped(reserve: &Reserve, value: Decimal, ltv: Decimal, cap_usd: u64) -> Result<Decimal, LendingError> {
    let contribution = value.try_mul(ltv)?;
    if reserve.config.isolated {
        return Ok(contribution.min(Decimal::from(cap_usd)));
    }
    Ok(contribution)
}

/// Recompute an obligation's values from reserves already refreshed to `now_s`.
///
/// `reserves` must be indexed by array index. Every referenced reserve needs a price no
/// older than `max_price_staleness_s`.
pub fn refresh_obligation(
    obligation: &Obligation,
    reserves: &[Reserve],
    now_s: u64,
    max_price_staleness_s: u64,
) -> Result<ParsedObligation, LendingError> {
    let isolated_borrows = obligation
        .borrows
        .iter()
        .map(|borrow| find_reserve(reserves, borrow.reserve_array_index))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|reserve| reserve.config.isolated)
        .count();
    if isolated_borrows > 1 {
        return Err(LendingError::IsolatedBorrowConflict { obligation_id: obligation.id.clone() });
    }

    let mut spot = RiskMetrics::default();
    let mut conservative = RiskMetrics::default();

    let mut deposits = Vec::with_capacity(obligation.deposits.len());
    for deposit in &obligation.deposits {
        let reserve = find_reserve(reserves, deposit.reserve_array_index)?;
        reserve.check_price_fresh(now_s, max_price_staleness_s)?;
        let config = &reserve.config;

        let deposited_amount = reserve.ctoken_to_liquidity(deposit.deposited_ctoken_amount)?;
        let values = [
            (&mut spot, reserve.market_value(deposited_amount)?),
            (&mut conservative, reserve.market_value_lower_bound(deposited_amount)?),
        ];
        for (metrics, value) in values {
            metrics.deposited_value_usd = metrics.deposited_value_usd.try_add(value)?;
            metrics.allowed_borrow_value_usd = metrics.allowed_borrow_value_usd.try_add(capped(
                reserve,
                value,
                config.open_ltv(),
                config.open_attributed_borrow_limit_usd,
            )?)?;
            metrics.unhealthy_borrow_value_usd = metrics.unhealthy_borrow_value_usd.try_add(capped(
                reserve,
                value,
                config.close_ltv(),
                config.close_attributed_borrow_limit_usd,
            )?)?;
            metrics.super_unhealthy_borrow_value_usd =
                metrics.super_unhealthy_borrow_value_usd.try_add(capped(
                    reserve,
                    value,
                    config.max_close_ltv(),
                    config.close_attributed_borrow_limit_usd,
                )?)?;
        }

        deposits.push(ParsedDeposit {
            reserve_array_index: deposit.reserve_array_index,
            coin_type: deposit.coin_type.clone(),
            deposited_ctoken_amount: deposit.deposited_ctoken_amount,
            deposited_amount,
            deposited_value_usd: reserve.market_value(deposited_amount)?,
        });
    }

    let mut borrows = Vec::with_capacity(obligation.borrows.len());
    for borrow in &obligation.borrows {
        let reserve = find_reserve(reserves, borrow.reserve_array_index)?;
        reserve.check_price_fresh(now_s, max_price_staleness_s)?;
        let borrow_weight = reserve.config.borrow_weight();

        let borrowed_amount = compound_debt(borrow, reserve)?;
        let values = [
            (&mut spot, reserve.market_value(borrowed_amount)?),
            (&mut conservative, reserve.market_value_upper_bound(borrowed_amount)?),
        ];
        for (metrics, value) in values {
            metrics.unweighted_borrowed_value_usd = metrics.unweighted_borrowed_value_usd.try_add(value)?;
            metrics.weighted_borrowed_value_usd = metrics
                .weighted_borrowed_value_usd
                .try_add(value.try_mul(borrow_weight)?)?;
        }

        let borrowed_value_usd = reserve.market_value(borrowed_amount)?;
        borrows.push(ParsedBorrow {
            reserve_array_index: borrow.reserve_array_index,
            coin_type: borrow.coin_type.clone(),
            borrowed_amount,
            borrowed_value_usd,
            weighted_borrowed_value_usd: borrowed_value_usd.try_mul(borrow_weight)?,
        });
    }

    // liquidation uses spot values, the borrow limit the conservative ones
    let health = if spot.is_liquidatable() {
        HealthStatus::Liquidatable
    } else if conservative.exceeds_borrow_limit() {
        HealthStatus::BorrowLimitExceeded
    } else {
        HealthStatus::Healthy
    };

    Ok(ParsedObligation {
        id: obligation.id.clone(),
        owner: obligation.owner.clone(),
        deposits,
        borrows,
        spot,
        conservative,
        health,
        rewards: Vec::new(),
    })
}

/// Rewards claimable by the obligation at `now_ms`, settled against the reserves'
/// reward managers.
pub fn claimable_rewards(
    obligation: &Obligation,
    reserves: &[Reserve],
    now_ms: u64,
) -> Result<Vec<ObligationReward>, LendingError> {
    let mut rewards = Vec::new();
    for user in &obligation.user_reward_managers {
        let reserve = find_reserve(reserves, user.reserve_array_index)?;
        let update = update_user_reward_manager(user, reserve.pool_reward_manager(user.side), now_ms)?;
        rewards.extend(update.claimable.into_iter().map(|claimable| ObligationReward {
            reserve_array_index: user.reserve_array_index,
            side: user.side,
            reward_index: claimable.reward_index,
            coin_type: claimable.coin_type,
            amount: claimable.amount,
        }));
    }
    Ok(rewards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::liquidity_mining::{PoolReward, PoolRewardManager};
    use crate::models::reserve::tests::test_reserve;
    use std::str::FromStr;

    const NOW_S: u64 = 1_010;

    fn deposit(reserve: &Reserve, ctokens: u64) -> Deposit {
        Deposit {
            reserve_array_index: reserve.array_index,
            coin_type: reserve.coin_type.clone(),
            deposited_ctoken_amount: ctokens,
        }
    }

    fn borrow(reserve: &Reserve, amount: u64) -> Borrow {
        Borrow {
            reserve_array_index: reserve.array_index,
            coin_type: reserve.coin_type.clone(),
            borrowed_amount: Decimal::from(amount),
            cumulative_borrow_rate: Decimal::one(),
        }
    }

    fn obligation(deposits: Vec<Deposit>, borrows: Vec<Borrow>) -> Obligation {
        Obligation {
            id: "0xob1".to_string(),
            owner: "0xowner".to_string(),
            deposits,
            borrows,
            user_reward_managers: Vec::new(),
        }
    }

    #[test]
    fn test_liquidation_threshold() {
        let reserves = vec![test_reserve(0, 100, 0), test_reserve(1, 1_000, 0)];
        let ob = obligation(vec![deposit(&reserves[0], 100)], vec![borrow(&reserves[1], 85)]);

        let parsed = refresh_obligation(&ob, &reserves, NOW_S, 60).unwrap();
        assert_eq!(parsed.spot.deposited_value_usd, Decimal::from(100u64));
        assert_eq!(parsed.spot.allowed_borrow_value_usd, Decimal::from(50u64));
        assert_eq!(parsed.spot.unhealthy_borrow_value_usd, Decimal::from(80u64));
        assert_eq!(parsed.spot.super_unhealthy_borrow_value_usd, Decimal::from(90u64));
        assert_eq!(parsed.spot.weighted_borrowed_value_usd, Decimal::from(85u64));
        assert_eq!(parsed.health, HealthStatus::Liquidatable);
        assert_eq!(parsed.health.to_string(), "liquidatable");
    }

    #[test]
    fn test_health_bands() {
        let reserves = vec![test_reserve(0, 100, 0), test_reserve(1, 1_000, 0)];
        let at = |amount| {
            let ob = obligation(vec![deposit(&reserves[0], 100)], vec![borrow(&reserves[1], amount)]);
            refresh_obligation(&ob, &reserves, NOW_S, 60).unwrap().health
        };
        assert_eq!(at(49), HealthStatus::Healthy);
        assert_eq!(at(50), HealthStatus::BorrowLimitExceeded);
        assert_eq!(at(79), HealthStatus::BorrowLimitExceeded);
        assert_eq!(at(80), HealthStatus::Liquidatable);

        let empty = refresh_obligation(&obligation(vec![], vec![]), &reserves, NOW_S, 60).unwrap();
        assert_eq!(empty.health, HealthStatus::Healthy);
    }

    #[test]
    fn test_health_bands_with_diverging_prices() {
        let mut reserves = vec![test_reserve(0, 100, 0), test_reserve(1, 1_000, 0)];
        reserves[0].smoothed_price = Decimal::from_percent(50);
        reserves[1].smoothed_price = Decimal::from(2u64);
        let at = |amount| {
            let ob = obligation(vec![deposit(&reserves[0], 100)], vec![borrow(&reserves[1], amount)]);
            refresh_obligation(&ob, &reserves, NOW_S, 60).unwrap().health
        };
        // conservative limit is 25 against debt valued at 2
        assert_eq!(at(12), HealthStatus::Healthy);
        assert_eq!(at(13), HealthStatus::BorrowLimitExceeded);
        // liquidation still waits for the spot threshold of 80
        assert_eq!(at(79), HealthStatus::BorrowLimitExceeded);
        assert_eq!(at(80), HealthStatus::Liquidatable);
    }

    #[test]
    fn test_borrow_weight_and_conservative_prices() {
        let mut reserves = vec![test_reserve(0, 100, 0), test_reserve(1, 1_000, 0)];
        reserves[0].smoothed_price = Decimal::from_percent(90);
        reserves[1].smoothed_price = Decimal::from(2u64);
        reserves[1].config.borrow_weight_bps = 15_000;

        let ob = obligation(vec![deposit(&reserves[0], 100)], vec![borrow(&reserves[1], 10)]);
        let parsed = refresh_obligation(&ob, &reserves, NOW_S, 60).unwrap();

        assert_eq!(parsed.spot.unweighted_borrowed_value_usd, Decimal::from(10u64));
        assert_eq!(parsed.spot.weighted_borrowed_value_usd, Decimal::from(15u64));
        assert_eq!(parsed.conservative.deposited_value_usd, Decimal::from(90u64));
        assert_eq!(parsed.conservative.allowed_borrow_value_usd, Decimal::from(45u64));
        assert_eq!(parsed.conservative.weighted_borrowed_value_usd, Decimal::from(30u64));
        assert_eq!(parsed.borrows[0].weighted_borrowed_value_usd, Decimal::from(15u64));
        assert_eq!(
            parsed.spot.borrow_limit_usage().unwrap(),
            Decimal::from_str("0.3").unwrap()
        );
        assert_eq!(parsed.spot.net_value_usd(), Decimal::from(90u64));
    }

    #[test]
    fn test_debt_compounds_to_reserve_rate() {
        let mut reserves = vec![test_reserve(0, 100, 0), test_reserve(1, 1_000, 0)];
        reserves[1].cumulative_borrow_rate = Decimal::from_str("1.5").unwrap();
        let mut debt = borrow(&reserves[1], 10);
        debt.cumulative_borrow_rate = Decimal::from_str("1.2").unwrap();

        let ob = obligation(vec![deposit(&reserves[0], 100)], vec![debt.clone()]);
        let parsed = refresh_obligation(&ob, &reserves, NOW_S, 60).unwrap();
        assert_eq!(parsed.borrows[0].borrowed_amount, Decimal::from_str("12.5").unwrap());

        debt.cumulative_borrow_rate = Decimal::from(2u64);
        let ob = obligation(vec![], vec![debt]);
        assert!(matches!(
            refresh_obligation(&ob, &reserves, NOW_S, 60),
            Err(LendingError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_isolated_reserves() {
        let mut reserves = vec![test_reserve(0, 100, 0), test_reserve(1, 1_000, 0), test_reserve(2, 1_000, 0)];
        reserves[0].config.isolated = true;
        reserves[0].config.open_attributed_borrow_limit_usd = 20;
        reserves[0].config.close_attributed_borrow_limit_usd = 30;

        let ob = obligation(vec![deposit(&reserves[0], 100)], vec![]);
        let parsed = refresh_obligation(&ob, &reserves, NOW_S, 60).unwrap();
        assert_eq!(parsed.spot.allowed_borrow_value_usd, Decimal::from(20u64));
        assert_eq!(parsed.spot.unhealthy_borrow_value_usd, Decimal::from(30u64));
        assert_eq!(parsed.spot.super_unhealthy_borrow_value_usd, Decimal::from(30u64));

        reserves[1].config.isolated = true;
        reserves[2].config.isolated = true;
        let ob = obligation(vec![], vec![borrow(&reserves[1], 1), borrow(&reserves[2], 1)]);
        let err = refresh_obligation(&ob, &reserves, NOW_S, 60).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_stale_price_and_missing_reserve() {
        let reserves = vec![test_reserve(0, 100, 0)];
        let ob = obligation(vec![deposit(&reserves[0], 100)], vec![]);
        assert!(matches!(
            refresh_obligation(&ob, &reserves, 1_061, 60),
            Err(LendingError::StalePrice { .. })
        ));

        let mut ob = ob;
        ob.deposits[0].reserve_array_index = 4;
        assert_eq!(
            refresh_obligation(&ob, &reserves, NOW_S, 60),
            Err(LendingError::ReserveNotFound(4))
        );
    }

    #[test]
    fn test_claimable_rewards() {
        let mut reserves = vec![test_reserve(0, 100, 0)];
        let mut pool = PoolRewardManager {
            total_shares: 0,
            pool_rewards: vec![Some(PoolReward::new(CoinType::from("0x2::sui::SUI"), 0, 1_000, 100))],
            last_update_time_ms: 0,
        };
        let mut user = UserRewardManager::new(0, RewardSide::Deposit, &mut pool, 0).unwrap();
        user.change_share(&mut pool, 10, 0).unwrap();
        reserves[0].deposits_pool_reward_manager = pool;

        let mut ob = obligation(vec![deposit(&reserves[0], 100)], vec![]);
        ob.user_reward_managers.push(user);

        let rewards = claimable_rewards(&ob, &reserves, 250).unwrap();
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].side, RewardSide::Deposit);
        assert_eq!(rewards[0].amount, Decimal::from(25u64));
    }
}

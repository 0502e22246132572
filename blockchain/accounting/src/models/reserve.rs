use super::liquidity_mining::PoolRewardManager;
use crate::math::{Decimal, TryAdd, TryDiv, TryMul, TrySub};
use crate::utils::consts::{BPS_DENOMINATOR, MAX_PERCENT, SECONDS_PER_YEAR};
use crate::utils::serde_helpers::serde_u64;
use crate::utils::InterestRateCurve;
use common::{CoinType, LendingError, PriceIdentifier, RewardSide};
use log::debug;
use serde::{Deserialize, Serialize};

/// Where the reserve's current price came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceSource {
    #[default]
    Primary,
    /// The oracle expects a different feed than the one configured on the reserve
    Fallback { configured: PriceIdentifier, expected: PriceIdentifier },
}

impl PriceSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, PriceSource::Fallback { .. })
    }
}

/// Price reported by an oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub price: Decimal,
    pub smoothed_price: Decimal,
    #[serde(with = "serde_u64")]
    pub publish_time_s: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveConfig {
    pub open_ltv_pct: u8,
    pub close_ltv_pct: u8,
    pub max_close_ltv_pct: u8,
    #[serde(with = "serde_u64")]
    pub borrow_weight_bps: u64,
    #[serde(with = "serde_u64")]
    pub deposit_limit: u64,
    #[serde(with = "serde_u64")]
    pub borrow_limit: u64,
    #[serde(with = "serde_u64")]
    pub deposit_limit_usd: u64,
    #[serde(with = "serde_u64")]
    pub borrow_limit_usd: u64,
    #[serde(with = "serde_u64")]
    pub liquidation_bonus_bps: u64,
    #[serde(with = "serde_u64")]
    pub max_liquidation_bonus_bps: u64,
    #[serde(with = "serde_u64")]
    pub borrow_fee_bps: u64,
    #[serde(with = "serde_u64")]
    pub spread_fee_bps: u64,
    #[serde(with = "serde_u64")]
    pub protocol_liquidation_fee_bps: u64,
    pub isolated: bool,
    #[serde(with = "serde_u64")]
    pub open_attributed_borrow_limit_usd: u64,
    #[serde(with = "serde_u64")]
    pub close_attributed_borrow_limit_usd: u64,
    pub interest_rate: InterestRateCurve,
}

impl ReserveConfig {
    pub fn validate(&self) -> Result<(), LendingError> {
        let invalid = |msg: String| Err(LendingError::InvalidConfig(format!("reserve config: {msg}")));

        if !(self.open_ltv_pct <= self.close_ltv_pct
            && self.close_ltv_pct <= self.max_close_ltv_pct
            && self.max_close_ltv_pct <= MAX_PERCENT)
        {
            return invalid(format!(
                "ltv ordering violated: open {}% close {}% max close {}%",
                self.open_ltv_pct, self.close_ltv_pct, self.max_close_ltv_pct
            ));
        }
        if self.borrow_weight_bps < BPS_DENOMINATOR {
            return invalid(format!("borrow weight {}bps is below 1", self.borrow_weight_bps));
        }
        if self.liquidation_bonus_bps > self.max_liquidation_bonus_bps {
            return invalid(format!(
                "liquidation bonus {}bps exceeds max {}bps",
                self.liquidation_bonus_bps, self.max_liquidation_bonus_bps
            ));
        }
        if self.spread_fee_bps > BPS_DENOMINATOR {
            return invalid(format!("spread fee {}bps exceeds 100%", self.spread_fee_bps));
        }
        if self.open_attributed_borrow_limit_usd > self.close_attributed_borrow_limit_usd {
            return invalid(format!(
                "open attributed borrow limit {} exceeds close limit {}",
                self.open_attributed_borrow_limit_usd, self.close_attributed_borrow_limit_usd
            ));
        }
        Ok(())
    }

    pub fn open_ltv(&self) -> Decimal {
        Decimal::from_percent(self.open_ltv_pct)
    }

    pub fn close_ltv(&self) -> Decimal {
        Decimal::from_percent(self.close_ltv_pct)
    }

    pub fn max_close_ltv(&self) -> Decimal {
        Decimal::from_percent(self.max_close_ltv_pct)
    }

    pub fn borrow_weight(&self) -> Decimal {
        Decimal::from_bps(self.borrow_weight_bps)
    }

    pub fn spread_fee(&self) -> Decimal {
        Decimal::from_bps(self.spread_fee_bps)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserve {
    #[serde(with = "serde_u64")]
    pub array_index: u64,
    pub coin_type: CoinType,
    pub mint_decimals: u8,
    pub price_identifier: PriceIdentifier,
    pub price: Decimal,
    pub smoothed_price: Decimal,
    #[serde(with = "serde_u64")]
    pub price_last_update_timestamp_s: u64,
    #[serde(default)]
    pub price_source: PriceSource,
    #[serde(with = "serde_u64")]
    pub available_amount: u64,
    #[serde(with = "serde_u64")]
    pub ctoken_supply: u64,
    pub borrowed_amount: Decimal,
    pub cumulative_borrow_rate: Decimal,
    #[serde(with = "serde_u64")]
    pub interest_last_update_timestamp_s: u64,
    pub unclaimed_spread_fees: Decimal,
    pub config: ReserveConfig,
    pub deposits_pool_reward_manager: PoolRewardManager,
    pub borrows_pool_reward_manager: PoolRewardManager,
}

impl Reserve {
    pub fn validate(&self) -> Result<(), LendingError> {
        self.config.validate()?;
        if self.cumulative_borrow_rate < Decimal::one() {
            return Err(LendingError::InvalidSnapshot(format!(
                "reserve {} has cumulative borrow rate {} below 1",
                self.array_index, self.cumulative_borrow_rate
            )));
        }
        Ok(())
    }

    /// available + borrowed - unclaimed spread fees
    pub fn total_supply(&self) -> Result<Decimal, LendingError> {
        Decimal::from(self.available_amount)
            .try_add(self.borrowed_amount)?
            .try_sub(self.unclaimed_spread_fees)
    }

    pub fn utilization(&self) -> Result<Decimal, LendingError> {
        let denominator = Decimal::from(self.available_amount).try_add(self.borrowed_amount)?;
        if denominator.is_zero() {
            return Ok(Decimal::zero());
        }
        self.borrowed_amount.try_div(denominator)
    }

    /// Liquidity per ctoken
    pub fn ctoken_ratio(&self) -> Result<Decimal, LendingError> {
        if self.ctoken_supply == 0 {
            return Ok(Decimal::one());
        }
        self.total_supply()?.try_div(Decimal::from(self.ctoken_supply))
    }

    pub fn current_borrow_apr(&self) -> Result<Decimal, LendingError> {
        self.config.interest_rate.apr_at(self.utilization()?)
    }

    pub fn current_supply_apr(&self) -> Result<Decimal, LendingError> {
        self.current_borrow_apr()?
            .try_mul(self.utilization()?)?
            .try_mul(Decimal::one().try_sub(self.config.spread_fee())?)
    }

    /// Accrue interest up to `now_s`, returning the compounded reserve.
    ///
    /// Compounds per second at the current borrow APR, so the result matches the
    /// contract bit for bit. A clock at or behind the last accrual returns an
    /// unchanged copy.
    pub fn compound_interest(&self, now_s: u64) -> Result<Reserve, LendingError> {
        let mut reserve = self.clone();
        if now_s <= self.interest_last_update_timestamp_s {
            debug!(
                "reserve {} interest already accrued at {}s, skipping {}s",
                self.array_index, self.interest_last_update_timestamp_s, now_s
            );
            return Ok(reserve);
        }

        let elapsed_s = now_s - self.interest_last_update_timestamp_s;
        let apr = self.current_borrow_apr()?;
        let compounded_interest_rate =
            Decimal::one().try_add(apr.try_div(SECONDS_PER_YEAR)?)?.try_pow(elapsed_s)?;

        reserve.cumulative_borrow_rate =
            self.cumulative_borrow_rate.try_mul(compounded_interest_rate)?;

        let net_new_debt =
            self.borrowed_amount.try_mul(compounded_interest_rate.try_sub(Decimal::one())?)?;
        reserve.unclaimed_spread_fees = self
            .unclaimed_spread_fees
            .try_add(net_new_debt.try_mul(self.config.spread_fee())?)?;
        reserve.borrowed_amount = self.borrowed_amount.try_add(net_new_debt)?;
        reserve.interest_last_update_timestamp_s = now_s;

        Ok(reserve)
    }

    /// Copy of the reserve carrying the given price
    pub fn with_price(&self, update: &PriceUpdate, source: PriceSource) -> Reserve {
        let mut reserve = self.clone();
        reserve.price = update.price;
        reserve.smoothed_price = update.smoothed_price;
        reserve.price_last_update_timestamp_s = update.publish_time_s;
        reserve.price_source = source;
        reserve
    }

    pub fn is_price_fresh(&self, now_s: u64, max_staleness_s: u64) -> bool {
        now_s.saturating_sub(self.price_last_update_timestamp_s) <= max_staleness_s
    }

    pub fn check_price_fresh(&self, now_s: u64, max_staleness_s: u64) -> Result<(), LendingError> {
        if self.is_price_fresh(now_s, max_staleness_s) {
            return Ok(());
        }
        Err(LendingError::StalePrice {
            coin_type: self.coin_type.to_string(),
            publish_time_s: self.price_last_update_timestamp_s,
            now_s,
        })
    }

    fn decimals_scaler(&self) -> Result<Decimal, LendingError> {
        10u64
            .checked_pow(self.mint_decimals as u32)
            .map(Decimal::from)
            .ok_or(LendingError::MathOverflow)
    }

    fn value_at(&self, price: Decimal, liquidity_amount: Decimal) -> Result<Decimal, LendingError> {
        price.try_mul(liquidity_amount)?.try_div(self.decimals_scaler()?)
    }

    /// USD value of a liquidity amount at the spot price
    pub fn market_value(&self, liquidity_amount: Decimal) -> Result<Decimal, LendingError> {
        self.value_at(self.price, liquidity_amount)
    }

    /// Value at the lesser of the spot and smoothed price, used for collateral
    pub fn market_value_lower_bound(&self, liquidity_amount: Decimal) -> Result<Decimal, LendingError> {
        self.value_at(self.price.min(self.smoothed_price), liquidity_amount)
    }

    /// Value at the greater of the spot and smoothed price, used for debt
    pub fn market_value_upper_bound(&self, liquidity_amount: Decimal) -> Result<Decimal, LendingError> {
        self.value_at(self.price.max(self.smoothed_price), liquidity_amount)
    }

    pub fn ctoken_to_liquidity(&self, ctoken_amount: u64) -> Result<Decimal, LendingError> {
        Decimal::from(ctoken_amount).try_mul(self.ctoken_ratio()?)
    }

    pub fn ctoken_market_value(&self, ctoken_amount: u64) -> Result<Decimal, LendingError> {
        self.market_value(self.ctoken_to_liquidity(ctoken_amount)?)
    }

    pub fn ctoken_market_value_lower_bound(&self, ctoken_amount: u64) -> Result<Decimal, LendingError> {
        self.market_value_lower_bound(self.ctoken_to_liquidity(ctoken_amount)?)
    }

    pub fn pool_reward_manager(&self, side: RewardSide) -> &PoolRewardManager {
        match side {
            RewardSide::Deposit => &self.deposits_pool_reward_manager,
            RewardSide::Borrow => &self.borrows_pool_reward_manager,
        }
    }

    /// Update both reward managers at `now_ms`, returning the updated reserve
    pub fn update_pool_reward_managers(&self, now_ms: u64) -> Result<Reserve, LendingError> {
        let mut reserve = self.clone();
        reserve.deposits_pool_reward_manager.update(now_ms)?;
        reserve.borrows_pool_reward_manager.update(now_ms)?;
        Ok(reserve)
    }
}

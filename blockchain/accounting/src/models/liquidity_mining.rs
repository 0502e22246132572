//! Reward-per-share accounting for liquidity mining campaigns.
//!
//! A [`PoolRewardManager`] hangs off each side (deposits, borrows) of a reserve and tracks
//! every reward campaign in a slot vector. Each obligation holds one [`UserRewardManager`]
//! per reserve side it participates in, with a checkpoint per campaign.
//!
//! All operations must be preceded by a pool update at the same timestamp so that the
//! user checkpoints are settled against an up-to-date accumulator.

use crate::math::{Decimal, TryAdd, TryDiv, TryMul, TrySub};
use crate::utils::consts::{MAX_POOL_REWARDS, MIN_REWARD_PERIOD_MS};
use crate::utils::serde_helpers::serde_u64;
use common::{CoinType, LendingError, RewardSide};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReward {
    pub coin_type: CoinType,
    #[serde(with = "serde_u64")]
    pub start_time_ms: u64,
    #[serde(with = "serde_u64")]
    pub end_time_ms: u64,
    #[serde(with = "serde_u64")]
    pub total_rewards: u64,
    pub allocated_rewards: Decimal,
    pub cumulative_rewards_per_share: Decimal,
    #[serde(with = "serde_u64")]
    pub num_user_reward_managers: u64,
    /// Rewards allocated while the pool had no shares, paid out with the next update
    /// that sees shares
    #[serde(default)]
    pub undistributed_rewards: Decimal,
}

impl PoolReward {
    pub fn new(coin_type: CoinType, start_time_ms: u64, end_time_ms: u64, total_rewards: u64) -> Self {
        Self {
            coin_type,
            start_time_ms,
            end_time_ms,
            total_rewards,
            allocated_rewards: Decimal::zero(),
            cumulative_rewards_per_share: Decimal::zero(),
            num_user_reward_managers: 0,
            undistributed_rewards: Decimal::zero(),
        }
    }

    pub fn has_started(&self, now_ms: u64) -> bool {
        self.start_time_ms <= now_ms
    }

    pub fn has_ended(&self, now_ms: u64) -> bool {
        now_ms >= self.end_time_ms
    }

    pub fn is_active(&self, now_ms: u64) -> bool {
        self.has_started(now_ms) && !self.has_ended(now_ms)
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_time_ms.saturating_sub(self.start_time_ms)
    }

    pub fn unallocated_rewards(&self) -> Result<Decimal, LendingError> {
        Decimal::from(self.total_rewards).try_sub(self.allocated_rewards)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRewardManager {
    #[serde(with = "serde_u64")]
    pub total_shares: u64,
    pub pool_rewards: Vec<Option<PoolReward>>,
    #[serde(with = "serde_u64")]
    pub last_update_time_ms: u64,
}

impl PoolRewardManager {
    pub fn new(now_ms: u64) -> Self {
        Self { total_shares: 0, pool_rewards: Vec::new(), last_update_time_ms: now_ms }
    }

    pub fn pool_reward(&self, index: usize) -> Result<&PoolReward, LendingError> {
        self.pool_rewards
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(LendingError::PoolRewardNotFound(index))
    }

    fn pool_reward_mut(&mut self, index: usize) -> Result<&mut PoolReward, LendingError> {
        self.pool_rewards
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(LendingError::PoolRewardNotFound(index))
    }

    /// Accrue every active reward up to `now_ms`.
    ///
    /// A clock at or behind the last update leaves the manager untouched.
    pub fn update(&mut self, now_ms: u64) -> Result<(), LendingError> {
        if now_ms <= self.last_update_time_ms {
            debug!(
                "pool reward manager already updated at {}ms, skipping update at {}ms",
                self.last_update_time_ms, now_ms
            );
            return Ok(());
        }

        let last_update_time_ms = self.last_update_time_ms;
        let total_shares = self.total_shares;
        for pool_reward in self.pool_rewards.iter_mut().flatten() {
            if now_ms < pool_reward.start_time_ms || last_update_time_ms >= pool_reward.end_time_ms {
                continue;
            }

            let time_passed_ms = now_ms.min(pool_reward.end_time_ms)
                - last_update_time_ms.max(pool_reward.start_time_ms);
            let unlocked = Decimal::from(pool_reward.total_rewards)
                .try_mul(Decimal::from(time_passed_ms))?
                .try_div(Decimal::from(pool_reward.duration_ms()))?;

            let total = Decimal::from(pool_reward.total_rewards);
            let allocated = pool_reward.allocated_rewards.try_add(unlocked)?.min(total);
            let delta = allocated.try_sub(pool_reward.allocated_rewards)?;
            pool_reward.allocated_rewards = allocated;

            if total_shares > 0 {
                let distributable = delta.try_add(pool_reward.undistributed_rewards)?;
                pool_reward.cumulative_rewards_per_share = pool_reward
                    .cumulative_rewards_per_share
                    .try_add(distributable.try_div(Decimal::from(total_shares))?)?;
                pool_reward.undistributed_rewards = Decimal::zero();
            } else {
                pool_reward.undistributed_rewards = pool_reward.undistributed_rewards.try_add(delta)?;
            }
        }

        self.last_update_time_ms = now_ms;
        Ok(())
    }

    /// Schedule a new reward campaign, reusing the first empty slot.
    ///
    /// Returns the slot index of the new reward.
    pub fn add_pool_reward(
        &mut self,
        coin_type: CoinType,
        start_time_ms: u64,
        end_time_ms: u64,
        total_rewards: u64,
        now_ms: u64,
    ) -> Result<usize, LendingError> {
        if start_time_ms < now_ms {
            return Err(LendingError::RewardError(format!(
                "reward start {}ms is in the past (now {}ms)",
                start_time_ms, now_ms
            )));
        }
        if end_time_ms < start_time_ms || end_time_ms - start_time_ms < MIN_REWARD_PERIOD_MS {
            return Err(LendingError::RewardError(format!(
                "reward period {}ms..{}ms is shorter than {}ms",
                start_time_ms, end_time_ms, MIN_REWARD_PERIOD_MS
            )));
        }
        if total_rewards == 0 {
            return Err(LendingError::RewardError("reward amount must be positive".to_string()));
        }

        self.update(now_ms)?;

        let reward = PoolReward::new(coin_type, start_time_ms, end_time_ms, total_rewards);
        if let Some(index) = self.pool_rewards.iter().position(Option::is_none) {
            self.pool_rewards[index] = Some(reward);
            return Ok(index);
        }
        if self.pool_rewards.len() >= MAX_POOL_REWARDS {
            return Err(LendingError::RewardError(format!(
                "pool reward manager is full ({} slots)",
                MAX_POOL_REWARDS
            )));
        }
        self.pool_rewards.push(Some(reward));
        Ok(self.pool_rewards.len() - 1)
    }

    /// End a reward early. Returns the whole unallocated amount.
    pub fn cancel_pool_reward(&mut self, index: usize, now_ms: u64) -> Result<u64, LendingError> {
        self.update(now_ms)?;

        let pool_reward = self.pool_reward_mut(index)?;
        let unallocated = pool_reward.unallocated_rewards()?.try_floor_u64()?;
        pool_reward.end_time_ms = pool_reward.end_time_ms.min(now_ms);
        pool_reward.total_rewards -= unallocated;
        Ok(unallocated)
    }

    /// Remove an ended reward nobody holds a checkpoint for.
    ///
    /// Returns what was never paid out, including rewards that accrued while the pool
    /// had no shares.
    pub fn close_pool_reward(&mut self, index: usize, now_ms: u64) -> Result<u64, LendingError> {
        self.update(now_ms)?;

        let pool_reward = self.pool_reward(index)?;
        if !pool_reward.has_ended(now_ms) {
            return Err(LendingError::RewardError(format!(
                "pool reward {} has not ended yet (ends at {}ms)",
                index, pool_reward.end_time_ms
            )));
        }
        if pool_reward.num_user_reward_managers > 0 {
            return Err(LendingError::RewardError(format!(
                "pool reward {} still has {} user checkpoints",
                index, pool_reward.num_user_reward_managers
            )));
        }

        let remaining = pool_reward
            .unallocated_rewards()?
            .try_add(pool_reward.undistributed_rewards)?
            .try_floor_u64()?;
        self.pool_rewards[index] = None;
        Ok(remaining)
    }
}

/// A user's checkpoint against one pool reward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReward {
    pub earned_rewards: Decimal,
    pub cumulative_rewards_per_share: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRewardManager {
    #[serde(with = "serde_u64")]
    pub reserve_array_index: u64,
    pub side: RewardSide,
    #[serde(with = "serde_u64")]
    pub share: u64,
    pub rewards: Vec<Option<UserReward>>,
    #[serde(with = "serde_u64")]
    pub last_update_time_ms: u64,
}

/// Rewards a user may claim from one pool reward slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimableReward {
    pub reward_index: usize,
    pub coin_type: CoinType,
    pub amount: Decimal,
}

/// Result of settling a user against a pool at some timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardUpdate {
    pub pool: PoolRewardManager,
    pub user: UserRewardManager,
    pub claimable: Vec<ClaimableReward>,
}

impl UserRewardManager {
    /// Open a zero-share manager against `pool` and check it in to every live reward.
    pub fn new(
        reserve_array_index: u64,
        side: RewardSide,
        pool: &mut PoolRewardManager,
        now_ms: u64,
    ) -> Result<Self, LendingError> {
        let mut user = Self {
            reserve_array_index,
            side,
            share: 0,
            rewards: Vec::new(),
            last_update_time_ms: now_ms,
        };
        user.settle(pool, now_ms)?;
        Ok(user)
    }

    /// Settle every checkpoint against `pool` at `now_ms`, updating the pool first.
    pub fn settle(&mut self, pool: &mut PoolRewardManager, now_ms: u64) -> Result<(), LendingError> {
        pool.update(now_ms)?;

        if self.rewards.len() < pool.pool_rewards.len() {
            self.rewards.resize(pool.pool_rewards.len(), None);
        }

        for (index, slot) in pool.pool_rewards.iter_mut().enumerate() {
            let pool_reward = match slot {
                Some(pool_reward) => pool_reward,
                None => {
                    self.rewards[index] = None;
                    continue;
                }
            };

            match &mut self.rewards[index] {
                Some(user_reward) => {
                    let new_rewards = pool_reward
                        .cumulative_rewards_per_share
                        .try_sub(user_reward.cumulative_rewards_per_share)?
                        .try_mul(self.share)?;
                    user_reward.earned_rewards = user_reward.earned_rewards.try_add(new_rewards)?;
                    user_reward.cumulative_rewards_per_share = pool_reward.cumulative_rewards_per_share;
                }
                // a holder last seen before the end still has rewards to collect
                None if self.last_update_time_ms < pool_reward.end_time_ms => {
                    // a holder from before the start earned everything accrued since
                    let earned_rewards = if self.last_update_time_ms <= pool_reward.start_time_ms {
                        pool_reward.cumulative_rewards_per_share.try_mul(self.share)?
                    } else {
                        Decimal::zero()
                    };
                    self.rewards[index] = Some(UserReward {
                        earned_rewards,
                        cumulative_rewards_per_share: pool_reward.cumulative_rewards_per_share,
                    });
                    pool_reward.num_user_reward_managers += 1;
                }
                None => {}
            }
        }

        self.last_update_time_ms = now_ms;
        Ok(())
    }

    /// Move the user's share to `new_share`, settling at the old share first.
    pub fn change_share(
        &mut self,
        pool: &mut PoolRewardManager,
        new_share: u64,
        now_ms: u64,
    ) -> Result<(), LendingError> {
        self.settle(pool, now_ms)?;

        pool.total_shares = pool
            .total_shares
            .checked_sub(self.share)
            .ok_or(LendingError::MathUnderflow)?
            .checked_add(new_share)
            .ok_or(LendingError::MathOverflow)?;
        self.share = new_share;
        Ok(())
    }

    /// Pay out the whole part of the earned rewards of one slot.
    ///
    /// After the reward has ended the checkpoint is dropped, releasing the pool slot for
    /// closing.
    pub fn claim_rewards(
        &mut self,
        pool: &mut PoolRewardManager,
        reward_index: usize,
        now_ms: u64,
    ) -> Result<u64, LendingError> {
        self.settle(pool, now_ms)?;

        let pool_reward = pool.pool_reward_mut(reward_index)?;
        let user_reward = self
            .rewards
            .get_mut(reward_index)
            .and_then(Option::as_mut)
            .ok_or_else(|| {
                LendingError::RewardError(format!("no checkpoint for pool reward {}", reward_index))
            })?;

        let owed = user_reward.earned_rewards.try_floor_u64()?;
        user_reward.earned_rewards = user_reward.earned_rewards.try_sub(Decimal::from(owed))?;

        if pool_reward.has_ended(now_ms) {
            self.rewards[reward_index] = None;
            pool_reward.num_user_reward_managers =
                pool_reward.num_user_reward_managers.saturating_sub(1);
        }
        Ok(owed)
    }

    /// Earned rewards per slot, without touching the pool
    pub fn claimable(&self, pool: &PoolRewardManager) -> Vec<ClaimableReward> {
        self.rewards
            .iter()
            .enumerate()
            .filter_map(|(index, user_reward)| {
                let user_reward = user_reward.as_ref()?;
                let pool_reward = pool.pool_reward(index).ok()?;
                Some(ClaimableReward {
                    reward_index: index,
                    coin_type: pool_reward.coin_type.clone(),
                    amount: user_reward.earned_rewards,
                })
            })
            .collect()
    }
}

/// Settle `user` against `pool` at `now_ms` without touching either input.
pub fn update_user_reward_manager(
    user: &UserRewardManager,
    pool: &PoolRewardManager,
    now_ms: u64,
) -> Result<RewardUpdate, LendingError> {
    let mut pool = pool.clone();
    let mut user = user.clone();
    user.settle(&mut pool, now_ms)?;
    let claimable = user.claimable(&pool);
    Ok(RewardUpdate { pool, user, claimable })
}

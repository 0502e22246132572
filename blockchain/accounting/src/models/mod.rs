pub mod liquidity_mining;
pub mod obligation;
pub mod reserve;

pub use liquidity_mining::{
    update_user_reward_manager, ClaimableReward, PoolReward, PoolRewardManager, RewardUpdate,
    UserReward, UserRewardManager,
};
pub use obligation::{
    claimable_rewards, refresh_obligation, Borrow, Deposit, HealthStatus, Obligation,
    ObligationReward, ParsedBorrow, ParsedDeposit, ParsedObligation, RiskMetrics,
};
pub use reserve::{PriceSource, PriceUpdate, Reserve, ReserveConfig};

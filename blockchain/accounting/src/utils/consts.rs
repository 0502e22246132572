pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;
pub const MILLIS_PER_SECOND: u64 = 1_000;

/// Maximum number of reward slots in a pool reward manager
pub const MAX_POOL_REWARDS: usize = 50;
/// Minimum length of a pool reward campaign
pub const MIN_REWARD_PERIOD_MS: u64 = 3_600_000;

pub const MAX_PERCENT: u8 = 100;
pub const BPS_DENOMINATOR: u64 = 10_000;

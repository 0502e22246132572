use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LendingError {
    #[error("Math overflow")]
    MathOverflow,

    #[error("Math underflow")]
    MathUnderflow,

    #[error("Division by zero")]
    DivideByZero,

    #[error("Invalid decimal literal: {0}")]
    InvalidDecimal(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Obligation {obligation_id} borrows against more than one isolated reserve")]
    IsolatedBorrowConflict { obligation_id: String },

    #[error("Stale price for {coin_type}: published at {publish_time_s}s, now {now_s}s")]
    StalePrice { coin_type: String, publish_time_s: u64, now_s: u64 },

    #[error("Price not found: {0}")]
    PriceNotFound(String),

    #[error("Invalid price for {0}")]
    InvalidPrice(String),

    #[error("Missing metadata for coin type {0}")]
    MissingMetadata(String),

    #[error("Reserve not found at index {0}")]
    ReserveNotFound(u64),

    #[error("Pool reward not found at index {0}")]
    PoolRewardNotFound(usize),

    #[error("Reward error: {0}")]
    RewardError(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Snapshot source error: {0}")]
    SourceError(String),
}

impl LendingError {
    /// Fatal errors caused by on-chain configuration; retrying cannot help.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, LendingError::InvalidConfig(_) | LendingError::IsolatedBorrowConflict { .. })
    }

    pub fn is_arithmetic_error(&self) -> bool {
        matches!(
            self,
            LendingError::MathOverflow | LendingError::MathUnderflow | LendingError::DivideByZero
        )
    }

    /// Soft errors leave the affected fields unknown without failing the refresh
    pub fn is_soft(&self) -> bool {
        matches!(self, LendingError::MissingMetadata(_))
    }
}

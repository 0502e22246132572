use serde::{Deserialize, Serialize};
use std::fmt;

pub mod asset_utils;
pub mod events;
pub mod lending;
pub use lending::*;

/// Fully qualified on-chain coin type, e.g. `0x2::sui::SUI`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoinType(pub String);

impl CoinType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CoinType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Hex identifier of an oracle price feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PriceIdentifier(String);

impl PriceIdentifier {
    pub fn new(value: impl Into<String>) -> Self {
        // feeds are compared case-insensitively and with or without the 0x prefix
        let value = value.into().to_ascii_lowercase();
        Self(value.trim_start_matches("0x").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PriceIdentifier {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<PriceIdentifier> for String {
    fn from(value: PriceIdentifier) -> Self {
        value.0
    }
}

impl fmt::Display for PriceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.0)
    }
}

/// Which side of a reserve a position or reward manager belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardSide {
    Deposit, // supplied liquidity
    Borrow,  // outstanding debt
}

impl fmt::Display for RewardSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardSide::Deposit => f.write_str("deposit"),
            RewardSide::Borrow => f.write_str("borrow"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_identifier_normalization() {
        let a = PriceIdentifier::new("0xABCD");
        let b = PriceIdentifier::new("abcd");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "0xabcd");
    }

    #[test]
    fn test_coin_type_serde_is_transparent() {
        let coin = CoinType::from("0x2::sui::SUI");
        let json = serde_json::to_string(&coin).unwrap();
        assert_eq!(json, "\"0x2::sui::SUI\"");
    }
}

//! Math for preserving precision of token amounts which are limited
//! by the on-chain u256 fixed point representation.
//!
//! Every value is a 256-bit integer scaled by [`WAD`]. Multiplication and division
//! truncate towards zero, exactly as the lending contract does, and every operation is
//! checked: overflow, underflow and division by zero are reported as [`LendingError`]s
//! instead of wrapping.

#![allow(clippy::assign_op_pattern)]
#![allow(clippy::manual_range_contains)]

use crate::{
    math::common::*,
    utils::serde_helpers::serde_string,
};
use common::LendingError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use uint::construct_uint;

construct_uint! {
    pub struct U256(4);
}

/// Large decimal values, precise to 18 digits
#[derive(Clone, Copy, Default, PartialEq, PartialOrd, Eq, Ord, Hash)]
pub struct Decimal(U256);

impl Decimal {
    /// One
    pub fn one() -> Self {
        Self(Self::wad())
    }

    /// Zero
    pub fn zero() -> Self {
        Self(U256::zero())
    }

    fn wad() -> U256 {
        U256::from(WAD)
    }

    fn half_wad() -> U256 {
        U256::from(HALF_WAD)
    }

    /// Create scaled decimal from percent value
    pub fn from_percent(percent: u8) -> Self {
        Self(U256::from(percent as u64 * PERCENT_SCALER))
    }

    /// Create scaled decimal from percent value
    pub fn from_percent_u64(percent: u64) -> Self {
        Self(U256::from(percent) * U256::from(PERCENT_SCALER))
    }

    /// Create scaled decimal from basis points
    pub fn from_bps(bps: u64) -> Self {
        Self(U256::from(bps) * U256::from(BPS_SCALER))
    }

    /// Return raw scaled value
    #[allow(clippy::wrong_self_convention)]
    pub fn to_scaled_val(&self) -> U256 {
        self.0
    }

    /// Create decimal from scaled value
    pub fn from_scaled_val(scaled_val: U256) -> Self {
        Self(scaled_val)
    }

    /// Return raw scaled value if it fits into u128
    pub fn try_to_scaled_u128(&self) -> Result<u128, LendingError> {
        if self.0 > U256::from(u128::MAX) {
            return Err(LendingError::MathOverflow);
        }
        Ok(self.0.as_u128())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Round scaled decimal to u64
    pub fn try_round_u64(&self) -> Result<u64, LendingError> {
        let rounded_val = Self::half_wad()
            .checked_add(self.0)
            .ok_or(LendingError::MathOverflow)?
            .checked_div(Self::wad())
            .ok_or(LendingError::DivideByZero)?;
        Self::fit_u64(rounded_val)
    }

    /// Ceiling scaled decimal to u64
    pub fn try_ceil_u64(&self) -> Result<u64, LendingError> {
        let ceil_val = Self::wad()
            .checked_sub(U256::one())
            .ok_or(LendingError::MathUnderflow)?
            .checked_add(self.0)
            .ok_or(LendingError::MathOverflow)?
            .checked_div(Self::wad())
            .ok_or(LendingError::DivideByZero)?;
        Self::fit_u64(ceil_val)
    }

    /// Floor scaled decimal to u64
    pub fn try_floor_u64(&self) -> Result<u64, LendingError> {
        let floor_val = self.0.checked_div(Self::wad()).ok_or(LendingError::DivideByZero)?;
        Self::fit_u64(floor_val)
    }

    fn fit_u64(val: U256) -> Result<u64, LendingError> {
        if val > U256::from(u64::MAX) {
            return Err(LendingError::MathOverflow);
        }
        Ok(val.as_u64())
    }

    /// Floor the value to a whole number, keeping the decimal representation
    pub fn floor(&self) -> Self {
        Self((self.0 / Self::wad()) * Self::wad())
    }

    /// Ceil the value to a whole number, keeping the decimal representation
    pub fn try_ceil(&self) -> Result<Self, LendingError> {
        let floor = self.floor();
        if floor == *self {
            return Ok(floor);
        }
        floor.try_add(Self::one())
    }

    /// Subtract, clamping at zero where the contract tolerates negative results
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if self >= rhs {
            Self(self.0 - rhs.0)
        } else {
            Self::zero()
        }
    }

    /// Calculate power by squaring, truncating after every multiplication
    pub fn try_pow(&self, mut exponent: u64) -> Result<Self, LendingError> {
        let mut base = *self;
        let mut result = Self::one();

        while exponent > 0 {
            if exponent % 2 == 1 {
                result = result.try_mul(base)?;
            }
            base = base.try_mul(base)?;
            exponent /= 2;
        }

        Ok(result)
    }

    /// Lossy conversion, only meant for display formatting
    pub fn to_f64_lossy(&self) -> f64 {
        self.to_string().parse().unwrap_or(f64::MAX)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut scaled_val = self.0.to_string();
        if scaled_val.len() <= SCALE {
            scaled_val.insert_str(0, &"0".repeat(SCALE - scaled_val.len()));
            scaled_val.insert_str(0, "0.");
        } else {
            scaled_val.insert(scaled_val.len() - SCALE, '.');
        }

        // precision truncates, matching the floor rounding everywhere else
        if let Some(precision) = f.precision() {
            let dot = scaled_val.len() - SCALE - 1;
            let end = if precision == 0 { dot } else { (dot + 1 + precision).min(scaled_val.len()) };
            scaled_val.truncate(end);
        }
        f.write_str(&scaled_val)
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({})", self)
    }
}

impl FromStr for Decimal {
    type Err = LendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LendingError::InvalidDecimal(s.to_string());
        let trimmed = s.trim();
        let (int_part, frac_part) = trimmed.split_once('.').unwrap_or((trimmed, ""));

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(int_part) || !all_digits(frac_part) || frac_part.len() > SCALE {
            return Err(invalid());
        }

        let int_val = if int_part.is_empty() {
            U256::zero()
        } else {
            U256::from_dec_str(int_part).map_err(|_| invalid())?
        };
        let frac_val = if frac_part.is_empty() {
            U256::zero()
        } else {
            U256::from_dec_str(&format!("{:0<width$}", frac_part, width = SCALE))
                .map_err(|_| invalid())?
        };

        let scaled = int_val
            .checked_mul(Self::wad())
            .ok_or(LendingError::MathOverflow)?
            .checked_add(frac_val)
            .ok_or(LendingError::MathOverflow)?;
        Ok(Self(scaled))
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_string::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_string::deserialize(deserializer)
    }
}

impl From<u64> for Decimal {
    fn from(val: u64) -> Self {
        Self(Self::wad() * U256::from(val))
    }
}

impl From<u128> for Decimal {
    fn from(val: u128) -> Self {
        Self(Self::wad() * U256::from(val))
    }
}

impl TryAdd for Decimal {
    fn try_add(self, rhs: Self) -> Result<Self, LendingError> {
        Ok(Self(self.0.checked_add(rhs.0).ok_or(LendingError::MathOverflow)?))
    }
}

impl TrySub for Decimal {
    fn try_sub(self, rhs: Self) -> Result<Self, LendingError> {
        Ok(Self(self.0.checked_sub(rhs.0).ok_or(LendingError::MathUnderflow)?))
    }
}

impl TryDiv<u64> for Decimal {
    fn try_div(self, rhs: u64) -> Result<Self, LendingError> {
        if rhs == 0 {
            return Err(LendingError::DivideByZero);
        }
        Ok(Self(self.0 / U256::from(rhs)))
    }
}

impl TryDiv<Decimal> for Decimal {
    fn try_div(self, rhs: Self) -> Result<Self, LendingError> {
        if rhs.is_zero() {
            return Err(LendingError::DivideByZero);
        }
        Ok(Self(self.0.checked_mul(Self::wad()).ok_or(LendingError::MathOverflow)? / rhs.0))
    }
}

impl TryMul<u64> for Decimal {
    fn try_mul(self, rhs: u64) -> Result<Self, LendingError> {
        Ok(Self(self.0.checked_mul(U256::from(rhs)).ok_or(LendingError::MathOverflow)?))
    }
}

impl TryMul<Decimal> for Decimal {
    fn try_mul(self, rhs: Self) -> Result<Self, LendingError> {
        Ok(Self(self.0.checked_mul(rhs.0).ok_or(LendingError::MathOverflow)? / Self::wad()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scaler() {
        assert_eq!(U256::exp10(SCALE), Decimal::wad());
        assert_eq!(Decimal::from_percent(100), Decimal::one());
        assert_eq!(Decimal::from_bps(10_000), Decimal::one());
        assert_eq!(Decimal::from_percent_u64(250), Decimal::from(5u64).try_div(2u64).unwrap());
    }

    #[test]
    fn test_mul_and_div_truncate() {
        let one_third = Decimal::one().try_div(Decimal::from(3u64)).unwrap();
        assert_eq!(one_third.to_scaled_val(), U256::from(333_333_333_333_333_333u64));

        // 1/3 * 3 loses the last unit, exactly like the contract
        let back = one_third.try_mul(Decimal::from(3u64)).unwrap();
        assert_eq!(back.to_scaled_val(), U256::from(999_999_999_999_999_999u64));
        assert!(back < Decimal::one());
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        assert_eq!(Decimal::one().try_div(Decimal::zero()), Err(LendingError::DivideByZero));
        assert_eq!(Decimal::one().try_div(0u64), Err(LendingError::DivideByZero));
    }

    #[test]
    fn test_overflow_and_underflow_never_wrap() {
        let max = Decimal::from_scaled_val(U256::MAX);
        assert_eq!(max.try_add(Decimal::from_scaled_val(U256::one())), Err(LendingError::MathOverflow));
        assert_eq!(max.try_mul(Decimal::from(2u64)), Err(LendingError::MathOverflow));
        assert_eq!(Decimal::zero().try_sub(Decimal::one()), Err(LendingError::MathUnderflow));
        assert_eq!(Decimal::from(u64::MAX).try_add(Decimal::one()).unwrap().try_floor_u64(), Err(LendingError::MathOverflow));
    }

    #[test]
    fn test_saturating_sub() {
        let a = Decimal::from(5u64);
        let b = Decimal::from(7u64);
        assert_eq!(a.saturating_sub(b), Decimal::zero());
        assert_eq!(b.saturating_sub(a), Decimal::from(2u64));
    }

    #[test]
    fn test_rounding() {
        let val = Decimal::from_str("2.5").unwrap();
        assert_eq!(val.try_floor_u64().unwrap(), 2);
        assert_eq!(val.try_ceil_u64().unwrap(), 3);
        assert_eq!(val.try_round_u64().unwrap(), 3);
        assert_eq!(val.floor(), Decimal::from(2u64));
        assert_eq!(val.try_ceil().unwrap(), Decimal::from(3u64));
        assert_eq!(Decimal::from(4u64).try_ceil().unwrap(), Decimal::from(4u64));
    }

    #[test]
    fn test_pow() {
        assert_eq!(Decimal::from(2u64).try_pow(0).unwrap(), Decimal::one());
        assert_eq!(Decimal::from(2u64).try_pow(10).unwrap(), Decimal::from(1024u64));
        let half = Decimal::from_percent(50);
        assert_eq!(half.try_pow(2).unwrap(), Decimal::from_percent(25));
    }

    #[test]
    fn test_display_and_parse() {
        let val = Decimal::from_str("1234.000000000000000001").unwrap();
        assert_eq!(val.to_string(), "1234.000000000000000001");
        assert_eq!(format!("{:.2}", Decimal::from_str("0.129").unwrap()), "0.12");
        assert_eq!(format!("{:.0}", Decimal::from_str("17.99").unwrap()), "17");
        assert_eq!(Decimal::from_str(".5").unwrap(), Decimal::from_percent(50));
        assert_eq!(Decimal::from_str("42").unwrap(), Decimal::from(42u64));
        assert!(Decimal::from_str("1.0000000000000000001").is_err());
        assert!(Decimal::from_str("-1").is_err());
        assert!(Decimal::from_str(".").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let val = Decimal::from_percent(5);
        let json = serde_json::to_string(&val).unwrap();
        assert_eq!(json, "\"0.050000000000000000\"");
        let parsed: Decimal = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, val);
    }

    proptest! {
        #[test]
        fn scaled_val_round_trip(hi in any::<u128>(), lo in any::<u128>()) {
            let scaled = (U256::from(hi) << 128) | U256::from(lo);
            let val = Decimal::from_scaled_val(scaled);
            prop_assert_eq!(Decimal::from_scaled_val(val.to_scaled_val()), val);
        }

        #[test]
        fn string_round_trip(hi in any::<u128>(), lo in any::<u128>()) {
            let val = Decimal::from_scaled_val((U256::from(hi) << 128) | U256::from(lo));
            prop_assert_eq!(Decimal::from_str(&val.to_string()).unwrap(), val);
        }

        #[test]
        fn saturating_sub_never_exceeds_lhs(a in any::<u64>(), b in any::<u64>()) {
            let (a, b) = (Decimal::from(a), Decimal::from(b));
            let diff = a.saturating_sub(b);
            prop_assert!(diff <= a);
            if a >= b {
                prop_assert_eq!(diff.try_add(b).unwrap(), a);
            } else {
                prop_assert_eq!(diff, Decimal::zero());
            }
        }

        #[test]
        fn mul_then_div_never_grows(a in 0..=u64::MAX, b in 1..=u64::MAX) {
            let (a, b) = (Decimal::from(a), Decimal::from_scaled_val(U256::from(b)));
            let back = a.try_mul(b).unwrap().try_div(b).unwrap();
            prop_assert!(back <= a);
        }
    }
}

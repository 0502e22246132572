pub mod common;
pub mod decimal;

pub use self::common::*;
pub use decimal::{Decimal, U256};

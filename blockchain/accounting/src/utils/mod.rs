pub mod consts;
pub mod interest_rate_curve;
pub mod serde_helpers;

pub use interest_rate_curve::{CurvePoint, InterestRateCurve};

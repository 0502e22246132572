use crate::math::{Decimal, TryAdd, TryDiv, TryMul, TrySub};
use crate::utils::consts::MAX_PERCENT;
use common::LendingError;
use serde::{Deserialize, Serialize};

/// One breakpoint of the utilization to APR curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub utilization_pct: u8,
    pub apr_bps: u64,
}

impl CurvePoint {
    pub fn new(utilization_pct: u8, apr_bps: u64) -> Self {
        Self { utilization_pct, apr_bps }
    }

    fn utilization(&self) -> Decimal {
        Decimal::from_percent(self.utilization_pct)
    }

    fn apr(&self) -> Decimal {
        Decimal::from_bps(self.apr_bps)
    }
}

/// Piecewise linear borrow APR as a function of utilization.
///
/// Always holds at least two points, the first at 0%, the last at 100%, strictly
/// increasing in utilization and non-decreasing in APR. Deserialization runs the same
/// validation as [`InterestRateCurve::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CurvePoint>", into = "Vec<CurvePoint>")]
pub struct InterestRateCurve {
    points: Vec<CurvePoint>,
}

impl InterestRateCurve {
    pub fn new(points: Vec<CurvePoint>) -> Result<Self, LendingError> {
        Self::validate(&points)?;
        Ok(Self { points })
    }

    fn validate(points: &[CurvePoint]) -> Result<(), LendingError> {
        let invalid = |msg: &str| Err(LendingError::InvalidConfig(format!("interest rate curve: {msg}")));

        if points.len() < 2 {
            return invalid("at least two points are required");
        }
        if points[0].utilization_pct != 0 {
            return invalid("first point must be at 0% utilization");
        }
        if points[points.len() - 1].utilization_pct != MAX_PERCENT {
            return invalid("last point must be at 100% utilization");
        }
        for pair in points.windows(2) {
            if pair[1].utilization_pct <= pair[0].utilization_pct {
                return invalid("utilization must be strictly increasing");
            }
            if pair[1].apr_bps < pair[0].apr_bps {
                return invalid("apr must be non-decreasing");
            }
        }
        Ok(())
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// APR at the given utilization, interpolated between the bracketing points.
    ///
    /// The interpolation weight is computed before it is applied to the APR range, so
    /// results truncate the same way the contract's do.
    pub fn apr_at(&self, utilization: Decimal) -> Result<Decimal, LendingError> {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if utilization <= first.utilization() {
            return Ok(first.apr());
        }
        if utilization >= last.utilization() {
            return Ok(last.apr());
        }

        for pair in self.points.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            if left.utilization() <= utilization && utilization <= right.utilization() {
                let weight = utilization
                    .try_sub(left.utilization())?
                    .try_div(right.utilization().try_sub(left.utilization())?)?;
                let apr_range = right.apr().try_sub(left.apr())?;
                return left.apr().try_add(weight.try_mul(apr_range)?);
            }
        }

        Err(LendingError::InvalidConfig(format!(
            "interest rate curve has no segment for utilization {}",
            utilization
        )))
    }

    pub fn apr_at_percent(&self, utilization_pct: u8) -> Result<Decimal, LendingError> {
        self.apr_at(Decimal::from_percent(utilization_pct))
    }
}

impl TryFrom<Vec<CurvePoint>> for InterestRateCurve {
    type Error = LendingError;

    fn try_from(points: Vec<CurvePoint>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<InterestRateCurve> for Vec<CurvePoint> {
    fn from(curve: InterestRateCurve) -> Self {
        curve.points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn kinked_curve() -> InterestRateCurve {
        InterestRateCurve::new(vec![
            CurvePoint::new(0, 0),
            CurvePoint::new(50, 500),
            CurvePoint::new(80, 500),
            CurvePoint::new(100, 30_000),
        ])
        .unwrap()
    }

    #[test]
    fn test_exact_at_every_breakpoint() {
        let curve = kinked_curve();
        for point in curve.points() {
            assert_eq!(
                curve.apr_at_percent(point.utilization_pct).unwrap(),
                Decimal::from_bps(point.apr_bps)
            );
        }
    }

    #[test]
    fn test_flat_segment_midpoint() {
        let curve = kinked_curve();
        assert_eq!(curve.apr_at_percent(65).unwrap(), Decimal::from_bps(500));
    }

    #[test]
    fn test_linear_interpolation() {
        let curve = kinked_curve();
        // 25% is halfway between 0% and 5%
        assert_eq!(curve.apr_at_percent(25).unwrap(), Decimal::from_bps(250));
        // 90% is halfway between 5% and 300%
        assert_eq!(curve.apr_at_percent(90).unwrap(), Decimal::from_bps(15_250));
    }

    #[test]
    fn test_divides_before_multiplying() {
        let curve = InterestRateCurve::new(vec![CurvePoint::new(0, 0), CurvePoint::new(100, 1)])
            .unwrap();
        let utilization = Decimal::one().try_div(3u64).unwrap();
        // weight 0.333..333 times 0.0001 truncates to 0.000033333333333333
        assert_eq!(
            curve.apr_at(utilization).unwrap(),
            Decimal::from_str("0.000033333333333333").unwrap()
        );
    }

    #[test]
    fn test_clamps_outside_range() {
        let curve = kinked_curve();
        assert_eq!(curve.apr_at(Decimal::zero()).unwrap(), Decimal::zero());
        assert_eq!(curve.apr_at(Decimal::from(2u64)).unwrap(), Decimal::from_bps(30_000));
    }

    #[test]
    fn test_rejects_malformed_curves() {
        let cases = vec![
            vec![CurvePoint::new(0, 0)],
            vec![CurvePoint::new(10, 0), CurvePoint::new(100, 10)],
            vec![CurvePoint::new(0, 0), CurvePoint::new(90, 10)],
            vec![CurvePoint::new(0, 0), CurvePoint::new(50, 10), CurvePoint::new(50, 20), CurvePoint::new(100, 30)],
            vec![CurvePoint::new(0, 100), CurvePoint::new(100, 10)],
        ];
        for points in cases {
            let err = InterestRateCurve::new(points).unwrap_err();
            assert!(err.is_configuration_error());
        }
    }

    #[test]
    fn test_deserialization_validates() {
        let ok: InterestRateCurve = serde_json::from_str(
            r#"[{"utilization_pct":0,"apr_bps":0},{"utilization_pct":100,"apr_bps":1000}]"#,
        )
        .unwrap();
        assert_eq!(ok.apr_at_percent(100).unwrap(), Decimal::from_percent(10));

        let bad = serde_json::from_str::<InterestRateCurve>(
            r#"[{"utilization_pct":0,"apr_bps":0},{"utilization_pct":60,"apr_bps":1000}]"#,
        );
        assert!(bad.is_err());
    }
}

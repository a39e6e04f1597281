// ==============================================================================
// torque_curve.rs — ENGINE TORQUE CURVE (RPM -> Nm)
// ------------------------------------------------------------------------------
// Piecewise-linear interpolation over sorted (rpm, torque) control points.
// Outside the defined range the nearest endpoint's torque is held.
//
// ECU stage tuning never mutates a curve: `scaled(multiplier)` derives a new
// one from the stock curve, so repeated re-tuning cannot compound.
// ==============================================================================

use serde::{Deserialize, Serialize};

use crate::drivetrain::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TorquePoint {
    pub rpm: f32,
    pub torque: f32, // Nm
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TorqueCurve {
    points: Vec<TorquePoint>,
}

impl TorqueCurve {
    pub fn new(points: Vec<TorquePoint>) -> Result<Self, ConfigError> {
        let curve = Self { points };
        curve.validate()?;
        Ok(curve)
    }

    pub fn from_pairs(pairs: &[(f32, f32)]) -> Result<Self, ConfigError> {
        Self::new(
            pairs
                .iter()
                .map(|&(rpm, torque)| TorquePoint { rpm, torque })
                .collect(),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.points.is_empty() {
            return Err(ConfigError::EmptyTorqueCurve);
        }
        if self
            .points
            .iter()
            .any(|p| !p.rpm.is_finite() || !p.torque.is_finite())
        {
            return Err(ConfigError::NonFiniteValue { field: "torque_curve" });
        }
        if self.points.windows(2).any(|w| w[1].rpm <= w[0].rpm) {
            return Err(ConfigError::UnsortedTorqueCurve);
        }
        Ok(())
    }

    pub fn points(&self) -> &[TorquePoint] {
        &self.points
    }

    /// Torque at `rpm`. An empty curve yields 0 (no drive).
    pub fn evaluate(&self, rpm: f32) -> f32 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 0.0;
        };

        if !rpm.is_finite() || rpm <= first.rpm {
            return first.torque;
        }
        if rpm >= last.rpm {
            return last.torque;
        }

        // first index whose rpm is above the query; bounds guarantee 1..len
        let hi = self.points.partition_point(|p| p.rpm <= rpm);
        let a = self.points[hi - 1];
        let b = self.points[hi];

        let t = (rpm - a.rpm) / (b.rpm - a.rpm);
        a.torque + (b.torque - a.torque) * t
    }

    /// Derived curve with every torque value multiplied, RPM positions kept.
    pub fn scaled(&self, multiplier: f32) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| TorquePoint { rpm: p.rpm, torque: p.torque * multiplier })
                .collect(),
        }
    }

    /// (rpm, torque) of the highest control point.
    pub fn peak(&self) -> Option<TorquePoint> {
        self.points
            .iter()
            .copied()
            .max_by(|a, b| a.torque.total_cmp(&b.torque))
    }
}

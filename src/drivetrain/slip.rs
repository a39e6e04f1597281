// drivetrain/slip.rs
//! Longitudinal slip estimate per wheel.
//!
//! 0 = pure rolling, 1 = locked. Wheelspin (surface faster than the body)
//! reads as 0 here; only braking lock-up matters to the ABS loop.

use crate::drivetrain::types::WheelContact;

/// Below this body speed (m/s) the ratio is not computed.
pub const MIN_SLIP_SPEED: f32 = 0.5;

pub fn estimate_slip(contact: &WheelContact) -> f32 {
    let body = contact.point_velocity.dot(&contact.forward).abs();
    let surface = (contact.angular_velocity * contact.radius).abs();

    let mut slip = if body > MIN_SLIP_SPEED {
        ((body - surface) / body).clamp(0.0, 1.0)
    } else {
        0.0
    };

    if contact.grounded {
        if let Some(solver) = contact.forward_slip.filter(|s| s.is_finite()) {
            slip = slip.max(solver.abs());
        }
    }

    if slip.is_finite() { slip.clamp(0.0, 1.0) } else { 0.0 }
}

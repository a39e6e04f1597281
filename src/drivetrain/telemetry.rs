// drivetrain/telemetry.rs
//! Per-tick HUD / audio view of a vehicle. Plain data, serialised into
//! snapshots by the server.

use serde::Serialize;

use crate::drivetrain::gearbox::DrivetrainPhase;
use crate::drivetrain::turbo::TurboPhase;
use crate::drivetrain::types::{GearShift, ShiftKind, WheelSet};

/// Torque (Nm) x RPM -> horsepower.
pub const HP_DIVISOR: f32 = 7127.0;

#[inline]
pub fn horsepower(torque: f32, rpm: f32) -> f32 {
    torque * rpm / HP_DIVISOR
}

/// Audio load cue: 1 on upshift, 0 on downshift, else falls off with throttle.
pub fn load_hint(shift: Option<&GearShift>, throttle: f32) -> f32 {
    match shift.map(|s| s.kind) {
        Some(ShiftKind::Upshift) => 1.0,
        Some(ShiftKind::Downshift) => 0.0,
        None => (1.0 - 2.0 * throttle).clamp(0.0, 1.0),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WheelTelemetry {
    pub grounded: bool,
    pub slip: f32,
    pub abs_active: bool,
    pub motor_torque: f32,
    pub brake_torque: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub gear: i32,
    pub gear_label: String,
    pub engine_rpm: f32,
    pub target_rpm: f32,
    pub speed_kmh: f32,
    pub at_limiter: bool,

    pub psi: f32,
    pub normalized_boost: f32,
    pub turbo_phase: Option<TurboPhase>,
    pub drivetrain_phase: DrivetrainPhase,

    pub base_torque: f32,
    pub boosted_torque: f32,
    pub base_hp: f32,
    pub boosted_hp: f32,

    pub load_hint: f32,
    pub wheels: WheelSet<WheelTelemetry>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_fault: Option<String>,
}

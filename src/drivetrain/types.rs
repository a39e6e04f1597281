//! Core shared types for `drivetrain` (engine-agnostic).
// drivetrain/types.rs
use std::fmt;
use std::ops::{Index, IndexMut};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize, Serializer};

// ============================================
// Wheel identification
// ============================================

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum WheelId { FL, FR, RL, RR }

impl WheelId {
    pub const ALL: [WheelId; 4] = [WheelId::FL, WheelId::FR, WheelId::RL, WheelId::RR];

    pub fn as_str(&self) -> &'static str {
        match self {
            WheelId::FL => "FL",
            WheelId::FR => "FR",
            WheelId::RL => "RL",
            WheelId::RR => "RR",
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        match self {
            WheelId::FL => 0,
            WheelId::FR => 1,
            WheelId::RL => 2,
            WheelId::RR => 3,
        }
    }

    pub fn is_front(&self) -> bool {
        matches!(self, WheelId::FL | WheelId::FR)
    }

    pub fn is_rear(&self) -> bool {
        matches!(self, WheelId::RL | WheelId::RR)
    }
}

impl fmt::Display for WheelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One value per wheel, indexed by [`WheelId`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WheelSet<T>(pub [T; 4]);

impl<T> WheelSet<T> {
    pub fn from_fn(mut f: impl FnMut(WheelId) -> T) -> Self {
        WheelSet([
            f(WheelId::FL),
            f(WheelId::FR),
            f(WheelId::RL),
            f(WheelId::RR),
        ])
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }
}

impl<T: Copy> WheelSet<T> {
    pub fn splat(v: T) -> Self {
        WheelSet([v; 4])
    }
}

impl<T> Index<WheelId> for WheelSet<T> {
    type Output = T;
    fn index(&self, id: WheelId) -> &T {
        &self.0[id.index()]
    }
}

impl<T> IndexMut<WheelId> for WheelSet<T> {
    fn index_mut(&mut self, id: WheelId) -> &mut T {
        &mut self.0[id.index()]
    }
}

// ============================================
// ----- driver input -------------------------
// ============================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverInput {
    pub throttle: f32,   // -1..1 (sign = forward / reverse intent)
    pub steering: f32,   // -1..1
    pub brake: f32,      // 0..1
    pub handbrake: bool,
}

#[inline]
fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() { v } else { 0.0 }
}

impl DriverInput {
    /// NaN/inf collapse to 0 and every axis is clamped into its range, so
    /// nothing malformed reaches the feedback loops.
    pub fn sanitized(self) -> Self {
        Self {
            throttle: finite_or_zero(self.throttle).clamp(-1.0, 1.0),
            steering: finite_or_zero(self.steering).clamp(-1.0, 1.0),
            brake: finite_or_zero(self.brake).clamp(0.0, 1.0),
            handbrake: self.handbrake,
        }
    }
}

// ============================================
// ----- solver feedback ----------------------
// ============================================

/// Per-wheel contact feedback from the previous physics step.
#[derive(Debug, Clone, Copy)]
pub struct WheelContact {
    pub grounded: bool,
    pub point_velocity: Vector3<f32>, // m/s, body velocity at the wheel
    pub forward: Vector3<f32>,        // wheel rolling direction (unit)
    pub angular_velocity: f32,        // rad/s
    pub radius: f32,                  // m
    pub forward_slip: Option<f32>,    // solver contact-patch slip, if reported
}

impl Default for WheelContact {
    fn default() -> Self {
        Self {
            grounded: false,
            point_velocity: Vector3::zeros(),
            forward: Vector3::z(),
            angular_velocity: 0.0,
            radius: 0.35,
            forward_slip: None,
        }
    }
}

impl WheelContact {
    #[inline]
    pub fn rpm(&self) -> f32 {
        self.angular_velocity * 60.0 / std::f32::consts::TAU
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChassisFeedback {
    pub speed: f32, // m/s, body speed magnitude
    pub wheels: WheelSet<WheelContact>,
}

impl ChassisFeedback {
    #[inline]
    pub fn speed_kmh(&self) -> f32 {
        finite_or_zero(self.speed).abs() * 3.6
    }
}

// ============================================
// ----- outputs ------------------------------
// ============================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WheelTorque {
    pub motor: f32, // Nm
    pub brake: f32, // Nm, never negative
}

// ============================================
// ----- gears --------------------------------
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gear {
    Reverse,
    Neutral,
    Forward(u8),
}

impl Gear {
    /// -1 = reverse, 0 = neutral, 1..N = forward.
    pub fn number(&self) -> i32 {
        match *self {
            Gear::Reverse => -1,
            Gear::Neutral => 0,
            Gear::Forward(n) => n as i32,
        }
    }

    pub fn label(&self) -> String {
        match *self {
            Gear::Reverse => "R".to_string(),
            Gear::Neutral => "N".to_string(),
            Gear::Forward(n) => n.to_string(),
        }
    }

    pub fn is_forward(&self) -> bool {
        matches!(self, Gear::Forward(_))
    }
}

// on the wire a gear is its number: -1 / 0 / 1..N
impl Serialize for Gear {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.number())
    }
}

impl fmt::Display for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftKind {
    Upshift,
    Downshift,
}

/// Emitted exactly once per gear change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GearShift {
    pub from: Gear,
    pub to: Gear,
    pub kind: ShiftKind,
}

impl GearShift {
    pub fn between(from: Gear, to: Gear) -> Self {
        let kind = if to.number() > from.number() {
            ShiftKind::Upshift
        } else {
            ShiftKind::Downshift
        };
        Self { from, to, kind }
    }
}

// ==============================================================================
// profile.rs — VEHICLE CONFIGURATION (ENGINE, GEARBOX, BRAKES, TURBO, TUNING)
// ------------------------------------------------------------------------------
// Everything here is read-only during simulation. A car/engine change swaps
// an EngineProfile wholesale; tuning stages derive values from it.
// ==============================================================================

use serde::{Deserialize, Serialize};

use crate::drivetrain::error::ConfigError;
use crate::drivetrain::torque_curve::TorqueCurve;
use crate::drivetrain::types::Gear;

fn default_clutch_slip() -> f32 { 0.3 }
fn default_launch_clutch() -> f32 { 0.4 }
fn default_clutch_strength() -> f32 { 100.0 }
fn default_rpm_drop_on_shift() -> f32 { 0.3 }
fn default_rpm_drop_duration() -> f32 { 0.4 }
fn default_rpm_recovery() -> f32 { 0.2 }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineProfile {
    pub name: String,

    pub max_rpm: f32,
    pub idle_rpm: f32,
    pub engine_braking_torque: f32, // Nm, total drag when coasting in gear

    // shift feel figures carried by engine data files; the clutch blend
    // below drives the actual RPM transient
    #[serde(default = "default_clutch_strength")]
    pub clutch_strength: f32,
    #[serde(default = "default_rpm_drop_on_shift")]
    pub rpm_drop_on_shift: f32,     // fraction
    #[serde(default = "default_rpm_drop_duration")]
    pub rpm_drop_duration: f32,     // s
    #[serde(default = "default_rpm_recovery")]
    pub rpm_recovery_duration: f32, // s

    pub torque_curve: TorqueCurve,

    /// index 0 = reverse, 1 = neutral, 2.. = forward gears ascending
    pub gear_ratios: Vec<f32>,
    pub final_drive_ratio: f32,
    pub shift_up_rpm: f32,
    pub shift_down_rpm: f32,
    pub gear_shift_duration: f32, // s, shift lockout

    #[serde(default = "default_clutch_slip")]
    pub clutch_slip_duration: f32, // s, engine/wheel RPM blend after a shift
    #[serde(default = "default_launch_clutch")]
    pub launch_clutch_duration: f32, // s, minimum blend for the 1 -> 2 shift
}

fn curve(pairs: &[(f32, f32)]) -> TorqueCurve {
    // presets are static data; a broken one degrades to an empty curve,
    // which `validate()` then reports
    TorqueCurve::from_pairs(pairs).unwrap_or_default()
}

impl EngineProfile {
    /// Skyline RB26DETT, 6-speed.
    pub fn rb26dett() -> Self {
        Self {
            name: "RB26DETT".to_string(),
            max_rpm: 8000.0,
            idle_rpm: 800.0,
            engine_braking_torque: 50.0,
            clutch_strength: 100.0,
            rpm_drop_on_shift: 0.3,
            rpm_drop_duration: 0.4,
            rpm_recovery_duration: 0.2,
            torque_curve: curve(&[
                (1000.0, 120.0),
                (2000.0, 180.0),
                (3500.0, 225.0),
                (4800.0, 245.0),
                (6000.0, 230.0),
                (6800.0, 215.0),
                (7500.0, 190.0),
                (8000.0, 160.0),
            ]),
            gear_ratios: vec![-3.545, 0.0, 3.827, 2.360, 1.685, 1.312, 1.000, 0.793],
            final_drive_ratio: 3.545,
            shift_up_rpm: 7800.0,
            shift_down_rpm: 2000.0,
            gear_shift_duration: 0.3,
            clutch_slip_duration: default_clutch_slip(),
            launch_clutch_duration: default_launch_clutch(),
        }
    }

    /// Lancer Evolution IX 4G63, 5-speed.
    pub fn evo_4g63() -> Self {
        Self {
            name: "4G63".to_string(),
            max_rpm: 7500.0,
            idle_rpm: 850.0,
            engine_braking_torque: 60.0,
            clutch_strength: 110.0,
            rpm_drop_on_shift: 0.28,
            rpm_drop_duration: 0.35,
            rpm_recovery_duration: 0.18,
            torque_curve: curve(&[
                (1000.0, 180.0),
                (2000.0, 240.0),
                (3000.0, 300.0),
                (3500.0, 340.0),
                (5000.0, 320.0),
                (6500.0, 280.0),
                (7500.0, 220.0),
            ]),
            gear_ratios: vec![-3.416, 0.0, 3.827, 2.360, 1.685, 1.297, 1.000],
            final_drive_ratio: 4.529,
            shift_up_rpm: 7200.0,
            shift_down_rpm: 2200.0,
            gear_shift_duration: 0.28,
            clutch_slip_duration: default_clutch_slip(),
            launch_clutch_duration: default_launch_clutch(),
        }
    }

    /// RX-7 13B-REW rotary, 5-speed.
    pub fn rotary_13b_rew() -> Self {
        Self {
            name: "13B-REW".to_string(),
            max_rpm: 9000.0,
            idle_rpm: 750.0,
            engine_braking_torque: 50.0,
            clutch_strength: 100.0,
            rpm_drop_on_shift: 0.3,
            rpm_drop_duration: 0.4,
            rpm_recovery_duration: 0.2,
            torque_curve: curve(&[
                (1000.0, 120.0),
                (2000.0, 180.0),
                (3000.0, 220.0),
                (4000.0, 250.0),
                (5000.0, 270.0),
                (6000.0, 260.0),
                (7000.0, 240.0),
                (8000.0, 220.0),
                (9000.0, 200.0),
            ]),
            gear_ratios: vec![-3.545, 0.0, 3.483, 2.015, 1.391, 1.000, 0.782],
            final_drive_ratio: 4.100,
            shift_up_rpm: 8900.0,
            shift_down_rpm: 4000.0,
            gear_shift_duration: 0.3,
            clutch_slip_duration: default_clutch_slip(),
            launch_clutch_duration: default_launch_clutch(),
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rb26dett" | "rb26" => Some(Self::rb26dett()),
            "4g63" | "evo_4g63" => Some(Self::evo_4g63()),
            "13b" | "13b-rew" | "rotary_13b_rew" => Some(Self::rotary_13b_rew()),
            _ => None,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let profile: Self = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gear_ratios.is_empty() {
            return Err(ConfigError::EmptyGearTable);
        }
        if self.gear_ratios.len() < 3 {
            return Err(ConfigError::MissingForwardGears);
        }
        if self.gear_ratios.iter().any(|r| !r.is_finite()) {
            return Err(ConfigError::NonFiniteValue { field: "gear_ratios" });
        }
        let scalars = [
            ("max_rpm", self.max_rpm),
            ("idle_rpm", self.idle_rpm),
            ("final_drive_ratio", self.final_drive_ratio),
            ("shift_up_rpm", self.shift_up_rpm),
            ("shift_down_rpm", self.shift_down_rpm),
            ("gear_shift_duration", self.gear_shift_duration),
            ("engine_braking_torque", self.engine_braking_torque),
            ("clutch_strength", self.clutch_strength),
            ("rpm_drop_on_shift", self.rpm_drop_on_shift),
            ("rpm_drop_duration", self.rpm_drop_duration),
            ("rpm_recovery_duration", self.rpm_recovery_duration),
        ];
        if let Some(&(field, _)) = scalars.iter().find(|s| !s.1.is_finite()) {
            return Err(ConfigError::NonFiniteValue { field });
        }
        if !(self.idle_rpm >= 0.0 && self.idle_rpm < self.max_rpm) {
            return Err(ConfigError::InvalidRpmRange { idle: self.idle_rpm, max: self.max_rpm });
        }
        self.torque_curve.validate()
    }

    /// Highest forward gear number (table minus reverse and neutral).
    pub fn max_forward_gear(&self) -> u8 {
        self.gear_ratios.len().saturating_sub(2).min(u8::MAX as usize) as u8
    }

    /// Table index for a gear, clamped into the table (reverse .. top gear).
    pub fn gear_ratio_index(&self, gear: Gear) -> usize {
        if self.gear_ratios.is_empty() {
            return 1;
        }
        let idx = gear.number() + 1;
        if idx < 0 {
            0
        } else {
            (idx as usize).min(self.gear_ratios.len() - 1)
        }
    }

    /// |ratio| for a gear; 0 when the table is missing.
    pub fn gear_ratio(&self, gear: Gear) -> f32 {
        self.gear_ratios
            .get(self.gear_ratio_index(gear))
            .map(|r| r.abs())
            .unwrap_or(0.0)
    }

    /// Engine RPM implied by wheel RPM in `gear`, floored at idle.
    pub fn wheel_based_rpm(&self, wheel_rpm: f32, gear: Gear) -> f32 {
        (wheel_rpm * self.gear_ratio(gear) * self.final_drive_ratio).max(self.idle_rpm)
    }
}

impl Default for EngineProfile {
    fn default() -> Self {
        Self::rb26dett()
    }
}

// ============================================
// ----- tuning stages ------------------------
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EcuStage {
    #[default]
    Stock,
    Stage1,
    Stage2,
    Stage3,
}

impl EcuStage {
    pub fn torque_multiplier(&self) -> f32 {
        match self {
            EcuStage::Stock => 1.0,
            EcuStage::Stage1 => 1.1,
            EcuStage::Stage2 => 1.2,
            EcuStage::Stage3 => 1.3,
        }
    }

    pub fn from_index(i: u8) -> Self {
        match i {
            0 => EcuStage::Stock,
            1 => EcuStage::Stage1,
            2 => EcuStage::Stage2,
            _ => EcuStage::Stage3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurboStage {
    None,
    Stage1,
    Stage2,
    #[default]
    Stage3,
}

impl TurboStage {
    /// 0 means the turbo is removed.
    pub fn max_psi(&self) -> f32 {
        match self {
            TurboStage::None => 0.0,
            TurboStage::Stage1 => 5.0,
            TurboStage::Stage2 => 10.0,
            TurboStage::Stage3 => 15.0,
        }
    }

    pub fn from_index(i: u8) -> Self {
        match i {
            0 => TurboStage::None,
            1 => TurboStage::Stage1,
            2 => TurboStage::Stage2,
            _ => TurboStage::Stage3,
        }
    }
}

// ============================================
// ----- brakes -------------------------------
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxleAbsTuning {
    pub target_slip: f32,
    pub kp: f32,
    pub ki: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrakingConfig {
    pub brake_torque: f32,          // Nm, total at full pedal
    pub power_multiplier: f32,      // global brake bite
    pub handbrake_torque: f32,      // Nm per rear wheel
    pub front_bias: f32,            // 0..1 portion of total on the front axle
    pub steer_bias_reduction: f32,  // front cut at full lock
    pub straight_rear_boost: f32,   // bias moved rearward when straight

    pub abs_enabled: bool,
    pub front_abs: AxleAbsTuning,
    pub rear_abs: AxleAbsTuning,
    pub min_abs_speed_kmh: f32,     // ABS off + standstill fade below
    pub standstill_floor_kmh: f32,  // brake fully faded at/below
    pub integral_limit: f32,
    pub integral_bleed_rate: f32,   // per second, when ABS is inactive

    pub reverse_brake_scale: f32,
}

impl Default for AxleAbsTuning {
    fn default() -> Self {
        Self { target_slip: 0.15, kp: 2600.0, ki: 3600.0 }
    }
}

impl Default for BrakingConfig {
    fn default() -> Self {
        Self {
            brake_torque: 1500.0,
            power_multiplier: 1.25,
            handbrake_torque: 5000.0,
            front_bias: 0.6,
            steer_bias_reduction: 0.4,
            straight_rear_boost: 0.06,

            abs_enabled: true,
            front_abs: AxleAbsTuning { target_slip: 0.15, kp: 2600.0, ki: 3600.0 },
            rear_abs: AxleAbsTuning { target_slip: 0.12, kp: 2000.0, ki: 2800.0 },
            min_abs_speed_kmh: 2.0,
            standstill_floor_kmh: 0.2,
            integral_limit: 1.0,
            integral_bleed_rate: 0.5,

            reverse_brake_scale: 0.7,
        }
    }
}

impl BrakingConfig {
    pub fn axle(&self, front: bool) -> &AxleAbsTuning {
        if front { &self.front_abs } else { &self.rear_abs }
    }
}

// ============================================
// ----- drive layout -------------------------
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// 0 = RWD, 0.5 = AWD, 1 = FWD
    pub front_power_bias: f32,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self { front_power_bias: 0.5 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        for p in [
            EngineProfile::rb26dett(),
            EngineProfile::evo_4g63(),
            EngineProfile::rotary_13b_rew(),
        ] {
            assert_eq!(p.validate(), Ok(()), "{}", p.name);
        }
        assert_eq!(EngineProfile::rb26dett().max_forward_gear(), 6);
        assert_eq!(EngineProfile::evo_4g63().max_forward_gear(), 5);
    }

    #[test]
    fn gear_lookup_clamps_out_of_range() {
        let p = EngineProfile::rb26dett();
        assert_eq!(p.gear_ratio_index(Gear::Reverse), 0);
        assert_eq!(p.gear_ratio_index(Gear::Neutral), 1);
        assert_eq!(p.gear_ratio_index(Gear::Forward(1)), 2);
        assert_eq!(p.gear_ratio_index(Gear::Forward(40)), 7);
        assert_eq!(p.gear_ratio(Gear::Reverse), 3.545);
        assert_eq!(p.gear_ratio(Gear::Forward(40)), 0.793);
    }

    #[test]
    fn missing_gears_are_config_errors() {
        let mut p = EngineProfile::rb26dett();
        p.gear_ratios.clear();
        assert_eq!(p.validate(), Err(ConfigError::EmptyGearTable));
        assert_eq!(p.gear_ratio(Gear::Forward(1)), 0.0);

        p.gear_ratios = vec![-3.0, 0.0];
        assert_eq!(p.validate(), Err(ConfigError::MissingForwardGears));
    }

    #[test]
    fn shift_feel_fields_default_when_absent() {
        let mut value = serde_json::to_value(EngineProfile::evo_4g63()).unwrap();
        assert_eq!(value["clutch_strength"], 110.0);
        let obj = value.as_object_mut().unwrap();
        for key in ["clutch_strength", "rpm_drop_on_shift", "rpm_drop_duration", "rpm_recovery_duration"] {
            obj.remove(key);
        }
        let p = EngineProfile::from_json_str(&value.to_string()).unwrap();
        assert_eq!(p.clutch_strength, 100.0);
        assert_eq!(p.rpm_drop_on_shift, 0.3);
        assert_eq!(p.rpm_drop_duration, 0.4);
        assert_eq!(p.rpm_recovery_duration, 0.2);

        let mut bad = EngineProfile::rb26dett();
        bad.rpm_drop_on_shift = f32::NAN;
        assert_eq!(bad.validate(), Err(ConfigError::NonFiniteValue { field: "rpm_drop_on_shift" }));
    }

    #[test]
    fn profile_loads_from_json() {
        let json = serde_json::to_string(&EngineProfile::evo_4g63()).unwrap();
        let p = EngineProfile::from_json_str(&json).unwrap();
        assert_eq!(p, EngineProfile::evo_4g63());

        assert!(matches!(
            EngineProfile::from_json_str("{\"name\": 3}"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn stage_tables() {
        assert_eq!(EcuStage::from_index(2).torque_multiplier(), 1.2);
        assert_eq!(TurboStage::from_index(0).max_psi(), 0.0);
        assert_eq!(TurboStage::from_index(9), TurboStage::Stage3);
    }
}

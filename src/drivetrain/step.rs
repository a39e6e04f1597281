// ==============================================================================
// step.rs — PER-TICK VEHICLE SIMULATION (DRIVETRAIN + TURBO + BRAKES)
// ==============================================================================
// Order per fixed tick:
// 1) sanitize input, read previous-step wheel feedback
// 2) gearbox: RPM + automatic shift (may emit GearShift)
// 3) turbo: PSI + blow-off / backfire events (consumes the GearShift)
// 4) torque: tuned curve(rpm) x throttle x boost x gear x final drive,
//    split front/rear by power bias; engine braking when coasting in gear
// 5) slip estimate + ABS brake torque
// 6) emit per-wheel {motor, brake} + telemetry
//
// A profile that fails validation leaves the vehicle with no drive: motor
// torque is exactly 0, RPM and gear are frozen, brakes keep working.
// ==============================================================================

use log::{debug, info, warn};

use crate::drivetrain::abs::{AbsController, BrakeRequest};
use crate::drivetrain::error::ConfigError;
use crate::drivetrain::gearbox::{DrivetrainState, GearboxInput, ShiftPolicy};
use crate::drivetrain::profile::{BrakingConfig, DriveConfig, EcuStage, EngineProfile, TurboStage};
use crate::drivetrain::rng::RandomSource;
use crate::drivetrain::slip::estimate_slip;
use crate::drivetrain::telemetry::{Telemetry, WheelTelemetry, horsepower, load_hint};
use crate::drivetrain::torque_curve::TorqueCurve;
use crate::drivetrain::turbo::{TurboConfig, TurboEvent, TurboInput, TurboModel};
use crate::drivetrain::types::{
    ChassisFeedback, DriverInput, Gear, GearShift, WheelId, WheelSet, WheelTorque,
};

/// Brake pedal above this cancels forward drive.
const DRIVE_BRAKE_CANCEL: f32 = 0.05;
/// Throttle below this counts as coasting.
const DRIVE_THROTTLE_MIN: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct StepOutput {
    pub wheels: WheelSet<WheelTorque>,
    pub telemetry: Telemetry,
    pub shift: Option<GearShift>,
    pub turbo_events: Vec<TurboEvent>,
    pub diagnostic: Option<ConfigError>,
}

pub struct VehicleSim {
    profile: EngineProfile,
    tuned_curve: TorqueCurve,
    ecu_multiplier: f32,

    drive: DriveConfig,
    braking: BrakingConfig,
    policy: ShiftPolicy,
    turbo_config: TurboConfig,

    drivetrain: DrivetrainState,
    turbo: Option<TurboModel>,
    abs: AbsController,
    rng: Box<dyn RandomSource>,

    fault: Option<ConfigError>,
    fault_reported: bool,
}

impl VehicleSim {
    pub fn new(profile: EngineProfile, rng: Box<dyn RandomSource>) -> Self {
        let turbo_config = TurboConfig::default();
        let fault = profile.validate().err();
        Self {
            tuned_curve: profile.torque_curve.clone(),
            ecu_multiplier: 1.0,
            drive: DriveConfig::default(),
            braking: BrakingConfig::default(),
            policy: ShiftPolicy::default(),
            drivetrain: DrivetrainState::new(&profile),
            turbo: Some(TurboModel::new(turbo_config)),
            turbo_config,
            abs: AbsController::new(),
            rng,
            fault,
            fault_reported: false,
            profile,
        }
    }

    pub fn with_braking(mut self, braking: BrakingConfig) -> Self {
        self.braking = braking;
        self
    }

    pub fn with_drive(mut self, drive: DriveConfig) -> Self {
        self.set_power_bias(drive.front_power_bias);
        self
    }

    pub fn with_shift_policy(mut self, policy: ShiftPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// `None` builds the vehicle naturally aspirated.
    pub fn with_turbo(mut self, config: Option<TurboConfig>) -> Self {
        match config {
            Some(cfg) => {
                self.turbo_config = cfg;
                self.turbo = (cfg.max_psi > 0.0).then(|| TurboModel::new(cfg));
            }
            None => self.turbo = None,
        }
        self
    }

    // --------------------------------------------------
    // accessors
    // --------------------------------------------------

    pub fn profile(&self) -> &EngineProfile {
        &self.profile
    }

    pub fn tuned_curve(&self) -> &TorqueCurve {
        &self.tuned_curve
    }

    pub fn ecu_multiplier(&self) -> f32 {
        self.ecu_multiplier
    }

    pub fn drive(&self) -> &DriveConfig {
        &self.drive
    }

    pub fn braking(&self) -> &BrakingConfig {
        &self.braking
    }

    pub fn drivetrain(&self) -> &DrivetrainState {
        &self.drivetrain
    }

    /// Direct access for warm starts (replays, tests).
    pub fn drivetrain_mut(&mut self) -> &mut DrivetrainState {
        &mut self.drivetrain
    }

    pub fn turbo(&self) -> Option<&TurboModel> {
        self.turbo.as_ref()
    }

    pub fn abs(&self) -> &AbsController {
        &self.abs
    }

    pub fn config_fault(&self) -> Option<&ConfigError> {
        self.fault.as_ref()
    }

    pub fn engine_rpm(&self) -> f32 {
        self.drivetrain.engine_rpm()
    }

    pub fn gear(&self) -> Gear {
        self.drivetrain.gear()
    }

    // --------------------------------------------------
    // configuration entry points
    // --------------------------------------------------

    /// Wholesale engine swap. A broken profile is still installed (no drive)
    /// so the caller can keep stepping; the error is returned and reported.
    pub fn set_engine_profile(&mut self, profile: EngineProfile) -> Result<(), ConfigError> {
        let result = profile.validate();
        self.profile = profile;
        self.tuned_curve = self.profile.torque_curve.scaled(self.ecu_multiplier);

        match &result {
            Ok(()) => {
                self.fault = None;
                self.drivetrain.reclamp(&self.profile);
                info!("engine profile -> {}", self.profile.name);
            }
            Err(e) => {
                self.fault = Some(e.clone());
                self.fault_reported = false;
            }
        }
        result
    }

    pub fn set_ecu_stage(&mut self, stage: EcuStage) {
        self.set_ecu_multiplier(stage.torque_multiplier());
    }

    /// Rebuilds the tuned curve from the stock one.
    pub fn set_ecu_multiplier(&mut self, multiplier: f32) {
        self.ecu_multiplier = if multiplier.is_finite() { multiplier.max(0.0) } else { 1.0 };
        self.tuned_curve = self.profile.torque_curve.scaled(self.ecu_multiplier);
    }

    pub fn set_turbo_stage(&mut self, stage: TurboStage) {
        self.set_turbo_max_psi(stage.max_psi());
    }

    /// 0 PSI detaches the turbo; a positive value attaches or re-ranges it.
    pub fn set_turbo_max_psi(&mut self, max_psi: f32) {
        let max_psi = if max_psi.is_finite() { max_psi.max(0.0) } else { 0.0 };
        self.turbo_config.max_psi = max_psi;

        if max_psi <= 0.0 {
            self.turbo = None;
            return;
        }
        match self.turbo.as_mut() {
            Some(turbo) => turbo.set_max_psi(max_psi),
            None => self.turbo = Some(TurboModel::new(self.turbo_config)),
        }
    }

    pub fn set_power_bias(&mut self, front: f32) {
        self.drive.front_power_bias = if front.is_finite() { front.clamp(0.0, 1.0) } else { 0.5 };
    }

    pub fn set_braking(&mut self, braking: BrakingConfig) {
        self.braking = braking;
    }

    /// Respawn: idle, neutral, 0 PSI, ABS integrals cleared.
    pub fn reset(&mut self) {
        self.drivetrain.reset(&self.profile);
        if let Some(turbo) = self.turbo.as_mut() {
            turbo.reset();
        }
        self.abs.reset();
    }

    // --------------------------------------------------
    // tick
    // --------------------------------------------------

    pub fn step(&mut self, input: DriverInput, feedback: &ChassisFeedback, dt: f32) -> StepOutput {
        let input = input.sanitized();
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let speed_kmh = feedback.speed_kmh();

        let slip = WheelSet::from_fn(|id| estimate_slip(&feedback.wheels[id]));
        let grounded = WheelSet::from_fn(|id| feedback.wheels[id].grounded);

        let mut shift = None;
        let mut turbo_events = Vec::new();
        let mut motor = WheelSet::splat(0.0_f32);
        let mut base_torque = 0.0;
        let mut boosted_torque = 0.0;

        if self.fault.is_none() {
            let wheel_rpm = feedback.wheels.values().map(|w| w.rpm().abs()).sum::<f32>() / 4.0;
            let gearbox_in = GearboxInput {
                throttle: input.throttle,
                brake: input.brake,
                handbrake: input.handbrake,
                speed_kmh,
                wheel_rpm,
            };
            shift = self.drivetrain.update(&self.profile, &self.policy, &gearbox_in, dt);

            let at_limiter = self.drivetrain.at_limiter(&self.profile);
            if let Some(turbo) = self.turbo.as_mut() {
                let turbo_in = TurboInput { throttle: input.throttle, shift, at_limiter };
                turbo_events = turbo.update(&turbo_in, dt, self.rng.as_mut());
                for event in &turbo_events {
                    debug!("turbo {:?}", event);
                }
            }

            base_torque = self.tuned_curve.evaluate(self.drivetrain.engine_rpm());
            let boost = self.turbo.as_ref().map_or(1.0, TurboModel::boost_multiplier);
            boosted_torque = base_torque * boost;

            motor = self.motor_torque(&input, boosted_torque);
        } else if !self.fault_reported {
            if let Some(fault) = &self.fault {
                warn!("{}: no drive available: {}", self.profile.name, fault);
            }
            self.fault_reported = true;
        }

        let brake_req = BrakeRequest {
            brake: input.brake,
            steering: input.steering,
            handbrake: input.handbrake,
            reversing: self.drivetrain.gear() == Gear::Reverse,
            speed_kmh,
        };
        let brakes = self.abs.compute(&self.braking, &brake_req, &slip, &grounded, dt);

        let wheels = WheelSet::from_fn(|id| WheelTorque {
            motor: if motor[id].is_finite() { motor[id] } else { 0.0 },
            brake: brakes[id],
        });

        let telemetry = self.telemetry(&input, speed_kmh, base_torque, boosted_torque, shift.as_ref(), &wheels, &slip, &grounded);

        StepOutput {
            wheels,
            telemetry,
            shift,
            turbo_events,
            diagnostic: self.fault.clone(),
        }
    }

    /// Per-wheel drive torque (Nm) from flywheel torque.
    fn motor_torque(&self, input: &DriverInput, flywheel: f32) -> WheelSet<f32> {
        let gear = self.drivetrain.gear();
        if gear == Gear::Neutral || self.drivetrain.is_shifting() {
            return WheelSet::splat(0.0);
        }

        let ratio = self.profile.gear_ratio(gear) * self.profile.final_drive_ratio;
        let bias = self.drive.front_power_bias;
        let split = |total: f32| {
            WheelSet::from_fn(|id: WheelId| {
                if id.is_front() { total * bias * 0.5 } else { total * (1.0 - bias) * 0.5 }
            })
        };

        if gear == Gear::Reverse {
            // held brake does not cancel reverse drive; reverse ignores the
            // power bias and pulls evenly on all four wheels
            let pull = (-input.throttle).max(0.0);
            return WheelSet::splat(-(flywheel * pull * ratio) / 4.0);
        }

        if input.brake > DRIVE_BRAKE_CANCEL {
            return WheelSet::splat(0.0);
        }
        if input.throttle >= DRIVE_THROTTLE_MIN {
            return split(flywheel * input.throttle * ratio);
        }

        // coasting in gear: engine drag on every wheel
        WheelSet::splat(-self.profile.engine_braking_torque / 4.0)
    }

    #[allow(clippy::too_many_arguments)]
    fn telemetry(
        &self,
        input: &DriverInput,
        speed_kmh: f32,
        base_torque: f32,
        boosted_torque: f32,
        shift: Option<&GearShift>,
        wheels: &WheelSet<WheelTorque>,
        slip: &WheelSet<f32>,
        grounded: &WheelSet<bool>,
    ) -> Telemetry {
        let rpm = self.drivetrain.engine_rpm();
        let gear = self.drivetrain.gear();

        // displayed torque follows the pedal in the gear's drive direction
        let pedal = match gear {
            Gear::Reverse => (-input.throttle).max(0.0),
            _ => input.throttle.max(0.0),
        };
        let base_torque = base_torque * pedal;
        let boosted_torque = boosted_torque * pedal;

        Telemetry {
            gear: gear.number(),
            gear_label: gear.label(),
            engine_rpm: rpm,
            target_rpm: self.drivetrain.target_rpm(),
            speed_kmh,
            at_limiter: self.drivetrain.at_limiter(&self.profile),

            psi: self.turbo.as_ref().map_or(0.0, TurboModel::current_psi),
            normalized_boost: self.turbo.as_ref().map_or(0.0, TurboModel::normalized_boost),
            turbo_phase: self.turbo.as_ref().map(TurboModel::phase),
            drivetrain_phase: self.drivetrain.phase(),

            base_torque,
            boosted_torque,
            base_hp: horsepower(base_torque, rpm),
            boosted_hp: horsepower(boosted_torque, rpm),

            load_hint: load_hint(shift, input.throttle),
            wheels: WheelSet::from_fn(|id| WheelTelemetry {
                grounded: grounded[id],
                slip: slip[id],
                abs_active: self.abs.is_active(id),
                motor_torque: wheels[id].motor,
                brake_torque: wheels[id].brake,
            }),

            config_fault: self.fault.as_ref().map(ToString::to_string),
        }
    }
}

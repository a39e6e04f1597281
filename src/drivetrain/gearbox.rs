// ==============================================================================
// gearbox.rs — ENGINE RPM + AUTOMATIC TRANSMISSION
// ==============================================================================
// Per tick, in this order:
// 1) Transmission
//    - a running shift locks out further shifts until gear_shift_duration
//    - reverse / forward-1 / neutral selection at low speed
//    - upshift at shift_up_rpm under throttle
//    - downshift only if the predicted RPM one gear down stays below
//      (shift_up_rpm - margin); threshold raised while braking
// 2) Engine RPM
//    - wheel RPM: adaptive low-pass of the mean |wheel RPM|
//    - target: wheel-based RPM in gear (+ a share of the headroom under
//      throttle), clutch blend pre-shift RPM -> new gear after a shift,
//      free revving in neutral
//    - SmoothDamp toward target, slower when coasting
//    - result always inside [idle_rpm, max_rpm]
// ==============================================================================

use log::debug;
use serde::{Deserialize, Serialize};

use crate::drivetrain::profile::EngineProfile;
use crate::drivetrain::types::{Gear, GearShift};

/// Shift-policy and smoothing constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftPolicy {
    pub reverse_engage_kmh: f32,
    pub reverse_throttle: f32,
    pub neutral_kmh: f32,
    pub idle_throttle: f32,        // |throttle| below this counts as off
    pub upshift_min_throttle: f32,
    pub downshift_min_kmh: f32,
    pub downshift_margin_rpm: f32,
    pub braking_downshift_scale: f32,
    pub braking_threshold: f32,

    pub throttle_headroom: f32,    // share of (max - wheel rpm) added under throttle
    pub neutral_rev_share: f32,    // share of (max - idle) reachable in neutral

    pub coast_wheel_smoothing: f32,  // 1/s
    pub drive_wheel_smoothing: f32,  // 1/s
    pub coast_damping: f32,          // s
    pub drive_damping: f32,          // s
}

impl Default for ShiftPolicy {
    fn default() -> Self {
        Self {
            reverse_engage_kmh: 5.0,
            reverse_throttle: 0.3,
            neutral_kmh: 2.0,
            idle_throttle: 0.1,
            upshift_min_throttle: 0.5,
            downshift_min_kmh: 5.0,
            downshift_margin_rpm: 500.0,
            braking_downshift_scale: 1.15,
            braking_threshold: 0.2,

            throttle_headroom: 0.3,
            neutral_rev_share: 0.5,

            coast_wheel_smoothing: 2.0,
            drive_wheel_smoothing: 5.0,
            coast_damping: 0.3,
            drive_damping: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GearboxInput {
    pub throttle: f32,   // -1..1
    pub brake: f32,      // 0..1
    pub handbrake: bool,
    pub speed_kmh: f32,
    pub wheel_rpm: f32,  // mean |wheel rpm|, unsmoothed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DrivetrainPhase {
    Neutral,
    Forward { gear: u8 },
    Reverse,
    Shifting { from: i32, to: i32 },
}

#[derive(Debug, Clone, Copy)]
struct ShiftLock {
    from: Gear,
    to: Gear,
    elapsed: f32,
}

#[derive(Debug, Clone, Copy)]
struct ClutchSlip {
    pre_shift_rpm: f32,
    elapsed: f32,
    duration: f32,
}

/// `clamp` that tolerates an inverted or NaN range from a broken profile.
#[inline]
fn clamp_rpm(profile: &EngineProfile, rpm: f32) -> f32 {
    rpm.max(profile.idle_rpm).min(profile.max_rpm)
}

/// Critically damped follow (Unity-style SmoothDamp) with overshoot guard.
pub(crate) fn smooth_damp(
    current: f32,
    target: f32,
    velocity: &mut f32,
    smooth_time: f32,
    dt: f32,
) -> f32 {
    if dt <= 0.0 {
        return current;
    }
    let smooth_time = smooth_time.max(1e-4);
    let omega = 2.0 / smooth_time;
    let x = omega * dt;
    let exp = 1.0 / (1.0 + x + 0.48 * x * x + 0.235 * x * x * x);

    let change = current - target;
    let temp = (*velocity + omega * change) * dt;
    *velocity = (*velocity - omega * temp) * exp;
    let mut out = target + (change + temp) * exp;

    if (target - current > 0.0) == (out > target) {
        out = target;
        *velocity = 0.0;
    }
    out
}

#[derive(Debug, Clone)]
pub struct DrivetrainState {
    engine_rpm: f32,
    target_rpm: f32,
    gear: Gear,
    shift: Option<ShiftLock>,
    clutch: Option<ClutchSlip>,
    wheel_rpm: f32,
    rpm_velocity: f32,
}

impl DrivetrainState {
    /// Fresh spawn: idle, neutral.
    pub fn new(profile: &EngineProfile) -> Self {
        Self::in_gear(profile, Gear::Neutral, profile.idle_rpm, 0.0)
    }

    /// Warm start in a given gear (replays, tests, mid-race respawn).
    pub fn in_gear(profile: &EngineProfile, gear: Gear, engine_rpm: f32, wheel_rpm: f32) -> Self {
        let engine_rpm = clamp_rpm(profile, engine_rpm);
        Self {
            engine_rpm,
            target_rpm: engine_rpm,
            gear,
            shift: None,
            clutch: None,
            wheel_rpm: wheel_rpm.abs(),
            rpm_velocity: 0.0,
        }
    }

    pub fn reset(&mut self, profile: &EngineProfile) {
        *self = Self::new(profile);
    }

    /// Pull runtime state back inside a (new) profile's bounds.
    pub fn reclamp(&mut self, profile: &EngineProfile) {
        self.engine_rpm = clamp_rpm(profile, self.engine_rpm);
        self.target_rpm = clamp_rpm(profile, self.target_rpm);
        self.rpm_velocity = 0.0;
        self.shift = None;
        self.clutch = None;
        if let Gear::Forward(n) = self.gear {
            let top = profile.max_forward_gear();
            self.gear = if top == 0 { Gear::Neutral } else { Gear::Forward(n.clamp(1, top)) };
        }
    }

    pub fn engine_rpm(&self) -> f32 {
        self.engine_rpm
    }

    pub fn target_rpm(&self) -> f32 {
        self.target_rpm
    }

    pub fn gear(&self) -> Gear {
        self.gear
    }

    pub fn wheel_rpm(&self) -> f32 {
        self.wheel_rpm
    }

    pub fn is_shifting(&self) -> bool {
        self.shift.is_some()
    }

    pub fn is_clutch_slipping(&self) -> bool {
        self.clutch.is_some()
    }

    pub fn phase(&self) -> DrivetrainPhase {
        if let Some(lock) = self.shift {
            return DrivetrainPhase::Shifting { from: lock.from.number(), to: lock.to.number() };
        }
        match self.gear {
            Gear::Neutral => DrivetrainPhase::Neutral,
            Gear::Reverse => DrivetrainPhase::Reverse,
            Gear::Forward(gear) => DrivetrainPhase::Forward { gear },
        }
    }

    pub fn at_limiter(&self, profile: &EngineProfile) -> bool {
        self.engine_rpm >= profile.max_rpm - 100.0
    }

    /// One fixed tick. Returns the gear change started on this tick, if any.
    pub fn update(
        &mut self,
        profile: &EngineProfile,
        policy: &ShiftPolicy,
        input: &GearboxInput,
        dt: f32,
    ) -> Option<GearShift> {
        let shift = self.update_transmission(profile, policy, input, dt);
        self.update_engine(profile, policy, input, dt);
        shift
    }

    fn change_gear(&mut self, to: Gear, locked: bool, profile: &EngineProfile) -> GearShift {
        let from = self.gear;
        self.gear = to;
        if locked {
            self.shift = Some(ShiftLock { from, to, elapsed: 0.0 });
            let duration = if from == Gear::Forward(1) && to == Gear::Forward(2) {
                profile.clutch_slip_duration.max(profile.launch_clutch_duration)
            } else {
                profile.clutch_slip_duration
            };
            self.clutch = Some(ClutchSlip { pre_shift_rpm: self.engine_rpm, elapsed: 0.0, duration });
        } else {
            self.shift = None;
            self.clutch = None;
        }
        let event = GearShift::between(from, to);
        debug!("gear {} -> {} ({:?}) at {:.0} rpm", from, to, event.kind, self.engine_rpm);
        event
    }

    fn update_transmission(
        &mut self,
        profile: &EngineProfile,
        policy: &ShiftPolicy,
        input: &GearboxInput,
        dt: f32,
    ) -> Option<GearShift> {
        if let Some(lock) = self.shift.as_mut() {
            lock.elapsed += dt;
            if lock.elapsed >= profile.gear_shift_duration {
                self.shift = None;
            }
            return None;
        }

        let throttle = input.throttle;
        let speed = input.speed_kmh;

        // ----------------------------------------------
        // Reverse / neutral
        // ----------------------------------------------
        if throttle < -policy.reverse_throttle
            && speed < policy.reverse_engage_kmh
            && self.gear != Gear::Reverse
        {
            return Some(self.change_gear(Gear::Reverse, false, profile));
        }
        if throttle > policy.reverse_throttle
            && self.gear == Gear::Reverse
            && speed < policy.reverse_engage_kmh
        {
            return Some(self.change_gear(Gear::Forward(1), false, profile));
        }
        if speed < policy.neutral_kmh
            && throttle.abs() < policy.idle_throttle
            && self.gear != Gear::Neutral
        {
            return Some(self.change_gear(Gear::Neutral, false, profile));
        }
        if throttle > policy.idle_throttle && self.gear == Gear::Neutral {
            // engagement bites through the clutch like any other shift
            return Some(self.change_gear(Gear::Forward(1), true, profile));
        }

        let Gear::Forward(n) = self.gear else { return None };

        // ----------------------------------------------
        // Upshift
        // ----------------------------------------------
        if n < profile.max_forward_gear()
            && throttle > policy.upshift_min_throttle
            && self.engine_rpm >= profile.shift_up_rpm
        {
            return Some(self.change_gear(Gear::Forward(n + 1), true, profile));
        }

        // ----------------------------------------------
        // Downshift (look-ahead)
        // ----------------------------------------------
        if n > 1 && speed > policy.downshift_min_kmh {
            let braking = input.brake > policy.braking_threshold || input.handbrake;
            let threshold = if braking {
                profile.shift_down_rpm * policy.braking_downshift_scale
            } else {
                profile.shift_down_rpm
            };

            let lower = Gear::Forward(n - 1);
            let current_ratio = profile.gear_ratio(self.gear).max(1e-3);
            let predicted = self.engine_rpm * (profile.gear_ratio(lower) / current_ratio);

            if self.engine_rpm <= threshold
                && predicted < profile.shift_up_rpm - policy.downshift_margin_rpm
            {
                return Some(self.change_gear(lower, true, profile));
            }
        }

        None
    }

    fn update_engine(
        &mut self,
        profile: &EngineProfile,
        policy: &ShiftPolicy,
        input: &GearboxInput,
        dt: f32,
    ) {
        // throttle in the direction the gear drives
        let drive = match self.gear {
            Gear::Reverse => -input.throttle,
            _ => input.throttle,
        };
        let transitioning = self.shift.is_some() || self.clutch.is_some();
        let coasting = drive < policy.idle_throttle && !transitioning;

        let raw = if input.wheel_rpm.is_finite() { input.wheel_rpm.abs() } else { 0.0 };
        let rate = if coasting { policy.coast_wheel_smoothing } else { policy.drive_wheel_smoothing };
        self.wheel_rpm += (raw - self.wheel_rpm) * (dt * rate).clamp(0.0, 1.0);

        let gear_rpm = self.wheel_rpm * profile.gear_ratio(self.gear) * profile.final_drive_ratio;

        let mut target = if let Some(mut clutch) = self.clutch.take() {
            clutch.elapsed += dt;
            let t = if clutch.duration > 0.0 {
                (clutch.elapsed / clutch.duration).clamp(0.0, 1.0)
            } else {
                1.0
            };
            if t < 1.0 {
                self.clutch = Some(clutch);
            }
            clutch.pre_shift_rpm + (gear_rpm - clutch.pre_shift_rpm) * t
        } else if self.gear != Gear::Neutral {
            let wheel_based = gear_rpm.max(profile.idle_rpm);
            if drive > policy.idle_throttle {
                wheel_based + drive * (profile.max_rpm - wheel_based) * policy.throttle_headroom
            } else {
                wheel_based
            }
        } else if drive > policy.idle_throttle {
            profile.idle_rpm + drive * (profile.max_rpm - profile.idle_rpm) * policy.neutral_rev_share
        } else {
            profile.idle_rpm
        };
        target = clamp_rpm(profile, target);
        self.target_rpm = target;

        let damping = if coasting { policy.coast_damping } else { policy.drive_damping };
        let rpm = smooth_damp(self.engine_rpm, target, &mut self.rpm_velocity, damping, dt);
        self.engine_rpm = if rpm.is_finite() {
            clamp_rpm(profile, rpm)
        } else {
            self.rpm_velocity = 0.0;
            target
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivetrain::types::ShiftKind;

    const DT: f32 = 0.01;

    fn input(throttle: f32, speed_kmh: f32, wheel_rpm: f32) -> GearboxInput {
        GearboxInput { throttle, brake: 0.0, handbrake: false, speed_kmh, wheel_rpm }
    }

    #[test]
    fn smooth_damp_converges_without_overshoot() {
        let mut v = 0.0;
        let mut x = 0.0;
        for _ in 0..500 {
            let next = smooth_damp(x, 100.0, &mut v, 0.15, DT);
            assert!(next >= x && next <= 100.0);
            x = next;
        }
        assert!((x - 100.0).abs() < 1e-2);
    }

    #[test]
    fn throttle_from_neutral_engages_first_through_clutch() {
        let p = EngineProfile::rb26dett();
        let mut s = DrivetrainState::new(&p);
        let shift = s.update(&p, &ShiftPolicy::default(), &input(1.0, 0.0, 0.0), DT);
        assert_eq!(shift.map(|g| (g.from, g.to, g.kind)), Some((Gear::Neutral, Gear::Forward(1), ShiftKind::Upshift)));
        assert!(s.is_shifting());
        assert_eq!(s.phase(), DrivetrainPhase::Shifting { from: 0, to: 1 });
    }

    #[test]
    fn reverse_and_back_at_low_speed() {
        let p = EngineProfile::rb26dett();
        let policy = ShiftPolicy::default();
        let mut s = DrivetrainState::in_gear(&p, Gear::Forward(1), 1500.0, 50.0);

        let shift = s.update(&p, &policy, &input(-1.0, 3.0, 50.0), DT);
        assert_eq!(s.gear(), Gear::Reverse);
        assert_eq!(shift.map(|g| g.kind), Some(ShiftKind::Downshift));
        assert!(!s.is_shifting());

        s.update(&p, &policy, &input(1.0, 3.0, 50.0), DT);
        assert_eq!(s.gear(), Gear::Forward(1));

        // too fast to reverse
        let mut fast = DrivetrainState::in_gear(&p, Gear::Forward(3), 3000.0, 500.0);
        fast.update(&p, &policy, &input(-1.0, 40.0, 500.0), DT);
        assert_eq!(fast.gear(), Gear::Forward(3));
    }

    #[test]
    fn drops_to_neutral_when_stopped() {
        let p = EngineProfile::rb26dett();
        let mut s = DrivetrainState::in_gear(&p, Gear::Forward(1), 900.0, 0.0);
        s.update(&p, &ShiftPolicy::default(), &input(0.0, 0.5, 0.0), DT);
        assert_eq!(s.gear(), Gear::Neutral);
        assert_eq!(s.phase(), DrivetrainPhase::Neutral);
    }

    #[test]
    fn shift_locks_out_further_shifts() {
        let p = EngineProfile::rb26dett();
        let policy = ShiftPolicy::default();
        let wheel = p.shift_up_rpm / (p.gear_ratio(Gear::Forward(2)) * p.final_drive_ratio);
        let mut s = DrivetrainState::in_gear(&p, Gear::Forward(2), p.shift_up_rpm, wheel);

        assert!(s.update(&p, &policy, &input(1.0, 120.0, wheel), DT).is_some());
        assert_eq!(s.gear(), Gear::Forward(3));

        let mut ticks = 0;
        while s.is_shifting() {
            assert!(s.update(&p, &policy, &input(1.0, 120.0, wheel), DT).is_none());
            ticks += 1;
            assert!(ticks < 100);
        }
        assert!(ticks as f32 * DT >= p.gear_shift_duration - DT);
    }

    #[test]
    fn first_to_second_slips_longer() {
        let p = EngineProfile::rb26dett();
        let policy = ShiftPolicy::default();
        let wheel = p.shift_up_rpm / (p.gear_ratio(Gear::Forward(1)) * p.final_drive_ratio);
        let mut s = DrivetrainState::in_gear(&p, Gear::Forward(1), p.shift_up_rpm, wheel);
        s.update(&p, &policy, &input(1.0, 60.0, wheel), DT);
        assert_eq!(s.gear(), Gear::Forward(2));

        let mut ticks = 1;
        while s.is_clutch_slipping() {
            s.update(&p, &policy, &input(1.0, 60.0, wheel), DT);
            ticks += 1;
            assert!(ticks < 200);
        }
        // launch clutch (0.4 s) outlasts the 0.3 s shift lockout
        assert!(ticks as f32 * DT > p.gear_shift_duration + 0.05);
    }

    #[test]
    fn downshift_needs_low_rpm_and_lookahead() {
        let p = EngineProfile::rb26dett();
        let policy = ShiftPolicy::default();
        let wheel = 2100.0 / (p.gear_ratio(Gear::Forward(4)) * p.final_drive_ratio);

        let mut cruising = DrivetrainState::in_gear(&p, Gear::Forward(4), 2100.0, wheel);
        assert!(cruising.update(&p, &policy, &input(0.0, 60.0, wheel), DT).is_none());
        assert_eq!(cruising.gear(), Gear::Forward(4));

        let mut braking = DrivetrainState::in_gear(&p, Gear::Forward(4), 2100.0, wheel);
        let brake = GearboxInput { brake: 1.0, ..input(0.0, 60.0, wheel) };
        let shift = braking.update(&p, &policy, &brake, DT);
        assert_eq!(shift.map(|g| (g.to, g.kind)), Some((Gear::Forward(3), ShiftKind::Downshift)));
    }

    #[test]
    fn rpm_stays_inside_engine_range() {
        let p = EngineProfile::evo_4g63();
        let policy = ShiftPolicy::default();
        let mut s = DrivetrainState::new(&p);
        let mut wheel = 0.0_f32;
        for i in 0..3000 {
            let throttle = if (i / 400) % 2 == 0 { 1.0 } else { -0.2 };
            wheel = (wheel + throttle * 2.0).clamp(0.0, 3000.0);
            s.update(&p, &policy, &input(throttle, wheel * 0.1, wheel), DT);
            assert!(s.engine_rpm() >= p.idle_rpm && s.engine_rpm() <= p.max_rpm);
        }
    }

    #[test]
    fn reclamp_after_profile_swap() {
        let big = EngineProfile::rotary_13b_rew();
        let small = EngineProfile::evo_4g63();
        let mut s = DrivetrainState::in_gear(&big, Gear::Forward(5), 8800.0, 900.0);
        s.reclamp(&small);
        assert_eq!(s.engine_rpm(), small.max_rpm);
        assert_eq!(s.gear(), Gear::Forward(5));

        let mut short = EngineProfile::evo_4g63();
        short.gear_ratios.truncate(4); // reverse, neutral, 1st, 2nd
        s.reclamp(&short);
        assert_eq!(s.gear(), Gear::Forward(2));
    }

    #[test]
    fn nan_wheel_speed_is_ignored() {
        let p = EngineProfile::rb26dett();
        let mut s = DrivetrainState::in_gear(&p, Gear::Forward(2), 3000.0, 300.0);
        s.update(&p, &ShiftPolicy::default(), &input(0.5, 50.0, f32::NAN), DT);
        assert!(s.engine_rpm().is_finite());
        assert!(s.wheel_rpm().is_finite());
    }
}

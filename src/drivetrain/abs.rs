// ==============================================================================
// abs.rs — BRAKE DISTRIBUTION + PI ANTI-LOCK CONTROL
// ==============================================================================
// Per tick:
// 1) total = pedal * brake_torque * power_multiplier (reduced in reverse)
// 2) axle split: front = clamp01(front_bias - straight_rear_boost * (1 - |steer|))
// 3) front wheels lose up to steer_bias_reduction of their share at full lock
// 4) PI per wheel on (slip - target_slip) when grounded, braking, above the
//    ABS speed and not under handbrake; otherwise the integral bleeds to 0
// 5) below the ABS speed the torque fades out toward the standstill floor
// 6) handbrake pins the rear wheels at handbrake_torque (no ABS)
//
// Integral only grows on positive error (wheel locking harder than target)
// and holds while the wheel is back under target. Airborne wheels never grow
// it.
// ==============================================================================

use log::trace;

use crate::drivetrain::profile::BrakingConfig;
use crate::drivetrain::types::{WheelId, WheelSet};

#[derive(Debug, Clone, Copy, Default)]
pub struct BrakeRequest {
    pub brake: f32,     // 0..1
    pub steering: f32,  // -1..1
    pub handbrake: bool,
    pub reversing: bool,
    pub speed_kmh: f32,
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[inline]
fn inverse_lerp(a: f32, b: f32, v: f32) -> f32 {
    if (b - a).abs() <= f32::EPSILON {
        return if v >= b { 1.0 } else { 0.0 };
    }
    ((v - a) / (b - a)).clamp(0.0, 1.0)
}

/// Unmodulated per-wheel brake torque (Nm) after axle split and steering cut.
pub fn base_brake_torque(cfg: &BrakingConfig, req: &BrakeRequest) -> WheelSet<f32> {
    let pedal = req.brake.clamp(0.0, 1.0);
    let mut total = cfg.brake_torque * cfg.power_multiplier * pedal;
    if req.reversing {
        total *= cfg.reverse_brake_scale;
    }

    let steer = req.steering.abs().clamp(0.0, 1.0);
    let front_fraction = (cfg.front_bias - lerp(cfg.straight_rear_boost, 0.0, steer)).clamp(0.0, 1.0);
    let front_axle = total * front_fraction;
    let rear_axle = total * (1.0 - front_fraction);
    let steer_scale = lerp(1.0, 1.0 - cfg.steer_bias_reduction, steer);

    WheelSet::from_fn(|id| {
        let t = if id.is_front() { front_axle * 0.5 * steer_scale } else { rear_axle * 0.5 };
        t.max(0.0)
    })
}

#[derive(Debug, Clone, Default)]
pub struct AbsController {
    integral: WheelSet<f32>,
    active: WheelSet<bool>,
}

impl AbsController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn integral(&self, id: WheelId) -> f32 {
        self.integral[id]
    }

    pub fn is_active(&self, id: WheelId) -> bool {
        self.active[id]
    }

    fn bleed(&mut self, id: WheelId, cfg: &BrakingConfig, dt: f32) {
        let i = &mut self.integral[id];
        *i = (*i - cfg.integral_bleed_rate * dt).max(0.0);
    }

    /// Final per-wheel brake torque (Nm, never negative).
    pub fn compute(
        &mut self,
        cfg: &BrakingConfig,
        req: &BrakeRequest,
        slip: &WheelSet<f32>,
        grounded: &WheelSet<bool>,
        dt: f32,
    ) -> WheelSet<f32> {
        let base = base_brake_torque(cfg, req);
        let speed = if req.speed_kmh.is_finite() { req.speed_kmh.abs() } else { 0.0 };
        let above_abs_speed = speed > cfg.min_abs_speed_kmh;
        let fade = inverse_lerp(cfg.standstill_floor_kmh, cfg.min_abs_speed_kmh, speed);

        let mut out = WheelSet::splat(0.0_f32);

        for id in WheelId::ALL {
            if req.handbrake && id.is_rear() {
                self.active[id] = false;
                self.bleed(id, cfg, dt);
                out[id] = cfg.handbrake_torque.max(0.0);
                continue;
            }

            let wheel_base = base[id];
            let mut torque = wheel_base;

            let regulate = cfg.abs_enabled && grounded[id] && above_abs_speed && wheel_base > 0.0;
            if regulate {
                let axle = cfg.axle(id.is_front());
                let s = if slip[id].is_finite() { slip[id].clamp(0.0, 1.0) } else { 0.0 };
                let err = s - axle.target_slip;

                // holds while regulating; only bleeds once ABS lets go
                if err > 0.0 {
                    self.integral[id] = (self.integral[id] + err * dt).clamp(0.0, cfg.integral_limit);
                }

                let cut = (axle.kp * err + axle.ki * self.integral[id]).max(0.0);
                let scale = (1.0 - cut / (wheel_base + 1e-3)).clamp(0.0, 1.0);
                torque = wheel_base * scale;
                self.active[id] = scale < 1.0;

                if self.active[id] {
                    trace!("abs {} slip {:.2} cut {:.0} Nm", id, s, cut);
                }
            } else {
                self.active[id] = false;
                self.bleed(id, cfg, dt);
            }

            if !above_abs_speed {
                torque *= fade;
            }

            out[id] = if torque.is_finite() { torque.max(0.0) } else { 0.0 };
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const DT: f32 = 0.01;

    fn req(brake: f32, speed_kmh: f32) -> BrakeRequest {
        BrakeRequest { brake, steering: 0.0, handbrake: false, reversing: false, speed_kmh }
    }

    #[test]
    fn straight_line_split() {
        let cfg = BrakingConfig::default();
        let base = base_brake_torque(&cfg, &req(1.0, 50.0));
        // 1875 Nm total, 54% front
        assert_abs_diff_eq!(base[WheelId::FL], 1875.0 * 0.54 * 0.5, epsilon = 1e-2);
        assert_abs_diff_eq!(base[WheelId::RR], 1875.0 * 0.46 * 0.5, epsilon = 1e-2);
        let sum: f32 = base.values().sum();
        assert_abs_diff_eq!(sum, 1875.0, epsilon = 1e-2);
    }

    #[test]
    fn steering_moves_torque_off_the_front() {
        let cfg = BrakingConfig::default();
        let lock = base_brake_torque(&cfg, &BrakeRequest { steering: -1.0, ..req(1.0, 50.0) });
        // full lock: bias 0.6, then front x0.6
        assert_abs_diff_eq!(lock[WheelId::FR], 1875.0 * 0.6 * 0.5 * 0.6, epsilon = 1e-2);
        assert_abs_diff_eq!(lock[WheelId::RL], 1875.0 * 0.4 * 0.5, epsilon = 1e-2);
    }

    #[test]
    fn reverse_brakes_softer() {
        let cfg = BrakingConfig::default();
        let fwd = base_brake_torque(&cfg, &req(1.0, 10.0));
        let rev = base_brake_torque(&cfg, &BrakeRequest { reversing: true, ..req(1.0, 10.0) });
        assert_abs_diff_eq!(rev[WheelId::RL], fwd[WheelId::RL] * 0.7, epsilon = 1e-3);
    }

    #[test]
    fn locking_wheel_gets_cut_and_integral_grows() {
        let cfg = BrakingConfig::default();
        let mut abs = AbsController::new();
        let base = base_brake_torque(&cfg, &req(1.0, 30.0));
        let slip = WheelSet::splat(0.9);
        let grounded = WheelSet::splat(true);

        let mut last = 0.0;
        for _ in 0..20 {
            let out = abs.compute(&cfg, &req(1.0, 30.0), &slip, &grounded, DT);
            for id in WheelId::ALL {
                assert!(out[id] < base[id]);
                assert!(abs.is_active(id));
            }
            let i = abs.integral(WheelId::FL);
            assert!(i > 0.0 && i >= last);
            last = i;
        }
    }

    #[test]
    fn integral_holds_while_slip_is_under_target() {
        let cfg = BrakingConfig::default();
        let mut abs = AbsController::new();
        let grounded = WheelSet::splat(true);
        for _ in 0..20 {
            abs.compute(&cfg, &req(1.0, 30.0), &WheelSet::splat(0.9), &grounded, DT);
        }
        let charged = abs.integral(WheelId::FL);
        assert_abs_diff_eq!(charged, 20.0 * 0.75 * DT, epsilon = 1e-4);

        for _ in 0..20 {
            abs.compute(&cfg, &req(1.0, 30.0), &WheelSet::splat(0.05), &grounded, DT);
        }
        assert_eq!(abs.integral(WheelId::FL), charged);
    }

    #[test]
    fn rolling_wheel_keeps_full_torque() {
        let cfg = BrakingConfig::default();
        let mut abs = AbsController::new();
        let out = abs.compute(&cfg, &req(0.5, 60.0), &WheelSet::splat(0.05), &WheelSet::splat(true), DT);
        let base = base_brake_torque(&cfg, &req(0.5, 60.0));
        for id in WheelId::ALL {
            assert_abs_diff_eq!(out[id], base[id], epsilon = 1e-3);
            assert!(!abs.is_active(id));
        }
    }

    #[test]
    fn airborne_wheels_only_bleed() {
        let cfg = BrakingConfig::default();
        let mut abs = AbsController::new();
        let slip = WheelSet::splat(0.9);
        for _ in 0..10 {
            abs.compute(&cfg, &req(1.0, 40.0), &slip, &WheelSet::splat(true), DT);
        }
        let charged = abs.integral(WheelId::RL);
        assert!(charged > 0.0);

        for _ in 0..10 {
            abs.compute(&cfg, &req(1.0, 40.0), &slip, &WheelSet::splat(false), DT);
        }
        assert_abs_diff_eq!(abs.integral(WheelId::RL), (charged - 0.05).max(0.0), epsilon = 1e-4);
    }

    #[test]
    fn intermittent_contact_cannot_wind_up() {
        let cfg = BrakingConfig::default();
        let mut abs = AbsController::new();
        let slip = WheelSet::splat(0.9);

        let mut grounded_ticks = 0;
        for tick in 0..400 {
            let grounded = tick % 3 == 0;
            if grounded {
                grounded_ticks += 1;
            }
            abs.compute(&cfg, &req(1.0, 40.0), &slip, &WheelSet::splat(grounded), DT);
            let i = abs.integral(WheelId::FL);
            assert!((0.0..=cfg.integral_limit).contains(&i));
            // never more than the grounded ticks alone could build
            assert!(i <= grounded_ticks as f32 * 0.75 * DT + 1e-5);
        }

        for _ in 0..300 {
            abs.compute(&cfg, &req(0.0, 40.0), &slip, &WheelSet::splat(false), DT);
        }
        assert_eq!(abs.integral(WheelId::FL), 0.0);
    }

    #[test]
    fn fades_out_near_standstill() {
        let cfg = BrakingConfig::default();
        let mut abs = AbsController::new();
        let g = WheelSet::splat(true);
        let s = WheelSet::splat(0.0);

        let stopped = abs.compute(&cfg, &req(1.0, 0.1), &s, &g, DT);
        assert_eq!(stopped[WheelId::FL], 0.0);

        let half = abs.compute(&cfg, &req(1.0, 1.1), &s, &g, DT);
        let base = base_brake_torque(&cfg, &req(1.0, 1.1));
        assert_abs_diff_eq!(half[WheelId::FL], base[WheelId::FL] * 0.5, epsilon = 1e-2);
    }

    #[test]
    fn handbrake_pins_rear_only() {
        let cfg = BrakingConfig::default();
        let mut abs = AbsController::new();
        let hb = BrakeRequest { handbrake: true, ..req(0.0, 0.0) };
        let out = abs.compute(&cfg, &hb, &WheelSet::splat(1.0), &WheelSet::splat(true), DT);
        assert_eq!(out[WheelId::RL], 5000.0);
        assert_eq!(out[WheelId::RR], 5000.0);
        assert_eq!(out[WheelId::FL], 0.0);
        assert!(!abs.is_active(WheelId::RL));
    }

    #[test]
    fn abs_off_passes_base_through() {
        let cfg = BrakingConfig { abs_enabled: false, ..BrakingConfig::default() };
        let mut abs = AbsController::new();
        let out = abs.compute(&cfg, &req(1.0, 80.0), &WheelSet::splat(1.0), &WheelSet::splat(true), DT);
        let base = base_brake_torque(&cfg, &req(1.0, 80.0));
        assert_eq!(out, base);
        assert_eq!(abs.integral(WheelId::FR), 0.0);
    }
}

use rapier3d::prelude::*;

use crate::drivetrain::{DriverInput, StepOutput, VehicleSim, WheelId, WheelSet};

pub struct ChassisConfig {
    pub mass: f32,              // kg
    pub linear_damping: f32,    // drag
    pub angular_damping: f32,   // rotational drag
    pub mu: f32,                // tire friction coefficient
    pub slip_stiffness: f32,    // Fx / (mu Fz) per unit slip ratio
    pub lateral_grip: f32,      // 0..1 share of side velocity removed per tick

    // --- Geometry ---
    pub wheelbase: f32,         // meters (front axle to rear axle)
    pub track_width: f32,       // meters (left to right)
    pub max_steer_angle: f32,   // radians
    pub max_steer_rate: f32,    // rad/s

    // --- Wheels ---
    pub wheel_radius: f32,      // m
    pub wheel_inertia: f32,     // kg m^2
    pub rest_length: f32,       // m
    pub max_travel: f32,        // m
    pub sag: f32,               // m, static compression
    pub damping_ratio: f32,

    // --- Chassis geometry ---
    pub chassis_half_extents: [f32; 3], // [hx, hy, hz] meters
    pub chassis_com_offset: [f32; 3],   // local offset from collider center
}

pub const R34: ChassisConfig = ChassisConfig {
    mass: 1560.0,
    linear_damping: 0.05,
    angular_damping: 0.6,
    mu: 1.1,
    slip_stiffness: 10.0,
    lateral_grip: 0.35,

    wheelbase: 2.665,
    track_width: 1.48,
    max_steer_angle: 0.6,       // ~34 degrees
    max_steer_rate: 2.5,

    wheel_radius: 0.34,
    wheel_inertia: 1.2,
    rest_length: 0.5,
    max_travel: 0.9,
    sag: 0.05,
    damping_ratio: 0.9,

    chassis_half_extents: [0.9, 0.35, 2.3],
    chassis_com_offset: [0.0, -0.15, 0.0],
};

impl ChassisConfig {
    /// Spring and damper from static sag: k = m g / sag, c = 2 zeta sqrt(k m).
    pub fn suspension_rates(&self) -> (f32, f32) {
        let m = self.mass / 4.0;
        let k = m * 9.81 / self.sag.max(1e-3);
        let c = 2.0 * self.damping_ratio * (k * m).sqrt();
        (k, c)
    }
}

#[derive(Clone)]
pub struct WheelMount {
    pub id: WheelId,
    pub offset: Point<Real>,    // chassis local space
    pub rest_length: Real,
    pub max_length: Real,
    pub radius: Real,
    pub stiffness: Real,
    pub damping: Real,
    pub steer: bool,
}

impl WheelMount {
    pub fn layout(cfg: &ChassisConfig) -> WheelSet<WheelMount> {
        let (k, c) = cfg.suspension_rates();
        let hx = cfg.track_width * 0.5;
        let hz = cfg.wheelbase * 0.5;
        WheelSet::from_fn(|id| {
            // chassis forward is -Z
            let x = if matches!(id, WheelId::FL | WheelId::RL) { -hx } else { hx };
            let z = if id.is_front() { -hz } else { hz };
            WheelMount {
                id,
                offset: point![x, -0.3, z],
                rest_length: cfg.rest_length,
                max_length: cfg.max_travel,
                radius: cfg.wheel_radius,
                stiffness: k,
                damping: c,
                steer: id.is_front(),
            }
        })
    }
}

pub struct Vehicle {
    pub body: RigidBodyHandle,              // the chassis body
    pub config: ChassisConfig,
    pub mounts: WheelSet<WheelMount>,
    pub spin: WheelSet<f32>,                // wheel angular velocity, rad/s
    pub input: DriverInput,
    pub steer_angle: f32,                   // current steering angle (radians)
    pub sim: VehicleSim,
    pub last_output: Option<StepOutput>,
}

impl Vehicle {
    pub fn new(body: RigidBodyHandle, config: ChassisConfig, sim: VehicleSim) -> Self {
        let mounts = WheelMount::layout(&config);
        Self {
            body,
            config,
            mounts,
            spin: WheelSet::splat(0.0),
            input: DriverInput::default(),
            steer_angle: 0.0,
            sim,
            last_output: None,
        }
    }

    /// Respawn: drivetrain back to idle/neutral, wheels stopped.
    pub fn reset(&mut self) {
        self.sim.reset();
        self.spin = WheelSet::splat(0.0);
        self.steer_angle = 0.0;
        self.input = DriverInput::default();
        self.last_output = None;
    }

    /// Speed-sensitive, rate-limited steering toward the driver's request.
    pub fn update_steering(&mut self, speed: f32, dt: f32) {
        let scale = (1.0 - speed / 30.0).clamp(0.35, 1.0);
        let target = self.input.steering * self.config.max_steer_angle * scale;
        let max_step = self.config.max_steer_rate * dt;
        self.steer_angle += (target - self.steer_angle).clamp(-max_step, max_step);
    }
}

// src/physics.rs
//
// Rapier world hosting one drivetrain-driven car per player.
//
// Per tick, per vehicle:
// 1) steering angle (speed-sensitive, rate limited)
// 2) raycast suspension -> contact per wheel
// 3) drivetrain step on contact + previous wheel spin -> {motor, brake} Nm
// 4) wheel spin integration with a clamped longitudinal tire force,
//    lateral slip-cancel impulse, suspension impulse
// then damping, rapier pipeline step, runaway-body guard.

use std::collections::HashMap;

use log::{info, warn};
use rapier3d::prelude::*;

use crate::drivetrain::{ChassisFeedback, DriverInput, VehicleSim, WheelId, WheelSet};
use crate::suspension_contact::{
    SuspensionContact, build_suspension_contact, contact_slip_ratio, mount_steer_angle,
    to_wheel_contact,
};
use crate::vehicle::{R34, Vehicle};

const GROUP_GROUND: Group  = Group::from_bits_truncate(0b0001);
const GROUP_CHASSIS: Group = Group::from_bits_truncate(0b0010);

/// rad/s, roughly 400 km/h on a 0.34 m wheel
const MAX_WHEEL_SPIN: f32 = 330.0;

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    pub pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub joints: ImpulseJointSet,
    pub multibody_joints: MultibodyJointSet,
    pub ccd: CCDSolver,
    pub query_pipeline: QueryPipeline,
    pub vehicles: HashMap<String, Vehicle>, // playerId -> vehicle
}

/// Brake torque removes spin but never reverses it.
#[inline]
fn apply_brake(omega: f32, brake_torque: f32, dt_over_inertia: f32) -> f32 {
    let dw = brake_torque.max(0.0) * dt_over_inertia;
    if omega.abs() <= dw { 0.0 } else { omega - omega.signum() * dw }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsWorld {
    pub fn new() -> Self {
        let gravity = vector![0.0, -9.81, 0.0];

        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        // Static ground slab, top surface at y = 0
        let ground_rb = RigidBodyBuilder::fixed()
            .translation(vector![0.0, -0.1, 0.0])
            .build();
        let ground_handle = bodies.insert(ground_rb);

        let ground_collider = ColliderBuilder::cuboid(500.0, 0.1, 500.0)
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .friction(1.2)
            .restitution(0.0)
            .build();
        colliders.insert_with_parent(ground_collider, ground_handle, &mut bodies);

        info!("ground inserted: bodies = {}, colliders = {}", bodies.len(), colliders.len());

        Self {
            gravity,
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            vehicles: HashMap::new(),
        }
    }

    /// Dynamic box chassis dropped slightly above the ground.
    pub fn spawn_vehicle(&mut self, id: &str, position: [f32; 3], sim: VehicleSim) -> RigidBodyHandle {
        let config = R34;
        let [hx, hy, hz] = config.chassis_half_extents;
        let [cx, cy, cz] = config.chassis_com_offset;
        let density = config.mass / (8.0 * hx * hy * hz); // ρ = m / V

        let rb = RigidBodyBuilder::dynamic()
            .translation(vector![position[0], 1.3, position[2]])
            .linear_damping(config.linear_damping)
            .angular_damping(config.angular_damping)
            .ccd_enabled(true)
            .build();

        let collider = ColliderBuilder::cuboid(hx, hy, hz)
            .translation(vector![cx, cy, cz])
            .collision_groups(InteractionGroups::new(GROUP_CHASSIS, GROUP_GROUND))
            .density(density)
            .friction(0.0) // tires do the gripping
            .restitution(0.0)
            .build();

        let handle = self.bodies.insert(rb);
        self.colliders.insert_with_parent(collider, handle, &mut self.bodies);
        self.vehicles.insert(id.to_string(), Vehicle::new(handle, config, sim));

        info!("spawned vehicle for {} at {:?} (body = {:?})", id, position, handle);
        handle
    }

    pub fn remove_vehicle(&mut self, id: &str) -> bool {
        let Some(vehicle) = self.vehicles.remove(id) else { return false };
        self.bodies.remove(
            vehicle.body,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            true,
        );
        true
    }

    pub fn vehicle(&self, id: &str) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    pub fn vehicle_mut(&mut self, id: &str) -> Option<&mut Vehicle> {
        self.vehicles.get_mut(id)
    }

    /// Stores input; it is consumed on the next `step`.
    pub fn set_input(&mut self, id: &str, input: DriverInput) -> bool {
        match self.vehicles.get_mut(id) {
            Some(v) => {
                v.input = input.sanitized();
                true
            }
            None => false,
        }
    }

    /// Respawn in place: upright, at rest, drivetrain cleared.
    pub fn reset_vehicle(&mut self, id: &str) -> bool {
        let Some(vehicle) = self.vehicles.get_mut(id) else { return false };
        vehicle.reset();
        if let Some(body) = self.bodies.get_mut(vehicle.body) {
            let t = *body.translation();
            body.set_position(Isometry::translation(t.x, 1.3, t.z), true);
            body.set_linvel(vector![0.0, 0.0, 0.0], true);
            body.set_angvel(vector![0.0, 0.0, 0.0], true);
        }
        true
    }

    /// (position, rotation quaternion [i, j, k, w])
    pub fn pose(&self, handle: RigidBodyHandle) -> Option<([f32; 3], [f32; 4])> {
        let body = self.bodies.get(handle)?;
        let iso = body.position();
        let t = iso.translation.vector;
        let r = iso.rotation;
        Some(([t.x, t.y, t.z], [r.i, r.j, r.k, r.w]))
    }

    fn drive_vehicles(&mut self, dt: Real) {
        self.query_pipeline.update(&self.colliders);

        for vehicle in self.vehicles.values_mut() {
            let Some(body) = self.bodies.get(vehicle.body) else { continue };

            let linvel = *body.linvel();
            let speed = linvel.magnitude();
            let mass = body.mass();
            let body_forward = body.position().rotation * vector![0.0, 0.0, -1.0];

            vehicle.update_steering(speed, dt);

            // ----------------------------------------------------------------
            // 1) Raycast suspension
            // ----------------------------------------------------------------
            let cfg = &vehicle.config;
            let contacts: WheelSet<Option<SuspensionContact>> = WheelSet::from_fn(|id| {
                let mount = &vehicle.mounts[id];
                let angle = mount_steer_angle(mount, vehicle.steer_angle, cfg.wheelbase, cfg.track_width);
                build_suspension_contact(
                    mount,
                    angle,
                    body,
                    &self.query_pipeline,
                    &self.bodies,
                    &self.colliders,
                    vehicle.body,
                )
            });

            // ----------------------------------------------------------------
            // 2) Drivetrain (reads last tick's spin)
            // ----------------------------------------------------------------
            let feedback = ChassisFeedback {
                speed,
                wheels: WheelSet::from_fn(|id| {
                    to_wheel_contact(
                        contacts[id].as_ref(),
                        &linvel,
                        &body_forward,
                        vehicle.spin[id],
                        vehicle.mounts[id].radius,
                    )
                }),
            };
            let out = vehicle.sim.step(vehicle.input, &feedback, dt);

            // ----------------------------------------------------------------
            // 3) Wheel spin + tire impulses
            // ----------------------------------------------------------------
            let mut impulses: Vec<(Vector<Real>, Point<Real>)> = Vec::new();
            let a = dt / cfg.wheel_inertia;

            for id in WheelId::ALL {
                let torque = out.wheels[id];
                let radius = vehicle.mounts[id].radius;
                let spin = vehicle.spin[id];

                let omega = match &contacts[id] {
                    Some(c) => {
                        impulses.push((c.ground_normal * (c.normal_force * dt), c.hit_point));

                        let grip = cfg.mu * c.normal_force;
                        let stiffness = cfg.slip_stiffness * grip;
                        let d = c.v_long.abs().max(1.0);

                        // implicit in spin with the tire force linearised around slip = 0
                        let mut omega = (spin + a * (torque.motor + stiffness * radius * c.v_long / d))
                            / (1.0 + a * stiffness * radius * radius / d);
                        let mut fx = stiffness * contact_slip_ratio(c.v_long, omega, radius);
                        if fx.abs() > grip {
                            fx = fx.clamp(-grip, grip);
                            omega = spin + a * (torque.motor - fx * radius);
                        }
                        impulses.push((c.forward * (fx * dt), c.hit_point));

                        let max_lat = grip * dt;
                        let lat = (-c.v_lat * mass * 0.25 * cfg.lateral_grip).clamp(-max_lat, max_lat);
                        impulses.push((c.side * lat, c.hit_point));

                        apply_brake(omega, torque.brake, a)
                    }
                    None => apply_brake(spin + a * torque.motor, torque.brake, a),
                };

                vehicle.spin[id] = if omega.is_finite() {
                    omega.clamp(-MAX_WHEEL_SPIN, MAX_WHEEL_SPIN)
                } else {
                    0.0
                };
            }

            if let Some(body) = self.bodies.get_mut(vehicle.body) {
                for (impulse, point) in impulses {
                    body.apply_impulse_at_point(impulse, point, true);
                }
            }

            vehicle.last_output = Some(out);
        }
    }

    // --------------------------------------------------------------
    // angular damping to kill roll / yaw oscillation near rest
    // --------------------------------------------------------------
    fn apply_velocity_damping(&mut self, dt: Real) {
        for v in self.vehicles.values() {
            if let Some(body) = self.bodies.get_mut(v.body) {
                let angvel = *body.angvel();
                if body.linvel().magnitude() < 1.0 {
                    let factor = (-6.0 * dt).exp();
                    body.set_angvel(vector![0.0, angvel.y * factor, 0.0], true);
                } else {
                    let factor = (-2.0 * dt).exp();
                    body.set_angvel(angvel * factor, true);
                }
            }
        }
    }

    pub fn step(&mut self, dt: Real) {
        // 1) Suspension + drivetrain + tire forces
        self.drive_vehicles(dt);

        // 2) Damping
        self.apply_velocity_damping(dt);

        // 3) Rapier
        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters {
                dt,
                ..IntegrationParameters::default()
            },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );

        // 4) Safety: keep bodies from exploding to insane coordinates
        for (_, body) in self.bodies.iter_mut() {
            let pos = *body.translation();
            let bad = !pos.x.is_finite() || !pos.y.is_finite() || !pos.z.is_finite()
                || pos.x.abs() > 1_000.0 || pos.y.abs() > 1_000.0 || pos.z.abs() > 1_000.0;

            if bad {
                body.set_translation(vector![0.0, 1.3, 0.0], true);
                body.set_linvel(vector![0.0, 0.0, 0.0], true);
                body.set_angvel(vector![0.0, 0.0, 0.0], true);
                warn!("reset runaway body from {:?}", pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brake_never_reverses_spin() {
        assert_eq!(apply_brake(5.0, 1000.0, 0.01), 0.0);
        assert_eq!(apply_brake(-5.0, 1000.0, 0.01), 0.0);
        assert!((apply_brake(50.0, 100.0, 0.01) - 49.0).abs() < 1e-5);
        assert!((apply_brake(-50.0, 100.0, 0.01) + 49.0).abs() < 1e-5);
    }
}

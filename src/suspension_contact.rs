// ==============================================================================
// suspension_contact.rs — RAYCAST SUSPENSION + CONTACT PATCH KINEMATICS
// ------------------------------------------------------------------------------
// Per-wheel raycast against the scene producing a SuspensionContact:
// - geometry: hit_point, ground_normal
// - suspension state: compression, suspension velocity, normal force
//   from spring + damper
// - kinematics: point velocity at the contact (linvel + ω×r)
// - wheel basis (forward/side) including ackermann steering
// - slip components (v_long, v_lat) used by the tire forces in physics.rs
//
// to_wheel_contact() turns the measurement plus the wheel's spin into the
// engine-agnostic drivetrain::WheelContact.
//
// Notes:
// - This file does NOT apply impulses. It only measures contact data.
// - Ground normal is assumed flat-up.
// ==============================================================================

use nalgebra::Vector3;
use rapier3d::na::UnitQuaternion;
use rapier3d::prelude::*;

use crate::drivetrain::{WheelContact, WheelId};
use crate::vehicle::WheelMount;

#[derive(Clone, Debug)]
pub struct SuspensionContact {
    // geometry
    pub hit_point: Point<Real>,
    pub ground_normal: Vector<Real>,

    // suspension state
    pub compression: f32,
    pub suspension_vel: f32,
    pub normal_force: f32,

    // kinematics
    pub point_vel: Vector<Real>,

    // wheel basis (world)
    pub forward: Vector<Real>,
    pub side: Vector<Real>,

    // slip
    pub v_long: f32,
    pub v_lat: f32,
}

pub(crate) fn compute_suspension_force(
    compression: f32,
    suspension_vel: f32,
    k: f32,
    c: f32,
) -> f32 {
    // Deadzone
    let v = if suspension_vel.abs() < 0.05 { 0.0 } else { suspension_vel };

    // One-way damper (kills rebound)
    let v = if v > 0.0 { v * 0.4 } else { v };

    let spring = k * compression;
    let damper = (-c * v).clamp(-spring * 0.6, spring * 0.6);

    (spring + damper).max(0.0).min(25_000.0)
}

// --------------------------------------------------
// ackermann steering angles (stateless)
// --------------------------------------------------
pub fn ackermann_angles(base: f32, wheelbase: f32, track: f32) -> (f32, f32) {
    // base is the bicycle-model angle; returns (left, right) in radians
    if base.abs() < 1e-4 {
        return (0.0, 0.0);
    }

    let sign = base.signum();
    let r = wheelbase / base.abs().tan();

    let inner = (wheelbase / (r - track * 0.5).max(0.01)).atan() * sign;
    let outer = (wheelbase / (r + track * 0.5).max(0.01)).atan() * sign;

    // positive base turns left: left wheel is inside
    if sign > 0.0 { (inner, outer) } else { (outer, inner) }
}

/// Wheel steer angle for a mount given the centreline angle.
pub fn mount_steer_angle(mount: &WheelMount, base: f32, wheelbase: f32, track: f32) -> f32 {
    if !mount.steer {
        return 0.0;
    }
    let (left, right) = ackermann_angles(base, wheelbase, track);
    if matches!(mount.id, WheelId::FL | WheelId::RL) { left } else { right }
}

#[allow(clippy::too_many_arguments)]
pub fn build_suspension_contact(
    mount: &WheelMount,
    steer_angle: f32,
    body: &RigidBody,
    query: &QueryPipeline,
    bodies: &RigidBodySet,
    colliders: &ColliderSet,
    handle: RigidBodyHandle,
) -> Option<SuspensionContact> {
    let pos = body.position();
    let rot = pos.rotation;
    let linvel = *body.linvel();
    let angvel = *body.angvel();
    let com = pos * body.center_of_mass();

    let origin = pos * (mount.offset + vector![0.0, mount.radius + 0.02, 0.0]);
    let dir = vector![0.0, -1.0, 0.0];
    let ground_n = vector![0.0, 1.0, 0.0];

    let ray = Ray::new(origin, dir);
    let max_dist = mount.rest_length + mount.max_length + mount.radius;
    let filter = QueryFilter::default().exclude_rigid_body(handle);

    let (_hit, toi) = query.cast_ray(bodies, colliders, &ray, max_dist, true, filter)?;
    if toi <= mount.radius {
        return None;
    }

    let hit_point = origin + dir * toi;
    let suspension_length = toi - mount.radius;
    let compression = (mount.rest_length - suspension_length).clamp(0.0, mount.max_length);
    if compression <= 0.0 {
        return None;
    }

    let r = hit_point.coords - com.coords;
    let point_vel = linvel + angvel.cross(&r);
    let suspension_vel = point_vel.dot(&ground_n);

    let normal_force = compute_suspension_force(compression, suspension_vel, mount.stiffness, mount.damping);

    // chassis forward is -Z; steer about world up, then flatten onto the ground
    let steer_rot = UnitQuaternion::from_axis_angle(&Vector::y_axis(), steer_angle);
    let heading = steer_rot * (rot * vector![0.0, 0.0, -1.0]);
    let flat = heading - ground_n * heading.dot(&ground_n);
    let forward = if flat.magnitude() > 1e-6 { flat.normalize() } else { vector![0.0, 0.0, -1.0] };
    let side = forward.cross(&ground_n);

    Some(SuspensionContact {
        hit_point,
        ground_normal: ground_n,
        compression,
        suspension_vel,
        normal_force,
        point_vel,
        v_long: point_vel.dot(&forward),
        v_lat: point_vel.dot(&side),
        forward,
        side,
    })
}

/// SAE-style longitudinal slip as the tire sees it: (ωr - v) / max(|v|, 1).
pub fn contact_slip_ratio(v_long: f32, spin: f32, radius: f32) -> f32 {
    (spin * radius - v_long) / v_long.abs().max(1.0)
}

/// Engine-agnostic view of one wheel for the drivetrain step.
pub fn to_wheel_contact(
    contact: Option<&SuspensionContact>,
    body_linvel: &Vector<Real>,
    body_forward: &Vector<Real>,
    spin: f32,
    radius: f32,
) -> WheelContact {
    match contact {
        Some(c) => WheelContact {
            grounded: true,
            point_velocity: Vector3::new(c.point_vel.x, c.point_vel.y, c.point_vel.z),
            forward: Vector3::new(c.forward.x, c.forward.y, c.forward.z),
            angular_velocity: spin,
            radius,
            forward_slip: Some(contact_slip_ratio(c.v_long, spin, radius)),
        },
        None => WheelContact {
            grounded: false,
            point_velocity: Vector3::new(body_linvel.x, body_linvel.y, body_linvel.z),
            forward: Vector3::new(body_forward.x, body_forward.y, body_forward.z),
            angular_velocity: spin,
            radius,
            forward_slip: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ackermann_inner_wheel_turns_more() {
        let (l, r) = ackermann_angles(0.3, 2.6, 1.5);
        assert!(l > r && r > 0.0);
        let (l, r) = ackermann_angles(-0.3, 2.6, 1.5);
        assert!(r < l && l < 0.0);
        assert_eq!(ackermann_angles(0.0, 2.6, 1.5), (0.0, 0.0));
    }

    #[test]
    fn mounts_pick_their_side_of_the_ackermann_pair() {
        let cfg = crate::vehicle::R34;
        let mounts = WheelMount::layout(&cfg);
        let (left, right) = ackermann_angles(0.3, cfg.wheelbase, cfg.track_width);
        let angle = |id: WheelId| mount_steer_angle(&mounts[id], 0.3, cfg.wheelbase, cfg.track_width);
        assert_eq!(angle(WheelId::FL), left);
        assert_eq!(angle(WheelId::FR), right);
        assert_eq!(angle(WheelId::RL), 0.0);
    }

    #[test]
    fn suspension_force_is_bounded() {
        assert_eq!(compute_suspension_force(0.0, 0.0, 1e5, 1e3), 0.0);
        assert!(compute_suspension_force(0.05, 0.0, 1e5, 1e3) > 0.0);
        assert_eq!(compute_suspension_force(10.0, 0.0, 1e5, 1e3), 25_000.0);
    }

    #[test]
    fn contact_slip_signs() {
        assert!((contact_slip_ratio(20.0, 0.0, 0.34) + 1.0).abs() < 1e-6);
        assert!(contact_slip_ratio(20.0, 20.0 / 0.34, 0.34).abs() < 1e-5);
        assert!(contact_slip_ratio(0.0, 10.0, 0.34) > 0.0);
    }
}

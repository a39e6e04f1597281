use std::collections::HashMap;

use log::warn;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::drivetrain::{GearShift, Telemetry, TurboEvent};
use crate::physics::PhysicsWorld;

#[derive(Serialize)]
pub struct VehicleSnapshot<'a> {
    pub id: &'a str,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub steer_angle: f32,
    pub telemetry: Option<&'a Telemetry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shift: Option<GearShift>,
    #[serde(skip_serializing_if = "no_events")]
    pub events: &'a [TurboEvent],
}

fn no_events(events: &&[TurboEvent]) -> bool {
    events.is_empty()
}

#[derive(Serialize)]
pub struct Snapshot<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub tick: u64,
    pub vehicles: Vec<VehicleSnapshot<'a>>,
}

pub struct SharedGameState {
    pub tick: u64,
    pub clients: HashMap<String, UnboundedSender<String>>, // playerId -> outgoing
    spawned: u64,
}

impl Default for SharedGameState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedGameState {
    pub fn new() -> Self {
        Self {
            tick: 0,
            clients: HashMap::new(),
            spawned: 0,
        }
    }

    /// Registers a connection; returns its spawn index (for per-car seeding).
    pub fn register_client(&mut self, player_id: &str, tx: UnboundedSender<String>) -> u64 {
        self.clients.insert(player_id.to_string(), tx);
        self.spawned += 1;
        self.spawned
    }

    pub fn remove_client(&mut self, player_id: &str) {
        self.clients.remove(player_id);
    }

    pub fn snapshot<'a>(&self, physics: &'a PhysicsWorld) -> Snapshot<'a> {
        let mut vehicles = Vec::with_capacity(physics.vehicles.len());

        for (id, vehicle) in &physics.vehicles {
            let Some((position, rotation)) = physics.pose(vehicle.body) else { continue };
            let out = vehicle.last_output.as_ref();
            vehicles.push(VehicleSnapshot {
                id,
                position,
                rotation,
                steer_angle: vehicle.steer_angle,
                telemetry: out.map(|o| &o.telemetry),
                shift: out.and_then(|o| o.shift),
                events: out.map_or(&[][..], |o| o.turbo_events.as_slice()),
            });
        }

        Snapshot { kind: "snapshot", tick: self.tick, vehicles }
    }

    /// Serialise one snapshot and fan it out to every client.
    pub fn broadcast_snapshot(&mut self, physics: &PhysicsWorld) {
        let json = match serde_json::to_string(&self.snapshot(physics)) {
            Ok(json) => json,
            Err(e) => {
                warn!("snapshot serialisation failed: {e}");
                return;
            }
        };

        // drop clients whose send loop has gone away
        self.clients.retain(|_, tx| tx.send(json.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivetrain::{EngineProfile, ScriptedRandom, VehicleSim};
    use tokio::sync::mpsc;

    #[test]
    fn snapshot_carries_telemetry() {
        let mut physics = PhysicsWorld::new();
        let sim = VehicleSim::new(EngineProfile::default(), Box::new(ScriptedRandom::constant(0.5)));
        physics.spawn_vehicle("p1", [0.0, 0.0, 0.0], sim);
        physics.step(0.01);

        let mut game = SharedGameState::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(game.register_client("p1", tx), 1);
        game.broadcast_snapshot(&physics);

        let msg = rx.try_recv().expect("snapshot sent");
        let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["type"], "snapshot");
        assert_eq!(v["vehicles"][0]["id"], "p1");
        assert_eq!(v["vehicles"][0]["telemetry"]["gear_label"], "N");
    }

    #[test]
    fn dead_clients_are_dropped() {
        let physics = PhysicsWorld::new();
        let mut game = SharedGameState::new();
        let (tx, rx) = mpsc::unbounded_channel();
        game.register_client("gone", tx);
        drop(rx);
        game.broadcast_snapshot(&physics);
        assert!(game.clients.is_empty());
    }
}

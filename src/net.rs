use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::accept_async;
use tungstenite::Message;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::drivetrain::{
    DriverInput, EcuStage, EngineProfile, RandomSource, SeededRandom, TurboStage, VehicleSim,
};
use crate::physics::PhysicsWorld;
use crate::state::SharedGameState;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Input {
        #[serde(default)]
        throttle: f32,
        #[serde(default)]
        steer: f32,
        #[serde(default)]
        brake: f32,
        #[serde(default)]
        handbrake: bool,
    },
    Tune {
        engine: Option<String>,
        ecu_stage: Option<u8>,
        turbo_stage: Option<u8>,
        power_bias: Option<f32>,
    },
    Reset,
    Ping,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome { player_id: String },
    Pong,
    Tuned { engine: String, ecu_multiplier: f32, max_psi: f32 },
    Error { message: String },
}

impl ServerMessage {
    fn to_json(&self) -> Option<String> {
        serde_json::to_string(self)
            .map_err(|e| warn!("encoding {:?}: {e}", self))
            .ok()
    }
}

/// Applies one client message to the player's car. Returns the reply, if any.
pub fn apply_message(physics: &mut PhysicsWorld, player_id: &str, msg: ClientMessage) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Ping => Some(ServerMessage::Pong),

        ClientMessage::Input { throttle, steer, brake, handbrake } => {
            let input = DriverInput { throttle, steering: steer, brake, handbrake };
            physics.set_input(player_id, input);
            None
        }

        ClientMessage::Reset => {
            physics.reset_vehicle(player_id);
            None
        }

        ClientMessage::Tune { engine, ecu_stage, turbo_stage, power_bias } => {
            let vehicle = physics.vehicle_mut(player_id)?;
            let sim = &mut vehicle.sim;

            // clients pick presets by name only; file profiles are operator-side
            if let Some(name) = engine {
                let swapped = EngineProfile::preset(&name)
                    .ok_or_else(|| format!("unknown engine preset {name:?}"))
                    .and_then(|p| sim.set_engine_profile(p).map_err(|e| e.to_string()));
                if let Err(message) = swapped {
                    return Some(ServerMessage::Error { message });
                }
            }
            if let Some(stage) = ecu_stage {
                sim.set_ecu_stage(EcuStage::from_index(stage));
            }
            if let Some(stage) = turbo_stage {
                sim.set_turbo_stage(TurboStage::from_index(stage));
            }
            if let Some(bias) = power_bias {
                sim.set_power_bias(bias);
            }

            Some(ServerMessage::Tuned {
                engine: sim.profile().name.clone(),
                ecu_multiplier: sim.ecu_multiplier(),
                max_psi: sim.turbo().map_or(0.0, |t| t.max_psi()),
            })
        }
    }
}

fn vehicle_rng(config: &ServerConfig, index: u64) -> Box<dyn RandomSource> {
    match config.seed {
        Some(seed) => Box::new(SeededRandom::new(seed.wrapping_add(index))),
        None => Box::new(SeededRandom::from_entropy()),
    }
}

pub async fn start_websocket_server(
    config: Arc<ServerConfig>,
    state: Arc<Mutex<SharedGameState>>,
    physics: Arc<Mutex<PhysicsWorld>>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&config.bind).await?;
    info!("websocket listening on ws://{}", config.bind);

    loop {
        let (raw, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        let config = Arc::clone(&config);
        let state = Arc::clone(&state);
        let physics = Arc::clone(&physics);

        tokio::spawn(async move {
            let ws = match accept_async(raw).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("handshake with {addr} failed: {e}");
                    return;
                }
            };
            let (mut write, mut read) = ws.split();

            // -------------------------------
            // 1) Outgoing channel + send loop
            // -------------------------------
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if write.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
            });

            // -------------------------------
            // 2) Register + spawn car
            // -------------------------------
            let player_id = Uuid::new_v4().to_string();
            let index = state.lock().await.register_client(&player_id, tx.clone());
            {
                let sim = VehicleSim::new(config.profile.clone(), vehicle_rng(&config, index));
                let x = (index % 8) as f32 * 4.0;
                physics.lock().await.spawn_vehicle(&player_id, [x, 0.0, 0.0], sim);
            }
            info!("player connected: {player_id} ({addr})");

            if let Some(json) = (ServerMessage::Welcome { player_id: player_id.clone() }).to_json() {
                let _ = tx.send(json);
            }

            // -------------------------------
            // 3) Receive loop
            // -------------------------------
            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(Message::Text(t)) => t,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };

                let parsed = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("ignoring message from {player_id}: {e}");
                        continue;
                    }
                };

                let reply = apply_message(&mut *physics.lock().await, &player_id, parsed);
                if let Some(json) = reply.and_then(|r| r.to_json()) {
                    let _ = tx.send(json);
                }
            }

            info!("player disconnected: {player_id}");
            state.lock().await.remove_client(&player_id);
            physics.lock().await.remove_vehicle(&player_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivetrain::ScriptedRandom;

    fn world_with_car() -> PhysicsWorld {
        let mut physics = PhysicsWorld::new();
        let sim = VehicleSim::new(EngineProfile::default(), Box::new(ScriptedRandom::constant(0.5)));
        physics.spawn_vehicle("p1", [0.0, 0.0, 0.0], sim);
        physics
    }

    #[test]
    fn parses_client_messages() {
        let m: ClientMessage = serde_json::from_str(r#"{"type":"input","throttle":0.5,"brake":1}"#).unwrap();
        assert_eq!(m, ClientMessage::Input { throttle: 0.5, steer: 0.0, brake: 1.0, handbrake: false });

        let m: ClientMessage = serde_json::from_str(r#"{"type":"tune","ecu_stage":2}"#).unwrap();
        assert!(matches!(m, ClientMessage::Tune { ecu_stage: Some(2), engine: None, .. }));

        assert_eq!(serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"fly"}"#).is_err());
    }

    #[test]
    fn input_is_stored_sanitized() {
        let mut physics = world_with_car();
        let msg = ClientMessage::Input { throttle: 3.0, steer: -0.5, brake: 0.2, handbrake: true };
        assert_eq!(apply_message(&mut physics, "p1", msg), None);
        let input = physics.vehicle("p1").map(|v| v.input).unwrap();
        assert_eq!(input.throttle, 1.0);
        assert_eq!(input.steering, -0.5);
        assert!(input.handbrake);
    }

    #[test]
    fn tune_swaps_engine_and_stages() {
        let mut physics = world_with_car();
        let msg = ClientMessage::Tune {
            engine: Some("4g63".into()),
            ecu_stage: Some(1),
            turbo_stage: Some(0),
            power_bias: Some(0.0),
        };
        let reply = apply_message(&mut physics, "p1", msg);
        assert_eq!(
            reply,
            Some(ServerMessage::Tuned { engine: "4G63".into(), ecu_multiplier: 1.1, max_psi: 0.0 })
        );

        let bad = ClientMessage::Tune { engine: Some("v12".into()), ecu_stage: None, turbo_stage: None, power_bias: None };
        assert!(matches!(apply_message(&mut physics, "p1", bad), Some(ServerMessage::Error { .. })));
    }

    #[test]
    fn tune_never_reads_profile_files() {
        // a valid profile on disk that a path lookup would happily load
        let mut on_disk = EngineProfile::evo_4g63();
        on_disk.name = "FROM_DISK".into();
        let path = std::env::temp_dir().join(format!("drivetrain-tune-{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(&on_disk).unwrap()).unwrap();

        let mut physics = world_with_car();
        let msg = ClientMessage::Tune {
            engine: Some(path.to_string_lossy().into_owned()),
            ecu_stage: None,
            turbo_stage: None,
            power_bias: None,
        };
        let reply = apply_message(&mut physics, "p1", msg);
        let _ = std::fs::remove_file(&path);

        assert!(matches!(reply, Some(ServerMessage::Error { .. })));
        assert_eq!(physics.vehicle("p1").unwrap().sim.profile().name, "RB26DETT");
    }

    #[test]
    fn ping_pongs() {
        let mut physics = PhysicsWorld::new();
        assert_eq!(apply_message(&mut physics, "nobody", ClientMessage::Ping), Some(ServerMessage::Pong));
        let json = ServerMessage::Pong.to_json().unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }
}

use std::sync::Arc;

use drivetrain_server::config::ServerConfig;
use drivetrain_server::net::start_websocket_server;
use drivetrain_server::physics::PhysicsWorld;
use drivetrain_server::state::SharedGameState;

use log::{error, info};
use tokio::sync::Mutex;
use tokio::time::{Duration, interval};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match ServerConfig::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("configuration: {e}");
            std::process::exit(2);
        }
    };
    info!(
        "starting drivetrain server: {} Hz, engine {}, bind {}",
        config.tick_hz, config.profile.name, config.bind
    );

    let state = Arc::new(Mutex::new(SharedGameState::new()));
    let physics = Arc::new(Mutex::new(PhysicsWorld::new()));

    // WebSocket server
    {
        let config = Arc::clone(&config);
        let state = Arc::clone(&state);
        let physics = Arc::clone(&physics);
        tokio::spawn(async move {
            if let Err(e) = start_websocket_server(config, state, physics).await {
                error!("websocket server stopped: {e}");
                std::process::exit(1);
            }
        });
    }

    // Fixed timestep
    let dt = config.tick_seconds();
    let mut ticker = interval(Duration::from_secs_f32(dt));

    loop {
        ticker.tick().await;

        let mut phys = physics.lock().await;
        let mut game = state.lock().await;

        phys.step(dt);

        // Advance tick + broadcast snapshot
        game.tick += 1;
        game.broadcast_snapshot(&phys);
    }
}

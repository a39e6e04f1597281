//! drivetrain - engine-agnostic engine / gearbox / turbo / ABS simulation
//! (pure types + per-tick step; no physics engine types)

pub mod types;
pub mod error;
pub mod torque_curve;
pub mod profile;
pub mod rng;
pub mod turbo;
pub mod gearbox;
pub mod slip;
pub mod abs;
pub mod telemetry;
pub mod step;

pub use types::*;
pub use error::ConfigError;
pub use profile::{BrakingConfig, DriveConfig, EcuStage, EngineProfile, TurboStage};
pub use rng::{RandomSource, ScriptedRandom, SeededRandom};
pub use turbo::{TurboConfig, TurboEvent, TurboModel, TurboPhase};
pub use gearbox::{DrivetrainPhase, DrivetrainState, ShiftPolicy};
pub use telemetry::Telemetry;
pub use step::{StepOutput, VehicleSim};

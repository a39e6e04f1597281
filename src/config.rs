// src/config.rs
//! Server settings read from the environment at startup.
//!
//! DRIVETRAIN_BIND     listen address            (default 0.0.0.0:9001)
//! DRIVETRAIN_TICK_HZ  fixed simulation rate     (default 100)
//! DRIVETRAIN_SEED     backfire RNG seed         (default: entropy)
//! DRIVETRAIN_PROFILE  preset name or JSON path  (default rb26dett)

use std::env;
use std::fs;

use thiserror::Error;

use crate::drivetrain::{ConfigError, EngineProfile};

pub const DEFAULT_BIND: &str = "0.0.0.0:9001";
pub const DEFAULT_TICK_HZ: u32 = 100;

#[derive(Error, Debug)]
pub enum ServerConfigError {
    #[error("DRIVETRAIN_TICK_HZ must be an integer in 1..=1000, got {0:?}")]
    TickRate(String),

    #[error("DRIVETRAIN_SEED must be an unsigned integer, got {0:?}")]
    Seed(String),

    #[error("reading profile {path}: {source}")]
    ProfileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("profile {path}: {source}")]
    Profile {
        path: String,
        #[source]
        source: ConfigError,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub tick_hz: u32,
    pub seed: Option<u64>,
    pub profile: EngineProfile,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            tick_hz: DEFAULT_TICK_HZ,
            seed: None,
            profile: EngineProfile::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ServerConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ServerConfigError> {
        let mut cfg = Self::default();

        if let Some(bind) = get("DRIVETRAIN_BIND").filter(|s| !s.trim().is_empty()) {
            cfg.bind = bind.trim().to_string();
        }

        if let Some(raw) = get("DRIVETRAIN_TICK_HZ") {
            cfg.tick_hz = match raw.trim().parse::<u32>() {
                Ok(hz) if (1..=1000).contains(&hz) => hz,
                _ => return Err(ServerConfigError::TickRate(raw)),
            };
        }

        if let Some(raw) = get("DRIVETRAIN_SEED") {
            cfg.seed = Some(raw.trim().parse().map_err(|_| ServerConfigError::Seed(raw.clone()))?);
        }

        if let Some(raw) = get("DRIVETRAIN_PROFILE") {
            cfg.profile = load_profile(raw.trim())?;
        }

        Ok(cfg)
    }

    pub fn tick_seconds(&self) -> f32 {
        1.0 / self.tick_hz as f32
    }
}

/// Preset name first, otherwise a JSON file path.
pub fn load_profile(name_or_path: &str) -> Result<EngineProfile, ServerConfigError> {
    if let Some(p) = EngineProfile::preset(name_or_path) {
        return Ok(p);
    }
    let json = fs::read_to_string(name_or_path).map_err(|source| ServerConfigError::ProfileIo {
        path: name_or_path.to_string(),
        source,
    })?;
    EngineProfile::from_json_str(&json).map_err(|source| ServerConfigError::Profile {
        path: name_or_path.to_string(),
        source,
    })
}

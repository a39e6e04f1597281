use thiserror::Error;

/// Configuration faults that leave a vehicle with no drive available.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("gear ratio table is empty")]
    EmptyGearTable,

    #[error("gear ratio table has no forward gears (need reverse, neutral and at least one forward ratio)")]
    MissingForwardGears,

    #[error("torque curve has no control points")]
    EmptyTorqueCurve,

    #[error("torque curve control points are not in ascending RPM order")]
    UnsortedTorqueCurve,

    #[error("non-finite value in {field}")]
    NonFiniteValue { field: &'static str },

    #[error("invalid RPM range: idle {idle} must be below max {max}")]
    InvalidRpmRange { idle: f32, max: f32 },

    #[error("profile JSON: {0}")]
    Json(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e.to_string())
    }
}

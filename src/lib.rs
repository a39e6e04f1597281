//! Arcade drivetrain server: engine RPM, automatic gearbox, turbo and ABS
//! simulation (`drivetrain`) hosted in a rapier3d world and served over
//! websockets.

pub mod drivetrain;

pub mod config;
pub mod physics;
pub mod suspension_contact;
pub mod vehicle;
pub mod state;
pub mod net;

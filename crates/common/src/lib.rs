//! Shared types for the kiln engine.
//!
//! # Invariants
//! - An `Entity` is only meaningful for the store that issued it.
//! - Every `EngineConfig` field has a default, so partial JSON is accepted.

mod config;
mod types;

pub use config::{CameraConfig, ConfigError, EngineConfig};
pub use types::Entity;

pub fn crate_info() -> &'static str {
    "kiln-common v0.1.0"
}

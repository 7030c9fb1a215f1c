use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors from loading an engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Camera lens and orbit-control parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// Initial distance of the orbit camera from its target.
    pub distance: f32,
    /// Radians of orbit per pixel of pointer drag.
    pub sensitivity: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 60.0,
            near: 0.1,
            far: 100.0,
            distance: 3.0,
            sensitivity: 0.005,
        }
    }
}

/// Engine configuration shared by the page, the render worker and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// CSS selector of the canvas handed to the render worker.
    pub canvas_selector: String,
    pub worker_name: String,
    /// URL of the worker bootstrap script.
    pub worker_script: String,
    pub clear_color: [f32; 4],
    pub camera: CameraConfig,
    /// Demo orbit speed in radians per second. Zero disables the animation.
    pub orbit_speed: f32,
    /// Model fetched by the render worker at startup.
    pub mesh_url: Option<String>,
    pub vertex_shader_url: Option<String>,
    pub fragment_shader_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            canvas_selector: "#canvas0".into(),
            worker_name: "kiln-render".into(),
            worker_script: "./worker.js".into(),
            clear_color: [0.05, 0.05, 0.08, 1.0],
            camera: CameraConfig::default(),
            orbit_speed: 0.8,
            mesh_url: None,
            vertex_shader_url: None,
            fragment_shader_url: None,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON text. Missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a configuration file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

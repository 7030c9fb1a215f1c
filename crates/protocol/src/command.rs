use serde::{Deserialize, Serialize};

/// Application command carried as JSON text in a `Custom` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum CustomCommand {
    /// Fetch a GLB container and replace the scene's imported model.
    LoadMesh { url: String },
    SetClearColor { color: [f32; 4] },
    /// Put the active camera back at its configured orbit.
    ResetCamera,
}

impl CustomCommand {
    pub fn to_json(&self) -> String {
        // Cannot fail: no maps, and non-finite floats serialize as null.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

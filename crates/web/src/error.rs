use kiln_common::ConfigError;
use kiln_gpu::GpuError;
use kiln_mesh::MeshImportError;
use kiln_scene::SceneError;

/// Errors from the render worker and its browser wiring.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("scene error: {0}")]
    Scene(#[from] SceneError),
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("mesh import error: {0}")]
    Mesh(#[from] MeshImportError),
    #[error("fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },
    #[error("no {0} in this context")]
    MissingGlobal(&'static str),
    #[error("no canvas matches `{0}`")]
    CanvasNotFound(String),
    #[error("JavaScript error: {0}")]
    Js(String),
}

#[cfg(target_arch = "wasm32")]
impl WebError {
    pub(crate) fn js(value: wasm_bindgen::JsValue) -> Self {
        Self::Js(format!("{value:?}"))
    }
}

#[cfg(target_arch = "wasm32")]
impl From<WebError> for wasm_bindgen::JsValue {
    fn from(err: WebError) -> Self {
        wasm_bindgen::JsValue::from_str(&err.to_string())
    }
}

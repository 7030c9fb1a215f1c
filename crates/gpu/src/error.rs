/// Errors from the GPU resource layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpuError {
    #[error("failed to compile shader `{shader}`: {diagnostic}")]
    Compile { shader: String, diagnostic: String },
    #[error("failed to link program `{program}`: {reason}")]
    Link { program: String, reason: String },
    #[error("GPU resource acquisition failed: {what}")]
    ResourceAcquisition { what: String },
    #[error("surface error: {0}")]
    Surface(String),
}

impl GpuError {
    pub(crate) fn acquisition(what: impl Into<String>) -> Self {
        Self::ResourceAcquisition { what: what.into() }
    }
}

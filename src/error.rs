use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by the rendering device and its backends.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device initialization failed: {0}")]
    Init(String),

    #[error("unsupported hardware: {0}")]
    Unsupported(String),

    #[error("shader source not found: {}", path.display())]
    ShaderNotFound { path: PathBuf },

    #[error("shader program `{program}` failed to compile: {message}")]
    ShaderCompile { program: String, message: String },

    #[error("invalid texture data: {0}")]
    InvalidTexture(String),

    #[error("framebuffer incomplete: {0}")]
    IncompleteFramebuffer(String),

    #[error("surface error: {0}")]
    Surface(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;

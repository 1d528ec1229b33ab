use std::path::Path;

use crate::error::{DeviceError, Result};

pub(crate) fn load_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => DeviceError::ShaderNotFound {
            path: path.to_path_buf(),
        },
        _ => DeviceError::Io(err),
    })
}

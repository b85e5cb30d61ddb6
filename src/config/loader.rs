use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::defs::PipelineError;
use crate::config::model::RawConfig;

/// Reads and parses the YAML run document.
pub fn read_config(path: &Path) -> Result<RawConfig, PipelineError> {
    let contents = fs::read_to_string(path).map_err(|e| PipelineError::ConfigRead {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let raw: RawConfig = serde_yaml::from_str(&contents).map_err(|e| PipelineError::ConfigRead {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    debug!("Loaded config {}: {:?}", path.display(), raw);
    Ok(raw)
}

/// Directory that relative paths inside the document are resolved against.
pub fn config_base_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

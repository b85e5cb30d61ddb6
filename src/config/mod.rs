pub mod defs;
pub mod loader;
pub mod model;
pub mod validate;

use std::path::Path;

use crate::config::defs::PipelineError;
use crate::config::model::RunConfiguration;

/// Reads, parses and validates the run document at `path`.
pub fn load_run_configuration(path: &Path) -> Result<RunConfiguration, PipelineError> {
    let raw = loader::read_config(path)?;
    validate::validate(raw, path, &loader::config_base_dir(path))
}

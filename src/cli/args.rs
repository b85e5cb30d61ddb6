use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gru",
    version,
    about = "Maps nanopore reads against organism references and reports per-organism statistics"
)]
pub struct Arguments {
    /// YAML run configuration
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,
}

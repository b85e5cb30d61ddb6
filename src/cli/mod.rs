pub mod args;

use std::ffi::OsString;

use clap::error::ErrorKind;
use clap::Parser;

pub use args::Arguments;
use crate::config::defs::PipelineError;

pub const USAGE: &str = "Usage: gru <config.yml>\n\n\
The configuration file describes the project folder, the nanopore input, the optional\n\
Illumina reads and references, the external software and the organism file mapping.";

/// Parses the process arguments. `--help` and `--version` print and exit immediately.
pub fn parse() -> Result<Arguments, PipelineError> {
    parse_from(std::env::args_os())
}

pub fn parse_from<I, T>(args: I) -> Result<Arguments, PipelineError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Arguments::try_parse_from(args) {
        Ok(arguments) => Ok(arguments),
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => Err(PipelineError::Usage(
            e.to_string().lines().next().unwrap_or("invalid arguments").to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_single_positional_config() -> anyhow::Result<()> {
        let args = parse_from(["gru", "run.yml"])?;
        assert_eq!(args.config, PathBuf::from("run.yml"));
        Ok(())
    }

    #[test]
    fn test_wrong_argument_count_is_a_usage_error() {
        for argv in [vec!["gru"], vec!["gru", "a.yml", "b.yml"], vec!["gru", "--bogus", "a.yml"]] {
            let err = parse_from(argv).unwrap_err();
            assert_eq!(err.exit_code(), 1);
            assert!(err.shows_usage());
        }
    }
}

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use env_logger::{Builder, Env, DEFAULT_FILTER_ENV};
use log::{self, debug, error, info, LevelFilter};

use gru_pipelines::cli::{parse, USAGE};
use gru_pipelines::config::defs::PipelineError;
use gru_pipelines::config::load_run_configuration;
use gru_pipelines::pipelines::nanopore_mapping;

#[tokio::main]
async fn main() {
    let run_start = Instant::now();

    // RUST_LOG wins; otherwise Info, raised to Debug by gru_debug once the config is loaded.
    let level_from_env = std::env::var_os(DEFAULT_FILTER_ENV).is_some();
    Builder::from_env(Env::default().default_filter_or("debug"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
    if !level_from_env {
        log::set_max_level(LevelFilter::Info);
    }

    println!("\n-------------\n Gru\n-------------\n");

    let config = match parse().and_then(|args| load_run_configuration(&args.config)) {
        Ok(config) => config,
        Err(e) => abort(&e, run_start),
    };
    if config.debug && !level_from_env {
        log::set_max_level(LevelFilter::Debug);
    }
    debug!("Run configuration: {:?}", config);

    match nanopore_mapping::run(Arc::new(config)).await {
        Ok(report) => {
            info!("Report: {}", report.display());
            println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
        }
        Err(e) => abort(&e, run_start),
    }
}

fn abort(err: &PipelineError, run_start: Instant) -> ! {
    error!("ABORT: {} (ERROR {})", err, err.exit_code());
    if err.shows_usage() {
        eprintln!("\n{}", USAGE);
    }
    debug!("Aborted after {} milliseconds.", run_start.elapsed().as_millis());
    std::process::exit(err.exit_code());
}

//! `gridexec`: reads JSON command envelopes from stdin, dispatches each
//! to a data-grid storage backend over one logical connection, and
//! writes a JSON response per envelope to stdout.

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use gridexec::backend::http::HttpStorageBackend;
use gridexec::backend::StorageBackend;
use gridexec::config::{Cli, Config};
use gridexec::environment::Environment;
use gridexec::stream_loop;

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("gridexec: configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.verbose, &config.log_level);

    let env = Environment::load(&config);
    let backend_url = config.backend_url.clone();
    let new_backend = move || -> Box<dyn StorageBackend> {
        Box::new(
            HttpStorageBackend::new(backend_url.clone(), HTTP_TIMEOUT)
                .expect("failed to build the backend HTTP client"),
        )
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let result = stream_loop::run(stdin.lock(), stdout.lock(), &config, &env, new_backend).await;

    match result {
        Ok(0) => ExitCode::SUCCESS,
        Ok(errors) => {
            error!(errors, "stream completed with per-item errors");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("stream loop terminated: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, log_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

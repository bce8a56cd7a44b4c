//! miniplexd: a UDP datagram multiplexer. Parses arguments, sets up
//! logging, sizes the Tokio thread pool to `--concurrency`, then hands off
//! to [`miniplex::run`] for the receive loop and forwarding engine.

use std::process::ExitCode;

use clap::Parser;

use miniplex::config::{Cli, Config};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("miniplexd: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match miniplex::logging::init(
        &config.console_level,
        &config.file_level,
        &config.log_file,
        config.log_size_kb,
        config.log_num,
    ) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("miniplexd: failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.concurrency)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("miniplexd: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(miniplex::run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "miniplex exited with an error");
            ExitCode::FAILURE
        }
    }
}

//! MiniPlex: a UDP datagram multiplexer.
//!
//! A single listening socket forwards datagrams among a dynamically learned
//! set of remote endpoints according to one of four policies (Hub, Trunk,
//! Prune, Switch). The crate is organized bottom-up, matching the component
//! breakdown this forwarding engine is built from:
//!
//! - [`timeout_cache`]: an insertion-ordered, activity-refresh TTL set.
//! - [`vm`]: the embedded RV64IM interpreter used by Switch mode.
//! - [`directory`]: the endpoint bookkeeping (perma/active/addr-branch caches).
//! - [`pipeline`]: the UDP socket, receive-buffer pool, and socket/processing
//!   strands.
//! - [`engine`]: the four forwarding policies, dispatched over the above.
//!
//! [`config`] and [`error`] are the ambient CLI/validation and error-kind
//! surface; [`logging`] wires up the console + rotating-file `tracing` sinks.
//! [`run`] is the single entry point the `miniplexd` binary calls.

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod strand;
pub mod timeout_cache;
pub mod vm;

use std::collections::HashSet;
use std::fs;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use crate::config::Config;
use crate::directory::{Directory, ProcessingState};
use crate::engine::Mode;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::strand::Strand;
use crate::vm::Vm;

/// Constructs the pipeline from a validated [`Config`], runs it until a
/// termination signal arrives (or, in benchmark mode, until the benchmark
/// duration elapses), and returns once shutdown has drained cleanly.
///
/// Construction failures (bad bytecode, a socket that refuses to bind) are
/// reported as `Err` before anything is spawned; everything after that point
/// runs to completion regardless of per-datagram faults, per §7 of the
/// forwarding design this crate implements.
pub async fn run(config: Config) -> Result<()> {
    tracing::info!(mode = ?mode_name(&config.mode), local_addr = %config.local_addr, "starting miniplex");

    let vm = match &config.mode {
        Mode::Switch { byte_code } => {
            let bytes = fs::read(byte_code)
                .map_err(|e| Error::Bytecode(format!("failed to read {}: {e}", byte_code.display())))?;
            let mut vm = Vm::new(vm::DEFAULT_STACK_BYTES);
            vm.program_load(&bytes)?;
            Some(vm)
        }
        _ => None,
    };

    let perma: HashSet<_> = config.perma_branches.clone();
    let processing = Strand::new(move |handle| ProcessingState {
        directory: Directory::new(perma, config.timeout, handle),
        vm,
    });

    let pipeline = Pipeline::bind(config.local_addr, config.so_rcvbuf, config.max_process_q, processing, config.mode.clone())
        .await
        .map_err(Error::Io)?;

    tracing::info!(local_addr = %pipeline.local_addr().map_err(Error::Io)?, "listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if config.benchmark {
        let target = pipeline.local_addr().map_err(Error::Io)?;
        let duration = config.benchmark_duration_ms;
        let run_handle = tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move { pipeline.run(shutdown_rx).await }
        });
        let sent = Pipeline::run_benchmark(target, duration, config.concurrency.max(1)).await.map_err(Error::Io)?;
        tracing::info!(sent, "benchmark finished, shutting down");
        let _ = shutdown_tx.send(true);
        let _ = run_handle.await;
        return Ok(());
    }

    let run_handle = tokio::spawn(async move { pipeline.run(shutdown_rx).await });
    wait_for_signal().await;
    let _ = shutdown_tx.send(true);
    let _ = run_handle.await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn mode_name(mode: &Mode) -> &'static str {
    match mode {
        Mode::Hub => "hub",
        Mode::Trunk { .. } => "trunk",
        Mode::Prune { .. } => "prune",
        Mode::Switch { .. } => "switch",
    }
}

/// Waits for SIGINT or SIGTERM, logging which one arrived at a level loud
/// enough to show up even with a terse `--console-level`.
async fn wait_for_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler, falling back to SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            tracing::warn!(signal = "SIGINT", "shutdown signal received");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(signal = "SIGINT", "shutdown signal received");
        }
        _ = sigterm.recv() => {
            tracing::warn!(signal = "SIGTERM", "shutdown signal received");
        }
    }
}

//! Staged file transfer engine shared by the `rstage` coordinator and the `rstaged` worker.
//!
//! A run is a list of [`config::Job`]s. Each job pairs a local directory with a directory on
//! a remote endpoint and moves every selected file across using the staging protocol in
//! [`staging`]: rename at the source, copy under the staging name, clean up the source, rename
//! at the destination. Every outcome lands in a [`ledger::Ledger`].
//!
//! # Module map
//! - [`config`] - run file, per-job options and their validation
//! - [`endpoint`], [`local`], [`share`], [`session`] - the two sides of a transfer
//! - [`selector`], [`sweeper`], [`staging`], [`job`] - the transfer itself
//! - [`ledger`], [`error`], [`task`] - what gets reported
//!
//! # Logging
//! Everything logs through `tracing`; [`run`] installs a stderr subscriber whose level follows
//! the `-v` count unless `RUST_LOG` is set.

pub mod clock;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod job;
pub mod ledger;
pub mod local;
pub mod selector;
pub mod session;
pub mod share;
pub mod staging;
pub mod sweeper;
pub mod task;
pub mod version;

#[cfg(test)]
mod testutils;

pub use config::{OutputConfig, RuntimeConfig};
pub use error::{Error, ErrorClass, OpError};
pub use ledger::{Ledger, ResultRecord, RunOutcome, Summary};

/// Level filter used when `RUST_LOG` is not set.
pub fn log_level(output: &OutputConfig) -> &'static str {
    if output.quiet {
        return "off";
    }
    match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global stderr subscriber. Calling it twice is harmless.
pub fn init_tracing(output: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level(output)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn build_runtime(runtime: &RuntimeConfig) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    builder
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build tokio runtime: {e:#}"))
}

/// Set up logging and the tokio runtime, then drive `func` to completion.
pub fn run<F, Fut, T>(output: OutputConfig, runtime: RuntimeConfig, func: F) -> anyhow::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    init_tracing(&output);
    let runtime = build_runtime(&runtime)?;
    runtime.block_on(func())
}

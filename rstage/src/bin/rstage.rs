use std::sync::Arc;

use clap::Parser;

use common::ledger::RunOutcome;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rstage",
    version,
    about = "Move files between local directories and remote endpoints without ever exposing a partial file",
    long_about = "`rstage` runs a list of transfer jobs described in a JSON run file.

Every file is renamed to a staging name at the source, copied under that staging name, removed at the source and finally renamed to its real name at the destination. Readers on either side never see a half-written file under its final name.

Endpoints are `file:///mounted/share` or `ssh://[user@]host[:port]`. A job with a `Worker` host is executed by `rstaged` on that host.

EXAMPLES:
    # Run all jobs, two at a time, and print a summary
    rstage --config run.json --max-concurrent-jobs 2 --summary

    # Hand the records to the reporting job
    rstage --config run.json --records-out /var/lib/rstage/last-run.json

EXIT STATUS:
    0  every file and job succeeded
    1  the run completed with per-file or per-job errors
    2  configuration error, or every job failed before processing anything"
)]
struct Args {
    // Run options
    /// JSON run file with the job list and default options
    #[arg(long, value_name = "PATH", help_heading = "Run options")]
    config: std::path::PathBuf,

    /// Override MaxConcurrentJobs from the run file
    #[arg(long, value_name = "N", help_heading = "Run options")]
    max_concurrent_jobs: Option<usize>,

    /// Path to `rstaged` on worker hosts
    #[arg(
        long,
        default_value = "rstaged",
        value_name = "PATH",
        help_heading = "Run options"
    )]
    worker_binary: String,

    // Progress & output
    /// Write all result records to this file as JSON
    #[arg(long, value_name = "PATH", help_heading = "Progress & output")]
    records_out: Option<std::path::PathBuf>,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    /// Print protocol version information as JSON and exit
    #[arg(long, help_heading = "Advanced settings")]
    protocol_version: bool,
}

async fn async_main(args: Args) -> anyhow::Result<RunOutcome> {
    let config = match rstage_tools_rstage::load_config(
        &args.config,
        args.max_concurrent_jobs,
        |var| std::env::var(var).ok(),
    )
    .await
    {
        Ok(config) => config,
        Err(error) => {
            tracing::error!("{}", error);
            return Ok(RunOutcome::Fatal);
        }
    };
    tracing::info!(
        "{} jobs, at most {} at a time",
        config.jobs.len(),
        config.max_concurrent_jobs
    );
    let worker = remote::WorkerExecutor::new(
        &args.worker_binary,
        remote::protocol::WorkerConfig {
            verbose: args.verbose,
            max_workers: args.max_workers,
            max_blocking_threads: args.max_blocking_threads,
        },
    );
    let executor = Arc::new(remote::RoutingExecutor::new(
        Arc::new(remote::LocalExecutor::default()),
        Arc::new(worker),
    ));
    let ledger = rstage_tools_rstage::run(config, executor).await;
    if let Some(path) = &args.records_out {
        rstage_tools_rstage::write_records(path, &ledger).await?;
    }
    if args.summary || args.verbose > 0 {
        println!("{}", ledger.summary());
    }
    Ok(ledger.outcome())
}

fn main() -> Result<(), anyhow::Error> {
    // --protocol-version must work without --config
    let argv: Vec<String> = std::env::args().collect();
    let before_separator = match argv.iter().position(|arg| arg == "--") {
        Some(pos) => &argv[..pos],
        None => &argv[..],
    };
    if before_separator.iter().any(|arg| arg == "--protocol-version") {
        println!("{}", common::version::ProtocolVersion::current().to_json()?);
        return Ok(());
    }
    let args = Args::parse();
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let outcome = common::run(output, runtime, func)?;
    std::process::exit(outcome.exit_code());
}

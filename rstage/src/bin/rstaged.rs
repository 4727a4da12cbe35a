use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rstaged",
    version,
    about = "`rstaged` runs a single rstage job on a worker host - started by `rstage`, not meant for direct use",
    long_about = "`rstaged` reads one job request as JSON from stdin, runs it against the endpoint named in the job and prints the result records as JSON on stdout. Logs go to stderr."
)]
struct Args {
    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

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

async fn async_main() -> anyhow::Result<()> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read request from stdin: {e}"))?;
    let request: remote::protocol::WorkerRequest = serde_json::from_str(&input)
        .map_err(|e| anyhow::anyhow!("malformed request on stdin: {e}"))?;
    tracing::info!(
        "worker running job {} (coordinator {})",
        request.job.name,
        request.version
    );
    let executor = remote::LocalExecutor::default();
    let response = rstage_tools_rstage::serve_request(request, &executor).await;
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&serde_json::to_vec(&response)?).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
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
    common::run(output, runtime, async_main)
}

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::time::Duration;

use voter_check_lib::lookup_client::DEFAULT_ENDPOINT;
use voter_check_lib::{logger, signal};
use voter_check_lib::{
    CancelToken, CheckpointPaths, CheckpointPolicy, CheckpointStore, HttpConfig, HttpTransport,
    LookupClient, MonthSearch, RetryPolicy, VerificationScheduler,
};

#[derive(Parser, Debug)]
#[command(
    name = "voter-check",
    version,
    about = "Check voter registration against the Michigan Voter Information Center"
)]
struct Args {
    /// HTTP proxy for all lookups
    #[arg(long)]
    proxy: Option<String>,

    /// Number of people verified concurrently
    #[arg(long, default_value_t = 40)]
    connections: usize,

    /// Skip records that are already checked
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    skip: bool,

    /// Input table (CSV or .xlsx)
    #[arg(long, default_value = "./data/detroit_index.txt")]
    input: PathBuf,

    /// Checkpoint / result CSV
    #[arg(long, default_value = "./data/detroit_index_checked.csv")]
    output: PathBuf,

    /// CSV with only the absentee rows
    #[arg(long, default_value = "./data/voted.csv")]
    voted_output: PathBuf,

    /// Persist after this many completed people
    #[arg(long, default_value_t = 50)]
    checkpoint_every: usize,

    /// Persist at least this often (seconds) while work completes
    #[arg(long, default_value_t = 60)]
    checkpoint_secs: u64,

    /// Attempts per lookup before a month is given up
    #[arg(long, default_value_t = 10)]
    retries: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[arg(long, default_value = DEFAULT_ENDPOINT, hide = true)]
    endpoint: String,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init(if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    info!("Starting voter check...");

    let paths = CheckpointPaths {
        input: args.input.clone(),
        output: args.output.clone(),
        absentee_output: args.voted_output.clone(),
    };
    let mut store = CheckpointStore::load(paths, args.skip)
        .with_context(|| format!("loading records from {:?}", args.input))?;

    let transport = HttpTransport::new(&HttpConfig {
        endpoint: args.endpoint.clone(),
        proxy: args.proxy.clone(),
        timeout: Duration::from_secs(args.timeout_secs),
    })?;
    let retry = RetryPolicy {
        max_attempts: args.retries,
        ..RetryPolicy::default()
    };
    let search = MonthSearch::new(LookupClient::new(transport, retry));

    let cancel = CancelToken::new();
    signal::cancel_on_interrupt(cancel.clone());

    let policy = CheckpointPolicy::new(
        args.checkpoint_every,
        Duration::from_secs(args.checkpoint_secs),
    );
    let report = VerificationScheduler::new(&search, args.connections, cancel.clone())
        .run(&mut store, policy)
        .context("saving results")?;
    // Stops the interrupt watcher.
    cancel.cancel();

    let stats = report.stats;
    info!(
        "Total: {} / Checked: {} / Registered: {} / Voted: {}",
        stats.total, stats.checked, stats.registered, stats.voted
    );

    if let Some(fatal) = report.fatal {
        error!(
            "Stopped early after {} people: {}. Rerun to continue.",
            report.completion_order.len(),
            fatal
        );
        std::process::exit(2);
    }
    if report.cancelled {
        warn!(
            "Interrupted after {} people. Progress saved to {:?}.",
            report.completion_order.len(),
            args.output
        );
        std::process::exit(130);
    }

    info!("Verification completed. Results in {:?}.", args.output);
    Ok(())
}

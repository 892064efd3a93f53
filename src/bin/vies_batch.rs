//! VIES batch verification CLI
//!
//! Usage:
//!   cargo run --features cli --bin vies-batch -- check IT00743110157
//!   cargo run --features cli --bin vies-batch -- check 00743110157 --country IT
//!
//!   cargo run --features cli --bin vies-batch -- batch \
//!     --input operaciones.csv \
//!     --output resultados.csv \
//!     --require Importe \
//!     --workers 4 \
//!     --default-country ES
//!
//! Settings not given as flags are read from the environment (`.env` is
//! loaded first), then fall back to built-in defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use vies_batch::export::{read_requests_from_path, write_results_to_path};
use vies_batch::{
    BatchCoordinator, BatchEvent, BatchSummary, CoordinatorConfig, ImportOptions, LookupOutcome,
    LookupResult, ViesClient, ViesClientConfig,
};

/// Validate EU VAT numbers against VIES
#[derive(Parser, Debug)]
#[command(name = "vies-batch")]
#[command(about = "Validate EU VAT numbers against the VIES service", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a single VAT number
    Check {
        /// VAT number, with or without its country prefix
        vat: String,

        /// Country code to use instead of the number's prefix
        #[arg(long, short = 'c')]
        country: Option<String>,
    },

    /// Check every VAT number in a CSV file
    Batch(BatchArgs),
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Input CSV file
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Output CSV file
    #[arg(long, short = 'o')]
    output: PathBuf,

    /// Column holding the VAT numbers
    #[arg(long, default_value = vies_batch::export::DEFAULT_ID_COLUMN)]
    column: String,

    /// Column that must be present in the input (can be specified multiple times)
    #[arg(long = "require")]
    required: Vec<String>,

    /// Concurrent lookups (env: VIES_MAX_WORKERS)
    #[arg(long, short = 'w')]
    workers: Option<usize>,

    /// Delay before each request in milliseconds (env: VIES_REQUEST_DELAY_MS)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Attempts per VAT number (env: VIES_MAX_RETRIES)
    #[arg(long, short = 'r')]
    retries: Option<u32>,

    /// Base retry backoff in milliseconds (env: VIES_RETRY_BACKOFF_MS)
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Country code for numbers without a recognised prefix (env: VIES_DEFAULT_COUNTRY)
    #[arg(long)]
    default_country: Option<String>,

    /// Print results as JSON instead of the summary
    #[arg(long)]
    json: bool,
}

impl BatchArgs {
    /// Flags override whatever the environment configured.
    fn apply(&self, mut config: CoordinatorConfig) -> CoordinatorConfig {
        if let Some(workers) = self.workers {
            config = config.max_concurrent_workers(workers);
        }
        if let Some(ms) = self.delay_ms {
            config = config.inter_request_delay(Duration::from_millis(ms));
        }
        if let Some(retries) = self.retries {
            config = config.max_retries(retries);
        }
        if let Some(ms) = self.backoff_ms {
            config = config.retry_backoff_base(Duration::from_millis(ms));
        }
        if let Some(code) = &self.default_country {
            config = config.default_jurisdiction(code.clone());
        }
        config
    }

    fn import_options(&self) -> ImportOptions {
        self.required.iter().fold(
            ImportOptions::default().with_id_column(self.column.clone()),
            |options, column| options.require(column.clone()),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let client_config = ViesClientConfig::from_env().context("Invalid VIES client settings")?;
    let client = Arc::new(ViesClient::with_config(client_config)?);

    match cli.command {
        Command::Check { vat, country } => {
            let config = CoordinatorConfig::from_env().context("Invalid batch settings")?;
            let coordinator = BatchCoordinator::new(client, config)?;
            let result = coordinator.verify_one(&vat, country.as_deref()).await;
            print_check(&result);
        }
        Command::Batch(args) => run_batch(client, args).await?,
    }

    Ok(())
}

async fn run_batch(client: Arc<ViesClient>, args: BatchArgs) -> Result<()> {
    let config = args.apply(CoordinatorConfig::from_env().context("Invalid batch settings")?);
    let coordinator = BatchCoordinator::new(client, config)?;

    let requests = read_requests_from_path(&args.input, &args.import_options())
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    if !args.json {
        println!(
            "{} {} VAT numbers from {}",
            "Loaded:".green().bold(),
            requests.len(),
            args.input.display()
        );
    }

    let started = Instant::now();
    let mut handle = coordinator.run(requests)?;

    let stop = handle.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} finishing in-flight lookups", "Stopping:".yellow().bold());
            stop.stop();
        }
    });

    let mut percent = 0;
    let mut emitted = Vec::with_capacity(handle.total());
    let mut finished = None;
    while let Some(event) = handle.next_event().await {
        match event {
            BatchEvent::Progress(progress) => percent = progress.percent(),
            BatchEvent::Result(result) => {
                if !args.json {
                    print_progress(percent, &result);
                }
                emitted.push(result);
            }
            BatchEvent::Finished(results) => finished = Some(results),
        }
    }

    let stopped = finished.is_none();
    let results = finished.unwrap_or(emitted);

    write_results_to_path(&args.output, &results)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    let summary = BatchSummary::from_results(&results);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_summary(&summary, handle.total(), stopped, started.elapsed());
        println!("{} {}", "Written:".green().bold(), args.output.display());
    }

    Ok(())
}

fn print_check(result: &LookupResult) {
    println!("{} {}", "VAT:".cyan().bold(), result.full_identifier);
    match &result.outcome {
        LookupOutcome::Success { payload } => {
            let status = if payload.is_registered() {
                "VALID".green().bold()
            } else {
                "INVALID".red().bold()
            };
            println!("{} {}", "Status:".cyan(), status);
            if let Some(name) = &payload.name {
                println!("{} {}", "Name:".cyan(), name);
            }
            if let Some(address) = &payload.address {
                println!("{} {}", "Address:".cyan(), address);
            }
            if let Some(date) = &payload.request_date {
                println!("{} {}", "Checked:".cyan(), date.dimmed());
            }
        }
        LookupOutcome::Failure { kind, reason } => {
            println!("{} {} ({})", "Status:".cyan(), "ERROR".red().bold(), kind);
            println!("  {}", reason.red());
        }
    }
    println!("{} {}", "Attempts:".cyan(), result.attempts);
}

fn print_progress(percent: u8, result: &LookupResult) {
    let status = match &result.outcome {
        LookupOutcome::Success { payload } if payload.is_registered() => "VALID".green(),
        LookupOutcome::Success { .. } => "INVALID".yellow(),
        LookupOutcome::Failure { .. } => "FAIL".red(),
    };
    let detail = match &result.outcome {
        LookupOutcome::Success { payload } => payload.name.clone().unwrap_or_default(),
        LookupOutcome::Failure { reason, .. } => reason.clone(),
    };
    println!(
        "[{:>3}%] {:<18} {:<8} {}",
        percent,
        result.full_identifier,
        status,
        detail.dimmed()
    );
}

fn print_summary(summary: &BatchSummary, submitted: usize, stopped: bool, elapsed: Duration) {
    println!("\n{}", "═".repeat(60));
    println!("{}", "VIES BATCH SUMMARY".cyan().bold());
    println!("{}", "═".repeat(60));
    println!("Submitted:    {}", submitted);
    println!("Processed:    {}", summary.total);
    println!("Succeeded:    {}", summary.succeeded.to_string().green());
    println!("Valid:        {}", summary.valid.to_string().green());
    println!("Failed:       {}", summary.failed.to_string().red());
    if stopped {
        println!(
            "Skipped:      {}",
            submitted.saturating_sub(summary.total).to_string().yellow()
        );
    }
    println!("Duration:     {:.2}s", elapsed.as_secs_f64());
}

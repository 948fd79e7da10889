//! CLI command definitions and dispatch.

use clap::Parser;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics::init_metrics;
use crate::pipeline::PipelineConfig;
use crate::scheduler::{EnqueueOptions, InputType, NoopProgress};
use crate::service::ClaimService;

/// Claim fact-checking pipeline.
#[derive(Parser)]
#[command(name = "claimforge")]
#[command(about = "Submit, verify and track fact-check claims")]
#[command(version)]
#[command(
    long_about = "claimforge verifies factual claims through a fixed pipeline: web search, \
evidence extraction, credibility analysis and verdict synthesis.\n\nThe serve command runs the \
durable job queue, worker pool and self-healing control loops until interrupted.\n\nExample \
usage:\n  claimforge serve --concurrency 4\n  claimforge submit \"Paris is the capital of France.\""
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the queue, worker pool and control loops until interrupted.
    Serve(ServeArgs),

    /// Submit a claim for verification.
    Submit(SubmitArgs),

    /// Show the status of a verification job.
    Status(StatusArgs),

    /// Show queue statistics.
    Stats,

    /// Show system health.
    Health,

    /// Run the verification pipeline inline, bypassing the queue.
    ///
    /// Useful for smoke-testing the external collaborators without a
    /// running worker pool.
    Verify(VerifyArgs),
}

/// Arguments for `claimforge serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Worker pool concurrency (overrides WORKER_CONCURRENCY).
    #[arg(short, long)]
    pub concurrency: Option<usize>,
}

/// Arguments for `claimforge submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// The claim text or URL to verify.
    pub claim: String,

    /// Submitting user id.
    #[arg(long)]
    pub user: Option<String>,

    /// Explicit priority (1-10, higher drains first).
    #[arg(long)]
    pub priority: Option<u8>,
}

/// Arguments for `claimforge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// The job id returned by submit.
    pub id: Uuid,
}

/// Arguments for `claimforge verify`.
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// The claim text to verify inline.
    pub claim: String,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses arguments and runs the CLI.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Runs the CLI with pre-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = PipelineConfig::from_env()?;

    match cli.command {
        Commands::Serve(args) => {
            if let Some(concurrency) = args.concurrency {
                config = config.with_worker_concurrency(concurrency);
            }
            serve(config).await
        }
        Commands::Submit(args) => {
            let service = ClaimService::connect(config).await?;
            let input_type = detect_input_type(&args.claim);

            let mut options = EnqueueOptions::default();
            if let Some(priority) = args.priority {
                options = options.with_priority(priority);
            }

            let submission = service
                .submit_claim(&args.claim, args.user, input_type, options)
                .await?;
            println!("{}", serde_json::to_string_pretty(&submission)?);
            Ok(())
        }
        Commands::Status(args) => {
            let service = ClaimService::connect(config).await?;
            let status = service.get_job_status(args.id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Stats => {
            let service = ClaimService::connect(config).await?;
            let stats = service.get_queue_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::Health => {
            let service = ClaimService::connect(config).await?;
            let health = service.get_health_status().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(())
        }
        Commands::Verify(args) => verify_inline(config, &args.claim).await,
    }
}

/// Runs the full service until a termination signal arrives, then shuts
/// down gracefully.
async fn serve(config: PipelineConfig) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Metrics initialization failed");
    }

    let grace = config.shutdown_grace;
    let service = ClaimService::connect(config).await?;
    service.start().await?;
    info!("claimforge is running, press Ctrl-C to stop");

    wait_for_signal().await;
    info!("Termination signal received");
    service.shutdown(grace).await;
    Ok(())
}

/// Runs the pipeline for one claim without touching the queue.
async fn verify_inline(config: PipelineConfig, claim: &str) -> anyhow::Result<()> {
    use crate::cache::MemoryClaimCache;
    use crate::llm::LlmClient;
    use crate::pipeline::VerificationPipeline;
    use crate::scheduler::ClaimPayload;
    use crate::search::ExaSearchClient;
    use crate::storage::Database;
    use std::sync::Arc;

    let llm = Arc::new(LlmClient::new(&config.llm_api_base, &config.llm_api_key));
    let search = Arc::new(ExaSearchClient::new(
        &config.search_api_base,
        &config.search_api_key,
    ));
    let database = Database::connect(&config.database_url).await?;

    let pipeline = VerificationPipeline::new(
        search,
        llm,
        &config.llm_model,
        Arc::new(MemoryClaimCache::new()),
        Arc::new(database),
        None,
        config.search_results,
        config.cache_ttl,
    );

    let payload = ClaimPayload::text(claim);
    let report = pipeline.verify(&payload, &NoopProgress).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// URL submissions get normal priority; free text gets low.
fn detect_input_type(input: &str) -> InputType {
    if input.starts_with("http://") || input.starts_with("https://") {
        InputType::Url
    } else {
        InputType::Text
    }
}

/// Waits for Ctrl-C (and SIGTERM on unix).
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

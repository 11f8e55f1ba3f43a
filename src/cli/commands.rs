//! CLI command definitions for taskforge.
//!
//! Provides commands for submitting agent jobs, driving their lifecycle
//! (start, approve, resume), inspecting status, running one-off agent
//! invocations, and applying database migrations.

use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::job::{JobState, JobType};
use crate::metrics::init_metrics;
use crate::orchestrator::{Orchestrator, SubmitOptions};
use crate::storage::{MigrationRunner, PgJobStore};

/// Agent job orchestration engine.
#[derive(Parser)]
#[command(name = "taskforge")]
#[command(about = "Submit and drive asynchronous agent jobs through their lifecycle")]
#[command(version)]
#[command(
    long_about = "taskforge tracks agent jobs (documentation, test generation, scaffolding)\nthrough a bounded lifecycle, resolving the AI backend per job and driving a\nplan/execute/reflect/validate pipeline.\n\nExample usage:\n  taskforge submit --job-type scaffold --payload '{\"name\": \"widget\"}'\n  taskforge start <job-id>"
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
    /// Submit a new job and print its id.
    Submit(SubmitArgs),

    /// Start a pending job and run its pipeline to completion.
    Start(StartArgs),

    /// Show a job's state and diagnostics.
    Status(StatusArgs),

    /// Record approval for a job awaiting it.
    Approve(ApproveArgs),

    /// Resume an approved job's pipeline.
    Resume(ResumeArgs),

    /// Run an agent once without creating a job.
    Exec(ExecArgs),

    /// Apply database migrations.
    Migrate,
}

/// Arguments for `taskforge submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Kind of work: documentation, test_generation or scaffold.
    #[arg(short = 't', long)]
    pub job_type: String,

    /// JSON request payload; may carry "provider" and "model" overrides.
    #[arg(short, long, default_value = "{}")]
    pub payload: String,

    /// Owner of the job. A fresh id is generated when omitted.
    #[arg(long)]
    pub user_id: Option<Uuid>,

    /// Run the strong-model validation pass on the finished artifact.
    #[arg(long)]
    pub strict_validation: bool,

    /// Pause for human approval before execution.
    #[arg(long)]
    pub requires_approval: bool,

    /// Also start the job immediately after submitting.
    #[arg(long)]
    pub start: bool,
}

/// Arguments for `taskforge start`.
#[derive(Parser, Debug)]
pub struct StartArgs {
    /// Id of the job to start.
    pub job_id: Uuid,
}

/// Arguments for `taskforge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Id of the job to inspect.
    pub job_id: Uuid,
}

/// Arguments for `taskforge approve`.
#[derive(Parser, Debug)]
pub struct ApproveArgs {
    /// Id of the job to approve.
    pub job_id: Uuid,

    /// Identity of the approver.
    #[arg(long)]
    pub approver: String,
}

/// Arguments for `taskforge resume`.
#[derive(Parser, Debug)]
pub struct ResumeArgs {
    /// Id of the job to resume.
    pub job_id: Uuid,

    /// Wait for the resumed pipeline to reach a terminal state.
    #[arg(long)]
    pub wait: bool,
}

/// Arguments for `taskforge exec`.
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Kind of work: documentation, test_generation or scaffold.
    #[arg(short = 't', long)]
    pub job_type: String,

    /// JSON request payload.
    #[arg(short, long, default_value = "{}")]
    pub payload: String,

    /// User whose credentials resolution consults.
    #[arg(long)]
    pub user_id: Option<Uuid>,
}

/// Parse command-line arguments into a `Cli`.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = EngineConfig::from_env()?;

    match cli.command {
        Commands::Submit(args) => run_submit_command(config, args).await?,
        Commands::Start(args) => run_start_command(config, args).await?,
        Commands::Status(args) => run_status_command(config, args).await?,
        Commands::Approve(args) => run_approve_command(config, args).await?,
        Commands::Resume(args) => run_resume_command(config, args).await?,
        Commands::Exec(args) => run_exec_command(config, args).await?,
        Commands::Migrate => run_migrate_command(config).await?,
    }
    Ok(())
}

/// Builds the engine, wiring the Postgres store when one is configured.
async fn build_orchestrator(config: EngineConfig) -> anyhow::Result<Arc<Orchestrator>> {
    init_metrics()?;

    let mut builder = Orchestrator::builder(config.clone());
    if let Some(url) = &config.database_url {
        let store = PgJobStore::connect(url).await?;
        builder = builder.with_store(Arc::new(store));
    } else {
        info!("DATABASE_URL not set; using the in-memory job store");
    }
    Ok(builder.build())
}

async fn run_submit_command(config: EngineConfig, args: SubmitArgs) -> anyhow::Result<()> {
    let job_type = JobType::from_str(&args.job_type).map_err(|e| anyhow::anyhow!(e))?;
    let payload: serde_json::Value = serde_json::from_str(&args.payload)?;
    let user_id = args.user_id.unwrap_or_else(Uuid::new_v4);

    let mut options = SubmitOptions::new();
    if args.strict_validation {
        options = options.with_strict_validation();
    }
    if args.requires_approval {
        options = options.with_approval();
    }

    let orchestrator = build_orchestrator(config).await?;
    let job_id = orchestrator
        .submit_job(user_id, job_type, payload, options)
        .await?;
    println!("{job_id}");

    if args.start {
        orchestrator.start_job(job_id).await?;
        print_status(&orchestrator, job_id).await?;
    }
    Ok(())
}

async fn run_start_command(config: EngineConfig, args: StartArgs) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    orchestrator.start_job(args.job_id).await?;
    print_status(&orchestrator, args.job_id).await?;
    Ok(())
}

async fn run_status_command(config: EngineConfig, args: StatusArgs) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    print_status(&orchestrator, args.job_id).await?;
    Ok(())
}

async fn run_approve_command(config: EngineConfig, args: ApproveArgs) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    orchestrator
        .record_approval(args.job_id, &args.approver)
        .await?;
    println!("approved {} by {}", args.job_id, args.approver);
    Ok(())
}

async fn run_resume_command(config: EngineConfig, args: ResumeArgs) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    orchestrator.resume_approved_job(args.job_id).await?;
    println!("resumed {}", args.job_id);

    if args.wait {
        // The continuation is detached; poll the store for a terminal state.
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            let Some(job) = orchestrator.store().get_job(args.job_id).await? else {
                break;
            };
            if job.state.is_terminal() {
                print_status(&orchestrator, args.job_id).await?;
                break;
            }
        }
    }
    Ok(())
}

async fn run_exec_command(config: EngineConfig, args: ExecArgs) -> anyhow::Result<()> {
    let job_type = JobType::from_str(&args.job_type).map_err(|e| anyhow::anyhow!(e))?;
    let payload: serde_json::Value = serde_json::from_str(&args.payload)?;
    let user_id = args.user_id.unwrap_or_else(Uuid::new_v4);

    let orchestrator = build_orchestrator(config).await?;
    let artifact = orchestrator
        .execute_agent(user_id, job_type, payload)
        .await?;
    println!("{}", serde_json::to_string_pretty(&artifact)?);
    Ok(())
}

async fn run_migrate_command(config: EngineConfig) -> anyhow::Result<()> {
    let url = config
        .database_url
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set to run migrations"))?;

    let store = PgJobStore::connect(&url).await?;
    let runner = MigrationRunner::new(store.pool().clone());
    runner.run_migrations().await?;

    let applied = runner.list_applied_migrations().await?;
    println!("schema up to date ({} migration(s) applied)", applied.len());
    Ok(())
}

/// Prints one job's state and diagnostics in a fixed, line-oriented format.
async fn print_status(orchestrator: &Arc<Orchestrator>, job_id: Uuid) -> anyhow::Result<()> {
    let Some(job) = orchestrator.store().get_job(job_id).await? else {
        anyhow::bail!("job '{job_id}' not found");
    };

    println!("job:      {}", job.id);
    println!("type:     {}", job.job_type);
    println!("state:    {}", job.state);
    if let Some(provider) = &job.ai_provider {
        println!(
            "ai:       {} / {} (key: {}, reason: {})",
            provider,
            job.ai_model.as_deref().unwrap_or("-"),
            job.ai_key_source.as_deref().unwrap_or("-"),
            job.ai_fallback_reason.as_deref().unwrap_or("-"),
        );
    }
    if let Some(score) = job.quality_score {
        println!("quality:  {score:.2}");
    }
    if let Some(approver) = &job.approved_by {
        println!("approved: {approver}");
    }
    match job.state {
        JobState::Completed => {
            if let Some(result) = &job.result {
                println!("result:\n{}", serde_json::to_string_pretty(result)?);
            }
        }
        JobState::Failed => {
            println!(
                "error:    [{}] {}",
                job.error_code.as_deref().unwrap_or("-"),
                job.error_message.as_deref().unwrap_or("-"),
            );
            if let Some(phase) = &job.failed_phase {
                println!("phase:    {phase}");
            }
            if let Some(url) = &job.error_gateway_url {
                println!("gateway:  {url}");
            }
        }
        _ => {}
    }
    Ok(())
}

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use serendip_engine::config::{AdminPolicy, JobConfig};
use serendip_engine::types::{JobId, UserId};
use serendip_engine::Engine;

#[derive(Parser)]
#[command(name = "serendip", version, about = "Automated literature-review engine")]
struct Cli {
    /// Path to the admin policy file (YAML). Defaults apply when absent.
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    /// SQLite database path.
    #[arg(long, global = true, default_value = "serendip.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pool until interrupted.
    Up {
        /// Worker pool size.
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },
    /// Submit a discovery job from a research seed and process it.
    Submit {
        /// The research seed or question.
        seed: String,
        /// Domain override for the job.
        #[arg(long)]
        domain: Option<String>,
        /// Process the job inline instead of leaving it for `up`.
        #[arg(long)]
        run: bool,
    },
    /// Submit a verification job for an entity pair.
    Verify {
        entity1: String,
        entity2: String,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        run: bool,
    },
    /// Send a chat message to a job (classified and applied to job state).
    Chat {
        job_id: i64,
        message: String,
        /// Process any resulting pipeline work inline.
        #[arg(long)]
        run: bool,
    },
    /// Show a job's status and latest decision.
    Status { job_id: i64 },
}

fn load_policy(path: &Option<PathBuf>) -> anyhow::Result<AdminPolicy> {
    match path {
        Some(path) => AdminPolicy::load(path).context("loading admin policy"),
        None => Ok(AdminPolicy::default()),
    }
}

fn build_engine(cli: &Cli, workers: usize) -> anyhow::Result<Engine> {
    let policy = load_policy(&cli.policy)?;
    Engine::builder(policy)
        .store_path(&cli.db)
        .workers(workers)
        .build()
        .context("assembling engine")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "serendip=info,serendip_engine=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Up { workers } => {
            let engine = build_engine(&cli, *workers)?;
            let pool = engine.start_workers();
            tracing::info!("Serendip running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            pool.shutdown().await;
        }
        Commands::Submit { seed, domain, run } => {
            let engine = build_engine(&cli, 1)?;
            let config = JobConfig {
                domain: domain.clone(),
                ..Default::default()
            };
            let job_id = engine.submit_seed(UserId(1), seed, config).await?;
            println!("Submitted job {job_id}");
            if *run {
                engine.drain().await;
                let status = engine.job_status(job_id).await?;
                println!("Job {job_id} finished processing at status {status}");
            }
        }
        Commands::Verify {
            entity1,
            entity2,
            domain,
            run,
        } => {
            let engine = build_engine(&cli, 1)?;
            let config = JobConfig {
                domain: domain.clone(),
                ..Default::default()
            };
            let job_id = engine
                .submit_verification(UserId(1), entity1, entity2, config)
                .await?;
            println!("Submitted verification job {job_id}");
            if *run {
                engine.drain().await;
                let status = engine.job_status(job_id).await?;
                println!("Job {job_id} finished processing at status {status}");
            }
        }
        Commands::Chat { job_id, message, run } => {
            let engine = build_engine(&cli, 1)?;
            let label = engine.handle_chat(JobId(*job_id), message).await?;
            println!("Classified as {label:?}");
            if *run {
                engine.drain().await;
                let status = engine.job_status(JobId(*job_id)).await?;
                println!("Job {job_id} now at status {status}");
            }
        }
        Commands::Status { job_id } => {
            let engine = build_engine(&cli, 1)?;
            let job = engine.store.load_job(JobId(*job_id)).await?;
            println!("Job {}: {} ({} mode)", job.id, job.status, job.mode);
            if let Some(decision) = engine.store.latest_decision(job.id).await? {
                println!(
                    "Latest decision: {} (provider {})",
                    decision.decision_label, decision.provider_used
                );
            }
            if let Some(result) = &job.result {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
        }
    }

    Ok(())
}

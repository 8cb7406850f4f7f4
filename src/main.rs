use anyhow::{anyhow, Result};
use clap::Parser;
use codemend::config::{self, Config};
use codemend::oracle::OracleClient;
use codemend::{pipeline, task, util};
use log::{error, info};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "codemend",
    about = "Automated code repair: localize a problem, sample edits, pick a winner by consensus",
    version
)]
struct Args {
    /// JSONL tasks file (one {"problem", "env"} object per line)
    #[arg(long, conflicts_with = "problem")]
    tasks: Option<PathBuf>,

    /// One-off problem description, run against --repo
    #[arg(long)]
    problem: Option<String>,

    /// Directory containing task environments
    #[arg(long, default_value = "envs")]
    envs_dir: PathBuf,

    /// Repository root for --problem mode
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Candidate sets to sample per task
    #[arg(long, default_value_t = pipeline::N_SAMPLES)]
    samples: usize,

    /// Interactively store an API key and exit
    #[arg(long)]
    setup: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if args.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    if args.setup {
        config::setup_api_key_interactive().map_err(|err| anyhow!(err))?;
        return Ok(());
    }

    if !Config::load().has_api_key() {
        return Err(anyhow!(
            "No API key configured. Run 'codemend --setup' to get started."
        ));
    }

    let client = OracleClient::new()?;

    if let Some(tasks_path) = &args.tasks {
        let tasks = task::load_tasks(tasks_path)?;
        info!("Loaded {} tasks from {}", tasks.len(), tasks_path.display());

        for task in &tasks {
            info!(
                "Processing task: {} (env: {})",
                util::truncate(&task.problem, 80),
                task.env
            );
            let repo_root = args.envs_dir.join(&task.env);
            match pipeline::run_task(&client, &repo_root, &task.problem, args.samples).await {
                Ok(report) => print!("{}", report.rendered),
                Err(err) => error!("Task against env {} failed: {:#}", task.env, err),
            }
        }
    } else if let Some(problem) = &args.problem {
        let report = pipeline::run_task(&client, &args.repo, problem, args.samples).await?;
        print!("{}", report.rendered);
    } else {
        return Err(anyhow!(
            "Nothing to do: pass --tasks <file> or --problem <text>"
        ));
    }

    if let Some(usage) = client.total_usage() {
        info!(
            "Token usage: {} prompt + {} completion = {} total",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        );
    }

    Ok(())
}

//! Codeloom command line interface.
//!
//! Drives workflow runs against a SQLite checkpoint store and an
//! OpenAI-compatible generation backend.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use codeloom_core::checkpoint::SqliteCheckpointer;
use codeloom_core::config::Config;
use codeloom_core::runner::{ApprovalDecision, RunRequest, WorkflowRunner};
use codeloom_core::state::{ApprovalKind, WorkflowState};
use codeloom_core::{OpenAiGenerator, PythonToolchainValidator};

#[derive(Parser)]
#[command(name = "codeloom")]
#[command(about = "Workflow engine turning product requests into generated backend code")]
struct Cli {
    /// Path to a TOML config file. Defaults and environment variables
    /// are used when absent.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print full state as JSON instead of a summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new workflow run
    Start {
        /// The product request to build
        request: String,
        #[arg(long)]
        run_id: i64,
        #[arg(long, default_value_t = 1)]
        project_id: i64,
        #[arg(long, default_value_t = 1)]
        user_id: i64,
        /// Optional constraints (tech stack, compliance, etc.)
        #[arg(long)]
        constraints: Option<String>,
    },
    /// Resume a checkpointed run
    Resume {
        run_id: i64,
    },
    /// Show the current state of a run
    State {
        run_id: i64,
    },
    /// List all checkpointed runs
    List,
    /// Record approval decisions and resume through the review gate
    Approve {
        run_id: i64,
        /// Kind of item under review
        #[arg(value_enum)]
        kind: KindArg,
        /// Item indices to approve (repeatable)
        #[arg(long = "approve", value_name = "INDEX")]
        approvals: Vec<usize>,
        /// Item indices to reject, optionally with feedback as
        /// INDEX=FEEDBACK (repeatable)
        #[arg(long = "reject", value_name = "INDEX[=FEEDBACK]")]
        rejections: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Epic,
    Story,
    Spec,
}

impl From<KindArg> for ApprovalKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Epic => ApprovalKind::Epic,
            KindArg::Story => ApprovalKind::Story,
            KindArg::Spec => ApprovalKind::Spec,
        }
    }
}

fn parse_rejection(raw: &str) -> Result<ApprovalDecision> {
    let (index, feedback) = match raw.split_once('=') {
        Some((idx, fb)) => (idx, Some(fb.to_string())),
        None => (raw, None),
    };
    let index: usize = index
        .parse()
        .with_context(|| format!("invalid rejection index: {}", raw))?;
    Ok(ApprovalDecision {
        index,
        approved: false,
        feedback,
    })
}

fn print_state(state: &WorkflowState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }

    println!("Run {} [stage: {}]", state.run_id, state.current_stage);
    if let Some(msg) = &state.error_message {
        println!("  error: {}", msg);
    }
    if state.awaiting_approval {
        if let Some(kind) = state.approval_type {
            println!("  awaiting {} approval for {} item(s):", kind, state.approval_ids.len());
            for &i in &state.approval_ids {
                let title = match kind {
                    ApprovalKind::Epic => state.epics.get(i).map(|e| e.title.as_str()),
                    ApprovalKind::Story => state.stories.get(i).map(|s| s.title.as_str()),
                    ApprovalKind::Spec => state.specs.get(i).map(|s| s.story_title.as_str()),
                };
                println!("    [{}] {}", i, title.unwrap_or("?"));
            }
        }
    }
    if !state.validation_errors.is_empty() {
        println!("  validation errors:");
        for err in &state.validation_errors {
            println!("    {}", err);
        }
    }
    if let Some(artifact) = state.code_artifacts.first() {
        println!(
            "  code artifact: {} file(s), {} fix attempt(s)",
            artifact.files.len(),
            artifact.fix_attempts
        );
    }
    Ok(())
}

async fn build_runner(config: &Config) -> Result<WorkflowRunner> {
    let checkpointer = SqliteCheckpointer::new(&config.checkpoint.database_path)
        .await
        .context("failed to open checkpoint database")?;
    let generation =
        OpenAiGenerator::new(config.openai.clone()).context("failed to build OpenAI client")?;
    let validation = PythonToolchainValidator::new(config.validation.clone());

    Ok(WorkflowRunner::new(
        Arc::new(generation),
        Arc::new(validation),
        Arc::new(checkpointer),
        config.workflow.clone(),
    )?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };

    let runner = build_runner(&config).await?;

    match cli.command {
        Commands::Start {
            request,
            run_id,
            project_id,
            user_id,
            constraints,
        } => {
            let state = runner
                .start(RunRequest {
                    run_id,
                    project_id,
                    user_id,
                    product_request: request,
                    constraints,
                })
                .await?;
            print_state(&state, cli.json)?;
        }
        Commands::Resume { run_id } => {
            let state = runner.resume(run_id, None).await?;
            print_state(&state, cli.json)?;
        }
        Commands::State { run_id } => {
            let state = runner.get_state(run_id).await?;
            print_state(&state, cli.json)?;
        }
        Commands::List => {
            for run_id in runner.list_runs().await? {
                let state = runner.get_state(run_id).await?;
                println!(
                    "{}\t{}\t{}",
                    run_id,
                    state.current_stage,
                    if state.awaiting_approval {
                        "awaiting approval"
                    } else {
                        "-"
                    }
                );
            }
        }
        Commands::Approve {
            run_id,
            kind,
            approvals,
            rejections,
        } => {
            let mut decisions: Vec<ApprovalDecision> = approvals
                .into_iter()
                .map(|index| ApprovalDecision {
                    index,
                    approved: true,
                    feedback: None,
                })
                .collect();
            for raw in &rejections {
                decisions.push(parse_rejection(raw)?);
            }
            if decisions.is_empty() {
                bail!("no approval decisions given; use --approve and/or --reject");
            }
            let state = runner.approve_items(run_id, kind.into(), &decisions).await?;
            print_state(&state, cli.json)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejection_with_feedback() {
        let decision = parse_rejection("2=too broad").unwrap();
        assert_eq!(decision.index, 2);
        assert!(!decision.approved);
        assert_eq!(decision.feedback.as_deref(), Some("too broad"));
    }

    #[test]
    fn test_parse_rejection_bare_index() {
        let decision = parse_rejection("0").unwrap();
        assert_eq!(decision.index, 0);
        assert!(decision.feedback.is_none());
    }

    #[test]
    fn test_parse_rejection_invalid() {
        assert!(parse_rejection("abc").is_err());
    }
}

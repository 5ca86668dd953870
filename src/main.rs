//! Thin CLI surface over the `forge_pipeline` library: a way to drive the
//! orchestrator and poller from a terminal instead of from an external
//! automation surface. Only one process is ever running the reconciliation
//! loop, so `poll start` blocks in the foreground until interrupted; there
//! is no daemon to talk to from a separate `poll status`/`poll stop`
//! invocation, so those report on the in-memory stores of *this* run only.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use forge_pipeline::clock::SystemClock;
use forge_pipeline::config::Config;
use forge_pipeline::platform::GitHubPlatformClient;
use forge_pipeline::workflow::models::{IssueRecommendation, Priority, RecommendationMetadata, Size};
use forge_pipeline::workflow::{BranchStore, ConfigStore, Orchestrator, PipelineStateStore, Poller, SubIssueStore, TransitionLog};

#[derive(Parser)]
#[command(name = "forge-pipeline", about = "Drives forge issues through a pipeline of AI coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Confirm a recommendation and run it through the full workflow.
    Confirm {
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        project_node_id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        user_story: String,
        #[arg(long = "requirement")]
        functional_requirements: Vec<String>,
        #[arg(long, default_value = "p2")]
        priority: String,
        #[arg(long, default_value = "m")]
        size: String,
        #[arg(long, default_value_t = 2.0)]
        estimate_hours: f32,
    },
    /// Start, stop, or inspect the reconciliation poller.
    Poll {
        #[command(subcommand)]
        action: PollAction,
    },
    /// Inspect pipeline state.
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Show recent workflow transitions.
    Transitions {
        #[arg(long)]
        issue_id: Option<i64>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the stored configuration for a project.
    Config {
        #[arg(long)]
        project_id: String,
    },
}

#[derive(Subcommand)]
enum PollAction {
    /// Block in the foreground, running the reconciliation loop until Ctrl-C.
    Start {
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        project_node_id: String,
    },
    /// No-op in this single-process harness: there is no running daemon to stop.
    Stop {
        #[arg(long)]
        project_id: String,
    },
    /// No-op in this single-process harness: nothing persists between invocations.
    Status {
        #[arg(long)]
        project_id: String,
    },
}

#[derive(Subcommand)]
enum StateAction {
    Show {
        #[arg(long)]
        issue_number: i64,
    },
    List,
}

fn parse_priority(s: &str) -> anyhow::Result<Priority> {
    Ok(match s.to_lowercase().as_str() {
        "p0" => Priority::P0,
        "p1" => Priority::P1,
        "p2" => Priority::P2,
        "p3" => Priority::P3,
        other => anyhow::bail!("unknown priority {other:?}, expected p0..p3"),
    })
}

fn parse_size(s: &str) -> anyhow::Result<Size> {
    Ok(match s.to_lowercase().as_str() {
        "xs" => Size::Xs,
        "s" => Size::S,
        "m" => Size::M,
        "l" => Size::L,
        "xl" => Size::Xl,
        other => anyhow::bail!("unknown size {other:?}, expected xs/s/m/l/xl"),
    })
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    transitions: Arc<TransitionLog>,
    config_store: Arc<ConfigStore>,
}

fn build_harness(config: &Config) -> anyhow::Result<Harness> {
    let platform = Arc::new(GitHubPlatformClient::new(config.github_token.clone()));
    let config_store = Arc::new(ConfigStore::open(&config.db_path)?);
    let transitions = Arc::new(TransitionLog::open(&transitions_db_path(&config.db_path))?);
    let orchestrator = Arc::new(Orchestrator::new(
        platform,
        config_store.clone(),
        Arc::new(PipelineStateStore::new()),
        Arc::new(BranchStore::new()),
        Arc::new(SubIssueStore::new()),
        transitions.clone(),
        Arc::new(SystemClock),
        config.assignment_grace_period_seconds,
    ));
    Ok(Harness {
        orchestrator,
        transitions,
        config_store,
    })
}

fn transitions_db_path(db_path: &std::path::Path) -> PathBuf {
    let mut path = db_path.to_path_buf();
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| "forge-pipeline".to_string());
    path.set_file_name(format!("{stem}-transitions.db"));
    path
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Confirm {
            project_id,
            project_node_id,
            title,
            user_story,
            functional_requirements,
            priority,
            size,
            estimate_hours,
        } => {
            let harness = build_harness(&config)?;
            let recommendation = IssueRecommendation {
                title,
                user_story,
                ui_ux_description: None,
                functional_requirements,
                technical_notes: None,
                metadata: RecommendationMetadata {
                    priority: parse_priority(&priority)?,
                    size: parse_size(&size)?,
                    estimate_hours,
                    start_date: None,
                    target_date: None,
                    labels: Vec::new(),
                },
            };
            let result = harness
                .orchestrator
                .execute_full_workflow(&project_id, &project_node_id, &recommendation)
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Command::Poll {
            action: PollAction::Start {
                project_id,
                project_node_id,
            },
        } => {
            let harness = build_harness(&config)?;
            let poller = Poller::new(harness.orchestrator.clone(), Duration::from_secs(config.polling_interval_seconds));
            poller.start_polling(project_id.clone(), project_node_id);
            println!("reconciliation loop started for project {project_id}, interval {}s. Ctrl-C to stop.", config.polling_interval_seconds);
            tokio::signal::ctrl_c().await?;
            poller.stop_polling(&project_id);
            println!("stopped.");
        }
        Command::Poll {
            action: PollAction::Stop { project_id },
        } => {
            println!("no reconciliation loop is running in this process for project {project_id}; `poll start` blocks until stopped.");
        }
        Command::Poll {
            action: PollAction::Status { project_id },
        } => {
            println!("no reconciliation loop is running in this process for project {project_id}.");
        }

        Command::State {
            action: StateAction::Show { issue_number },
        } => {
            let harness = build_harness(&config)?;
            match harness.orchestrator.pipeline_store.get(issue_number) {
                Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                None => println!("no pipeline state recorded for issue #{issue_number}"),
            }
        }
        Command::State {
            action: StateAction::List,
        } => {
            let harness = build_harness(&config)?;
            let states = harness.orchestrator.pipeline_store.all();
            println!("{}", serde_json::to_string_pretty(&states)?);
        }

        Command::Transitions { issue_id, limit } => {
            let harness = build_harness(&config)?;
            let transitions = harness.transitions.get_transitions(issue_id, limit);
            println!("{}", serde_json::to_string_pretty(&transitions)?);
        }

        Command::Config { project_id } => {
            let harness = build_harness(&config)?;
            match harness.config_store.load(&project_id)? {
                Some(cfg) => println!("{}", serde_json::to_string_pretty(&cfg)?),
                None => println!("no configuration stored for project {project_id}"),
            }
        }
    }

    Ok(())
}

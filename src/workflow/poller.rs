//! The reconciliation poller: one background task per active project,
//! rebuilding pipeline state from the remote platform and driving the
//! orchestrator primitives.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::agent_tracking::{self, AgentState, PipelineAction};
use crate::workflow::models::{PipelineState, TriggeredBy, WorkflowTransition};
use crate::workflow::orchestrator::Orchestrator;

/// Slugs that produce a markdown artifact worth mirroring into the issue as
/// a comment once their PR lands, and the filename the artifact is expected
/// under.
const AGENT_OUTPUT_FILES: &[(&str, &str)] = &[
    ("speckit.specify", "spec.md"),
    ("speckit.plan", "plan.md"),
    ("speckit.tasks", "tasks.md"),
];

#[derive(Debug, Clone, Default)]
pub struct PollingStatus {
    pub running: bool,
    pub ticks: u64,
    pub last_tick_unix: Option<u64>,
    pub last_error: Option<String>,
}

struct RunningProject {
    handle: JoinHandle<()>,
    cancel: Arc<Notify>,
    status: Arc<StdMutex<PollingStatus>>,
}

/// Bounded "already processed" membership cache, shared by every pass so a
/// restart doesn't replay work still sitting in a recently-seen window.
type SeenCache = StdMutex<LruCache<String, ()>>;

pub struct Poller {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    projects: StdMutex<HashMap<String, RunningProject>>,
    seen: Arc<SeenCache>,
}

impl Poller {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            projects: StdMutex::new(HashMap::new()),
            seen: Arc::new(StdMutex::new(LruCache::new(NonZeroUsize::new(4096).unwrap()))),
        }
    }

    pub fn start_polling(&self, project_id: String, project_node_id: String) {
        let mut projects = self.projects.lock().unwrap();
        if projects.contains_key(&project_id) {
            return;
        }
        let cancel = Arc::new(Notify::new());
        let status = Arc::new(StdMutex::new(PollingStatus {
            running: true,
            ..Default::default()
        }));
        let orchestrator = self.orchestrator.clone();
        let interval = self.interval;
        let seen = self.seen.clone();
        let task_cancel = cancel.clone();
        let task_status = status.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.notified() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let now = orchestrator.clock.now_unix();
                match run_tick(&orchestrator, &project_id, &project_node_id, &seen).await {
                    Ok(()) => {
                        let mut status = task_status.lock().unwrap();
                        status.ticks += 1;
                        status.last_tick_unix = Some(now);
                        status.last_error = None;
                    }
                    Err(err) => {
                        warn!(%err, project_id = %project_id, "reconciliation tick failed");
                        let mut status = task_status.lock().unwrap();
                        status.ticks += 1;
                        status.last_tick_unix = Some(now);
                        status.last_error = Some(err.to_string());
                    }
                }
            }
            task_status.lock().unwrap().running = false;
        });
        projects.insert(
            project_id,
            RunningProject {
                handle,
                cancel,
                status,
            },
        );
    }

    pub fn stop_polling(&self, project_id: &str) -> bool {
        let Some(project) = self.projects.lock().unwrap().remove(project_id) else {
            return false;
        };
        project.cancel.notify_one();
        project.handle.abort();
        true
    }

    pub fn get_polling_status(&self, project_id: &str) -> Option<PollingStatus> {
        self.projects
            .lock()
            .unwrap()
            .get(project_id)
            .map(|p| p.status.lock().unwrap().clone())
    }

    pub fn active_projects(&self) -> Vec<String> {
        self.projects.lock().unwrap().keys().cloned().collect()
    }
}

#[instrument(skip(orchestrator, seen))]
async fn run_tick(
    orchestrator: &Orchestrator,
    project_id: &str,
    project_node_id: &str,
    seen: &SeenCache,
) -> Result<(), crate::errors::WorkflowError> {
    let config = orchestrator.config(project_id)?;
    let items = orchestrator.platform.get_project_items(project_node_id).await?;

    agent_output_pass(orchestrator, &config, project_node_id, &items, seen).await;
    status_pass(orchestrator, project_id, project_node_id, &items, &config.status_backlog).await;
    status_pass(orchestrator, project_id, project_node_id, &items, &config.status_ready).await;
    in_progress_pass(orchestrator, project_id, project_node_id, &items, &config).await;
    in_review_pass(orchestrator, &config, &items).await;

    Ok(())
}

async fn agent_output_pass(
    orchestrator: &Orchestrator,
    config: &crate::workflow::models::WorkflowConfiguration,
    _project_node_id: &str,
    items: &[crate::platform::ProjectItemRef],
    seen: &SeenCache,
) {
    for item in items {
        let Some(state) = orchestrator.pipeline_store.get(item.issue_number) else {
            continue;
        };
        let Some(slug) = state.current_agent() else { continue };
        let Some((_, filename)) = AGENT_OUTPUT_FILES.iter().find(|(s, _)| s == slug) else {
            continue;
        };

        let cache_key = format!("{}:{}", item.issue_number, slug);
        if seen.lock().unwrap().contains(&cache_key) {
            continue;
        }

        let completion = match orchestrator
            .platform
            .check_copilot_pr_completion(&config.repo_owner, &config.repo_name, item.issue_number)
            .await
        {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(err) => {
                warn!(%err, issue_number = item.issue_number, "agent-output pass: completion check failed");
                continue;
            }
        };
        if !completion.copilot_finished {
            continue;
        }

        let Ok(files) = orchestrator
            .platform
            .get_pr_changed_files(&config.repo_owner, &config.repo_name, completion.number)
            .await
        else {
            continue;
        };
        let Ok(Some(pr)) = orchestrator
            .platform
            .get_pull_request(&config.repo_owner, &config.repo_name, completion.number)
            .await
        else {
            continue;
        };

        if orchestrator.branch_store.get(item.issue_number).is_none() {
            orchestrator.branch_store.set_if_absent(
                item.issue_number,
                crate::workflow::models::MainBranchInfo {
                    branch: pr.head_ref.clone(),
                    pr_number: pr.number,
                    head_sha: pr.last_commit_sha.clone(),
                },
            );
        }

        for file in files
            .iter()
            .filter(|f| f.path.ends_with(".md") && (f.path.ends_with(filename) || f.status != "removed"))
        {
            if let Ok(Some(content)) = orchestrator
                .platform
                .get_file_content_from_ref(&config.repo_owner, &config.repo_name, &pr.head_ref, &file.path)
                .await
            {
                let _ = orchestrator
                    .platform
                    .create_issue_comment(
                        &config.repo_owner,
                        &config.repo_name,
                        item.issue_number,
                        &format!("### `{}`\n\n{}", file.path, content),
                    )
                    .await;
            }
        }
        let _ = orchestrator
            .platform
            .create_issue_comment(
                &config.repo_owner,
                &config.repo_name,
                item.issue_number,
                &format!("{slug}: Done!"),
            )
            .await;
        seen.lock().unwrap().put(cache_key, ());
    }
}

/// Backlog and Ready passes are structurally identical: reconstruct or load
/// `PipelineState`, advance on a completion marker, or hand off to the next
/// status once every agent is done.
async fn status_pass(
    orchestrator: &Orchestrator,
    project_id: &str,
    project_node_id: &str,
    items: &[crate::platform::ProjectItemRef],
    status: &str,
) {
    let config = match orchestrator.config(project_id) {
        Ok(c) => c,
        Err(err) => {
            warn!(%err, "status pass: failed to load configuration");
            return;
        }
    };

    for item in items.iter().filter(|i| i.status.eq_ignore_ascii_case(status)) {
        let issue_number = item.issue_number;
        let state = match orchestrator.pipeline_store.get(issue_number) {
            Some(state) => state,
            None => {
                let agents = config.agents_for_status(status);
                let reconstructed = reconstruct_pipeline_state(orchestrator, &config, issue_number, status, agents).await;
                orchestrator.pipeline_store.set(reconstructed.clone());
                reconstructed
            }
        };

        if state.is_complete() {
            let Some(next_status) = config.first_actionable_status_from(status).filter(|s| s.as_str() != status) else {
                continue;
            };
            if let Err(err) = orchestrator
                .transition_to_status(project_id, project_node_id, &item.node_id, issue_number, status, &next_status)
                .await
            {
                warn!(%err, issue_number, "status pass: transition failed");
                continue;
            }
            if let Err(err) = orchestrator
                .assign_agent_for_status(project_id, project_node_id, issue_number, &next_status, 0)
                .await
            {
                warn!(%err, issue_number, "status pass: next-status assignment failed");
            }
            continue;
        }

        let Some(issue) = orchestrator
            .platform
            .get_issue_with_comments(&config.repo_owner, &config.repo_name, issue_number)
            .await
            .ok()
            .flatten()
        else {
            continue;
        };
        let comments: Vec<String> = issue.comments.iter().map(|c| c.body.clone()).collect();
        let action = agent_tracking::determine_next_action(&issue.body, &comments);

        match action {
            PipelineAction::AdvancePipeline { slug } => {
                let done_body = agent_tracking::mark_agent_done(&issue.body, &slug);
                let _ = orchestrator
                    .platform
                    .update_issue_body(&config.repo_owner, &config.repo_name, issue_number, &done_body)
                    .await;

                let _ = orchestrator
                    .merge_child_pr_if_applicable(&config, issue_number, &slug)
                    .await;

                let mut advanced = state.clone();
                advanced.advance();
                orchestrator.pipeline_store.set(advanced.clone());

                let _ = orchestrator.transitions.append(WorkflowTransition {
                    issue_id: issue_number,
                    project_id: project_id.to_string(),
                    from_status: Some(status.to_string()),
                    to_status: status.to_string(),
                    triggered_by: TriggeredBy::Detection,
                    success: true,
                    error: None,
                    assigned_user: None,
                    created_at: chrono::Utc::now().to_rfc3339(),
                });

                if !advanced.is_complete() {
                    if let Err(err) = orchestrator
                        .assign_agent_for_status(
                            project_id,
                            project_node_id,
                            issue_number,
                            status,
                            advanced.current_agent_index,
                        )
                        .await
                    {
                        warn!(%err, issue_number, "status pass: next-agent assignment failed");
                    }
                }
            }
            PipelineAction::AssignAgent { .. } | PipelineAction::Wait { .. } | PipelineAction::NoTracking => {}
            PipelineAction::TransitionStatus { .. } => {}
        }
    }
}

async fn reconstruct_pipeline_state(
    orchestrator: &Orchestrator,
    config: &crate::workflow::models::WorkflowConfiguration,
    issue_number: i64,
    status: &str,
    agents: Vec<String>,
) -> PipelineState {
    let mut state = PipelineState::new(issue_number, config.project_id.clone(), status.to_string(), agents);
    if let Ok(Some(issue)) = orchestrator
        .platform
        .get_issue_with_comments(&config.repo_owner, &config.repo_name, issue_number)
        .await
    {
        if let Some(steps) = agent_tracking::parse_tracking_from_body(&issue.body) {
            let done_count = steps
                .iter()
                .filter(|s| s.status.eq_ignore_ascii_case(status) && s.state == AgentState::Done)
                .count();
            for _ in 0..done_count {
                state.advance();
            }
        }
    }
    state
}

/// If the platform moved an issue into In Progress out of band while its
/// recorded `PipelineState` still belongs to an earlier status, move the
/// board item back to that status instead of treating the move as real
/// progress; only issues genuinely caught up to In Progress are handed to
/// `handle_in_progress_status`.
async fn in_progress_pass(
    orchestrator: &Orchestrator,
    project_id: &str,
    project_node_id: &str,
    items: &[crate::platform::ProjectItemRef],
    config: &crate::workflow::models::WorkflowConfiguration,
) {
    let order = config.status_order();
    let in_progress_rank = order.iter().position(|s| s.eq_ignore_ascii_case(&config.status_in_progress));

    for item in items.iter().filter(|i| i.status.eq_ignore_ascii_case(&config.status_in_progress)) {
        if let Some(state) = orchestrator.pipeline_store.get(item.issue_number) {
            let state_rank = order.iter().position(|s| s.eq_ignore_ascii_case(&state.status));
            if let (Some(state_rank), Some(in_progress_rank)) = (state_rank, in_progress_rank) {
                if state_rank < in_progress_rank {
                    warn!(
                        issue_number = item.issue_number,
                        pipeline_status = %state.status,
                        "in-progress pass: board moved issue ahead of its pipeline status, restoring"
                    );
                    if let Err(err) = orchestrator
                        .platform
                        .update_item_status_by_name(project_node_id, &item.node_id, &state.status)
                        .await
                    {
                        warn!(%err, issue_number = item.issue_number, "in-progress pass: failed to restore status");
                    }
                    continue;
                }
            }
        }

        if let Err(err) = orchestrator
            .handle_in_progress_status(project_id, project_node_id, &item.node_id, item.issue_number)
            .await
        {
            warn!(%err, issue_number = item.issue_number, "in-progress pass failed");
        }
    }
}

async fn in_review_pass(
    orchestrator: &Orchestrator,
    config: &crate::workflow::models::WorkflowConfiguration,
    items: &[crate::platform::ProjectItemRef],
) {
    for item in items.iter().filter(|i| i.status.eq_ignore_ascii_case(&config.status_in_review)) {
        let Ok(Some(pr)) = orchestrator
            .platform
            .find_existing_pr_for_issue(&config.repo_owner, &config.repo_name, item.issue_number)
            .await
        else {
            continue;
        };
        match orchestrator
            .platform
            .has_copilot_reviewed_pr(&config.repo_owner, &config.repo_name, pr.number)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                let _ = orchestrator
                    .platform
                    .request_copilot_review(&config.repo_owner, &config.repo_name, pr.number)
                    .await;
            }
            Err(err) => warn!(%err, issue_number = item.issue_number, "in-review pass: review check failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::platform::{MockPlatformClient, PlatformClient, PullRequestInfo, PullRequestState};
    use crate::workflow::config_store::ConfigStore;
    use crate::workflow::models::WorkflowConfiguration;
    use crate::workflow::stores::{BranchStore, PipelineStateStore, SubIssueStore};
    use crate::workflow::transitions::TransitionLog;
    use std::collections::HashMap;

    fn config() -> WorkflowConfiguration {
        let mut agent_mappings = HashMap::new();
        agent_mappings.insert("Backlog".to_string(), vec!["speckit.specify".to_string()]);
        agent_mappings.insert("Ready".to_string(), vec!["speckit.plan".to_string()]);
        WorkflowConfiguration {
            project_id: "proj-1".to_string(),
            repo_owner: "o".to_string(),
            repo_name: "r".to_string(),
            copilot_assignee: None,
            review_assignee: None,
            status_backlog: "Backlog".to_string(),
            status_ready: "Ready".to_string(),
            status_in_progress: "In Progress".to_string(),
            status_in_review: "In Review".to_string(),
            agent_mappings,
        }
    }

    fn orchestrator(platform: Arc<MockPlatformClient>) -> Orchestrator {
        let config_store = Arc::new(ConfigStore::open_in_memory().unwrap());
        config_store.save(&config()).unwrap();
        Orchestrator::new(
            platform,
            config_store,
            Arc::new(PipelineStateStore::new()),
            Arc::new(BranchStore::new()),
            Arc::new(SubIssueStore::new()),
            Arc::new(TransitionLog::open_in_memory().unwrap()),
            Arc::new(FixedClock::new(1_000)),
            60,
        )
    }

    #[tokio::test]
    async fn status_pass_advances_pipeline_on_done_comment() {
        let platform = Arc::new(MockPlatformClient::new());
        platform.seed_issue(1, "Add dark mode", "body text");
        let orchestrator = orchestrator(platform.clone());

        let active_body = agent_tracking::append_tracking_to_body(
            "body text",
            &config().agent_mappings_ordered(),
            &config().status_order(),
        );
        let active_body = agent_tracking::mark_agent_active(&active_body, "speckit.specify");
        platform.update_issue_body("o", "r", 1, &active_body).await.unwrap();
        platform.add_comment(1, "copilot", "speckit.specify: Done!");

        orchestrator
            .pipeline_store
            .set(PipelineState::new(1, "proj-1".to_string(), "Backlog".to_string(), vec!["speckit.specify".to_string()]));

        status_pass(&orchestrator, "proj-1", "project-node", &[
            crate::platform::ProjectItemRef {
                node_id: "item-1".to_string(),
                issue_number: 1,
                status: "Backlog".to_string(),
            },
        ], "Backlog").await;

        let state = orchestrator.pipeline_store.get(1).unwrap();
        assert!(state.is_complete());
        assert_eq!(state.completed_agents, vec!["speckit.specify".to_string()]);
    }

    #[tokio::test]
    async fn in_review_pass_requests_review_when_not_yet_reviewed() {
        let platform = Arc::new(MockPlatformClient::new());
        platform.seed_pr(PullRequestInfo {
            node_id: "pr-1".to_string(),
            number: 5,
            state: PullRequestState::Open,
            is_draft: false,
            head_ref: "copilot/issue-1".to_string(),
            base_ref: "main".to_string(),
            last_commit_sha: "sha".to_string(),
            author_login: "copilot-swe-agent".to_string(),
            reviewers: vec![],
        });
        let orchestrator = orchestrator(platform.clone());

        in_review_pass(&orchestrator, &config(), &[
            crate::platform::ProjectItemRef {
                node_id: "item-1".to_string(),
                issue_number: 1,
                status: "In Review".to_string(),
            },
        ])
        .await;
    }

    #[test]
    fn start_then_stop_polling_reports_not_running() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let platform = Arc::new(MockPlatformClient::new());
            let orchestrator = Arc::new(orchestrator(platform));
            let poller = Poller::new(orchestrator, Duration::from_millis(10));
            poller.start_polling("proj-1".to_string(), "project-node".to_string());
            assert!(poller.get_polling_status("proj-1").unwrap().running);
            assert!(poller.stop_polling("proj-1"));
            assert!(poller.get_polling_status("proj-1").is_none());
        });
    }
}

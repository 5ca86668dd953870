//! The Workflow Orchestrator: imperative primitives that encapsulate all
//! pipeline policy. The Reconciliation Poller and any external caller
//! (chat confirm, manual CLI) both go through these functions; nothing
//! downstream talks to the platform client directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tracing::{info, instrument, warn};

use crate::agent_tracking;
use crate::clock::Clock;
use crate::errors::WorkflowError;
use crate::platform::{MergeMethod, PlatformClient};
use crate::workflow::config_store::ConfigStore;
use crate::workflow::models::*;
use crate::workflow::stores::{BranchStore, PipelineStateStore, SubIssueStore};
use crate::workflow::transitions::TransitionLog;

/// Suppresses duplicate assignments within this many seconds of a pending
/// or successful assignment for the same `(issue, slug)`.
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_seconds: 3,
        }
    }
}

pub struct Orchestrator {
    pub platform: Arc<dyn PlatformClient>,
    pub config_store: Arc<ConfigStore>,
    pub pipeline_store: Arc<PipelineStateStore>,
    pub branch_store: Arc<BranchStore>,
    pub sub_issue_store: Arc<SubIssueStore>,
    pub transitions: Arc<TransitionLog>,
    pub clock: Arc<dyn Clock>,
    pub retry_policy: RetryPolicy,
    pub assignment_grace_period_seconds: u64,
    /// `(issue_number, slug)` -> unix time the assignment was last attempted.
    pending_assignments: StdMutex<HashMap<(i64, String), u64>>,
}

impl Orchestrator {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        config_store: Arc<ConfigStore>,
        pipeline_store: Arc<PipelineStateStore>,
        branch_store: Arc<BranchStore>,
        sub_issue_store: Arc<SubIssueStore>,
        transitions: Arc<TransitionLog>,
        clock: Arc<dyn Clock>,
        assignment_grace_period_seconds: u64,
    ) -> Self {
        Self {
            platform,
            config_store,
            pipeline_store,
            branch_store,
            sub_issue_store,
            transitions,
            clock,
            retry_policy: RetryPolicy::default(),
            assignment_grace_period_seconds,
            pending_assignments: StdMutex::new(HashMap::new()),
        }
    }

    pub(crate) fn config(&self, project_id: &str) -> Result<WorkflowConfiguration, WorkflowError> {
        self.config_store
            .load(project_id)
            .map_err(WorkflowError::Other)?
            .ok_or_else(|| WorkflowError::MissingConfiguration {
                project_id: project_id.to_string(),
            })
    }

    fn log_transition(
        &self,
        issue_id: i64,
        project_id: &str,
        from_status: Option<String>,
        to_status: String,
        triggered_by: TriggeredBy,
        success: bool,
        error: Option<String>,
        assigned_user: Option<String>,
    ) {
        let transition = WorkflowTransition {
            issue_id,
            project_id: project_id.to_string(),
            from_status,
            to_status,
            triggered_by,
            success,
            error,
            assigned_user,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(err) = self.transitions.append(transition) {
            warn!(%err, "failed to append workflow transition");
        }
    }

    /// §4.5.1 — deterministic issue body, with the agent tracking table
    /// appended below it in the `pending` state.
    pub fn format_issue_body(&self, recommendation: &IssueRecommendation, config: &WorkflowConfiguration) -> String {
        let mut body = String::new();
        body.push_str(&format!("## User Story\n{}\n\n", recommendation.user_story));
        if let Some(ui_ux) = &recommendation.ui_ux_description {
            body.push_str(&format!("## UI/UX\n{ui_ux}\n\n"));
        }
        body.push_str("## Functional Requirements\n");
        for (i, req) in recommendation.functional_requirements.iter().enumerate() {
            body.push_str(&format!("{}. {}\n", i + 1, req));
        }
        body.push('\n');
        if let Some(notes) = &recommendation.technical_notes {
            body.push_str(&format!("## Technical Notes\n{notes}\n\n"));
        }
        body.push_str("## Metadata\n");
        body.push_str(&format!("- Priority: {:?}\n", recommendation.metadata.priority));
        body.push_str(&format!("- Size: {:?}\n", recommendation.metadata.size));
        body.push_str(&format!(
            "- Estimate: {} hours\n",
            recommendation.metadata.estimate_hours
        ));

        agent_tracking::append_tracking_to_body(
            &body,
            &config.agent_mappings_ordered(),
            &config.status_order(),
        )
    }

    /// §4.5.2 + §4.5.3 + §4.5.4 + §4.5.5 — the end-to-end happy path from a
    /// confirmed recommendation to the first agent assigned.
    #[instrument(skip(self, recommendation))]
    pub async fn execute_full_workflow(
        &self,
        project_id: &str,
        project_node_id: &str,
        recommendation: &IssueRecommendation,
    ) -> WorkflowResult {
        match self.execute_full_workflow_inner(project_id, project_node_id, recommendation).await {
            Ok(result) => result,
            Err(err) => WorkflowResult {
                success: false,
                issue_id: None,
                issue_number: None,
                issue_url: None,
                project_item_id: None,
                current_status: None,
                message: err.to_string(),
            },
        }
    }

    async fn execute_full_workflow_inner(
        &self,
        project_id: &str,
        project_node_id: &str,
        recommendation: &IssueRecommendation,
    ) -> Result<WorkflowResult, WorkflowError> {
        recommendation
            .validate()
            .map_err(WorkflowError::Validation)?;
        let config = self.config(project_id)?;

        let body = self.format_issue_body(recommendation, &config);
        let created = self
            .platform
            .create_issue(&config.repo_owner, &config.repo_name, &recommendation.title, &body)
            .await?;

        let item_id = self
            .platform
            .add_issue_to_project(project_node_id, &created.node_id)
            .await?;
        self.platform
            .update_item_status_by_name(project_node_id, &item_id, &config.status_backlog)
            .await?;
        if let Err(err) = self
            .platform
            .set_issue_metadata(
                project_node_id,
                &item_id,
                &format!("{:?}", recommendation.metadata.priority),
                &format!("{:?}", recommendation.metadata.size),
                recommendation.metadata.estimate_hours,
                recommendation.metadata.start_date.as_deref(),
                recommendation.metadata.target_date.as_deref(),
            )
            .await
        {
            warn!(%err, issue_number = created.number, "failed to set project metadata, continuing");
        }

        let Some(status) = config.first_actionable_status_from(&config.status_backlog) else {
            return Ok(WorkflowResult {
                success: true,
                issue_id: Some(created.node_id),
                issue_number: Some(created.number),
                issue_url: Some(created.url),
                project_item_id: Some(item_id),
                current_status: Some(config.status_backlog.clone()),
                message: "issue created; no status in the pipeline has agents configured".to_string(),
            });
        };
        if status != config.status_backlog {
            self.platform
                .update_item_status_by_name(project_node_id, &item_id, &status)
                .await?;
        }

        self.create_all_sub_issues(&config, created.number, &created.node_id).await?;

        let agents = config.agents_for_status(&status);
        self.pipeline_store
            .set(PipelineState::new(created.number, project_id.to_string(), status.clone(), agents));

        self.assign_agent_for_status(project_id, project_node_id, created.number, &status, 0)
            .await?;

        self.log_transition(
            created.number,
            project_id,
            None,
            status.clone(),
            TriggeredBy::Automatic,
            true,
            None,
            None,
        );

        Ok(WorkflowResult {
            success: true,
            issue_id: Some(created.node_id),
            issue_number: Some(created.number),
            issue_url: Some(created.url),
            project_item_id: Some(item_id),
            current_status: Some(status),
            message: "workflow started".to_string(),
        })
    }

    /// §4.5.4 — one sub-issue per unique agent slug across the whole pipeline.
    pub async fn create_all_sub_issues(
        &self,
        config: &WorkflowConfiguration,
        parent_number: i64,
        parent_node_id: &str,
    ) -> Result<HashMap<String, SubIssueRef>, WorkflowError> {
        let mut created = HashMap::new();
        let mut seen = std::collections::HashSet::new();
        for (status, agents) in config.agent_mappings_ordered() {
            for slug in agents {
                if !seen.insert(slug.clone()) {
                    continue;
                }
                let title = format!("[{slug}] for #{parent_number}");
                let body = format!(
                    "Scoped to agent `{slug}` for status `{status}`.\n\nParent: #{parent_number}"
                );
                let sub_issue = self
                    .platform
                    .create_sub_issue(
                        &config.repo_owner,
                        &config.repo_name,
                        parent_number,
                        &title,
                        &body,
                        &[],
                    )
                    .await?;
                created.insert(
                    slug,
                    SubIssueRef {
                        number: sub_issue.number,
                        node_id: sub_issue.node_id,
                        url: sub_issue.url,
                    },
                );
            }
        }
        let _ = parent_node_id;
        self.sub_issue_store.merge(parent_number, created.clone());
        Ok(created)
    }

    /// §4.5.5 — central assignment policy: base-ref selection, sub-issue
    /// selection, idempotency guard, retrying assignment, and bookkeeping.
    #[instrument(skip(self))]
    pub async fn assign_agent_for_status(
        &self,
        project_id: &str,
        project_node_id: &str,
        issue_number: i64,
        status: &str,
        agent_index: usize,
    ) -> Result<bool, WorkflowError> {
        let config = self.config(project_id)?;
        let agents = config.agents_for_status(status);
        let Some(slug) = agents.get(agent_index).cloned() else {
            return Ok(true);
        };

        let base_ref = self.resolve_base_ref(&config, issue_number).await?;

        let sub_issue_number = self
            .pipeline_store
            .get(issue_number)
            .and_then(|state| state.agent_sub_issues.get(&slug).map(|s| s.number))
            .or_else(|| {
                self.sub_issue_store
                    .get(issue_number)
                    .get(&slug)
                    .map(|s| s.number)
            })
            .unwrap_or(issue_number);

        let now = self.clock.now_unix();
        {
            let mut pending = self.pending_assignments.lock().unwrap();
            let key = (issue_number, slug.clone());
            if let Some(&last) = pending.get(&key) {
                if now.saturating_sub(last) < self.assignment_grace_period_seconds {
                    info!(issue_number, %slug, "assignment already in flight, skipping");
                    return Ok(true);
                }
            }
            pending.insert(key, now);
        }

        let Some(issue) = self
            .platform
            .get_issue_with_comments(&config.repo_owner, &config.repo_name, sub_issue_number)
            .await?
        else {
            self.clear_pending(issue_number, &slug);
            return Err(WorkflowError::Validation(format!(
                "sub-issue {sub_issue_number} not found"
            )));
        };
        let instructions = render_agent_instructions(&issue, self.branch_store.get(issue_number).is_some());

        let mut last_err = None;
        let mut assigned = false;
        for attempt in 0..self.retry_policy.max_attempts {
            let delay = self.retry_policy.base_delay_seconds * 2u64.pow(attempt);
            tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
            match self
                .platform
                .assign_copilot_to_issue(
                    &config.repo_owner,
                    &config.repo_name,
                    &issue.node_id,
                    sub_issue_number,
                    &base_ref,
                    &slug,
                    &instructions,
                )
                .await
            {
                Ok(true) => {
                    assigned = true;
                    break;
                }
                Ok(false) => last_err = Some("assignment rejected".to_string()),
                Err(err) => last_err = Some(err.to_string()),
            }
        }

        if !assigned {
            self.clear_pending(issue_number, &slug);
            self.log_transition(
                issue_number,
                project_id,
                Some(status.to_string()),
                status.to_string(),
                TriggeredBy::Automatic,
                false,
                last_err,
                Some(format!("copilot:{slug}")),
            );
            return Ok(false);
        }

        if let Some(parent) = self
            .platform
            .get_issue_with_comments(&config.repo_owner, &config.repo_name, sub_issue_number)
            .await?
        {
            let new_body = agent_tracking::mark_agent_active(&parent.body, &slug);
            self.platform
                .update_issue_body(&config.repo_owner, &config.repo_name, sub_issue_number, &new_body)
                .await?;
        }
        self.platform
            .update_issue_state(
                &config.repo_owner,
                &config.repo_name,
                sub_issue_number,
                "open",
                &["in-progress".to_string()],
            )
            .await?;

        let mut state = self
            .pipeline_store
            .get(issue_number)
            .unwrap_or_else(|| PipelineState::new(issue_number, project_id.to_string(), status.to_string(), agents.clone()));
        state.current_agent_index = agent_index;
        self.pipeline_store.set(state);

        let _ = project_node_id;
        self.log_transition(
            issue_number,
            project_id,
            Some(status.to_string()),
            status.to_string(),
            TriggeredBy::Automatic,
            true,
            None,
            Some(format!("copilot:{slug}")),
        );
        Ok(true)
    }

    fn clear_pending(&self, issue_number: i64, slug: &str) {
        self.pending_assignments
            .lock()
            .unwrap()
            .remove(&(issue_number, slug.to_string()));
    }

    /// Branch-lineage selection for §4.5.5 step 2: `main` for the first
    /// agent, the recorded main branch name for every agent after that.
    async fn resolve_base_ref(
        &self,
        config: &WorkflowConfiguration,
        issue_number: i64,
    ) -> Result<String, WorkflowError> {
        if let Some(info) = self.branch_store.get(issue_number) {
            if let Some(pr) = self
                .platform
                .get_pull_request(&config.repo_owner, &config.repo_name, info.pr_number)
                .await?
            {
                self.branch_store.update_head_sha(issue_number, pr.last_commit_sha);
            }
            return Ok(info.branch);
        }

        if let Some(pr) = self
            .platform
            .find_existing_pr_for_issue(&config.repo_owner, &config.repo_name, issue_number)
            .await?
        {
            self.branch_store.set_if_absent(
                issue_number,
                MainBranchInfo {
                    branch: pr.head_ref.clone(),
                    pr_number: pr.number,
                    head_sha: pr.last_commit_sha.clone(),
                },
            );
            self.platform
                .link_pull_request_to_issue(&config.repo_owner, &config.repo_name, pr.number, issue_number)
                .await?;
        }
        Ok("main".to_string())
    }

    /// §4.5.6 — assign the first In Progress agent, then advance status.
    pub async fn handle_ready_status(
        &self,
        project_id: &str,
        project_node_id: &str,
        item_id: &str,
        issue_number: i64,
    ) -> Result<(), WorkflowError> {
        let config = self.config(project_id)?;
        let assigned = self
            .assign_agent_for_status(
                project_id,
                project_node_id,
                issue_number,
                &config.status_in_progress,
                0,
            )
            .await?;
        if !assigned {
            if let Some(assignee) = &config.copilot_assignee {
                if self
                    .platform
                    .validate_assignee(&config.repo_owner, &config.repo_name, assignee)
                    .await?
                {
                    self.platform
                        .assign_issue(&config.repo_owner, &config.repo_name, issue_number, assignee)
                        .await?;
                }
            }
        }
        self.platform
            .update_item_status_by_name(project_node_id, item_id, &config.status_in_progress)
            .await?;
        Ok(())
    }

    /// §4.5.7 — observe PR completion for an In-progress issue and, when
    /// finished, move the issue into In Review with a reviewer assigned.
    pub async fn handle_in_progress_status(
        &self,
        project_id: &str,
        project_node_id: &str,
        item_id: &str,
        issue_number: i64,
    ) -> Result<bool, WorkflowError> {
        let config = self.config(project_id)?;
        let Some(completion) = self
            .platform
            .check_copilot_pr_completion(&config.repo_owner, &config.repo_name, issue_number)
            .await?
        else {
            return Ok(false);
        };

        if completion.is_draft && completion.copilot_finished {
            self.platform.mark_pr_ready_for_review(&completion.node_id).await?;
        }

        if self.branch_store.get(issue_number).is_some() {
            if let Err(err) = self
                .merge_child_pr_if_applicable(&config, issue_number, "speckit.implement")
                .await
            {
                warn!(%err, issue_number, "child PR merge failed, will retry next tick");
            }
        }

        self.platform
            .update_item_status_by_name(project_node_id, item_id, &config.status_in_review)
            .await?;

        let reviewer = match &config.review_assignee {
            Some(r) => r.clone(),
            None => self
                .platform
                .get_repository_owner(&config.repo_owner, &config.repo_name)
                .await?,
        };
        self.platform
            .assign_issue(&config.repo_owner, &config.repo_name, issue_number, &reviewer)
            .await?;
        self.platform
            .request_copilot_review(&config.repo_owner, &config.repo_name, completion.number)
            .await?;

        self.log_transition(
            issue_number,
            project_id,
            Some(config.status_in_progress.clone()),
            config.status_in_review.clone(),
            TriggeredBy::Detection,
            true,
            None,
            Some(reviewer),
        );
        Ok(true)
    }

    /// §4.5.8
    pub fn detect_completion_signal(&self, state: &str, labels: &[String]) -> bool {
        state == "closed" || labels.iter().any(|l| l == "copilot-complete")
    }

    /// §4.5.9 — merge the child PR for `slug` into the issue's main branch,
    /// then advance `head_sha` to the merge commit.
    pub async fn merge_child_pr_if_applicable(
        &self,
        config: &WorkflowConfiguration,
        issue_number: i64,
        slug: &str,
    ) -> Result<Option<String>, WorkflowError> {
        let Some(main_branch) = self.branch_store.get(issue_number) else {
            return Ok(None);
        };
        let Some(pr) = self
            .platform
            .find_existing_pr_for_issue(&config.repo_owner, &config.repo_name, issue_number)
            .await?
        else {
            return Ok(None);
        };
        if pr.number == main_branch.pr_number
            || !pr.author_login.to_lowercase().contains("copilot")
            || pr.base_ref != main_branch.branch
        {
            return Ok(None);
        }

        if pr.is_draft {
            self.platform.mark_pr_ready_for_review(&pr.node_id).await?;
        }

        let merge = self
            .platform
            .merge_pull_request(
                &pr.node_id,
                MergeMethod::Squash,
                &format!("Merge {slug} changes into {}", main_branch.branch),
            )
            .await?;
        self.platform
            .delete_branch(&config.repo_owner, &config.repo_name, &pr.head_ref)
            .await?;
        self.branch_store
            .update_head_sha(issue_number, merge.merge_commit_sha.clone());
        Ok(Some(merge.merge_commit_sha))
    }

    /// Move the pipeline from `status` to the next one in the configured
    /// order, removing the old `PipelineState` and creating a fresh one.
    pub async fn transition_to_status(
        &self,
        project_id: &str,
        project_node_id: &str,
        item_id: &str,
        issue_number: i64,
        from_status: &str,
        to_status: &str,
    ) -> Result<(), WorkflowError> {
        let config = self.config(project_id)?;
        self.platform
            .update_item_status_by_name(project_node_id, item_id, to_status)
            .await?;
        self.pipeline_store.remove(issue_number);
        let agents = config.agents_for_status(to_status);
        self.pipeline_store
            .set(PipelineState::new(issue_number, project_id.to_string(), to_status.to_string(), agents));
        self.log_transition(
            issue_number,
            project_id,
            Some(from_status.to_string()),
            to_status.to_string(),
            TriggeredBy::Automatic,
            true,
            None,
            None,
        );
        Ok(())
    }
}

fn render_agent_instructions(issue: &crate::platform::IssueWithComments, has_main_branch: bool) -> String {
    let mut out = format!("# {}\n\n{}\n\n## Comments\n", issue.title, issue.body);
    for comment in &issue.comments {
        out.push_str(&format!("- **{}** ({}): {}\n", comment.author, comment.created_at, comment.body));
    }
    if has_main_branch {
        out.push_str("\nNote: a pull request already exists for this issue; open your PR against its branch, not the default branch.\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::platform::MockPlatformClient;
    use std::collections::HashMap;

    fn config() -> WorkflowConfiguration {
        let mut agent_mappings = HashMap::new();
        agent_mappings.insert("Backlog".to_string(), vec!["speckit.specify".to_string()]);
        agent_mappings.insert(
            "Ready".to_string(),
            vec!["speckit.plan".to_string(), "speckit.tasks".to_string()],
        );
        agent_mappings.insert("In Progress".to_string(), vec!["speckit.implement".to_string()]);
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

    fn orchestrator() -> (Orchestrator, Arc<MockPlatformClient>) {
        let platform = Arc::new(MockPlatformClient::new());
        let config_store = Arc::new(ConfigStore::open_in_memory().unwrap());
        config_store.save(&config()).unwrap();
        let orchestrator = Orchestrator::new(
            platform.clone(),
            config_store,
            Arc::new(PipelineStateStore::new()),
            Arc::new(BranchStore::new()),
            Arc::new(SubIssueStore::new()),
            Arc::new(TransitionLog::open_in_memory().unwrap()),
            Arc::new(FixedClock::new(1_000)),
            60,
        );
        (orchestrator, platform)
    }

    #[tokio::test(start_paused = true)]
    async fn execute_full_workflow_assigns_first_agent_in_first_actionable_status() {
        let (orchestrator, platform) = orchestrator();
        let recommendation = IssueRecommendation {
            title: "Add dark mode".to_string(),
            user_story: "As a user...".to_string(),
            ui_ux_description: None,
            functional_requirements: vec!["toggle".to_string()],
            technical_notes: None,
            metadata: RecommendationMetadata {
                priority: Priority::P1,
                size: Size::M,
                estimate_hours: 3.0,
                start_date: None,
                target_date: None,
                labels: vec![],
            },
        };

        let result = orchestrator
            .execute_full_workflow("proj-1", "project-node", &recommendation)
            .await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.current_status.as_deref(), Some("Backlog"));

        let calls = platform.copilot_assignments();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, "speckit.specify");

        let state = orchestrator.pipeline_store.get(result.issue_number.unwrap()).unwrap();
        assert_eq!(state.status, "Backlog");
        assert_eq!(state.agents, vec!["speckit.specify".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_assignment_within_grace_period_only_assigns_once() {
        let (orchestrator, platform) = orchestrator();
        orchestrator
            .assign_agent_for_status("proj-1", "project-node", 42, "Ready", 0)
            .await
            .unwrap();
        orchestrator
            .assign_agent_for_status("proj-1", "project-node", 42, "Ready", 0)
            .await
            .unwrap();
        assert_eq!(platform.copilot_assignments().len(), 1);
    }

    #[tokio::test]
    async fn assign_agent_for_status_out_of_range_index_is_a_noop_success() {
        let (orchestrator, platform) = orchestrator();
        let ok = orchestrator
            .assign_agent_for_status("proj-1", "project-node", 1, "Ready", 99)
            .await
            .unwrap();
        assert!(ok);
        assert!(platform.copilot_assignments().is_empty());
    }

    #[tokio::test]
    async fn merge_child_pr_skips_when_no_main_branch_recorded() {
        let (orchestrator, _platform) = orchestrator();
        let result = orchestrator
            .merge_child_pr_if_applicable(&config(), 1, "speckit.implement")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn merge_child_pr_merges_and_updates_head_sha() {
        let (orchestrator, platform) = orchestrator();
        orchestrator.branch_store.set_if_absent(
            1,
            MainBranchInfo {
                branch: "copilot/main-1".to_string(),
                pr_number: 10,
                head_sha: "sha-main".to_string(),
            },
        );
        platform.seed_pr(crate::platform::PullRequestInfo {
            node_id: "pr-child".to_string(),
            number: 11,
            state: crate::platform::PullRequestState::Open,
            is_draft: false,
            head_ref: "copilot/child-1".to_string(),
            base_ref: "copilot/main-1".to_string(),
            last_commit_sha: "sha-child".to_string(),
            author_login: "copilot-swe-agent".to_string(),
            reviewers: vec![],
        });

        let merged = orchestrator
            .merge_child_pr_if_applicable(&config(), 1, "speckit.implement")
            .await
            .unwrap();
        assert!(merged.is_some());
        assert_eq!(platform.merged_prs(), vec!["pr-child".to_string()]);
        assert_eq!(platform.deleted_branches(), vec!["copilot/child-1".to_string()]);
        assert_eq!(orchestrator.branch_store.get(1).unwrap().head_sha, merged.unwrap());
    }
}

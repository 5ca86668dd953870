//! In-memory fake of `PlatformClient` for orchestrator/poller unit tests,
//! following the same trait-plus-test-double seam as `TaskRunner`/
//! `MockTaskRunner`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::PlatformError;
use crate::platform::client::PlatformClient;
use crate::platform::types::*;

#[derive(Default)]
struct State {
    next_issue_number: i64,
    issues: HashMap<i64, IssueWithComments>,
    prs: HashMap<i64, PullRequestInfo>,
    timeline: HashMap<i64, Vec<TimelineSignal>>,
    changed_files: HashMap<i64, Vec<ChangedFile>>,
    file_contents: HashMap<(String, String), String>,
    project_items: HashMap<String, String>,
    item_issue_numbers: HashMap<String, i64>,
    metadata_calls: Vec<(String, String)>,
    assigned_logins: HashMap<i64, String>,
    copilot_assignments: Vec<(i64, String, String)>,
    merged_prs: Vec<String>,
    deleted_branches: Vec<String>,
}

/// A fully in-memory platform, for deterministic tests. Every mutation is
/// recorded so assertions can inspect what the orchestrator/poller did.
pub struct MockPlatformClient {
    state: Mutex<State>,
}

impl MockPlatformClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_issue_number: 1,
                ..Default::default()
            }),
        }
    }

    pub fn seed_issue(&self, number: i64, title: &str, body: &str) {
        let mut state = self.state.lock().unwrap();
        state.issues.insert(
            number,
            IssueWithComments {
                node_id: format!("issue-node-{number}"),
                number,
                title: title.to_string(),
                body: body.to_string(),
                comments: Vec::new(),
            },
        );
        if number >= state.next_issue_number {
            state.next_issue_number = number + 1;
        }
    }

    pub fn add_comment(&self, number: i64, author: &str, body: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(issue) = state.issues.get_mut(&number) {
            issue.comments.push(Comment {
                author: author.to_string(),
                body: body.to_string(),
                created_at: "1970-01-01T00:00:00Z".to_string(),
            });
        }
    }

    pub fn seed_pr(&self, pr: PullRequestInfo) {
        self.state.lock().unwrap().prs.insert(pr.number, pr);
    }

    pub fn set_timeline(&self, pr_number: i64, signals: Vec<TimelineSignal>) {
        self.state.lock().unwrap().timeline.insert(pr_number, signals);
    }

    pub fn copilot_assignments(&self) -> Vec<(i64, String, String)> {
        self.state.lock().unwrap().copilot_assignments.clone()
    }

    pub fn merged_prs(&self) -> Vec<String> {
        self.state.lock().unwrap().merged_prs.clone()
    }

    pub fn deleted_branches(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_branches.clone()
    }

    pub fn get_issue_body(&self, number: i64) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .issues
            .get(&number)
            .map(|i| i.body.clone())
    }
}

impl Default for MockPlatformClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformClient for MockPlatformClient {
    async fn create_issue(
        &self,
        _owner: &str,
        _repo: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue, PlatformError> {
        let mut state = self.state.lock().unwrap();
        let number = state.next_issue_number;
        state.next_issue_number += 1;
        state.issues.insert(
            number,
            IssueWithComments {
                node_id: format!("issue-node-{number}"),
                number,
                title: title.to_string(),
                body: body.to_string(),
                comments: Vec::new(),
            },
        );
        Ok(CreatedIssue {
            node_id: format!("issue-node-{number}"),
            number,
            url: format!("https://example.invalid/issues/{number}"),
        })
    }

    async fn get_issue_with_comments(
        &self,
        _owner: &str,
        _repo: &str,
        number: i64,
    ) -> Result<Option<IssueWithComments>, PlatformError> {
        Ok(self.state.lock().unwrap().issues.get(&number).cloned())
    }

    async fn update_issue_body(
        &self,
        _owner: &str,
        _repo: &str,
        number: i64,
        body: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        if let Some(issue) = state.issues.get_mut(&number) {
            issue.body = body.to_string();
        }
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        _owner: &str,
        _repo: &str,
        number: i64,
        body: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        if let Some(issue) = state.issues.get_mut(&number) {
            issue.comments.push(Comment {
                author: "forge-bot".to_string(),
                body: body.to_string(),
                created_at: "1970-01-01T00:00:00Z".to_string(),
            });
        }
        Ok(())
    }

    async fn create_sub_issue(
        &self,
        owner: &str,
        repo: &str,
        _parent_number: i64,
        title: &str,
        body: &str,
        _labels: &[String],
    ) -> Result<CreatedIssue, PlatformError> {
        self.create_issue(owner, repo, title, body).await
    }

    async fn update_issue_state(
        &self,
        _owner: &str,
        _repo: &str,
        _number: i64,
        _state: &str,
        _add_labels: &[String],
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn add_issue_to_project(
        &self,
        _project_id: &str,
        issue_node_id: &str,
    ) -> Result<String, PlatformError> {
        let item_id = format!("item-{issue_node_id}");
        let issue_number = issue_node_id
            .strip_prefix("issue-node-")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let mut state = self.state.lock().unwrap();
        state.project_items.insert(item_id.clone(), "Backlog".to_string());
        state.item_issue_numbers.insert(item_id.clone(), issue_number);
        Ok(item_id)
    }

    async fn update_item_status_by_name(
        &self,
        _project_id: &str,
        item_id: &str,
        status_name: &str,
    ) -> Result<(), PlatformError> {
        self.state
            .lock()
            .unwrap()
            .project_items
            .insert(item_id.to_string(), status_name.to_string());
        Ok(())
    }

    async fn set_issue_metadata(
        &self,
        _project_id: &str,
        item_id: &str,
        priority: &str,
        _size: &str,
        _estimate_hours: f32,
        _start_date: Option<&str>,
        _target_date: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.state
            .lock()
            .unwrap()
            .metadata_calls
            .push((item_id.to_string(), priority.to_string()));
        Ok(())
    }

    async fn get_project_items(&self, _project_id: &str) -> Result<Vec<ProjectItemRef>, PlatformError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .project_items
            .iter()
            .map(|(item_id, status)| ProjectItemRef {
                node_id: item_id.clone(),
                issue_number: *state.item_issue_numbers.get(item_id).unwrap_or(&0),
                status: status.clone(),
            })
            .collect())
    }

    async fn get_project_repository(&self, _project_id: &str) -> Result<(String, String), PlatformError> {
        Ok(("o".to_string(), "r".to_string()))
    }

    async fn find_existing_pr_for_issue(
        &self,
        _owner: &str,
        _repo: &str,
        _issue_number: i64,
    ) -> Result<Option<PullRequestInfo>, PlatformError> {
        Ok(self.state.lock().unwrap().prs.values().next().cloned())
    }

    async fn get_pull_request(
        &self,
        _owner: &str,
        _repo: &str,
        number: i64,
    ) -> Result<Option<PullRequestInfo>, PlatformError> {
        Ok(self.state.lock().unwrap().prs.get(&number).cloned())
    }

    async fn get_pr_changed_files(
        &self,
        _owner: &str,
        _repo: &str,
        number: i64,
    ) -> Result<Vec<ChangedFile>, PlatformError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .changed_files
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_file_content_from_ref(
        &self,
        _owner: &str,
        _repo: &str,
        git_ref: &str,
        path: &str,
    ) -> Result<Option<String>, PlatformError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .file_contents
            .get(&(git_ref.to_string(), path.to_string()))
            .cloned())
    }

    async fn get_pr_timeline_signals(
        &self,
        _owner: &str,
        _repo: &str,
        number: i64,
    ) -> Result<Vec<TimelineSignal>, PlatformError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .timeline
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_pr_ready_for_review(&self, pr_node_id: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        if let Some(pr) = state.prs.values_mut().find(|p| p.node_id == pr_node_id) {
            pr.is_draft = false;
        }
        Ok(())
    }

    async fn merge_pull_request(
        &self,
        pr_node_id: &str,
        _method: MergeMethod,
        _headline: &str,
    ) -> Result<MergeResult, PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.merged_prs.push(pr_node_id.to_string());
        if let Some(pr) = state.prs.values_mut().find(|p| p.node_id == pr_node_id) {
            pr.state = PullRequestState::Merged;
        }
        Ok(MergeResult {
            merge_commit_sha: format!("merged-{pr_node_id}"),
        })
    }

    async fn delete_branch(
        &self,
        _owner: &str,
        _repo: &str,
        branch: &str,
    ) -> Result<(), PlatformError> {
        self.state.lock().unwrap().deleted_branches.push(branch.to_string());
        Ok(())
    }

    async fn link_pull_request_to_issue(
        &self,
        _owner: &str,
        _repo: &str,
        _pr_number: i64,
        _issue_number: i64,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn check_copilot_pr_completion(
        &self,
        _owner: &str,
        _repo: &str,
        _issue_number: i64,
    ) -> Result<Option<CopilotPrCompletion>, PlatformError> {
        let state = self.state.lock().unwrap();
        let Some(pr) = state.prs.values().find(|p| p.author_login.to_lowercase().contains("copilot")) else {
            return Ok(None);
        };
        let finished = state
            .timeline
            .get(&pr.number)
            .map(|signals| signals.contains(&TimelineSignal::CopilotWorkFinished))
            .unwrap_or(false);
        if pr.is_draft && !finished {
            return Ok(None);
        }
        Ok(Some(CopilotPrCompletion {
            node_id: pr.node_id.clone(),
            number: pr.number,
            is_draft: pr.is_draft,
            last_commit_sha: pr.last_commit_sha.clone(),
            copilot_finished: finished,
        }))
    }

    async fn assign_copilot_to_issue(
        &self,
        _owner: &str,
        _repo: &str,
        _issue_node_id: &str,
        issue_number: i64,
        base_ref: &str,
        custom_agent: &str,
        _custom_instructions: &str,
    ) -> Result<bool, PlatformError> {
        self.state.lock().unwrap().copilot_assignments.push((
            issue_number,
            base_ref.to_string(),
            custom_agent.to_string(),
        ));
        Ok(true)
    }

    async fn request_copilot_review(
        &self,
        _owner: &str,
        _repo: &str,
        _pr_number: i64,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn has_copilot_reviewed_pr(
        &self,
        _owner: &str,
        _repo: &str,
        _pr_number: i64,
    ) -> Result<bool, PlatformError> {
        Ok(false)
    }

    async fn validate_assignee(
        &self,
        _owner: &str,
        _repo: &str,
        _login: &str,
    ) -> Result<bool, PlatformError> {
        Ok(true)
    }

    async fn assign_issue(
        &self,
        _owner: &str,
        _repo: &str,
        number: i64,
        login: &str,
    ) -> Result<(), PlatformError> {
        self.state
            .lock()
            .unwrap()
            .assigned_logins
            .insert(number, login.to_string());
        Ok(())
    }

    async fn get_repository_owner(&self, owner: &str, _repo: &str) -> Result<String, PlatformError> {
        Ok(owner.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_issue_round_trips() {
        let client = MockPlatformClient::new();
        let created = client.create_issue("o", "r", "Title", "Body").await.unwrap();
        assert_eq!(created.number, 1);
        let fetched = client
            .get_issue_with_comments("o", "r", created.number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.title, "Title");
    }

    #[tokio::test]
    async fn assign_copilot_records_the_call() {
        let client = MockPlatformClient::new();
        client
            .assign_copilot_to_issue("o", "r", "node", 1, "main", "speckit.specify", "do it")
            .await
            .unwrap();
        let calls = client.copilot_assignments();
        assert_eq!(calls, vec![(1, "main".to_string(), "speckit.specify".to_string())]);
    }
}

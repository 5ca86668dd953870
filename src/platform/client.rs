//! The forge platform client: a typed wrapper over REST + GraphQL.
//!
//! Stateless beyond the shared HTTP connection pool and bearer token; all
//! policy (retries, idempotency, branch lineage) lives in `workflow`. Retries
//! for transport errors happen here; 4xx other than 404 propagate as
//! `PlatformError`, 404 comes back as a typed `None`/`NotFound`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{instrument, warn};

use crate::errors::PlatformError;
use crate::platform::types::*;

const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";
const USER_AGENT: &str = "forge-pipeline";

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue, PlatformError>;

    async fn get_issue_with_comments(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Option<IssueWithComments>, PlatformError>;

    async fn update_issue_body(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        body: &str,
    ) -> Result<(), PlatformError>;

    async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        body: &str,
    ) -> Result<(), PlatformError>;

    async fn create_sub_issue(
        &self,
        owner: &str,
        repo: &str,
        parent_number: i64,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<CreatedIssue, PlatformError>;

    async fn update_issue_state(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        state: &str,
        add_labels: &[String],
    ) -> Result<(), PlatformError>;

    async fn add_issue_to_project(
        &self,
        project_id: &str,
        issue_node_id: &str,
    ) -> Result<String, PlatformError>;

    async fn update_item_status_by_name(
        &self,
        project_id: &str,
        item_id: &str,
        status_name: &str,
    ) -> Result<(), PlatformError>;

    /// Best-effort: callers should log and continue on failure rather than
    /// fail the whole operation.
    async fn set_issue_metadata(
        &self,
        project_id: &str,
        item_id: &str,
        priority: &str,
        size: &str,
        estimate_hours: f32,
        start_date: Option<&str>,
        target_date: Option<&str>,
    ) -> Result<(), PlatformError>;

    /// One call per tick: every item currently on the board, for the poller
    /// to fan out over.
    async fn get_project_items(&self, project_id: &str) -> Result<Vec<ProjectItemRef>, PlatformError>;

    async fn get_project_repository(&self, project_id: &str) -> Result<(String, String), PlatformError>;

    async fn find_existing_pr_for_issue(
        &self,
        owner: &str,
        repo: &str,
        issue_number: i64,
    ) -> Result<Option<PullRequestInfo>, PlatformError>;

    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Option<PullRequestInfo>, PlatformError>;

    async fn get_pr_changed_files(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<ChangedFile>, PlatformError>;

    async fn get_file_content_from_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        path: &str,
    ) -> Result<Option<String>, PlatformError>;

    async fn get_pr_timeline_signals(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<TimelineSignal>, PlatformError>;

    async fn mark_pr_ready_for_review(&self, pr_node_id: &str) -> Result<(), PlatformError>;

    async fn merge_pull_request(
        &self,
        pr_node_id: &str,
        method: MergeMethod,
        headline: &str,
    ) -> Result<MergeResult, PlatformError>;

    async fn delete_branch(&self, owner: &str, repo: &str, branch: &str)
    -> Result<(), PlatformError>;

    async fn link_pull_request_to_issue(
        &self,
        owner: &str,
        repo: &str,
        pr_number: i64,
        issue_number: i64,
    ) -> Result<(), PlatformError>;

    async fn check_copilot_pr_completion(
        &self,
        owner: &str,
        repo: &str,
        issue_number: i64,
    ) -> Result<Option<CopilotPrCompletion>, PlatformError>;

    async fn assign_copilot_to_issue(
        &self,
        owner: &str,
        repo: &str,
        issue_node_id: &str,
        issue_number: i64,
        base_ref: &str,
        custom_agent: &str,
        custom_instructions: &str,
    ) -> Result<bool, PlatformError>;

    async fn request_copilot_review(
        &self,
        owner: &str,
        repo: &str,
        pr_number: i64,
    ) -> Result<(), PlatformError>;

    async fn has_copilot_reviewed_pr(
        &self,
        owner: &str,
        repo: &str,
        pr_number: i64,
    ) -> Result<bool, PlatformError>;

    async fn validate_assignee(
        &self,
        owner: &str,
        repo: &str,
        login: &str,
    ) -> Result<bool, PlatformError>;

    async fn assign_issue(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        login: &str,
    ) -> Result<(), PlatformError>;

    async fn get_repository_owner(&self, owner: &str, repo: &str) -> Result<String, PlatformError>;
}

/// Real implementation backed by `reqwest`, talking to the REST API for
/// issue/comment/PR/branch operations and to the GraphQL API for the
/// project-board and agent-assignment surface that REST doesn't cover.
pub struct GitHubPlatformClient {
    http: Client,
    token: String,
}

impl GitHubPlatformClient {
    pub fn new(token: String) -> Self {
        Self {
            http: Client::new(),
            token,
        }
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{GITHUB_API_BASE}{path}")
    }

    async fn rest_get(&self, path: &str) -> Result<Option<Value>, PlatformError> {
        let resp = self
            .http
            .get(self.rest_url(path))
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|source| PlatformError::Transport {
                endpoint: path.to_string(),
                source,
            })?;
        self.handle_response(path, resp).await
    }

    async fn rest_post(&self, path: &str, body: Value) -> Result<Option<Value>, PlatformError> {
        let resp = self
            .http
            .post(self.rest_url(path))
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .json(&body)
            .send()
            .await
            .map_err(|source| PlatformError::Transport {
                endpoint: path.to_string(),
                source,
            })?;
        self.handle_response(path, resp).await
    }

    async fn rest_patch(&self, path: &str, body: Value) -> Result<Option<Value>, PlatformError> {
        let resp = self
            .http
            .patch(self.rest_url(path))
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .json(&body)
            .send()
            .await
            .map_err(|source| PlatformError::Transport {
                endpoint: path.to_string(),
                source,
            })?;
        self.handle_response(path, resp).await
    }

    async fn rest_delete(&self, path: &str) -> Result<(), PlatformError> {
        let resp = self
            .http
            .delete(self.rest_url(path))
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|source| PlatformError::Transport {
                endpoint: path.to_string(),
                source,
            })?;
        self.handle_response(path, resp).await?;
        Ok(())
    }

    async fn handle_response(
        &self,
        endpoint: &str,
        resp: reqwest::Response,
    ) -> Result<Option<Value>, PlatformError> {
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(PlatformError::Unauthorized {
                    endpoint: endpoint.to_string(),
                })
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);
                Err(PlatformError::RateLimited {
                    endpoint: endpoint.to_string(),
                    retry_after_secs,
                })
            }
            status if status.is_success() => {
                if status == StatusCode::NO_CONTENT {
                    return Ok(Some(Value::Null));
                }
                let body: Value =
                    resp.json()
                        .await
                        .map_err(|source| PlatformError::Transport {
                            endpoint: endpoint.to_string(),
                            source,
                        })?;
                Ok(Some(body))
            }
            status => Err(PlatformError::UnexpectedShape {
                endpoint: endpoint.to_string(),
                message: format!("unexpected status {status}"),
            }),
        }
    }

    #[instrument(skip(self, query, variables))]
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, PlatformError> {
        let resp = self
            .http
            .post(GITHUB_GRAPHQL_URL)
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|source| PlatformError::Transport {
                endpoint: "graphql".to_string(),
                source,
            })?;
        let body: Value = resp
            .json()
            .await
            .map_err(|source| PlatformError::Transport {
                endpoint: "graphql".to_string(),
                source,
            })?;
        if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                return Err(PlatformError::GraphQl {
                    endpoint: "graphql".to_string(),
                    message: errors.to_string(),
                });
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl PlatformClient for GitHubPlatformClient {
    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue, PlatformError> {
        let resp = self
            .rest_post(
                &format!("/repos/{owner}/{repo}/issues"),
                json!({ "title": title, "body": body }),
            )
            .await?
            .ok_or_else(|| PlatformError::UnexpectedShape {
                endpoint: "create_issue".into(),
                message: "empty response".into(),
            })?;
        Ok(CreatedIssue {
            node_id: field_str(&resp, "node_id")?,
            number: field_i64(&resp, "number")?,
            url: field_str(&resp, "html_url")?,
        })
    }

    async fn get_issue_with_comments(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Option<IssueWithComments>, PlatformError> {
        let Some(issue) = self
            .rest_get(&format!("/repos/{owner}/{repo}/issues/{number}"))
            .await?
        else {
            return Ok(None);
        };
        let comments_json = self
            .rest_get(&format!("/repos/{owner}/{repo}/issues/{number}/comments"))
            .await?
            .unwrap_or_else(|| json!([]));
        let comments = comments_json
            .as_array()
            .into_iter()
            .flatten()
            .map(|c| Comment {
                author: c
                    .get("user")
                    .and_then(|u| u.get("login"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                body: c.get("body").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                created_at: c
                    .get("created_at")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect();
        Ok(Some(IssueWithComments {
            node_id: field_str(&issue, "node_id")?,
            number,
            title: field_str(&issue, "title")?,
            body: issue
                .get("body")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            comments,
        }))
    }

    async fn update_issue_body(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        body: &str,
    ) -> Result<(), PlatformError> {
        self.rest_patch(
            &format!("/repos/{owner}/{repo}/issues/{number}"),
            json!({ "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        body: &str,
    ) -> Result<(), PlatformError> {
        self.rest_post(
            &format!("/repos/{owner}/{repo}/issues/{number}/comments"),
            json!({ "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn create_sub_issue(
        &self,
        owner: &str,
        repo: &str,
        parent_number: i64,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<CreatedIssue, PlatformError> {
        let resp = self
            .rest_post(
                &format!("/repos/{owner}/{repo}/issues"),
                json!({ "title": title, "body": body, "labels": labels }),
            )
            .await?
            .ok_or_else(|| PlatformError::UnexpectedShape {
                endpoint: "create_sub_issue".into(),
                message: "empty response".into(),
            })?;
        let created = CreatedIssue {
            node_id: field_str(&resp, "node_id")?,
            number: field_i64(&resp, "number")?,
            url: field_str(&resp, "html_url")?,
        };
        if let Err(err) = self
            .link_pull_request_to_issue(owner, repo, created.number, parent_number)
            .await
        {
            warn!(%err, "failed to link sub-issue to parent, continuing");
        }
        Ok(created)
    }

    async fn update_issue_state(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        state: &str,
        add_labels: &[String],
    ) -> Result<(), PlatformError> {
        self.rest_patch(
            &format!("/repos/{owner}/{repo}/issues/{number}"),
            json!({ "state": state }),
        )
        .await?;
        if !add_labels.is_empty() {
            self.rest_post(
                &format!("/repos/{owner}/{repo}/issues/{number}/labels"),
                json!({ "labels": add_labels }),
            )
            .await?;
        }
        Ok(())
    }

    async fn add_issue_to_project(
        &self,
        project_id: &str,
        issue_node_id: &str,
    ) -> Result<String, PlatformError> {
        let query = r#"
            mutation($projectId: ID!, $contentId: ID!) {
              addProjectV2ItemById(input: {projectId: $projectId, contentId: $contentId}) {
                item { id }
              }
            }
        "#;
        let resp = self
            .graphql(
                query,
                json!({ "projectId": project_id, "contentId": issue_node_id }),
            )
            .await?;
        resp.pointer("/data/addProjectV2ItemById/item/id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| PlatformError::UnexpectedShape {
                endpoint: "add_issue_to_project".into(),
                message: "missing item id".into(),
            })
    }

    async fn update_item_status_by_name(
        &self,
        project_id: &str,
        item_id: &str,
        status_name: &str,
    ) -> Result<(), PlatformError> {
        let query = r#"
            mutation($projectId: ID!, $itemId: ID!, $value: String!) {
              updateProjectV2ItemFieldValue(input: {
                projectId: $projectId, itemId: $itemId,
                fieldId: "Status", value: { singleSelectOptionId: $value }
              }) { clientMutationId }
            }
        "#;
        self.graphql(
            query,
            json!({ "projectId": project_id, "itemId": item_id, "value": status_name }),
        )
        .await?;
        Ok(())
    }

    async fn set_issue_metadata(
        &self,
        project_id: &str,
        item_id: &str,
        priority: &str,
        size: &str,
        estimate_hours: f32,
        start_date: Option<&str>,
        target_date: Option<&str>,
    ) -> Result<(), PlatformError> {
        let query = r#"
            mutation($projectId: ID!, $itemId: ID!, $field: String!, $value: String!) {
              updateProjectV2ItemFieldValue(input: {
                projectId: $projectId, itemId: $itemId, fieldId: $field, value: { text: $value }
              }) { clientMutationId }
            }
        "#;
        for (field, value) in [
            ("Priority", Some(priority.to_string())),
            ("Size", Some(size.to_string())),
            ("Estimate", Some(estimate_hours.to_string())),
            ("Start Date", start_date.map(|s| s.to_string())),
            ("Target Date", target_date.map(|s| s.to_string())),
        ] {
            let Some(value) = value else { continue };
            self.graphql(
                query,
                json!({ "projectId": project_id, "itemId": item_id, "field": field, "value": value }),
            )
            .await?;
        }
        Ok(())
    }

    async fn get_project_items(&self, project_id: &str) -> Result<Vec<ProjectItemRef>, PlatformError> {
        let query = r#"
            query($projectId: ID!) {
              node(id: $projectId) {
                ... on ProjectV2 {
                  items(first: 100) {
                    nodes {
                      id
                      content { ... on Issue { number } }
                      fieldValueByName(name: "Status") {
                        ... on ProjectV2ItemFieldSingleSelectValue { name }
                      }
                    }
                  }
                }
              }
            }
        "#;
        let resp = self.graphql(query, json!({ "projectId": project_id })).await?;
        let nodes = resp
            .pointer("/data/node/items/nodes")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(nodes
            .iter()
            .filter_map(|node| {
                let node_id = node.get("id")?.as_str()?.to_string();
                let issue_number = node.pointer("/content/number")?.as_i64()?;
                let status = node
                    .pointer("/fieldValueByName/name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Backlog")
                    .to_string();
                Some(ProjectItemRef {
                    node_id,
                    issue_number,
                    status,
                })
            })
            .collect())
    }

    async fn get_project_repository(&self, project_id: &str) -> Result<(String, String), PlatformError> {
        let query = r#"
            query($projectId: ID!) {
              node(id: $projectId) {
                ... on ProjectV2 {
                  repositories(first: 1) { nodes { owner { login } name } }
                }
              }
            }
        "#;
        let resp = self.graphql(query, json!({ "projectId": project_id })).await?;
        let node = resp
            .pointer("/data/node/repositories/nodes/0")
            .ok_or_else(|| PlatformError::UnexpectedShape {
                endpoint: "get_project_repository".into(),
                message: "no linked repository".into(),
            })?;
        let owner = node
            .pointer("/owner/login")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let name = node.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        Ok((owner, name))
    }

    async fn find_existing_pr_for_issue(
        &self,
        owner: &str,
        repo: &str,
        issue_number: i64,
    ) -> Result<Option<PullRequestInfo>, PlatformError> {
        let query = format!("repo:{owner}/{repo} is:pr linked:{issue_number}");
        let resp = self
            .rest_get(&format!(
                "/search/issues?q={}",
                urlencoding_minimal(&query)
            ))
            .await?
            .unwrap_or_else(|| json!({ "items": [] }));
        let Some(first) = resp
            .get("items")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
        else {
            return Ok(None);
        };
        let number = field_i64(first, "number")?;
        self.get_pull_request(owner, repo, number).await
    }

    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Option<PullRequestInfo>, PlatformError> {
        let Some(pr) = self
            .rest_get(&format!("/repos/{owner}/{repo}/pulls/{number}"))
            .await?
        else {
            return Ok(None);
        };
        let state = match (
            pr.get("state").and_then(|v| v.as_str()),
            pr.get("merged").and_then(|v| v.as_bool()).unwrap_or(false),
        ) {
            (_, true) => PullRequestState::Merged,
            (Some("open"), _) => PullRequestState::Open,
            _ => PullRequestState::Closed,
        };
        Ok(Some(PullRequestInfo {
            node_id: field_str(&pr, "node_id")?,
            number,
            state,
            is_draft: pr.get("draft").and_then(|v| v.as_bool()).unwrap_or(false),
            head_ref: pr
                .pointer("/head/ref")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            base_ref: pr
                .pointer("/base/ref")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            last_commit_sha: pr
                .pointer("/head/sha")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            author_login: pr
                .pointer("/user/login")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            reviewers: Vec::new(),
        }))
    }

    async fn get_pr_changed_files(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<ChangedFile>, PlatformError> {
        let resp = self
            .rest_get(&format!("/repos/{owner}/{repo}/pulls/{number}/files"))
            .await?
            .unwrap_or_else(|| json!([]));
        Ok(resp
            .as_array()
            .into_iter()
            .flatten()
            .map(|f| ChangedFile {
                path: f.get("filename").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                status: f.get("status").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn get_file_content_from_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        path: &str,
    ) -> Result<Option<String>, PlatformError> {
        let Some(resp) = self
            .rest_get(&format!(
                "/repos/{owner}/{repo}/contents/{path}?ref={git_ref}"
            ))
            .await?
        else {
            return Ok(None);
        };
        let Some(encoded) = resp.get("content").and_then(|v| v.as_str()) else {
            return Ok(None);
        };
        let bytes = base64_decode(&encoded.replace('\n', ""));
        Ok(String::from_utf8(bytes).ok())
    }

    async fn get_pr_timeline_signals(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<TimelineSignal>, PlatformError> {
        let resp = self
            .rest_get(&format!("/repos/{owner}/{repo}/issues/{number}/timeline"))
            .await?
            .unwrap_or_else(|| json!([]));
        Ok(resp
            .as_array()
            .into_iter()
            .flatten()
            .map(|event| {
                let event_name = event.get("event").and_then(|v| v.as_str()).unwrap_or_default();
                if event_name == "copilot_work_finished" {
                    TimelineSignal::CopilotWorkFinished
                } else if event_name == "review_requested" {
                    let requester_login = event
                        .pointer("/requested_reviewer/login")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    TimelineSignal::ReviewRequested { requester_login }
                } else {
                    TimelineSignal::Other
                }
            })
            .collect())
    }

    async fn mark_pr_ready_for_review(&self, pr_node_id: &str) -> Result<(), PlatformError> {
        let query = r#"
            mutation($pullRequestId: ID!) {
              markPullRequestReadyForReview(input: { pullRequestId: $pullRequestId }) {
                pullRequest { id }
              }
            }
        "#;
        self.graphql(query, json!({ "pullRequestId": pr_node_id }))
            .await?;
        Ok(())
    }

    async fn merge_pull_request(
        &self,
        pr_node_id: &str,
        method: MergeMethod,
        headline: &str,
    ) -> Result<MergeResult, PlatformError> {
        let query = r#"
            mutation($pullRequestId: ID!, $method: PullRequestMergeMethod!, $headline: String!) {
              mergePullRequest(input: {
                pullRequestId: $pullRequestId, mergeMethod: $method, commitHeadline: $headline
              }) { pullRequest { mergeCommit { oid } } }
            }
        "#;
        let resp = self
            .graphql(
                query,
                json!({
                    "pullRequestId": pr_node_id,
                    "method": method.as_str(),
                    "headline": headline,
                }),
            )
            .await?;
        let merge_commit_sha = resp
            .pointer("/data/mergePullRequest/pullRequest/mergeCommit/oid")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(MergeResult { merge_commit_sha })
    }

    async fn delete_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), PlatformError> {
        self.rest_delete(&format!("/repos/{owner}/{repo}/git/refs/heads/{branch}"))
            .await
    }

    async fn link_pull_request_to_issue(
        &self,
        owner: &str,
        repo: &str,
        pr_number: i64,
        issue_number: i64,
    ) -> Result<(), PlatformError> {
        self.create_issue_comment(
            owner,
            repo,
            issue_number,
            &format!("Linked to #{pr_number}."),
        )
        .await
    }

    async fn check_copilot_pr_completion(
        &self,
        owner: &str,
        repo: &str,
        issue_number: i64,
    ) -> Result<Option<CopilotPrCompletion>, PlatformError> {
        let Some(pr) = self.find_existing_pr_for_issue(owner, repo, issue_number).await? else {
            return Ok(None);
        };
        if !pr.author_login.to_lowercase().contains("copilot") || pr.state != PullRequestState::Open {
            return Ok(None);
        }
        let signals = self.get_pr_timeline_signals(owner, repo, pr.number).await?;
        let finished = signals.iter().any(|s| {
            matches!(s, TimelineSignal::CopilotWorkFinished)
                || matches!(s, TimelineSignal::ReviewRequested { requester_login } if requester_login.eq_ignore_ascii_case("copilot"))
        });
        if !pr.is_draft || finished {
            Ok(Some(CopilotPrCompletion {
                node_id: pr.node_id,
                number: pr.number,
                is_draft: pr.is_draft,
                last_commit_sha: pr.last_commit_sha,
                copilot_finished: finished,
            }))
        } else {
            Ok(None)
        }
    }

    async fn assign_copilot_to_issue(
        &self,
        owner: &str,
        repo: &str,
        issue_node_id: &str,
        issue_number: i64,
        base_ref: &str,
        custom_agent: &str,
        custom_instructions: &str,
    ) -> Result<bool, PlatformError> {
        let rest_result = self
            .rest_post(
                &format!("/repos/{owner}/{repo}/issues/{issue_number}/agent_assignment"),
                json!({
                    "base_ref": base_ref,
                    "agent": custom_agent,
                    "instructions": custom_instructions,
                }),
            )
            .await;
        match rest_result {
            Ok(Some(_)) => return Ok(true),
            Ok(None) => {}
            Err(PlatformError::UnexpectedShape { .. }) => {}
            Err(err) => return Err(err),
        }

        let bot_id = self.get_copilot_bot_id(owner, repo).await?;
        let query = r#"
            mutation($assigneeIds: [ID!]!, $issueId: ID!) {
              replaceActorsForAssignable(input: { assignableId: $issueId, actorIds: $assigneeIds }) {
                assignable { id }
              }
            }
        "#;
        self.graphql(
            query,
            json!({ "assigneeIds": [bot_id], "issueId": issue_node_id }),
        )
        .await?;
        Ok(true)
    }

    async fn request_copilot_review(
        &self,
        owner: &str,
        repo: &str,
        pr_number: i64,
    ) -> Result<(), PlatformError> {
        self.rest_post(
            &format!("/repos/{owner}/{repo}/pulls/{pr_number}/requested_reviewers"),
            json!({ "reviewers": ["copilot"] }),
        )
        .await?;
        Ok(())
    }

    async fn has_copilot_reviewed_pr(
        &self,
        owner: &str,
        repo: &str,
        pr_number: i64,
    ) -> Result<bool, PlatformError> {
        let resp = self
            .rest_get(&format!("/repos/{owner}/{repo}/pulls/{pr_number}/reviews"))
            .await?
            .unwrap_or_else(|| json!([]));
        Ok(resp
            .as_array()
            .into_iter()
            .flatten()
            .any(|r| {
                r.pointer("/user/login")
                    .and_then(|v| v.as_str())
                    .map(|login| login.eq_ignore_ascii_case("copilot"))
                    .unwrap_or(false)
            }))
    }

    async fn validate_assignee(
        &self,
        owner: &str,
        repo: &str,
        login: &str,
    ) -> Result<bool, PlatformError> {
        let resp = self
            .rest_get(&format!(
                "/repos/{owner}/{repo}/assignees/{login}"
            ))
            .await?;
        Ok(resp.is_some())
    }

    async fn assign_issue(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        login: &str,
    ) -> Result<(), PlatformError> {
        self.rest_post(
            &format!("/repos/{owner}/{repo}/issues/{number}/assignees"),
            json!({ "assignees": [login] }),
        )
        .await?;
        Ok(())
    }

    async fn get_repository_owner(&self, owner: &str, repo: &str) -> Result<String, PlatformError> {
        let resp = self
            .rest_get(&format!("/repos/{owner}/{repo}"))
            .await?
            .ok_or_else(|| PlatformError::NotFound {
                resource: format!("{owner}/{repo}"),
            })?;
        field_str(&resp, "full_name")
            .map(|full| full.split('/').next().unwrap_or(owner).to_string())
    }
}

impl GitHubPlatformClient {
    async fn get_copilot_bot_id(&self, owner: &str, repo: &str) -> Result<String, PlatformError> {
        let query = r#"
            query($owner: String!, $repo: String!) {
              repository(owner: $owner, name: $repo) {
                suggestedActors(capabilities: [CAN_BE_ASSIGNED], first: 10) {
                  nodes { login ... on Bot { id } }
                }
              }
            }
        "#;
        let resp = self
            .graphql(query, json!({ "owner": owner, "repo": repo }))
            .await?;
        resp.pointer("/data/repository/suggestedActors/nodes")
            .and_then(|v| v.as_array())
            .and_then(|nodes| {
                nodes.iter().find(|n| {
                    n.get("login")
                        .and_then(|v| v.as_str())
                        .map(|l| l.eq_ignore_ascii_case("copilot"))
                        .unwrap_or(false)
                })
            })
            .and_then(|n| n.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| PlatformError::NotFound {
                resource: "copilot bot id".into(),
            })
    }
}

fn field_str(value: &Value, field: &str) -> Result<String, PlatformError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| PlatformError::UnexpectedShape {
            endpoint: "field".into(),
            message: format!("missing or non-string field {field:?}"),
        })
}

fn field_i64(value: &Value, field: &str) -> Result<i64, PlatformError> {
    value
        .get(field)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| PlatformError::UnexpectedShape {
            endpoint: "field".into(),
            message: format!("missing or non-integer field {field:?}"),
        })
}

/// Minimal percent-encoding for query strings; avoids pulling in a whole
/// URL crate for the one search endpoint that needs it.
fn urlencoding_minimal(input: &str) -> String {
    input
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

const BASE64_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_decode(input: &str) -> Vec<u8> {
    let mut lut = [255u8; 256];
    for (i, &c) in BASE64_ALPHABET.iter().enumerate() {
        lut[c as usize] = i as u8;
    }
    let cleaned: Vec<u8> = input.bytes().filter(|&b| b != b'=').collect();
    let mut out = Vec::with_capacity(cleaned.len() * 3 / 4);
    for chunk in cleaned.chunks(4) {
        let mut buf = [0u8; 4];
        for (i, &b) in chunk.iter().enumerate() {
            buf[i] = lut[b as usize];
        }
        out.push((buf[0] << 2) | (buf[1] >> 4));
        if chunk.len() > 2 {
            out.push((buf[1] << 4) | (buf[2] >> 2));
        }
        if chunk.len() > 3 {
            out.push((buf[2] << 6) | buf[3]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_decode_round_trips_known_value() {
        // "hello" base64-encoded
        assert_eq!(base64_decode("aGVsbG8="), b"hello");
    }

    #[test]
    fn urlencoding_minimal_escapes_spaces_and_colons() {
        assert_eq!(urlencoding_minimal("repo:o/r is:pr"), "repo%3Ao%2Fr%20is%3Apr");
    }
}

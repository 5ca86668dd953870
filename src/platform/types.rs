//! Wire-adjacent types returned by the platform client. These are the
//! parsed shapes the rest of the crate depends on — the actual REST/GraphQL
//! payloads are an implementation detail of `platform::client`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueWithComments {
    pub node_id: String,
    pub number: i64,
    pub title: String,
    pub body: String,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedIssue {
    pub node_id: String,
    pub number: i64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectItemRef {
    pub node_id: String,
    pub issue_number: i64,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub node_id: String,
    pub number: i64,
    pub state: PullRequestState,
    pub is_draft: bool,
    pub head_ref: String,
    pub base_ref: String,
    pub last_commit_sha: String,
    pub author_login: String,
    pub reviewers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: String,
}

/// A normalized view of the signal the poller cares about in a PR timeline,
/// collapsing whatever event name/shape the forge actually uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelineSignal {
    CopilotWorkFinished,
    ReviewRequested { requester_login: String },
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopilotPrCompletion {
    pub node_id: String,
    pub number: i64,
    pub is_draft: bool,
    pub last_commit_sha: String,
    pub copilot_finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMethod {
    Squash,
    Merge,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeMethod::Squash => "SQUASH",
            MergeMethod::Merge => "MERGE",
            MergeMethod::Rebase => "REBASE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub merge_commit_sha: String,
}

//! The data model driving the pipeline: recommendations, configuration,
//! per-issue pipeline state, branch lineage, and the transition log.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Size {
    Xs,
    S,
    M,
    L,
    Xl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationMetadata {
    pub priority: Priority,
    pub size: Size,
    pub estimate_hours: f32,
    pub start_date: Option<String>,
    pub target_date: Option<String>,
    pub labels: Vec<String>,
}

/// A confirmed, immutable description of the work to create an issue for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecommendation {
    pub title: String,
    pub user_story: String,
    pub ui_ux_description: Option<String>,
    pub functional_requirements: Vec<String>,
    pub technical_notes: Option<String>,
    pub metadata: RecommendationMetadata,
}

impl IssueRecommendation {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.is_empty() || self.title.len() > 256 {
            return Err("title must be 1..=256 characters".to_string());
        }
        if self.functional_requirements.is_empty() {
            return Err("at least one functional requirement is required".to_string());
        }
        if !(0.5..=40.0).contains(&self.metadata.estimate_hours) {
            return Err("estimate_hours must be in [0.5, 40]".to_string());
        }
        Ok(())
    }
}

/// An ordered agent slug assigned to a given status (e.g. `speckit.specify`).
pub type AgentAssignment = String;

/// Per-project pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfiguration {
    pub project_id: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub copilot_assignee: Option<String>,
    pub review_assignee: Option<String>,
    pub status_backlog: String,
    pub status_ready: String,
    pub status_in_progress: String,
    pub status_in_review: String,
    /// status name -> ordered agent slugs, case-insensitive lookup via `agents_for_status`.
    pub agent_mappings: HashMap<String, Vec<AgentAssignment>>,
}

impl WorkflowConfiguration {
    pub fn status_order(&self) -> Vec<String> {
        vec![
            self.status_backlog.clone(),
            self.status_ready.clone(),
            self.status_in_progress.clone(),
            self.status_in_review.clone(),
        ]
    }

    pub fn agent_mappings_ordered(&self) -> Vec<(String, Vec<String>)> {
        self.status_order()
            .into_iter()
            .map(|status| {
                let agents = self.agents_for_status(&status);
                (status, agents)
            })
            .collect()
    }

    pub fn agents_for_status(&self, status: &str) -> Vec<AgentAssignment> {
        self.agent_mappings
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(status))
            .map(|(_, agents)| agents.clone())
            .unwrap_or_default()
    }

    /// Walk the ordered pipeline starting at `status` (inclusive) and
    /// return the first status that has at least one agent assigned.
    pub fn first_actionable_status_from(&self, status: &str) -> Option<String> {
        let order = self.status_order();
        let start = order.iter().position(|s| s.eq_ignore_ascii_case(status))?;
        order[start..]
            .iter()
            .find(|s| !self.agents_for_status(s).is_empty())
            .cloned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub issue_number: i64,
    pub project_id: String,
    pub status: String,
    pub agents: Vec<AgentAssignment>,
    pub current_agent_index: usize,
    pub completed_agents: Vec<AgentAssignment>,
    pub started_at: String,
    pub error: Option<String>,
    pub agent_assigned_sha: Option<String>,
    pub agent_sub_issues: HashMap<String, SubIssueRef>,
}

impl PipelineState {
    pub fn new(issue_number: i64, project_id: String, status: String, agents: Vec<AgentAssignment>) -> Self {
        Self {
            issue_number,
            project_id,
            status,
            agents,
            current_agent_index: 0,
            completed_agents: Vec::new(),
            started_at: Utc::now().to_rfc3339(),
            error: None,
            agent_assigned_sha: None,
            agent_sub_issues: HashMap::new(),
        }
    }

    pub fn current_agent(&self) -> Option<&AgentAssignment> {
        self.agents.get(self.current_agent_index)
    }

    pub fn next_agent(&self) -> Option<&AgentAssignment> {
        self.agents.get(self.current_agent_index + 1)
    }

    pub fn is_complete(&self) -> bool {
        self.current_agent_index >= self.agents.len()
    }

    /// Advance past the current agent. Invariant: `completed_agents` stays
    /// a prefix of `agents`.
    pub fn advance(&mut self) {
        if let Some(agent) = self.current_agent().cloned() {
            self.completed_agents.push(agent);
            self.current_agent_index += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainBranchInfo {
    pub branch: String,
    pub pr_number: i64,
    pub head_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubIssueRef {
    pub number: i64,
    pub node_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggeredBy {
    Automatic,
    Detection,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTransition {
    pub issue_id: i64,
    pub project_id: String,
    pub from_status: Option<String>,
    pub to_status: String,
    pub triggered_by: TriggeredBy,
    pub success: bool,
    pub error: Option<String>,
    pub assigned_user: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    pub issue_id: Option<String>,
    pub issue_number: Option<i64>,
    pub issue_url: Option<String>,
    pub project_item_id: Option<String>,
    pub current_status: Option<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recommendation() -> IssueRecommendation {
        IssueRecommendation {
            title: "Add dark mode".to_string(),
            user_story: "As a user I want dark mode".to_string(),
            ui_ux_description: None,
            functional_requirements: vec!["Toggle in settings".to_string()],
            technical_notes: None,
            metadata: RecommendationMetadata {
                priority: Priority::P1,
                size: Size::M,
                estimate_hours: 4.0,
                start_date: None,
                target_date: None,
                labels: vec![],
            },
        }
    }

    #[test]
    fn validate_rejects_empty_title() {
        let mut rec = recommendation();
        rec.title = "".to_string();
        assert!(rec.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_estimate() {
        let mut rec = recommendation();
        rec.metadata.estimate_hours = 100.0;
        assert!(rec.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_recommendation() {
        assert!(recommendation().validate().is_ok());
    }

    fn config() -> WorkflowConfiguration {
        let mut agent_mappings = HashMap::new();
        agent_mappings.insert("ready".to_string(), vec!["speckit.plan".to_string()]);
        WorkflowConfiguration {
            project_id: "proj".to_string(),
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

    #[test]
    fn agents_for_status_is_case_insensitive() {
        let cfg = config();
        assert_eq!(cfg.agents_for_status("Ready"), vec!["speckit.plan".to_string()]);
        assert_eq!(cfg.agents_for_status("READY"), vec!["speckit.plan".to_string()]);
        assert!(cfg.agents_for_status("Backlog").is_empty());
    }

    #[test]
    fn first_actionable_status_skips_empty_backlog() {
        let cfg = config();
        assert_eq!(
            cfg.first_actionable_status_from("Backlog"),
            Some("Ready".to_string())
        );
    }

    #[test]
    fn pipeline_state_advance_keeps_completed_as_prefix() {
        let mut state = PipelineState::new(
            1,
            "proj".to_string(),
            "Ready".to_string(),
            vec!["a".to_string(), "b".to_string()],
        );
        assert_eq!(state.current_agent(), Some(&"a".to_string()));
        state.advance();
        assert_eq!(state.completed_agents, vec!["a".to_string()]);
        assert_eq!(state.current_agent_index, 1);
        assert_eq!(state.current_agent(), Some(&"b".to_string()));
        assert!(!state.is_complete());
        state.advance();
        assert!(state.is_complete());
        assert_eq!(state.completed_agents, vec!["a".to_string(), "b".to_string()]);
    }
}

//! Codec for the markdown "Agent Pipeline" table embedded in issue bodies.
//!
//! The table lives below a `---` separator, under a `## 🤖 Agent Pipeline`
//! header, and records one row per `(status, agent slug)` pair with its
//! current state. Rendering is idempotent: appending to a body that already
//! carries a section replaces it rather than duplicating it.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const TRACKING_HEADER: &str = "## 🤖 Agent Pipeline";
pub const TRACKING_SEPARATOR: &str = "---";

const STATE_PENDING: &str = "⏳ Pending";
const STATE_ACTIVE: &str = "🔄 Active";
const STATE_DONE: &str = "✅ Done";

static TRACKING_SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)---\s*\n\s*##\s*🤖\s*Agent Pipeline.*").unwrap());

static ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\|\s*(\d+)\s*\|\s*([^|]+?)\s*\|\s*`([^|`]+)`\s*\|\s*([^|]+?)\s*\|").unwrap()
});

static LAST_COMMENT_DONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?):\s*Done!\s*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Pending,
    Active,
    Done,
}

impl AgentState {
    fn as_label(self) -> &'static str {
        match self {
            AgentState::Pending => STATE_PENDING,
            AgentState::Active => STATE_ACTIVE,
            AgentState::Done => STATE_DONE,
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if label.contains("Pending") {
            Some(AgentState::Pending)
        } else if label.contains("Active") {
            Some(AgentState::Active)
        } else if label.contains("Done") {
            Some(AgentState::Done)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStep {
    pub index: u32,
    pub status: String,
    pub slug: String,
    pub state: AgentStateRepr,
}

/// `AgentState` isn't itself `Eq`-able across derive without caring about the
/// label text, so the step carries both the decoded state and the raw label
/// it was parsed from for lossless round-tripping of unusual label text.
pub type AgentStateRepr = AgentState;

/// Build the ordered list of pipeline steps for a status-ordered set of
/// agent mappings, looking up `status` case-insensitively.
pub fn build_agent_pipeline_steps(
    agent_mappings: &[(String, Vec<String>)],
    status_order: &[String],
) -> Vec<AgentStep> {
    let mut steps = Vec::new();
    let mut index = 1;
    for status in status_order {
        let agents = agent_mappings
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(status))
            .map(|(_, agents)| agents.as_slice())
            .unwrap_or(&[]);
        for slug in agents {
            steps.push(AgentStep {
                index,
                status: status.clone(),
                slug: slug.clone(),
                state: AgentState::Pending,
            });
            index += 1;
        }
    }
    steps
}

pub fn render_tracking_markdown(steps: &[AgentStep]) -> String {
    let mut out = String::new();
    out.push_str(TRACKING_SEPARATOR);
    out.push('\n');
    out.push_str(TRACKING_HEADER);
    out.push('\n');
    out.push_str("| # | Status | Agent | State |\n");
    out.push_str("|---|--------|-------|-------|\n");
    for step in steps {
        out.push_str(&format!(
            "| {} | {} | `{}` | {} |\n",
            step.index,
            step.status,
            step.slug,
            step.state.as_label()
        ));
    }
    out
}

/// Strip any existing tracking section from `body` and append a freshly
/// rendered one. Idempotent: calling this twice in a row is a no-op on the
/// second call.
pub fn append_tracking_to_body(
    body: &str,
    agent_mappings: &[(String, Vec<String>)],
    status_order: &[String],
) -> String {
    let stripped = strip_tracking_section(body);
    let steps = build_agent_pipeline_steps(agent_mappings, status_order);
    format!("{}\n\n{}", stripped.trim_end(), render_tracking_markdown(&steps))
}

fn strip_tracking_section(body: &str) -> String {
    TRACKING_SECTION_RE.replace(body, "").into_owned()
}

pub fn parse_tracking_from_body(body: &str) -> Option<Vec<AgentStep>> {
    if !body.contains(TRACKING_HEADER) {
        return None;
    }
    let section_start = body.find(TRACKING_HEADER)?;
    let section = &body[section_start..];
    let mut steps = Vec::new();
    for cap in ROW_RE.captures_iter(section) {
        let index: u32 = cap[1].parse().ok()?;
        let status = cap[2].trim().to_string();
        let slug = cap[3].trim().to_string();
        let state = AgentState::from_label(&cap[4])?;
        steps.push(AgentStep {
            index,
            status,
            slug,
            state,
        });
    }
    if steps.is_empty() { None } else { Some(steps) }
}

pub fn get_current_agent_from_tracking(steps: &[AgentStep]) -> Option<&AgentStep> {
    steps.iter().find(|s| s.state == AgentState::Active)
}

pub fn get_next_pending_agent(steps: &[AgentStep]) -> Option<&AgentStep> {
    steps.iter().find(|s| s.state == AgentState::Pending)
}

/// Replace the state of the row matching `slug`. A no-op if the slug is
/// not present in the body's tracking table.
pub fn update_agent_state(body: &str, slug: &str, new_state: AgentState) -> String {
    let Some(mut steps) = parse_tracking_from_body(body) else {
        return body.to_string();
    };
    let mut changed = false;
    for step in &mut steps {
        if step.slug == slug {
            step.state = new_state;
            changed = true;
        }
    }
    if !changed {
        return body.to_string();
    }
    let stripped = strip_tracking_section(body);
    format!("{}\n\n{}", stripped.trim_end(), render_tracking_markdown(&steps))
}

pub fn mark_agent_active(body: &str, slug: &str) -> String {
    update_agent_state(body, slug, AgentState::Active)
}

pub fn mark_agent_done(body: &str, slug: &str) -> String {
    update_agent_state(body, slug, AgentState::Done)
}

/// Checks only the *last* comment for a completion marker of the exact
/// shape `"<slug>: Done!"` — earlier comments are not revisited.
pub fn check_last_comment_for_done(comments: &[String]) -> Option<String> {
    let last = comments.last()?;
    let cap = LAST_COMMENT_DONE_RE.captures(last.trim())?;
    Some(cap[1].trim().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineAction {
    NoTracking,
    AssignAgent { slug: String },
    Wait { slug: Option<String> },
    AdvancePipeline { slug: String },
    TransitionStatus { target_status: String },
}

/// The decision table driving the reconciliation poller: given the current
/// body and the issue's comments, decide the single next action to take.
pub fn determine_next_action(body: &str, comments: &[String]) -> PipelineAction {
    let Some(steps) = parse_tracking_from_body(body) else {
        return PipelineAction::NoTracking;
    };

    if let Some(active) = get_current_agent_from_tracking(&steps) {
        return match check_last_comment_for_done(comments) {
            Some(slug) if slug == active.slug => PipelineAction::AdvancePipeline { slug },
            _ => PipelineAction::Wait {
                slug: Some(active.slug.clone()),
            },
        };
    }

    if let Some(pending) = get_next_pending_agent(&steps) {
        return PipelineAction::AssignAgent {
            slug: pending.slug.clone(),
        };
    }

    if steps.iter().all(|s| s.state == AgentState::Done) {
        let target_status = steps
            .last()
            .map(|s| s.status.clone())
            .unwrap_or_default();
        return PipelineAction::TransitionStatus { target_status };
    }

    PipelineAction::Wait { slug: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mappings() -> Vec<(String, Vec<String>)> {
        vec![
            ("Backlog".into(), vec!["speckit.specify".into()]),
            (
                "Ready".into(),
                vec!["speckit.plan".into(), "speckit.tasks".into()],
            ),
            ("In Progress".into(), vec!["speckit.implement".into()]),
        ]
    }

    fn status_order() -> Vec<String> {
        vec![
            "Backlog".into(),
            "Ready".into(),
            "In Progress".into(),
            "In Review".into(),
        ]
    }

    #[test]
    fn builds_steps_in_status_order_case_insensitively() {
        let steps = build_agent_pipeline_steps(&mappings(), &status_order());
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].slug, "speckit.specify");
        assert_eq!(steps[1].slug, "speckit.plan");
        assert_eq!(steps[2].slug, "speckit.tasks");
        assert_eq!(steps[3].slug, "speckit.implement");
        assert!(steps.iter().all(|s| s.state == AgentState::Pending));
    }

    #[test]
    fn render_then_parse_round_trips() {
        let steps = build_agent_pipeline_steps(&mappings(), &status_order());
        let rendered = render_tracking_markdown(&steps);
        let body = format!("Issue body text\n\n{rendered}");
        let parsed = parse_tracking_from_body(&body).unwrap();
        assert_eq!(parsed, steps);
    }

    #[test]
    fn append_is_idempotent() {
        let body = "## Description\nDo the thing.";
        let once = append_tracking_to_body(body, &mappings(), &status_order());
        let twice = append_tracking_to_body(&once, &mappings(), &status_order());
        assert_eq!(once, twice);
        assert_eq!(once.matches(TRACKING_HEADER).count(), 1);
    }

    #[test]
    fn mark_agent_active_then_done_updates_only_that_row() {
        let steps = build_agent_pipeline_steps(&mappings(), &status_order());
        let body = format!("body\n\n{}", render_tracking_markdown(&steps));
        let active_body = mark_agent_active(&body, "speckit.specify");
        let parsed = parse_tracking_from_body(&active_body).unwrap();
        assert_eq!(parsed[0].state, AgentState::Active);
        assert_eq!(parsed[1].state, AgentState::Pending);

        let done_body = mark_agent_done(&active_body, "speckit.specify");
        let parsed = parse_tracking_from_body(&done_body).unwrap();
        assert_eq!(parsed[0].state, AgentState::Done);
    }

    #[test]
    fn mark_agent_state_on_missing_slug_is_noop() {
        let steps = build_agent_pipeline_steps(&mappings(), &status_order());
        let body = format!("body\n\n{}", render_tracking_markdown(&steps));
        let unchanged = mark_agent_active(&body, "nonexistent.agent");
        assert_eq!(unchanged, body);
    }

    #[test]
    fn check_last_comment_for_done_matches_exact_shape() {
        let comments = vec![
            "speckit.specify: Done!".to_string(),
            "some other note".to_string(),
        ];
        assert_eq!(check_last_comment_for_done(&comments), None);

        let comments = vec!["unrelated".to_string(), "speckit.plan: Done!".to_string()];
        assert_eq!(
            check_last_comment_for_done(&comments),
            Some("speckit.plan".to_string())
        );
    }

    #[test]
    fn check_last_comment_rejects_partial_match() {
        let comments = vec!["speckit.plan: Done! Thanks everyone".to_string()];
        assert_eq!(check_last_comment_for_done(&comments), None);
    }

    #[test]
    fn determine_next_action_no_tracking() {
        assert_eq!(
            determine_next_action("plain body with no table", &[]),
            PipelineAction::NoTracking
        );
    }

    #[test]
    fn determine_next_action_assigns_first_pending_when_nothing_active() {
        let steps = build_agent_pipeline_steps(&mappings(), &status_order());
        let body = format!("body\n\n{}", render_tracking_markdown(&steps));
        assert_eq!(
            determine_next_action(&body, &[]),
            PipelineAction::AssignAgent {
                slug: "speckit.specify".into()
            }
        );
    }

    #[test]
    fn determine_next_action_waits_while_active_without_done_comment() {
        let steps = build_agent_pipeline_steps(&mappings(), &status_order());
        let body = format!("body\n\n{}", render_tracking_markdown(&steps));
        let active_body = mark_agent_active(&body, "speckit.specify");
        assert_eq!(
            determine_next_action(&active_body, &["still working".to_string()]),
            PipelineAction::Wait {
                slug: Some("speckit.specify".into())
            }
        );
    }

    #[test]
    fn determine_next_action_advances_on_matching_done_comment() {
        let steps = build_agent_pipeline_steps(&mappings(), &status_order());
        let body = format!("body\n\n{}", render_tracking_markdown(&steps));
        let active_body = mark_agent_active(&body, "speckit.specify");
        let comments = vec!["speckit.specify: Done!".to_string()];
        assert_eq!(
            determine_next_action(&active_body, &comments),
            PipelineAction::AdvancePipeline {
                slug: "speckit.specify".into()
            }
        );
    }

    #[test]
    fn determine_next_action_transitions_when_all_done() {
        let steps = build_agent_pipeline_steps(&mappings(), &[status_order()[0].clone()]);
        let mut body = format!("body\n\n{}", render_tracking_markdown(&steps));
        body = mark_agent_done(&body, "speckit.specify");
        assert_eq!(
            determine_next_action(&body, &[]),
            PipelineAction::TransitionStatus {
                target_status: "Backlog".into()
            }
        );
    }
}

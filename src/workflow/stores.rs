//! Process-local stores for pipeline state, branch lineage, and sub-issue
//! mappings. Single-writer discipline (see the crate's concurrency model):
//! every write path is serialized through the orchestrator/poller, so a
//! `RwLock` is enough — readers never block each other and no lock is held
//! across a platform call.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::workflow::models::{MainBranchInfo, PipelineState, SubIssueRef};

#[derive(Default)]
pub struct PipelineStateStore {
    states: RwLock<HashMap<i64, PipelineState>>,
}

impl PipelineStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, issue_number: i64) -> Option<PipelineState> {
        self.states.read().unwrap().get(&issue_number).cloned()
    }

    pub fn set(&self, state: PipelineState) {
        self.states.write().unwrap().insert(state.issue_number, state);
    }

    /// Called at every status transition: the pipeline for the status being
    /// left no longer applies.
    pub fn remove(&self, issue_number: i64) -> Option<PipelineState> {
        self.states.write().unwrap().remove(&issue_number)
    }

    pub fn all(&self) -> Vec<PipelineState> {
        self.states.read().unwrap().values().cloned().collect()
    }
}

#[derive(Default)]
pub struct BranchStore {
    branches: RwLock<HashMap<i64, MainBranchInfo>>,
}

impl BranchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, issue_number: i64) -> Option<MainBranchInfo> {
        self.branches.read().unwrap().get(&issue_number).cloned()
    }

    /// First-write-wins: once a main branch is recorded for an issue, later
    /// calls are ignored. Use `update_head_sha` to mutate the one mutable field.
    pub fn set_if_absent(&self, issue_number: i64, info: MainBranchInfo) -> bool {
        let mut branches = self.branches.write().unwrap();
        if branches.contains_key(&issue_number) {
            false
        } else {
            branches.insert(issue_number, info);
            true
        }
    }

    pub fn update_head_sha(&self, issue_number: i64, head_sha: String) {
        if let Some(info) = self.branches.write().unwrap().get_mut(&issue_number) {
            info.head_sha = head_sha;
        }
    }
}

#[derive(Default)]
pub struct SubIssueStore {
    mappings: RwLock<HashMap<i64, HashMap<String, SubIssueRef>>>,
}

impl SubIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, issue_number: i64) -> HashMap<String, SubIssueRef> {
        self.mappings
            .read()
            .unwrap()
            .get(&issue_number)
            .cloned()
            .unwrap_or_default()
    }

    /// Merges `new_entries` into whatever is already recorded; never
    /// overwrites an existing slug -> sub-issue mapping.
    pub fn merge(&self, issue_number: i64, new_entries: HashMap<String, SubIssueRef>) {
        let mut mappings = self.mappings.write().unwrap();
        let entry = mappings.entry(issue_number).or_default();
        for (slug, sub_issue) in new_entries {
            entry.entry(slug).or_insert(sub_issue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_state_store_remove_then_get_is_none() {
        let store = PipelineStateStore::new();
        let state = PipelineState::new(1, "p".into(), "Ready".into(), vec!["a".into()]);
        store.set(state);
        assert!(store.get(1).is_some());
        store.remove(1);
        assert!(store.get(1).is_none());
    }

    #[test]
    fn branch_store_first_write_wins() {
        let store = BranchStore::new();
        let first = MainBranchInfo {
            branch: "copilot/issue-1".into(),
            pr_number: 10,
            head_sha: "sha1".into(),
        };
        let second = MainBranchInfo {
            branch: "copilot/issue-1-other".into(),
            pr_number: 99,
            head_sha: "sha2".into(),
        };
        assert!(store.set_if_absent(1, first.clone()));
        assert!(!store.set_if_absent(1, second));
        assert_eq!(store.get(1).unwrap().branch, first.branch);
    }

    #[test]
    fn branch_store_update_head_sha_only_mutates_that_field() {
        let store = BranchStore::new();
        let info = MainBranchInfo {
            branch: "b".into(),
            pr_number: 1,
            head_sha: "old".into(),
        };
        store.set_if_absent(1, info);
        store.update_head_sha(1, "new".into());
        let updated = store.get(1).unwrap();
        assert_eq!(updated.head_sha, "new");
        assert_eq!(updated.branch, "b");
    }

    #[test]
    fn sub_issue_store_merge_never_overwrites_existing_entries() {
        let store = SubIssueStore::new();
        let mut first = HashMap::new();
        first.insert(
            "speckit.specify".to_string(),
            SubIssueRef {
                number: 2,
                node_id: "n2".into(),
                url: "u2".into(),
            },
        );
        store.merge(1, first);

        let mut second = HashMap::new();
        second.insert(
            "speckit.specify".to_string(),
            SubIssueRef {
                number: 999,
                node_id: "bad".into(),
                url: "bad".into(),
            },
        );
        second.insert(
            "speckit.plan".to_string(),
            SubIssueRef {
                number: 3,
                node_id: "n3".into(),
                url: "u3".into(),
            },
        );
        store.merge(1, second);

        let merged = store.get(1);
        assert_eq!(merged.get("speckit.specify").unwrap().number, 2);
        assert_eq!(merged.get("speckit.plan").unwrap().number, 3);
    }
}

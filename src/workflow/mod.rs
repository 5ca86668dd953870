//! The pipeline: data model, process-local stores, persisted configuration
//! and transition log, the orchestrator primitives, and the reconciliation
//! poller that drives them.

pub mod config_store;
pub mod models;
pub mod orchestrator;
pub mod poller;
pub mod stores;
pub mod transitions;

pub use config_store::ConfigStore;
pub use models::*;
pub use orchestrator::Orchestrator;
pub use poller::{Poller, PollingStatus};
pub use stores::{BranchStore, PipelineStateStore, SubIssueStore};
pub use transitions::TransitionLog;

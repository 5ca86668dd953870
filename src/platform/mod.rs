//! The Platform Client: a typed wrapper over the forge's REST + GraphQL
//! APIs for issues, comments, PRs, timelines, branches, project-board
//! fields, and AI-agent assignment. Pure request/response — no policy.

pub mod client;
pub mod mock;
pub mod types;

pub use client::{GitHubPlatformClient, PlatformClient};
pub use mock::MockPlatformClient;
pub use types::*;

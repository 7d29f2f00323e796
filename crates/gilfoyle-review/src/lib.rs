//! Review runs for GitLab merge requests.
//!
//! [`coordinator::RunCoordinator`] decides whether a trigger may start a run,
//! [`pipeline::ReviewOrchestrator`] executes it against the collaborator
//! contracts in [`ports`], and the `gitlab`, `teamwork` and `llm` modules
//! implement those contracts over HTTP.

pub mod coordinator;
pub mod gitlab;
pub mod llm;
pub mod pipeline;
pub mod ports;
pub mod prompt;
pub mod retry;
pub mod summary;
pub mod teamwork;
pub mod tools;

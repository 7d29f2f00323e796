//! Core types, configuration, and error handling for the Gilfoyle reviewer.
//!
//! This crate provides the shared foundation used by the other Gilfoyle crates:
//! - [`GilfoyleError`]: unified error type using `thiserror` and `miette`
//! - [`GilfoyleConfig`]: configuration loaded from `gilfoyle.toml`
//! - The review data model: [`ReviewRunKey`], [`DiffRefs`], [`LinePosition`],
//!   [`ReviewVerdict`], [`TaskReference`]
//! - [`extract_task_references`] for Teamwork ids in merge request text

mod config;
mod error;
mod tasks;
mod types;

pub use config::{
    GilfoyleConfig, GitLabConfig, LlmConfig, RetryConfig, ReviewConfig, ServerConfig,
    TeamworkConfig,
};
pub use error::{Collaborator, GilfoyleError};
pub use tasks::extract_task_references;
pub use types::{
    Assessment, DiffRefs, InlineComment, LinePosition, MergeRequest, OutputFormat, ReviewRunKey,
    ReviewVerdict, Severity, Side, TaskDetail, TaskReference,
};

/// A convenience `Result` type for Gilfoyle operations.
pub type Result<T> = std::result::Result<T, GilfoyleError>;

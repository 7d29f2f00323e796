//! Unified diff parsing and line addressing.
//!
//! Turns the diff text of a merge request into hunks whose lines carry their
//! old and new line numbers, and answers whether a `(file, line, side)` triple
//! names a line that actually exists in that diff.

pub mod parser;
pub mod position;

pub use parser::{parse_unified_diff, resolve, DiffLine, FileDiff, FileHunk, LineKind};
pub use position::{changed_paths, find_position};

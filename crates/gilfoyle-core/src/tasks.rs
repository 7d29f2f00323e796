//! Teamwork task references in free text.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::TaskReference;

static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // https://projects.example.com/app/tasks/123, .../#/tasks/123, *.teamwork.com
        r"(?i)https?://\S*?/tasks/(\d+)",
        // #TW-123 or TW-123
        r"(?i)#?TW-(\d+)",
        // task 123, task: 123, task #123
        r"(?i)\btask[:\s#]+(\d+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Extract every task reference mentioned in `text`.
///
/// Matches from all patterns are unioned and deduplicated by id. The result
/// is in ascending order. Ids too large for `u64` are skipped.
///
/// # Examples
///
/// ```
/// use gilfoyle_core::{extract_task_references, TaskReference};
///
/// let refs = extract_task_references("see #TW-42 and task 42");
/// assert_eq!(refs, vec![TaskReference(42)]);
///
/// assert!(extract_task_references("no references here").is_empty());
/// ```
pub fn extract_task_references(text: &str) -> Vec<TaskReference> {
    let mut ids = BTreeSet::new();
    for pattern in PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            if let Some(id) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) {
                ids.insert(id);
            }
        }
    }
    ids.into_iter().map(TaskReference).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(text: &str) -> Vec<u64> {
        extract_task_references(text).into_iter().map(|r| r.0).collect()
    }

    #[test]
    fn dedups_across_patterns() {
        assert_eq!(ids("see #TW-42 and task 42"), vec![42]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(ids("").is_empty());
        assert!(ids("no references here").is_empty());
    }

    #[test]
    fn recognizes_urls() {
        let text = "Implements https://projects.example.com/app/tasks/12345 \
                    and https://acme.teamwork.com/#/tasks/678";
        assert_eq!(ids(text), vec![678, 12345]);
    }

    #[test]
    fn shorthand_is_case_insensitive() {
        assert_eq!(ids("tw-7, TW-8 and #Tw-9"), vec![7, 8, 9]);
    }

    #[test]
    fn task_keyword_variants() {
        assert_eq!(ids("Task: 10\ntask #11\nTASK 12"), vec![10, 11, 12]);
    }

    #[test]
    fn output_is_ascending() {
        assert_eq!(ids("TW-300 TW-2 TW-41"), vec![2, 41, 300]);
    }

    #[test]
    fn overflowing_ids_are_skipped() {
        assert_eq!(ids("TW-99999999999999999999999 TW-5"), vec![5]);
    }

    #[test]
    fn bare_numbers_are_not_tasks() {
        assert!(ids("fixes #42 in 3 places").is_empty());
        assert!(ids("see subtask 5").is_empty());
        assert!(ids("multitask 12 workers").is_empty());
        assert_eq!(ids("(task 7)"), vec![7]);
    }
}

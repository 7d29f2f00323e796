use gilfoyle_core::{InlineComment, ReviewVerdict};

/// Render the summary note posted before any inline comment.
///
/// `inline_count` is the number of inline comments that will be posted
/// on the diff.
///
/// # Examples
///
/// ```
/// use gilfoyle_core::{Assessment, ReviewVerdict};
/// use gilfoyle_review::summary::format_summary_comment;
///
/// let verdict = ReviewVerdict {
///     summary: "Nothing blocking.".into(),
///     assessment: Assessment::Approved,
///     ..Default::default()
/// };
/// let body = format_summary_comment(&verdict, 0);
/// assert!(body.starts_with("## Gilfoyle Code Review :white_check_mark:"));
/// assert!(body.contains("**Verdict:** Approved"));
/// ```
pub fn format_summary_comment(verdict: &ReviewVerdict, inline_count: usize) -> String {
    let mut lines = vec![
        format!("## Gilfoyle Code Review {}", verdict.assessment.marker()),
        String::new(),
        format!("**Verdict:** {}", verdict.assessment.label()),
        String::new(),
        "### Summary".to_string(),
        verdict.summary.clone(),
    ];

    if !verdict.general_comments.is_empty() {
        lines.push(String::new());
        lines.push("### General Comments".to_string());
        lines.extend(verdict.general_comments.iter().map(|c| format!("- {c}")));
    }

    if !verdict.referenced_standards.is_empty() {
        lines.push(String::new());
        lines.push("### Referenced Standards".to_string());
        lines.extend(verdict.referenced_standards.iter().map(|s| format!("- {s}")));
    }

    if inline_count > 0 {
        lines.push(String::new());
        lines.push(format!("### Inline Comments ({inline_count})"));
        lines.push("_See inline comments in the diff for details._".to_string());
    }

    if verdict.task_context_used {
        lines.push(String::new());
        lines.push("_Task context from Teamwork was considered in this review._".to_string());
    }

    lines.push(String::new());
    lines.push("---".to_string());
    lines.push("_Review by Gilfoyle AI Agent_".to_string());
    lines.join("\n")
}

/// General-comment text for an inline comment whose line is not in the diff.
pub fn format_unplaced(comment: &InlineComment) -> String {
    format!(
        "{} `{}:{}` ({} side, line not in the diff): {}",
        comment.severity.prefix(),
        comment.position.file_path,
        comment.position.line,
        comment.position.side,
        comment.text
    )
}

/// Follow-up note for inline comments that could not be posted.
pub fn format_partial_note(failed: usize, total: usize) -> String {
    format!(
        ":warning: **Incomplete review:** {failed} of {total} inline comments could not be \
         posted to the diff. The summary above is complete; re-request a review to retry."
    )
}

#[cfg(test)]
mod tests {
    use gilfoyle_core::{Assessment, LinePosition, Severity, Side};

    use super::*;

    #[test]
    fn full_summary_sections_in_order() {
        let verdict = ReviewVerdict {
            summary: "Two problems.".into(),
            assessment: Assessment::NeedsChanges,
            inline_comments: Vec::new(),
            general_comments: vec!["Add tests".into()],
            referenced_standards: vec!["docs/adr/002.md".into()],
            task_context_used: true,
        };
        let body = format_summary_comment(&verdict, 3);
        let order = [
            "## Gilfoyle Code Review :x:",
            "**Verdict:** Needs Changes",
            "### Summary",
            "### General Comments\n- Add tests",
            "### Referenced Standards\n- docs/adr/002.md",
            "### Inline Comments (3)",
            "_Task context from Teamwork",
            "_Review by Gilfoyle AI Agent_",
        ];
        let mut cursor = 0;
        for part in order {
            let found = body[cursor..].find(part).unwrap_or_else(|| panic!("missing {part}"));
            cursor += found + part.len();
        }
    }

    #[test]
    fn summary_only_when_no_comments() {
        let verdict = ReviewVerdict {
            summary: "Fine.".into(),
            assessment: Assessment::Approved,
            ..Default::default()
        };
        let body = format_summary_comment(&verdict, 0);
        assert!(!body.contains("Inline Comments"));
        assert!(!body.contains("General Comments"));
    }

    #[test]
    fn unplaced_comment_keeps_location_and_severity() {
        let comment = InlineComment {
            position: LinePosition {
                file_path: "src/a.py".into(),
                line: 99,
                side: Side::New,
                old_path: None,
                paired_line: None,
            },
            severity: Severity::Warning,
            text: "off-by-one".into(),
        };
        assert_eq!(
            format_unplaced(&comment),
            "**[WARNING]** :warning: `src/a.py:99` (new side, line not in the diff): off-by-one"
        );
    }

    #[test]
    fn partial_note_counts() {
        assert!(format_partial_note(1, 4).contains("1 of 4 inline comments"));
    }
}

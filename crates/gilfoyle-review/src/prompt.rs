use gilfoyle_core::{
    Assessment, Collaborator, GilfoyleError, InlineComment, LinePosition, ReviewVerdict, Severity,
    Side,
};
use serde::Deserialize;
use serde_json::Value;

use crate::ports::ReviewContext;

const SYSTEM_PROMPT: &str = "\
You are Gilfoyle, a senior software engineer and meticulous code reviewer. \
You are direct, technically precise and do not waste words on pleasantries.

Review the merge request for:
1. Security issues (injection, hardcoded secrets, missing authorization)
2. Bugs, logic errors and runtime failures
3. Language idioms and design patterns
4. Compliance with the project's coding standards, when available
5. Architectural impact, referencing relevant ADRs
6. Whether the change does what the linked task asks for, when task context is available

Guidelines:
- Focus on issues that matter; do not be pedantic
- Give actionable, specific feedback, with code examples where they help
- Only comment on lines that appear in the diff; use new-side line numbers for added \
or unchanged lines and old-side line numbers for removed lines
- Severity: error for security issues and bugs that will fail, warning for bad \
practices that should be fixed, suggestion for improvements, info for minor observations

Tools are available to read the coding standards, linked task details and ADRs. \
Use them when they would change your assessment.

When you are done, reply with only a JSON object:
{
  \"summary\": \"Concise summary of your findings\",
  \"overall_assessment\": \"approved\" | \"needs_changes\" | \"needs_discussion\",
  \"inline_comments\": [
    {
      \"file_path\": \"path/to/file.py\",
      \"line_number\": 42,
      \"line_type\": \"new\" | \"old\",
      \"comment\": \"What is wrong and how to fix it\",
      \"severity\": \"info\" | \"suggestion\" | \"warning\" | \"error\"
    }
  ],
  \"general_comments\": [\"Comments not tied to a line\"],
  \"referenced_standards\": [\"Standards or ADRs you relied on\"],
  \"task_context_used\": true | false
}";

/// Build the system prompt for the reviewing model.
///
/// # Examples
///
/// ```
/// use gilfoyle_review::prompt::build_system_prompt;
///
/// let prompt = build_system_prompt();
/// assert!(prompt.contains("Gilfoyle"));
/// assert!(prompt.contains("overall_assessment"));
/// ```
pub fn build_system_prompt() -> String {
    SYSTEM_PROMPT.to_string()
}

/// Build the user prompt describing the merge request under review.
pub fn build_review_prompt(context: &ReviewContext) -> String {
    let mr = &context.merge_request;
    let description = if mr.description.trim().is_empty() {
        "_No description provided._"
    } else {
        mr.description.trim()
    };
    let mut prompt = format!(
        "Please review this merge request:\n\n\
         ## MR Details\n\
         - **Title**: {}\n\
         - **Author**: {}\n\
         - **Source Branch**: {} -> {}\n\n\
         ## Description\n{description}\n",
        mr.title, mr.author, mr.source_branch, mr.target_branch
    );

    if !context.tasks.is_empty() {
        prompt.push_str("\n## Linked Tasks\n\n");
        for task in &context.tasks {
            prompt.push_str(&task.format_context());
            prompt.push('\n');
        }
    }
    if let Some(standards) = &context.standards {
        prompt.push_str(&format!("\n## Coding Standards\n\n{standards}\n"));
    }
    if let Some(adrs) = &context.adrs {
        prompt.push_str(&format!("\n{adrs}\n"));
    }

    prompt.push_str(&format!("\n## Diff\n\n```diff\n{}\n```\n", context.diff));
    prompt
}

#[derive(Deserialize)]
struct RawVerdict {
    summary: String,
    overall_assessment: String,
    #[serde(default)]
    inline_comments: Vec<RawInline>,
    #[serde(default)]
    general_comments: Vec<String>,
    #[serde(default)]
    referenced_standards: Vec<String>,
    #[serde(default)]
    task_context_used: bool,
}

#[derive(Deserialize)]
struct RawInline {
    file_path: String,
    line_number: Option<Value>,
    line_type: Option<String>,
    comment: String,
    severity: Option<String>,
}

/// Parse the model's final answer into a [`ReviewVerdict`].
///
/// Code fences around the JSON are tolerated. Inline entries without a
/// usable line number are kept as general comments rather than dropped;
/// unknown severities fall back to `suggestion`.
///
/// # Errors
///
/// Returns [`GilfoyleError::PermanentCollaborator`] when the answer is not a
/// verdict object or names an unknown assessment.
///
/// # Examples
///
/// ```
/// use gilfoyle_core::Assessment;
/// use gilfoyle_review::prompt::parse_verdict;
///
/// let verdict = parse_verdict(r#"{"summary":"LGTM","overall_assessment":"approved"}"#).unwrap();
/// assert_eq!(verdict.assessment, Assessment::Approved);
/// assert!(verdict.inline_comments.is_empty());
/// ```
pub fn parse_verdict(response: &str) -> Result<ReviewVerdict, GilfoyleError> {
    let cleaned = strip_code_fences(response);
    let raw: RawVerdict = serde_json::from_str(cleaned).map_err(|e| {
        GilfoyleError::PermanentCollaborator {
            collaborator: Collaborator::Reasoner,
            message: format!("unparseable verdict: {e}"),
        }
    })?;

    let assessment = match raw.overall_assessment.to_lowercase().as_str() {
        "approved" => Assessment::Approved,
        "needs_changes" => Assessment::NeedsChanges,
        "needs_discussion" => Assessment::NeedsDiscussion,
        other => {
            return Err(GilfoyleError::PermanentCollaborator {
                collaborator: Collaborator::Reasoner,
                message: format!("unknown overall_assessment: {other}"),
            })
        }
    };

    let mut general_comments = raw.general_comments;
    let mut inline_comments = Vec::new();
    for c in raw.inline_comments {
        let line = match &c.line_number {
            Some(Value::Number(n)) => n.as_u64().and_then(|l| u32::try_from(l).ok()),
            Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
            _ => None,
        };
        let severity = c
            .severity
            .as_deref()
            .and_then(|s| s.parse::<Severity>().ok())
            .unwrap_or_default();
        let Some(line) = line.filter(|l| *l > 0) else {
            general_comments.push(format!("`{}`: {}", c.file_path, c.comment));
            continue;
        };
        let side = c
            .line_type
            .as_deref()
            .and_then(|s| s.parse::<Side>().ok())
            .unwrap_or_default();
        inline_comments.push(InlineComment {
            position: LinePosition {
                file_path: c.file_path,
                line,
                side,
                old_path: None,
                paired_line: None,
            },
            severity,
            text: c.comment,
        });
    }

    Ok(ReviewVerdict {
        summary: raw.summary,
        assessment,
        inline_comments,
        general_comments,
        referenced_standards: raw.referenced_standards,
        task_context_used: raw.task_context_used,
    })
}

fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

/// Keep the first `max_lines` lines of `diff`, noting how many were dropped.
///
/// # Examples
///
/// ```
/// use gilfoyle_review::prompt::truncate_diff;
///
/// assert_eq!(truncate_diff("a\nb", 5), "a\nb");
/// assert_eq!(truncate_diff("a\nb\nc", 2), "a\nb\n\n... (truncated, 1 more lines)");
/// ```
pub fn truncate_diff(diff: &str, max_lines: usize) -> String {
    let total = diff.split('\n').count();
    if total <= max_lines {
        return diff.to_string();
    }
    let kept: Vec<&str> = diff.split('\n').take(max_lines).collect();
    format!(
        "{}\n\n... (truncated, {} more lines)",
        kept.join("\n"),
        total - max_lines
    )
}

#[cfg(test)]
mod tests {
    use gilfoyle_core::{MergeRequest, TaskDetail};

    use super::*;

    fn context() -> ReviewContext {
        ReviewContext {
            project_id: 3,
            merge_request: MergeRequest {
                iid: 7,
                title: "Add loader".into(),
                description: "Implements TW-42".into(),
                source_branch: "feature/loader".into(),
                target_branch: "main".into(),
                author: "dinesh".into(),
                web_url: String::new(),
            },
            diff: "+x = 1".into(),
            standards: None,
            adrs: None,
            tasks: Vec::new(),
        }
    }

    #[test]
    fn review_prompt_includes_mr_and_diff() {
        let prompt = build_review_prompt(&context());
        assert!(prompt.contains("**Title**: Add loader"));
        assert!(prompt.contains("feature/loader -> main"));
        assert!(prompt.contains("```diff\n+x = 1\n```"));
        assert!(!prompt.contains("Linked Tasks"));
    }

    #[test]
    fn review_prompt_includes_optional_sections() {
        let mut ctx = context();
        ctx.standards = Some("# Coding Standards from CONTRIBUTING.md\n\nUse black.".into());
        ctx.tasks.push(TaskDetail {
            id: 42,
            title: "Loader".into(),
            status: "new".into(),
            ..Default::default()
        });
        let prompt = build_review_prompt(&ctx);
        assert!(prompt.contains("## Task #42: Loader"));
        assert!(prompt.contains("Use black."));
    }

    #[test]
    fn parse_full_verdict() {
        let json = r#"```json
{
  "summary": "One risky change.",
  "overall_assessment": "needs_changes",
  "inline_comments": [
    {"file_path": "src/a.py", "line_number": 12, "line_type": "new",
     "comment": "strip() hides trailing data", "severity": "warning"},
    {"file_path": "src/b.py", "line_number": "4", "line_type": "old",
     "comment": "removed check", "severity": "ERROR"}
  ],
  "general_comments": ["Add tests"],
  "referenced_standards": ["CONTRIBUTING.md#testing"],
  "task_context_used": true
}
```"#;
        let verdict = parse_verdict(json).unwrap();
        assert_eq!(verdict.assessment, Assessment::NeedsChanges);
        assert_eq!(verdict.inline_comments.len(), 2);
        let first = &verdict.inline_comments[0];
        assert_eq!(first.position.file_path, "src/a.py");
        assert_eq!(first.position.line, 12);
        assert_eq!(first.position.side, Side::New);
        assert_eq!(first.severity, Severity::Warning);
        let second = &verdict.inline_comments[1];
        assert_eq!(second.position.side, Side::Old);
        assert_eq!(second.severity, Severity::Error);
        assert!(verdict.task_context_used);
    }

    #[test]
    fn unusable_line_numbers_become_general_comments() {
        let json = r#"{"summary":"s","overall_assessment":"needs_discussion","inline_comments":[
            {"file_path":"a.rs","line_number":0,"comment":"zero"},
            {"file_path":"b.rs","comment":"none"},
            {"file_path":"c.rs","line_number":3,"comment":"ok","severity":"critical"}
        ]}"#;
        let verdict = parse_verdict(json).unwrap();
        assert_eq!(verdict.inline_comments.len(), 1);
        assert_eq!(verdict.inline_comments[0].severity, Severity::Suggestion);
        assert_eq!(
            verdict.general_comments,
            vec!["`a.rs`: zero".to_string(), "`b.rs`: none".to_string()]
        );
    }

    #[test]
    fn garbage_is_a_permanent_error() {
        let err = parse_verdict("I think it looks fine").unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("unparseable verdict"));
    }

    #[test]
    fn unknown_assessment_is_rejected() {
        let err = parse_verdict(r#"{"summary":"s","overall_assessment":"ship_it"}"#).unwrap_err();
        assert!(err.to_string().contains("ship_it"));
    }

    #[test]
    fn truncation_counts_dropped_lines() {
        let diff = (1..=10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let out = truncate_diff(&diff, 4);
        assert!(out.starts_with("1\n2\n3\n4\n"));
        assert!(out.ends_with("(truncated, 6 more lines)"));
    }
}

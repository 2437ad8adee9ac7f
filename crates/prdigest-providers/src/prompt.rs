//! Deterministic prompt serialisation for the summarise stage.
//!
//! The same bundle always produces the same prompt, so summaries are
//! reproducible and cache-friendly on the provider side.

use prdigest_core::types::{ActivityBundle, PullRequest};

const MAX_DESCRIPTION_CHARS: usize = 200;

/// Render the full user message: instruction header plus one block per
/// pull request.
pub fn build_prompt(bundle: &ActivityBundle, instruction: &str) -> String {
    let mut out = String::new();
    out.push_str(instruction.trim());
    out.push_str("\n\nPull requests in this period:\n");
    for pr in &bundle.prs {
        out.push('\n');
        out.push_str(&render_pr(pr));
    }
    out
}

fn render_pr(pr: &PullRequest) -> String {
    let mut block = format!(
        "### {} — {} ({})\n",
        pr.repository,
        pr.title.trim(),
        pr.state
    );
    if let Some(created) = pr.created_at {
        block.push_str(&format!("Opened: {}\n", created.format("%Y-%m-%d")));
    }
    if !pr.html_url.is_empty() {
        block.push_str(&format!("URL: {}\n", pr.html_url));
    }
    if !pr.labels.is_empty() {
        block.push_str(&format!("Labels: {}\n", pr.labels.join(", ")));
    }
    if let Some(body) = pr.body.as_deref() {
        let desc = truncate_chars(body.trim(), MAX_DESCRIPTION_CHARS);
        if !desc.is_empty() {
            block.push_str(&format!("Description: {desc}\n"));
        }
    }
    for file in &pr.files {
        block.push_str(&format!(
            "File {} ({}, +{} -{})\n",
            file.filename, file.status, file.additions, file.deletions
        ));
        if let Some(patch) = file.patch.as_deref() {
            block.push_str(patch);
            block.push('\n');
        }
    }
    block
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use prdigest_core::types::ChangedFile;

    fn bundle() -> ActivityBundle {
        ActivityBundle {
            has_activity: true,
            prs: vec![PullRequest {
                number: 7,
                title: "Speed up sync".into(),
                state: "merged".into(),
                author_login: "octocat".into(),
                created_at: Some("2024-06-01T08:00:00Z".parse().unwrap()),
                updated_at: Some("2024-06-01T09:00:00Z".parse().unwrap()),
                html_url: "https://example.com/pull/7".into(),
                body: Some("b".repeat(300)),
                labels: vec!["perf".into()],
                repository: "acme/widgets".into(),
                files: vec![ChangedFile {
                    filename: "src/sync.rs".into(),
                    status: "modified".into(),
                    additions: 10,
                    deletions: 2,
                    patch: Some("@@ -1 +1 @@".into()),
                }],
            }],
        }
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let b = bundle();
        assert_eq!(
            build_prompt(&b, "Summarise the week"),
            build_prompt(&b, "Summarise the week")
        );
    }

    #[test]
    fn test_prompt_carries_pr_fields() {
        let text = build_prompt(&bundle(), "Summarise the week");
        assert!(text.contains("acme/widgets"));
        assert!(text.contains("Speed up sync"));
        assert!(text.contains("merged"));
        assert!(text.contains("https://example.com/pull/7"));
        assert!(text.contains("Labels: perf"));
        assert!(text.contains("src/sync.rs"));
        assert!(text.contains("@@ -1 +1 @@"));
    }

    #[test]
    fn test_description_truncated_to_200_chars() {
        let text = build_prompt(&bundle(), "x");
        let desc_line = text
            .lines()
            .find(|l| l.starts_with("Description: "))
            .unwrap();
        assert_eq!(
            desc_line.trim_end_matches("...").chars().count(),
            "Description: ".chars().count() + 200
        );
    }
}

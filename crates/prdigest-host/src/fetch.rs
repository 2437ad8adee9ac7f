//! Fetch stage — enumerate an author's pull requests on one
//! repository within a time window, with bounded per-file diffs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use prdigest_core::error::Result;
use prdigest_core::traits::{ActivitySource, FetchRequest};
use prdigest_core::types::{ActivityBundle, PullRequest};

use crate::client::{
    parse_changed_file, parse_pull_request, repository_from_search_item, HostClient, PAGE_SIZE,
};

/// Hard bounds on what one run may pull off the host.
#[derive(Debug, Clone, Copy)]
pub struct FetchCaps {
    pub max_prs: usize,
    pub max_files_per_pr: usize,
    pub max_patch_bytes: usize,
}

impl Default for FetchCaps {
    fn default() -> Self {
        Self {
            max_prs: 100,
            max_files_per_pr: 10,
            max_patch_bytes: 500,
        }
    }
}

/// The production fetch stage, backed by the host REST client.
pub struct HostActivitySource {
    client: HostClient,
    caps: FetchCaps,
}

impl HostActivitySource {
    pub fn new(client: HostClient) -> Self {
        Self {
            client,
            caps: FetchCaps::default(),
        }
    }

    pub fn with_caps(client: HostClient, caps: FetchCaps) -> Self {
        Self { client, caps }
    }

    /// Page through the repository's PR list (newest update first)
    /// until the window is exhausted, keeping the target author's PRs.
    async fn fetch_repo_prs(&self, req: &FetchRequest, token: &str) -> Result<Vec<PullRequest>> {
        let repository = format!("{}/{}", req.owner, req.name);
        let mut retained = Vec::new();
        let mut page = 1u32;

        loop {
            let raw = self
                .client
                .list_pull_requests(&req.owner, &req.name, token, page)
                .await?;
            let page_len = raw.len();

            let mut page_exhausts_window = false;
            for v in &raw {
                let Some(pr) = parse_pull_request(v, &repository) else {
                    continue;
                };
                let Some(updated) = pr.updated_at else {
                    continue;
                };
                // List is sorted by update desc; once we sink below the
                // window there is nothing older worth paging for.
                if updated < req.from {
                    page_exhausts_window = true;
                    break;
                }
                if matches_window(&pr, &req.author_login, req.from, req.to) {
                    retained.push(pr);
                    if retained.len() >= self.caps.max_prs {
                        break;
                    }
                }
            }

            if retained.len() >= self.caps.max_prs
                || page_exhausts_window
                || page_len < PAGE_SIZE as usize
            {
                break;
            }
            page += 1;
        }

        for pr in &mut retained {
            let files = self
                .client
                .list_pr_files(
                    &req.owner,
                    &req.name,
                    pr.number,
                    token,
                    self.caps.max_files_per_pr,
                )
                .await?;
            pr.files = files
                .iter()
                .take(self.caps.max_files_per_pr)
                .filter_map(parse_changed_file)
                .map(|mut f| {
                    f.patch = f
                        .patch
                        .take()
                        .map(|p| truncate_patch(&p, self.caps.max_patch_bytes));
                    f
                })
                .collect();
        }

        Ok(retained)
    }

    /// Credential-less path: host-wide author search. No diffs, public
    /// repositories only.
    async fn fetch_by_search(&self, req: &FetchRequest) -> Result<Vec<PullRequest>> {
        let items = self
            .client
            .search_author_prs(&req.author_login, req.from, req.to)
            .await?;
        Ok(items
            .iter()
            .filter_map(|v| {
                let repository = repository_from_search_item(v);
                parse_pull_request(v, &repository)
            })
            .take(self.caps.max_prs)
            .collect())
    }
}

#[async_trait]
impl ActivitySource for HostActivitySource {
    async fn fetch(&self, req: &FetchRequest) -> Result<ActivityBundle> {
        let prs = match &req.credential {
            Some(token) => self.fetch_repo_prs(req, token).await?,
            None => self.fetch_by_search(req).await?,
        };
        tracing::debug!(
            author = %req.author_login,
            repo = %format!("{}/{}", req.owner, req.name),
            count = prs.len(),
            "fetch stage complete"
        );
        Ok(ActivityBundle {
            has_activity: !prs.is_empty(),
            prs,
        })
    }
}

/// Cut a patch down to `max_bytes`, on a char boundary, with an
/// ellipsis marker when anything was dropped.
pub fn truncate_patch(patch: &str, max_bytes: usize) -> String {
    if patch.len() <= max_bytes {
        return patch.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !patch.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &patch[..end])
}

/// Window/author filter, split out for testing.
pub fn matches_window(
    pr: &PullRequest,
    author_login: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> bool {
    let Some(updated) = pr.updated_at else {
        return false;
    };
    updated >= from && updated <= to && pr.author_login.eq_ignore_ascii_case(author_login)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pr(author: &str, updated: &str) -> PullRequest {
        PullRequest {
            number: 1,
            title: "t".into(),
            state: "open".into(),
            author_login: author.into(),
            created_at: None,
            updated_at: Some(updated.parse().unwrap()),
            html_url: String::new(),
            body: None,
            labels: Vec::new(),
            repository: "acme/widgets".into(),
            files: Vec::new(),
        }
    }

    #[test]
    fn test_truncate_patch_short_passthrough() {
        assert_eq!(truncate_patch("diff", 500), "diff");
    }

    #[test]
    fn test_truncate_patch_appends_marker() {
        let patch = "x".repeat(600);
        let out = truncate_patch(&patch, 500);
        assert_eq!(out.len(), 503);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_truncate_patch_respects_char_boundary() {
        let patch = "é".repeat(300); // 2 bytes each
        let out = truncate_patch(&patch, 499);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 502);
    }

    #[test]
    fn test_window_filter_author_case_insensitive() {
        let from = "2024-06-01T00:00:00Z".parse().unwrap();
        let to = "2024-06-02T00:00:00Z".parse().unwrap();
        assert!(matches_window(
            &pr("OctoCat", "2024-06-01T12:00:00Z"),
            "octocat",
            from,
            to
        ));
        assert!(!matches_window(
            &pr("someone", "2024-06-01T12:00:00Z"),
            "octocat",
            from,
            to
        ));
    }

    #[test]
    fn test_window_filter_excludes_outside_updates() {
        let from = "2024-06-01T00:00:00Z".parse().unwrap();
        let to = "2024-06-02T00:00:00Z".parse().unwrap();
        assert!(!matches_window(
            &pr("octocat", "2024-05-31T23:59:59Z"),
            "octocat",
            from,
            to
        ));
        assert!(!matches_window(
            &pr("octocat", "2024-06-02T00:00:01Z"),
            "octocat",
            from,
            to
        ));
    }
}

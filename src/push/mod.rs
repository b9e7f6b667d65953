use reqwest::{Method, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::PushConfig;
use crate::format::{format_source, FormatMode, FormatOutcome, Formatter};
use crate::pr::types::{Branch, GitCommit};
use crate::pr::{self, ChangedFile, EventContext, GitHubClient, PrError};

#[derive(Debug, Error)]
pub enum PushError {
    #[error(transparent)]
    Pr(#[from] PrError),

    #[error("Refusing to push to {sha}: {reason}")]
    ConcurrentModification { sha: String, reason: String },

    #[error("Failed to create {step}: HTTP {status}: {body}")]
    Git {
        step: &'static str,
        status: u16,
        body: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    NothingToCommit,
    Pushed {
        branch: String,
        sha: String,
        files: Vec<String>,
    },
}

/// True when the comment body, trimmed and lower-cased, is exactly one of
/// the trigger phrases.
pub fn is_trigger_phrase(body: &str, phrases: &[String]) -> bool {
    let body = body.trim().to_lowercase();
    phrases.iter().any(|p| p.trim().to_lowercase() == body)
}

#[derive(Debug, Serialize)]
struct TreeEntry<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
}

/// Commit the formatter's output for `files` on top of the PR head and move
/// the PR branch to it.
///
/// The branch is located through the branches whose head is the PR's head
/// commit. Anything other than exactly one such branch means someone pushed
/// in the meantime (or the commit is shared), and nothing is written. That
/// branch must also be the PR's own head ref. The branch check is repeated
/// right before the commit is created; it narrows the window but is not a
/// compare-and-swap.
#[instrument(skip_all, fields(pr = ctx.pr_number))]
pub async fn push_formatting(
    client: &GitHubClient,
    ctx: &EventContext,
    formatter: &dyn Formatter,
    files: &[ChangedFile],
    config: &PushConfig,
) -> Result<PushOutcome, PushError> {
    let mut formatted = Vec::new();
    for file in files {
        let source = pr::fetch_content(client, file).await?;
        let result = format_source(formatter, &file.filename, &source, FormatMode::Apply).await;
        if let FormatOutcome::Formatted(text) = result.outcome {
            formatted.push((file.filename.clone(), text));
        }
    }
    if formatted.is_empty() {
        info!("nothing to commit");
        return Ok(PushOutcome::NothingToCommit);
    }

    let pull = pr::fetch_pull(client, ctx).await?;
    let head_sha = pull.head.sha;
    let head: GitCommit = client.get_json(&ctx.git_commit_url(&head_sha)).await?;
    let branch = sole_branch(client, ctx, &head_sha).await?;
    if !pull.head.branch.is_empty() && branch != pull.head.branch {
        warn!(pr_ref = %pull.head.branch, %branch, "head commit sits on another branch");
        return Err(PushError::ConcurrentModification {
            sha: head_sha,
            reason: format!(
                "it is the head of {} rather than the pull request's branch {}",
                branch, pull.head.branch
            ),
        });
    }
    debug!(%branch, head = %head_sha, tree = %head.tree.sha, "resolved push target");

    let entries: Vec<TreeEntry<'_>> = formatted
        .iter()
        .map(|(path, content)| TreeEntry {
            path,
            mode: "100644",
            kind: "blob",
            content,
        })
        .collect();
    let tree_sha = create(
        client,
        "tree",
        &ctx.git_trees_url(),
        &serde_json::json!({ "base_tree": head.tree.sha, "tree": entries }),
    )
    .await?;

    let recheck = sole_branch(client, ctx, &head_sha).await?;
    if recheck != branch {
        return Err(PushError::ConcurrentModification {
            sha: head_sha,
            reason: format!("branch changed from {} to {} while building the tree", branch, recheck),
        });
    }

    let commit_sha = create(
        client,
        "commit",
        &ctx.git_commits_url(),
        &serde_json::json!({
            "message": config.commit_message,
            "tree": tree_sha,
            "parents": [head_sha],
        }),
    )
    .await?;

    let response = client
        .send_json(
            Method::PATCH,
            &ctx.branch_ref_url(&branch),
            &serde_json::json!({ "sha": commit_sha, "force": false }),
        )
        .await?;
    if response.status != StatusCode::OK {
        return Err(PushError::Git {
            step: "ref update",
            status: response.status.as_u16(),
            body: response.body.to_string(),
        });
    }

    let files: Vec<String> = formatted.into_iter().map(|(name, _)| name).collect();
    info!(%branch, sha = %commit_sha, files = files.len(), "pushed formatting commit");
    Ok(PushOutcome::Pushed {
        branch,
        sha: commit_sha,
        files,
    })
}

/// The one branch whose head is `sha`.
async fn sole_branch(
    client: &GitHubClient,
    ctx: &EventContext,
    sha: &str,
) -> Result<String, PushError> {
    let mut branches: Vec<Branch> = client.get_json(&ctx.branches_where_head_url(sha)).await?;
    match branches.len() {
        1 => Ok(branches.remove(0).name),
        0 => Err(PushError::ConcurrentModification {
            sha: sha.to_string(),
            reason: "no branch has it as head; new commits have landed on the PR".to_string(),
        }),
        n => Err(PushError::ConcurrentModification {
            sha: sha.to_string(),
            reason: format!("it is the head of {} branches; the commit is shared", n),
        }),
    }
}

/// POST a git object and return its sha.
async fn create(
    client: &GitHubClient,
    step: &'static str,
    url: &str,
    body: &serde_json::Value,
) -> Result<String, PushError> {
    let response = client.send_json(Method::POST, url, body).await?;
    match (response.status, response.str_field("sha")) {
        (StatusCode::CREATED, Some(sha)) => Ok(sha.to_string()),
        (status, _) => Err(PushError::Git {
            step,
            status: status.as_u16(),
            body: response.body.to_string(),
        }),
    }
}

const MAX_SETTLE_DELAY: Duration = Duration::from_secs(30);

fn next_delay(delay: Duration) -> Duration {
    delay
        .checked_mul(2)
        .unwrap_or(MAX_SETTLE_DELAY)
        .min(MAX_SETTLE_DELAY)
}

/// Poll the PR until its head reads back as `sha`, doubling the delay each
/// time. Returns whether it did within the configured attempts.
#[instrument(skip_all, fields(%sha))]
pub async fn wait_for_head(
    client: &GitHubClient,
    ctx: &EventContext,
    sha: &str,
    config: &PushConfig,
) -> bool {
    let mut delay = config.settle_initial_delay().min(MAX_SETTLE_DELAY);
    for attempt in 1..=config.settle_attempts {
        tokio::time::sleep(delay).await;
        match pr::fetch_pull(client, ctx).await {
            Ok(pull) if pull.head.sha == sha => {
                debug!(attempt, "new head is visible");
                return true;
            }
            Ok(pull) => debug!(attempt, head = %pull.head.sha, "head not updated yet"),
            Err(err) => warn!(attempt, error = %err, "could not read pull request"),
        }
        delay = next_delay(delay);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::tests::FakeFormatter;
    use crate::pr::tests::{changed_file, test_context};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn phrases() -> Vec<String> {
        PushConfig::default().trigger_phrases
    }

    fn quick_config() -> PushConfig {
        PushConfig {
            settle_attempts: 2,
            settle_initial_delay_ms: 1,
            ..PushConfig::default()
        }
    }

    #[test]
    fn test_trigger_phrases() {
        assert!(is_trigger_phrase("Wool", &phrases()));
        assert!(is_trigger_phrase("BLACK", &phrases()));
        assert!(is_trigger_phrase("Please Format My Code", &phrases()));
        assert!(is_trigger_phrase("  wool\n", &phrases()));
        assert!(!is_trigger_phrase("please format the code", &phrases()));
        assert!(!is_trigger_phrase("wool please", &phrases()));
        assert!(!is_trigger_phrase("", &phrases()));
    }

    async fn mount_raw(server: &MockServer, name: &str, content: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/raw/{}", name)))
            .respond_with(ResponseTemplate::new(200).set_body_string(content))
            .mount(server)
            .await;
    }

    async fn mount_head(server: &MockServer, branches: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/repos/o/r/pulls/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "number": 7, "head": { "sha": "head1", "ref": "feature" }
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/git/commits/head1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sha": "head1", "tree": { "sha": "tree1" }
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/commits/head1/branches-where-head"))
            .respond_with(ResponseTemplate::new(200).set_body_json(branches))
            .mount(server)
            .await;
    }

    async fn forbid_writes(server: &MockServer) {
        for (verb, route) in [
            ("POST", "/repos/o/r/git/trees"),
            ("POST", "/repos/o/r/git/commits"),
            ("PATCH", "/repos/o/r/git/refs/heads/feature"),
        ] {
            Mock::given(method(verb))
                .and(path(route))
                .respond_with(ResponseTemplate::new(201))
                .expect(0)
                .mount(server)
                .await;
        }
    }

    #[tokio::test]
    async fn test_nothing_to_commit_makes_no_git_calls() {
        let server = MockServer::start().await;
        let ctx = test_context(&server.uri());
        mount_raw(&server, "a.py", "x = 1\n").await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/pulls/7"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        forbid_writes(&server).await;

        let files = vec![changed_file(&server.uri(), "a.py")];
        let outcome = push_formatting(
            &GitHubClient::new("t"),
            &ctx,
            &FakeFormatter::default(),
            &files,
            &quick_config(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, PushOutcome::NothingToCommit);
    }

    #[tokio::test]
    async fn test_refuses_when_no_branch_has_head() {
        let server = MockServer::start().await;
        let ctx = test_context(&server.uri());
        mount_raw(&server, "a.py", "x=1\n").await;
        mount_head(&server, serde_json::json!([])).await;
        forbid_writes(&server).await;

        let files = vec![changed_file(&server.uri(), "a.py")];
        let err = push_formatting(
            &GitHubClient::new("t"),
            &ctx,
            &FakeFormatter::with("x=1\n", "x = 1\n", ""),
            &files,
            &quick_config(),
        )
        .await
        .unwrap_err();
        match err {
            PushError::ConcurrentModification { reason, .. } => {
                assert!(reason.contains("new commits"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_refuses_when_several_branches_share_head() {
        let server = MockServer::start().await;
        let ctx = test_context(&server.uri());
        mount_raw(&server, "a.py", "x=1\n").await;
        mount_head(
            &server,
            serde_json::json!([{ "name": "feature" }, { "name": "copy" }]),
        )
        .await;
        forbid_writes(&server).await;

        let files = vec![changed_file(&server.uri(), "a.py")];
        let err = push_formatting(
            &GitHubClient::new("t"),
            &ctx,
            &FakeFormatter::with("x=1\n", "x = 1\n", ""),
            &files,
            &quick_config(),
        )
        .await
        .unwrap_err();
        match err {
            PushError::ConcurrentModification { reason, .. } => {
                assert!(reason.contains("shared"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_pushes_changed_files_only() {
        let server = MockServer::start().await;
        let ctx = test_context(&server.uri());
        mount_raw(&server, "a.py", "x=1\n").await;
        mount_raw(&server, "b.py", "y = 2\n").await;
        mount_head(&server, serde_json::json!([{ "name": "feature" }])).await;

        Mock::given(method("POST"))
            .and(path("/repos/o/r/git/trees"))
            .and(body_partial_json(serde_json::json!({
                "base_tree": "tree1",
                "tree": [{ "path": "a.py", "mode": "100644", "type": "blob", "content": "x = 1\n" }]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"sha": "tree2"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/o/r/git/commits"))
            .and(body_partial_json(serde_json::json!({
                "tree": "tree2", "parents": ["head1"]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"sha": "commit2"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/repos/o/r/git/refs/heads/feature"))
            .and(body_partial_json(serde_json::json!({ "sha": "commit2", "force": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let files = vec![
            changed_file(&server.uri(), "a.py"),
            changed_file(&server.uri(), "b.py"),
        ];
        let outcome = push_formatting(
            &GitHubClient::new("t"),
            &ctx,
            &FakeFormatter::with("x=1\n", "x = 1\n", ""),
            &files,
            &quick_config(),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Pushed {
                branch: "feature".to_string(),
                sha: "commit2".to_string(),
                files: vec!["a.py".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_tree_failure_stops_before_commit() {
        let server = MockServer::start().await;
        let ctx = test_context(&server.uri());
        mount_raw(&server, "a.py", "x=1\n").await;
        mount_head(&server, serde_json::json!([{ "name": "feature" }])).await;
        Mock::given(method("POST"))
            .and(path("/repos/o/r/git/trees"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({"message": "bad"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/o/r/git/commits"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let files = vec![changed_file(&server.uri(), "a.py")];
        let err = push_formatting(
            &GitHubClient::new("t"),
            &ctx,
            &FakeFormatter::with("x=1\n", "x = 1\n", ""),
            &files,
            &quick_config(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PushError::Git { step: "tree", status: 422, .. }));
    }

    #[tokio::test]
    async fn test_refuses_when_head_is_on_another_branch() {
        let server = MockServer::start().await;
        let ctx = test_context(&server.uri());
        mount_raw(&server, "a.py", "x=1\n").await;
        mount_head(&server, serde_json::json!([{ "name": "other" }])).await;
        forbid_writes(&server).await;
        Mock::given(method("PATCH"))
            .and(path("/repos/o/r/git/refs/heads/other"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let files = vec![changed_file(&server.uri(), "a.py")];
        let err = push_formatting(
            &GitHubClient::new("t"),
            &ctx,
            &FakeFormatter::with("x=1\n", "x = 1\n", ""),
            &files,
            &quick_config(),
        )
        .await
        .unwrap_err();
        match err {
            PushError::ConcurrentModification { reason, .. } => {
                assert!(reason.contains("other"));
                assert!(reason.contains("feature"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_refuses_when_branch_moves_after_tree() {
        let server = MockServer::start().await;
        let ctx = test_context(&server.uri());
        mount_raw(&server, "a.py", "x=1\n").await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/pulls/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "number": 7, "head": { "sha": "head1", "ref": "feature" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/git/commits/head1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sha": "head1", "tree": { "sha": "tree1" }
            })))
            .mount(&server)
            .await;
        // first lookup sees the branch, the re-check after the tree does not
        Mock::given(method("GET"))
            .and(path("/repos/o/r/commits/head1/branches-where-head"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([{ "name": "feature" }])),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/commits/head1/branches-where-head"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/o/r/git/trees"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"sha": "tree2"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/o/r/git/commits"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/repos/o/r/git/refs/heads/feature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let files = vec![changed_file(&server.uri(), "a.py")];
        let err = push_formatting(
            &GitHubClient::new("t"),
            &ctx,
            &FakeFormatter::with("x=1\n", "x = 1\n", ""),
            &files,
            &quick_config(),
        )
        .await
        .unwrap_err();
        match err {
            PushError::ConcurrentModification { sha, reason } => {
                assert_eq!(sha, "head1");
                assert!(reason.contains("new commits"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    async fn mount_tree(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/repos/o/r/git/trees"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"sha": "tree2"})))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_ref_alone() {
        let server = MockServer::start().await;
        let ctx = test_context(&server.uri());
        mount_raw(&server, "a.py", "x=1\n").await;
        mount_head(&server, serde_json::json!([{ "name": "feature" }])).await;
        mount_tree(&server).await;
        Mock::given(method("POST"))
            .and(path("/repos/o/r/git/commits"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({"message": "oops"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/repos/o/r/git/refs/heads/feature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let files = vec![changed_file(&server.uri(), "a.py")];
        let err = push_formatting(
            &GitHubClient::new("t"),
            &ctx,
            &FakeFormatter::with("x=1\n", "x = 1\n", ""),
            &files,
            &quick_config(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PushError::Git { step: "commit", status: 500, .. }));
    }

    #[tokio::test]
    async fn test_rejected_ref_update_is_error() {
        let server = MockServer::start().await;
        let ctx = test_context(&server.uri());
        mount_raw(&server, "a.py", "x=1\n").await;
        mount_head(&server, serde_json::json!([{ "name": "feature" }])).await;
        mount_tree(&server).await;
        Mock::given(method("POST"))
            .and(path("/repos/o/r/git/commits"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"sha": "commit2"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/repos/o/r/git/refs/heads/feature"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(serde_json::json!({"message": "Update is not a fast forward"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let files = vec![changed_file(&server.uri(), "a.py")];
        let err = push_formatting(
            &GitHubClient::new("t"),
            &ctx,
            &FakeFormatter::with("x=1\n", "x = 1\n", ""),
            &files,
            &quick_config(),
        )
        .await
        .unwrap_err();
        match err {
            PushError::Git { step, status, body } => {
                assert_eq!(step, "ref update");
                assert_eq!(status, 422);
                assert!(body.contains("fast forward"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_next_delay_is_capped() {
        assert_eq!(next_delay(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(next_delay(Duration::from_secs(20)), MAX_SETTLE_DELAY);
        assert_eq!(next_delay(Duration::MAX), MAX_SETTLE_DELAY);
    }

    #[tokio::test]
    async fn test_wait_for_head() {
        let server = MockServer::start().await;
        let ctx = test_context(&server.uri());
        Mock::given(method("GET"))
            .and(path("/repos/o/r/pulls/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "number": 7, "head": { "sha": "commit2", "ref": "feature" }
            })))
            .mount(&server)
            .await;

        let client = GitHubClient::new("t");
        assert!(wait_for_head(&client, &ctx, "commit2", &quick_config()).await);
        assert!(!wait_for_head(&client, &ctx, "other", &quick_config()).await);
    }
}

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use super::types::{EventContext, TriggerKind};
use crate::config::{CiEnv, Config, ConfigError};

#[derive(Debug, Deserialize)]
struct EventPayload {
    pull_request: Option<PayloadPull>,
    issue: Option<PayloadIssue>,
    comment: Option<PayloadComment>,
}

#[derive(Debug, Deserialize)]
struct PayloadPull {
    number: u64,
    url: String,
    issue_url: String,
}

#[derive(Debug, Deserialize)]
struct PayloadIssue {
    number: u64,
    url: String,
    /// Present only when the issue is a pull request.
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PayloadComment {
    #[serde(default)]
    body: String,
}

impl EventContext {
    /// Work out which pull request this run is about and every API URL the
    /// rest of the pipeline will need.
    ///
    /// Inside a workflow the event payload at `GITHUB_EVENT_PATH` supplies the
    /// URLs; otherwise they are built from `REPOSITORY`/`GITHUB_REPOSITORY`
    /// and `PR_NUMBER`.
    pub fn resolve(env: &CiEnv, config: &Config) -> Result<EventContext, ConfigError> {
        let token = config
            .github_token(env)
            .ok_or(ConfigError::MissingVar("GITHUB_TOKEN"))?;
        let trigger = match env.get("GITHUB_EVENT_NAME") {
            Some("issue_comment") => TriggerKind::Comment,
            _ => TriggerKind::PullRequest,
        };

        let payload_path = env.get("GITHUB_EVENT_PATH").map(Path::new);
        match payload_path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "reading event payload");
                let raw = std::fs::read_to_string(path)?;
                let payload: EventPayload = serde_json::from_str(&raw)?;
                from_payload(payload, trigger, token)
            }
            _ => from_env(env, config, trigger, token),
        }
    }
}

fn from_payload(
    payload: EventPayload,
    trigger: TriggerKind,
    token: String,
) -> Result<EventContext, ConfigError> {
    let (pr_number, pr_url, issue_url, comment_body) = match trigger {
        TriggerKind::PullRequest => {
            let pull = payload
                .pull_request
                .ok_or(ConfigError::IncompletePayload("pull_request"))?;
            (pull.number, pull.url, pull.issue_url, None)
        }
        TriggerKind::Comment => {
            let issue = payload
                .issue
                .ok_or(ConfigError::IncompletePayload("issue"))?;
            if issue.pull_request.is_none() {
                return Err(ConfigError::NotAPullRequest);
            }
            let pr_url = issue_url_to_pr_url(&issue.url)
                .ok_or(ConfigError::IncompletePayload("an issue URL"))?;
            let body = payload.comment.map(|c| c.body);
            (issue.number, pr_url, issue.url, body)
        }
    };

    let base_url = base_url_of(&pr_url).ok_or(ConfigError::IncompletePayload("a pull request URL"))?;
    let repository = base_url
        .rsplit_once("/repos/")
        .map(|(_, slug)| slug.to_string())
        .unwrap_or_default();

    Ok(EventContext {
        repository,
        pr_number,
        pr_files_url: format!("{}/files", pr_url),
        comments_url: format!("{}/comments", issue_url),
        base_url,
        pr_url,
        token,
        trigger,
        comment_body,
    })
}

fn from_env(
    env: &CiEnv,
    config: &Config,
    trigger: TriggerKind,
    token: String,
) -> Result<EventContext, ConfigError> {
    let repository = env
        .get("REPOSITORY")
        .or_else(|| env.get("GITHUB_REPOSITORY"))
        .ok_or(ConfigError::MissingVar("GITHUB_REPOSITORY"))?
        .trim_matches('/')
        .to_string();
    let raw_number = env
        .get("PR_NUMBER")
        .ok_or(ConfigError::MissingVar("PR_NUMBER"))?;
    let pr_number = raw_number
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidPrNumber(raw_number.to_string()))?;

    let base_url = format!("{}/repos/{}", config.api_url(env), repository);
    let pr_url = format!("{}/pulls/{}", base_url, pr_number);
    let comments_url = format!("{}/issues/{}/comments", base_url, pr_number);

    Ok(EventContext {
        repository,
        pr_number,
        pr_files_url: format!("{}/files", pr_url),
        base_url,
        pr_url,
        comments_url,
        token,
        trigger,
        comment_body: env.get("COMMENT_BODY").map(str::to_string),
    })
}

/// `.../issues/12` → `.../pulls/12`. Only the last `/issues/` segment is
/// replaced, so a repository called `issues` survives.
fn issue_url_to_pr_url(issue_url: &str) -> Option<String> {
    let idx = issue_url.rfind("/issues/")?;
    Some(format!(
        "{}/pulls/{}",
        &issue_url[..idx],
        &issue_url[idx + "/issues/".len()..]
    ))
}

/// Strip `/pulls/...` off a pull request API URL.
fn base_url_of(pr_url: &str) -> Option<String> {
    pr_url.rfind("/pulls/").map(|idx| pr_url[..idx].to_string())
}

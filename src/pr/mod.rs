pub mod client;
pub mod context;
pub mod types;

pub use client::GitHubClient;
pub use types::{ChangedFile, Comment, EventContext, PullInfo, TriggerKind};

use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum PrError {
    #[error("GitHub API request failed: {0}")]
    ApiRequest(#[from] reqwest::Error),

    #[error("Unexpected response from {url}: {body}")]
    UnexpectedShape { url: String, body: String },

    #[error("Failed to fetch {filename} from {url}: HTTP {status}")]
    Fetch {
        filename: String,
        url: String,
        status: u16,
    },

    #[error("GitHub API returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode GitHub response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// List every file the pull request touches.
#[instrument(skip_all, fields(pr = ctx.pr_number))]
pub async fn list_changed_files(
    client: &GitHubClient,
    ctx: &EventContext,
) -> Result<Vec<ChangedFile>, PrError> {
    let files: Vec<ChangedFile> = client.get_list(&ctx.pr_files_url).await?;
    debug!(files = files.len(), "listed changed files");
    Ok(files)
}

/// Keep the files worth formatting: matching extension, still present.
pub fn matching_files(files: &[ChangedFile], extension: &str) -> Vec<ChangedFile> {
    files
        .iter()
        .filter(|f| f.filename.ends_with(extension) && !f.is_removed())
        .cloned()
        .collect()
}

/// Download the raw content of one changed file.
#[instrument(skip_all, fields(file = %file.filename))]
pub async fn fetch_content(client: &GitHubClient, file: &ChangedFile) -> Result<String, PrError> {
    let (status, text) = client.get_text(&file.raw_url).await?;
    if status != reqwest::StatusCode::OK {
        return Err(PrError::Fetch {
            filename: file.filename.clone(),
            url: file.raw_url.clone(),
            status: status.as_u16(),
        });
    }
    debug!(bytes = text.len(), "fetched file content");
    Ok(text)
}

/// Read the pull request itself; the bot only needs its head commit.
#[instrument(skip_all, fields(pr = ctx.pr_number))]
pub async fn fetch_pull(client: &GitHubClient, ctx: &EventContext) -> Result<PullInfo, PrError> {
    client.get_json(&ctx.pr_url).await
}

#[instrument(skip_all, fields(pr = ctx.pr_number))]
pub async fn list_comments(
    client: &GitHubClient,
    ctx: &EventContext,
) -> Result<Vec<Comment>, PrError> {
    client.get_list(&ctx.comments_url).await
}

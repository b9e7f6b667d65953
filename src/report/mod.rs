pub mod comment;
pub mod types;

pub use types::{Report, StatusCheck, StatusState};

use colored::Colorize;
use reqwest::{Method, StatusCode};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::format::{format_source, FormatMode, FormatResult, Formatter};
use crate::pr::{self, ChangedFile, EventContext, GitHubClient, PrError};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Pr(#[from] PrError),

    #[error("Failed to {action} comment: HTTP {status}: {body}")]
    Comment {
        action: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to add status check ({url}): HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Check every file, publish the result as the bot comment and a commit
/// status, and return what was published.
///
/// Fetch failures abort the pass. Comment and status failures are logged and
/// the pass carries on, so a broken comment still leaves a status behind.
#[instrument(skip_all, fields(pr = ctx.pr_number, files = files.len()))]
pub async fn run(
    client: &GitHubClient,
    ctx: &EventContext,
    formatter: &dyn Formatter,
    files: &[ChangedFile],
    status_context: &str,
) -> Result<Report, ReportError> {
    let mut results = Vec::with_capacity(files.len());
    for file in files {
        let source = pr::fetch_content(client, file).await?;
        let result = format_source(formatter, &file.filename, &source, FormatMode::Check).await;
        debug!(file = %result.filename, mode = %result.mode, needs_formatting = result.needs_formatting(), "checked file");
        results.push(result);
    }

    let comment_body = comment::comment_text(&results);
    let comment_url = match upsert_comment(client, ctx, &comment_body).await {
        Ok(url) => Some(url),
        Err(err) => {
            error!(error = %err, "could not publish formatting comment");
            None
        }
    };

    let (state, description) = verdict(&results);
    let check = StatusCheck {
        state,
        target_url: comment_url.clone(),
        description: description.to_string(),
        context: status_context.to_string(),
    };
    let status_posted = match post_status(client, ctx, &check).await {
        Ok(()) => true,
        Err(err) => {
            error!(error = %err, "could not set status check");
            false
        }
    };

    Ok(build(ctx, &results, state, description, comment_body, comment_url, status_posted))
}

/// Only files that need formatting fail the check. Files the formatter could
/// not process are noted in the comment but do not change the state.
fn verdict(results: &[FormatResult]) -> (StatusState, &'static str) {
    if results.iter().any(FormatResult::needs_formatting) {
        (StatusState::Failure, "Needs formatting")
    } else {
        (StatusState::Success, "Very stylish")
    }
}

fn build(
    ctx: &EventContext,
    results: &[FormatResult],
    state: StatusState,
    description: &str,
    comment_body: String,
    comment_url: Option<String>,
    status_posted: bool,
) -> Report {
    let names = |pred: fn(&FormatResult) -> bool| -> Vec<String> {
        results
            .iter()
            .filter(|r| pred(r))
            .map(|r| r.filename.clone())
            .collect()
    };
    Report {
        pr_number: ctx.pr_number,
        files_checked: results.iter().map(|r| r.filename.clone()).collect(),
        needs_formatting: names(FormatResult::needs_formatting),
        tool_failures: names(FormatResult::tool_failed),
        state,
        description: description.to_string(),
        comment_body,
        comment_url,
        status_posted,
    }
}

/// Edit the bot's existing comment, or create one if there is none.
/// Returns the comment's permalink.
#[instrument(skip_all)]
async fn upsert_comment(
    client: &GitHubClient,
    ctx: &EventContext,
    body: &str,
) -> Result<String, ReportError> {
    let comments = pr::list_comments(client, ctx).await?;
    let payload = serde_json::json!({ "body": body });

    let old = comment::find_old_comment(&comments);
    let (action, response, expected) = match old {
        None => {
            debug!("creating bot comment");
            let response = client
                .send_json(Method::POST, &ctx.comments_url, &payload)
                .await?;
            ("write", response, StatusCode::CREATED)
        }
        Some(old) => {
            debug!(comment_id = old.id, "updating bot comment");
            let response = client.send_json(Method::PATCH, &old.url, &payload).await?;
            ("edit", response, StatusCode::OK)
        }
    };

    if response.status != expected {
        return Err(ReportError::Comment {
            action,
            status: response.status.as_u16(),
            body: response.body.to_string(),
        });
    }
    let html_url = response
        .str_field("html_url")
        .or(old.map(|c| c.html_url.as_str()))
        .unwrap_or_default()
        .to_string();
    info!(url = %html_url, "published formatting comment");
    Ok(html_url)
}

/// Attach the status to the PR's current head commit.
#[instrument(skip_all, fields(state = %check.state))]
async fn post_status(
    client: &GitHubClient,
    ctx: &EventContext,
    check: &StatusCheck,
) -> Result<(), ReportError> {
    let pull = pr::fetch_pull(client, ctx).await?;
    let url = ctx.statuses_url(&pull.head.sha);
    let response = client.send_json(Method::POST, &url, check).await?;
    if response.status != StatusCode::CREATED {
        return Err(ReportError::Status {
            url,
            status: response.status.as_u16(),
            body: response.body.to_string(),
        });
    }
    info!(sha = %pull.head.sha, "set status check");
    Ok(())
}

/// Print the terminal summary and, when a path is given, also write the
/// comment body there as Markdown.
#[instrument(skip(report), fields(pr = report.pr_number, state = %report.state))]
pub fn output(report: &Report, output_path: Option<&Path>) -> Result<(), ReportError> {
    print_terminal_report(report);
    if let Some(path) = output_path {
        debug!(path = %path.display(), "writing comment body to file");
        std::fs::write(path, &report.comment_body)?;
    }
    Ok(())
}

fn print_terminal_report(report: &Report) {
    println!();
    println!("PR #{}: checked {} file(s)", report.pr_number, report.files_checked.len());
    for file in &report.files_checked {
        let mark = if report.needs_formatting.contains(file) {
            "needs formatting".red().bold()
        } else if report.tool_failures.contains(file) {
            "formatter failed".yellow().bold()
        } else {
            "ok".green().bold()
        };
        println!("  • {} ({})", file, mark);
    }
    if report.comment_url.is_none() {
        warn!("no comment was published");
    }
    if !report.status_posted {
        warn!("no status check was set");
    }
    let state = match report.state {
        StatusState::Success => report.description.green().bold(),
        StatusState::Failure => report.description.red().bold(),
    };
    println!();
    println!("═══ {} ═══", state);
    println!();
}

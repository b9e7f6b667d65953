use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::format::Formatter;
use crate::pr::{self, EventContext, GitHubClient, PrError, TriggerKind};
use crate::push::{self, PushOutcome};
use crate::report::{self, Report, ReportError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unable to get PR files: {0}")]
    Files(#[from] PrError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

#[derive(Debug)]
pub enum RunOutcome {
    /// No changed file matched the extension; nothing was posted.
    NoMatchingFiles,
    Reported(Report),
}

impl RunOutcome {
    /// Process exit code: 1 when the final report found formatting problems.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Reported(report) if !report.passed() => 1,
            _ => 0,
        }
    }
}

/// Check the PR and report; if a trigger comment asked for it, push the
/// formatting and report again.
pub async fn run(
    client: &GitHubClient,
    ctx: &EventContext,
    config: &Config,
    formatter: &dyn Formatter,
    allow_push: bool,
) -> Result<RunOutcome, PipelineError> {
    let outcome = check_and_report(client, ctx, config, formatter).await?;
    if !matches!(outcome, RunOutcome::Reported(_)) || !push_requested(ctx, config, allow_push) {
        return Ok(outcome);
    }

    info!("formatting requested by comment");
    let files = matched_files(client, ctx, config).await?;
    match push::push_formatting(client, ctx, formatter, &files, &config.push).await {
        Ok(PushOutcome::Pushed { branch, sha, files }) => {
            info!(%branch, %sha, files = ?files, "waiting for the new head to be visible");
            if !push::wait_for_head(client, ctx, &sha, &config.push).await {
                warn!(%sha, "new commit not visible yet; reporting anyway");
            }
            Ok(check_and_report(client, ctx, config, formatter).await?)
        }
        Ok(PushOutcome::NothingToCommit) => Ok(outcome),
        Err(err) => {
            error!(error = %err, "not pushing formatting commit");
            Ok(outcome)
        }
    }
}

fn push_requested(ctx: &EventContext, config: &Config, allow_push: bool) -> bool {
    allow_push
        && ctx.trigger == TriggerKind::Comment
        && ctx
            .comment_body
            .as_deref()
            .is_some_and(|body| push::is_trigger_phrase(body, &config.push.trigger_phrases))
}

async fn matched_files(
    client: &GitHubClient,
    ctx: &EventContext,
    config: &Config,
) -> Result<Vec<pr::ChangedFile>, PrError> {
    let files = pr::list_changed_files(client, ctx).await?;
    Ok(pr::matching_files(&files, &config.formatter.extension))
}

async fn check_and_report(
    client: &GitHubClient,
    ctx: &EventContext,
    config: &Config,
    formatter: &dyn Formatter,
) -> Result<RunOutcome, PipelineError> {
    let files = matched_files(client, ctx, config).await?;
    if files.is_empty() {
        info!(extension = %config.formatter.extension, "no matching files to check");
        return Ok(RunOutcome::NoMatchingFiles);
    }
    let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
    info!(files = ?names, "checking files");

    let report = report::run(
        client,
        ctx,
        formatter,
        &files,
        &config.github.status_context,
    )
    .await?;
    Ok(RunOutcome::Reported(report))
}

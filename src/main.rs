mod config;
mod format;
mod pipeline;
mod pr;
mod push;
mod report;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, info_span};
use tracing_subscriber::EnvFilter;

/// wool: checks the Python files of a GitHub pull request against `black`,
/// comments the diff on the PR and sets a status check. Commenting one of the
/// trigger phrases on the PR makes it push the formatting itself.
#[derive(Parser, Debug)]
#[command(name = "wool", version, about)]
struct Cli {
    /// Configuration file (defaults to .wool.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write the comment body to this markdown file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Never push a formatting commit, even when a comment asks for one
    #[arg(long)]
    no_push: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let env = config::CiEnv::capture();

    info!("loading configuration");
    let config = config::Config::load(cli.config.as_deref())?;

    let ctx = match pr::EventContext::resolve(&env, &config) {
        Ok(ctx) => ctx,
        Err(config::ConfigError::NotAPullRequest) => {
            info!("comment is not on a pull request; nothing to do");
            return Ok(ExitCode::SUCCESS);
        }
        Err(err) => return Err(err.into()),
    };

    let _main_span = info_span!("wool", repo = %ctx.repository, pr = ctx.pr_number).entered();
    info!(pr_url = %ctx.pr_url, "running wool");
    debug!(trigger = ?ctx.trigger, comment = ?ctx.comment_body, "resolved event context");

    let client = pr::GitHubClient::new(ctx.token.clone());
    let formatter = format::BlackFormatter::new(&config.formatter);

    let outcome = pipeline::run(&client, &ctx, &config, &formatter, !cli.no_push).await?;
    if let pipeline::RunOutcome::Reported(report) = &outcome {
        report::output(report, cli.output.as_deref())?;
        info!(state = %report.state, "done");
    }

    Ok(ExitCode::from(outcome.exit_code()))
}

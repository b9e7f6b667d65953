pub mod black;

pub use black::BlackFormatter;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to the formatter: {0}")]
    Io(#[from] std::io::Error),

    #[error("{command} exited with {code}: {stderr}")]
    Exit {
        command: String,
        code: String,
        stderr: String,
    },

    #[error("Formatter output is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    /// Report a unified diff only.
    Check,
    /// Produce the fully reformatted text.
    Apply,
}

impl std::fmt::Display for FormatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatMode::Check => write!(f, "check"),
            FormatMode::Apply => write!(f, "apply"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatOutcome {
    Unchanged,
    /// Diff body, header lines already stripped.
    Diff(String),
    Formatted(String),
    ToolFailed(String),
}

#[derive(Debug, Clone)]
pub struct FormatResult {
    pub filename: String,
    pub mode: FormatMode,
    pub outcome: FormatOutcome,
}

impl FormatResult {
    pub fn needs_formatting(&self) -> bool {
        matches!(
            self.outcome,
            FormatOutcome::Diff(_) | FormatOutcome::Formatted(_)
        )
    }

    pub fn tool_failed(&self) -> bool {
        matches!(self.outcome, FormatOutcome::ToolFailed(_))
    }
}

/// A source formatter driven over stdin/stdout.
/// Implementations return the tool's raw standard output for the given mode.
#[async_trait]
pub trait Formatter: Send + Sync {
    fn name(&self) -> &str;

    async fn format(&self, source: &str, mode: FormatMode) -> Result<String, FormatError>;
}

/// Run the formatter over one file and classify what came back.
pub async fn format_source(
    formatter: &dyn Formatter,
    filename: &str,
    source: &str,
    mode: FormatMode,
) -> FormatResult {
    let outcome = match formatter.format(source, mode).await {
        Ok(output) => classify(source, &output, mode),
        Err(err) => {
            warn!(file = %filename, formatter = formatter.name(), %mode, error = %err, "formatter failed");
            FormatOutcome::ToolFailed(err.to_string())
        }
    };
    FormatResult {
        filename: filename.to_string(),
        mode,
        outcome,
    }
}

fn classify(source: &str, output: &str, mode: FormatMode) -> FormatOutcome {
    match mode {
        FormatMode::Check => {
            let body = strip_diff_header(output);
            if body.trim().is_empty() {
                FormatOutcome::Unchanged
            } else {
                FormatOutcome::Diff(body.to_string())
            }
        }
        FormatMode::Apply => {
            if output == source {
                FormatOutcome::Unchanged
            } else if output.is_empty() && !source.trim().is_empty() {
                FormatOutcome::ToolFailed("formatter produced no output".to_string())
            } else {
                FormatOutcome::Formatted(output.to_string())
            }
        }
    }
}

/// Drop the `--- STDIN` / `+++ STDOUT` lines: they name placeholders, not
/// the file being checked.
fn strip_diff_header(diff: &str) -> &str {
    let mut rest = diff;
    for _ in 0..2 {
        rest = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }
    rest
}

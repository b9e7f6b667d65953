use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{FormatError, FormatMode, Formatter};
use crate::config::FormatterConfig;

/// Runs `black` (or whatever command is configured) over stdin.
pub struct BlackFormatter {
    command: String,
    check_args: Vec<String>,
    apply_args: Vec<String>,
}

impl BlackFormatter {
    pub fn new(config: &FormatterConfig) -> Self {
        Self {
            command: config.command.clone(),
            check_args: config.check_args.clone(),
            apply_args: config.apply_args.clone(),
        }
    }
}

#[async_trait]
impl Formatter for BlackFormatter {
    fn name(&self) -> &str {
        &self.command
    }

    async fn format(&self, source: &str, mode: FormatMode) -> Result<String, FormatError> {
        let args = match mode {
            FormatMode::Check => &self.check_args,
            FormatMode::Apply => &self.apply_args,
        };
        debug!(command = %self.command, ?args, "spawning formatter");

        let mut child = Command::new(&self.command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FormatError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        // stdin is fed while stdout/stderr drain; a formatter that writes
        // before it has read everything would otherwise block on a full pipe
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(source.as_bytes()).await?;
                // dropping stdin closes the pipe so the formatter sees EOF
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        if !output.status.success() {
            return Err(FormatError::Exit {
                command: self.command.clone(),
                code: output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "a signal".to_string()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        fed?;
        Ok(String::from_utf8(output.stdout)?)
    }
}

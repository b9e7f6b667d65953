use serde::Serialize;

/// Commit status state posted for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Success,
    Failure,
}

impl std::fmt::Display for StatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusState::Success => write!(f, "success"),
            StatusState::Failure => write!(f, "failure"),
        }
    }
}

/// Body of `POST /repos/{owner}/{repo}/statuses/{sha}`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusCheck {
    pub state: StatusState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    pub description: String,
    pub context: String,
}

/// What one reporter pass found and published.
#[derive(Debug, Clone)]
pub struct Report {
    pub pr_number: u64,
    pub files_checked: Vec<String>,
    /// Files whose formatted form differs, in file-list order.
    pub needs_formatting: Vec<String>,
    /// Files the formatter could not process.
    pub tool_failures: Vec<String>,
    pub state: StatusState,
    pub description: String,
    /// Markdown posted as the bot comment.
    pub comment_body: String,
    /// Permalink of the bot comment, when the comment write succeeded.
    pub comment_url: Option<String>,
    pub status_posted: bool,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.state == StatusState::Success
    }
}

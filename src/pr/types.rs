use serde::Deserialize;

/// What kind of CI event started this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    PullRequest,
    Comment,
}

/// Everything the pipeline needs to know about the pull request it acts on.
/// Built once per run by `EventContext::resolve` and never modified.
#[derive(Debug, Clone)]
pub struct EventContext {
    /// `owner/repo`
    pub repository: String,
    pub pr_number: u64,
    /// `.../repos/{owner}/{repo}`
    pub base_url: String,
    pub pr_url: String,
    pub comments_url: String,
    pub pr_files_url: String,
    pub token: String,
    pub trigger: TriggerKind,
    /// Raw body of the comment that triggered the run, if any.
    pub comment_body: Option<String>,
}

impl EventContext {
    pub fn statuses_url(&self, sha: &str) -> String {
        format!("{}/statuses/{}", self.base_url, sha)
    }

    pub fn git_commit_url(&self, sha: &str) -> String {
        format!("{}/git/commits/{}", self.base_url, sha)
    }

    pub fn branches_where_head_url(&self, sha: &str) -> String {
        format!("{}/commits/{}/branches-where-head", self.base_url, sha)
    }

    pub fn git_trees_url(&self) -> String {
        format!("{}/git/trees", self.base_url)
    }

    pub fn git_commits_url(&self) -> String {
        format!("{}/git/commits", self.base_url)
    }

    pub fn branch_ref_url(&self, branch: &str) -> String {
        format!("{}/git/refs/heads/{}", self.base_url, branch)
    }
}

/// A file touched by the pull request, as listed by the files endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub raw_url: String,
    #[serde(default)]
    pub status: String,
}

impl ChangedFile {
    pub fn is_removed(&self) -> bool {
        self.status == "removed"
    }
}

/// An issue comment on the pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub id: u64,
    /// API URL, used to edit the comment.
    pub url: String,
    pub html_url: String,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitRef {
    pub sha: String,
    #[serde(rename = "ref", default)]
    pub branch: String,
}

/// The subset of the pull request object the bot reads.
#[derive(Debug, Clone, Deserialize)]
pub struct PullInfo {
    pub head: CommitRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShaOnly {
    pub sha: String,
}

/// A git commit object as returned by the git data API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitCommit {
    pub tree: ShaOnly,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Branch {
    pub name: String,
}

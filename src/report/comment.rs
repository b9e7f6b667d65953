use crate::format::{FormatOutcome, FormatResult};
use crate::pr::Comment;

/// Visible sentence closing every bot comment. Older comments carry only this.
pub const SIGNATURE: &str = "This formatting comment was generated automatically by a script in \
     [uc-cdis/wool](https://github.com/uc-cdis/wool).";

/// Hidden marker identifying the bot comment.
pub const MARKER: &str = "<!-- wool:format-report -->";

const BLACK_LINK: &str = "[`black`](https://github.com/ambv/black)";

/// Compose the comment body for a set of check-mode results.
pub fn comment_text(results: &[FormatResult]) -> String {
    let diff = labeled_diffs(results);
    let mut body = if diff.is_empty() {
        format!(
            "The style in this PR agrees with {}. :heavy_check_mark:\n",
            BLACK_LINK
        )
    } else {
        format!(
            "This PR contains code that is not formatted correctly according to {}. \
             Run `black` on your code before merging.\n\
             \n\
             <details>\n\
             <summary>Expand the full diff to see formatting changes</summary>\n\
             \n\
             ```diff\n\
             {}\
             ```\n\
             </details></br>\n",
            BLACK_LINK, diff
        )
    };

    let failed: Vec<String> = results
        .iter()
        .filter(|r| r.tool_failed())
        .map(|r| format!("`{}`", r.filename))
        .collect();
    if !failed.is_empty() {
        body.push_str(&format!(
            "\n:warning: `black` could not check {}.\n",
            failed.join(", ")
        ));
    }

    body.push('\n');
    body.push_str(MARKER);
    body.push('\n');
    body.push_str(SIGNATURE);
    body
}

/// `--- {file}` / `+++ blackened` followed by the diff, for every file that
/// has one.
fn labeled_diffs(results: &[FormatResult]) -> String {
    let mut out = String::new();
    for result in results {
        if let FormatOutcome::Diff(diff) = &result.outcome {
            out.push_str(&format!("--- {}\n+++ blackened\n", result.filename));
            out.push_str(diff);
            if !diff.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    out
}

pub fn is_bot_comment(body: &str) -> bool {
    body.contains(MARKER) || body.contains(SIGNATURE)
}

/// The bot's earlier comment on the PR, if it left one.
pub fn find_old_comment(comments: &[Comment]) -> Option<&Comment> {
    comments
        .iter()
        .find(|c| c.body.as_deref().is_some_and(is_bot_comment))
}

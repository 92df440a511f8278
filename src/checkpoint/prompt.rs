// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Prompt construction for generation, continuation and merge repair.

use crate::transport::ChatMessage;
use crate::workspace::MergeFailureKind;

/// Default cap on the diff included in a continuation prompt.
pub const DEFAULT_DIFF_CHAR_LIMIT: usize = 8000;

/// Cap `diff` at `limit` characters, noting how much was cut.
pub fn truncate_diff(diff: &str, limit: usize) -> String {
    let total = diff.chars().count();
    if total <= limit {
        return diff.to_string();
    }
    let kept: String = diff.chars().take(limit).collect();
    format!(
        "{}\n... (diff truncated, {} more characters)",
        kept.trim_end(),
        total - limit
    )
}

fn render_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("- {}: {}", m.author, m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt for the first run of a session.
pub fn build_initial_prompt(task: &str, context: &[ChatMessage]) -> String {
    let mut prompt = format!("## Task\n\n{}\n", task.trim());
    if !context.is_empty() {
        prompt.push_str("\n## Conversation context\n\n");
        prompt.push_str(&render_messages(context));
        prompt.push('\n');
    }
    prompt.push_str(
        "\nWork in the current directory. Make the change completely; your edits \
         are committed automatically when you finish, so do not run git yourself.\n",
    );
    prompt
}

/// Prompt that resumes a session after checkpoint `number`.
pub fn build_continuation_prompt(
    task: &str,
    number: u32,
    diff: &str,
    diff_limit: usize,
    new_messages: &[ChatMessage],
) -> String {
    let mut prompt = format!("## Original task\n\n{}\n", task.trim());

    prompt.push_str(&format!(
        "\n## Progress so far (checkpoint {number})\n\n\
         The changes below are ALREADY COMMITTED. Do not redo them; build on them.\n\n"
    ));
    if diff.trim().is_empty() {
        prompt.push_str("(no file changes yet)\n");
    } else {
        prompt.push_str("```diff\n");
        prompt.push_str(&truncate_diff(diff, diff_limit));
        prompt.push_str("\n```\n");
    }

    if !new_messages.is_empty() {
        prompt.push_str("\n## New instructions\n\nThese arrived while you were working. Fold them in:\n\n");
        prompt.push_str(&render_messages(new_messages));
        prompt.push('\n');
    }

    prompt.push_str("\nContinue from the current state of the files and finish the task.\n");
    prompt
}

/// Prompt for repairing a failed merge.
pub fn build_repair_prompt(
    kind: MergeFailureKind,
    details: &str,
    branch: &str,
    default_branch: &str,
    task: &str,
) -> String {
    let details = truncate_diff(details.trim(), 4000);
    match kind {
        MergeFailureKind::MergeConflict => format!(
            "## Merge conflict\n\n\
             Branch `{branch}` conflicts with `{default_branch}`. You are in the \
             branch's worktree. Run `git merge {default_branch}`, resolve every \
             conflict so both sides' intent is kept, and commit the merge.\n\n\
             The branch was working on:\n\n{task}\n\n\
             Git reported:\n\n```\n{details}\n```\n"
        ),
        MergeFailureKind::LocalChanges => format!(
            "## Uncommitted changes blocked a merge\n\n\
             Merging `{branch}` into `{default_branch}` failed because tracked \
             files in this checkout had uncommitted changes. The checkout has \
             since been reset to the last good commit of `{default_branch}`, so \
             those edits are no longer in the working tree. Do not edit tracked \
             files or commit. Check that `{default_branch}` is checked out and \
             that no rebase, merge or stale `.git/index.lock` is left over; \
             clear any of those so the merge can be retried.\n\n\
             Git reported:\n\n```\n{details}\n```\n"
        ),
        MergeFailureKind::UntrackedFiles => format!(
            "## Untracked files block a merge\n\n\
             Merging `{branch}` into `{default_branch}` would overwrite untracked \
             files in this checkout. Move the listed files out of the way (for \
             example into a `.merge-backup/` directory) so the merge can proceed.\n\n\
             Git reported:\n\n```\n{details}\n```\n"
        ),
        MergeFailureKind::Other => format!(
            "## Merge failed\n\n\
             Merging `{branch}` into `{default_branch}` failed for an unexpected \
             reason. You are in the branch's worktree. Diagnose the problem and \
             fix whatever on this branch prevents a clean merge, then commit.\n\n\
             The branch was working on:\n\n{task}\n\n\
             Git reported:\n\n```\n{details}\n```\n"
        ),
    }
}

/// Whether a repair for `kind` runs in the main repository rather than the
/// session worktree.
pub fn repairs_in_main_repo(kind: MergeFailureKind) -> bool {
    matches!(
        kind,
        MergeFailureKind::LocalChanges | MergeFailureKind::UntrackedFiles
    )
}

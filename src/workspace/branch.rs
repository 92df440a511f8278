// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Branch naming for session workspaces.
//!
//! Branches look like `arbiter/<slug>-<suffix>` where the slug is derived from
//! the task description (lowercased, hyphenated, at most 30 characters) and the
//! suffix is a base36 millisecond timestamp.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Default branch prefix for session branches.
pub const DEFAULT_BRANCH_PREFIX: &str = "arbiter/";

/// Maximum length of the slug portion of a branch name.
pub const MAX_SLUG_LEN: usize = 30;

/// Turn a task description into a branch-safe slug.
///
/// Runs of non-alphanumeric characters collapse to a single `-`; the result is
/// trimmed of dashes and cut to [`MAX_SLUG_LEN`] characters.
pub fn slugify(description: &str) -> String {
    let mut slug = String::with_capacity(description.len());
    let mut last_dash = true;
    for c in description.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }

    let mut slug: String = slug.trim_matches('-').chars().take(MAX_SLUG_LEN).collect();
    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}

/// Encode a number in lowercase base36.
pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Produces branch names with strictly increasing timestamp suffixes.
///
/// Two sessions created in the same millisecond still get distinct names.
#[derive(Debug)]
pub struct BranchNamer {
    prefix: String,
    last_millis: AtomicU64,
}

impl BranchNamer {
    /// Create a namer using `prefix` (e.g. `arbiter/`).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            last_millis: AtomicU64::new(0),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn next_millis(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut current = self.last_millis.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self.last_millis.compare_exchange_weak(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }

    /// Derive a fresh branch name for a task description.
    pub fn branch_for(&self, description: &str) -> String {
        format!(
            "{}{}-{}",
            self.prefix,
            slugify(description),
            to_base36(self.next_millis())
        )
    }
}

impl Default for BranchNamer {
    fn default() -> Self {
        Self::new(DEFAULT_BRANCH_PREFIX)
    }
}

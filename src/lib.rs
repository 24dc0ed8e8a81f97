pub mod classify;
pub mod cli;
pub mod context;
pub mod editor;
pub mod executor;
pub mod git;
pub mod guard;
pub mod highlight;
pub mod interrupt;
pub mod logging;
pub mod parser;
pub mod plan;
pub mod rollback;
pub mod state;
pub mod tui;

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Identifier of a diff fragment, sequential from 1 in diff order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(pub usize);

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a goal produced by a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoalId(pub usize);

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a commit entry. Stable for the lifetime of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub usize);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a fragment stands in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentStatus {
    Unassigned,
    Assigned,
    Discarded,
}

/// One indivisible hunk extracted from a diff.
///
/// `patch` holds the exact bytes of a complete patch for this hunk alone (file
/// header plus one `@@` block), so it can be fed to `git apply --cached` as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub id: FragmentId,
    pub file_path: PathBuf,
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub patch: Vec<u8>,
    pub content_hash: String,
    pub status: FragmentStatus,
}

impl Fragment {
    /// The `@@ -a,b +c,d @@` line of this fragment.
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }

    /// The patch for display. Invalid UTF-8 shows as replacement characters.
    pub fn patch_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.patch)
    }

    /// Lines of the hunk body (everything after the `@@` line), without line endings.
    pub fn body_lines(&self) -> Vec<String> {
        self.patch_text()
            .lines()
            .skip_while(|line| !line.starts_with("@@"))
            .skip(1)
            .map(str::to_string)
            .collect()
    }

    pub fn is_in(&self, path: &Path) -> bool {
        self.file_path == path
    }
}

/// A functional grouping label produced by a classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Lifecycle of a proposed commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Applied,
    Skipped,
    Discarded,
}

/// One proposed commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub id: EntryId,
    pub message: String,
    pub fragment_ids: BTreeSet<FragmentId>,
    pub state: EntryState,
}

impl CommitEntry {
    pub fn new(id: EntryId, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
            fragment_ids: BTreeSet::new(),
            state: EntryState::Pending,
        }
    }

    /// Discarded entries never reach the repository.
    pub fn is_live(&self) -> bool {
        self.state != EntryState::Discarded
    }
}

/// Where the diff under analysis comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffSource {
    /// Compare the current branch against `target`.
    Branch { target: String },
    /// A diff supplied from a file. No restore point exists for these runs.
    File { path: PathBuf },
}

impl DiffSource {
    pub fn kind(&self) -> &'static str {
        match self {
            DiffSource::Branch { .. } => "git-branch",
            DiffSource::File { .. } => "file",
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            DiffSource::Branch { target } => Some(target),
            DiffSource::File { .. } => None,
        }
    }
}

//! The plan: an ordered set of proposed commits over a disjoint partition of
//! the diff's fragments.
//!
//! A `Plan` owns its fragments so that fragment status and entry membership
//! can only change together, through the editor or an executor.

use crate::{
    CommitEntry, EntryId, EntryState, Fragment, FragmentId, FragmentStatus, Goal, GoalId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Partition-integrity violations. Raised before any repository mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("fragment {fragment} is assigned to goal {first} and goal {second}")]
    DuplicateAssignment {
        fragment: FragmentId,
        first: GoalId,
        second: GoalId,
    },
    #[error("assignment references unknown fragment {0}")]
    UnknownFragment(FragmentId),
    #[error("assignment references unknown goal {0}")]
    UnknownGoal(GoalId),
    #[error("fragment id {0} occurs twice in the diff")]
    DuplicateFragment(FragmentId),
    #[error("fragment {fragment} is listed in entry {first} and entry {second}")]
    Overlap {
        fragment: FragmentId,
        first: EntryId,
        second: EntryId,
    },
    #[error("fragment {fragment}: {detail}")]
    StatusMismatch { fragment: FragmentId, detail: String },
    #[error("saved plan does not match the diff: {0}")]
    SnapshotMismatch(String),
}

pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    fragments: Vec<Fragment>,
    entries: Vec<CommitEntry>,
    finalized: bool,
}

/// Group fragments into one entry per goal, in first-appearance order of the
/// goal in `assignment`.
///
/// Fragments that no assignment mentions stay `Unassigned` and never enter a
/// commit. Goals that receive no fragment produce no entry.
pub fn build_plan(
    mut fragments: Vec<Fragment>,
    goals: &[Goal],
    assignment: &[(FragmentId, GoalId)],
) -> Result<Plan> {
    let mut index = HashMap::new();
    for (pos, fragment) in fragments.iter().enumerate() {
        if index.insert(fragment.id, pos).is_some() {
            return Err(PlanError::DuplicateFragment(fragment.id));
        }
    }
    let goals_by_id: HashMap<GoalId, &Goal> = goals.iter().map(|g| (g.id, g)).collect();

    let mut owner: HashMap<FragmentId, GoalId> = HashMap::new();
    let mut goal_order: Vec<GoalId> = Vec::new();
    let mut members: HashMap<GoalId, Vec<FragmentId>> = HashMap::new();

    for &(fragment, goal) in assignment {
        if !index.contains_key(&fragment) {
            return Err(PlanError::UnknownFragment(fragment));
        }
        if !goals_by_id.contains_key(&goal) {
            return Err(PlanError::UnknownGoal(goal));
        }
        match owner.get(&fragment) {
            Some(&first) if first != goal => {
                return Err(PlanError::DuplicateAssignment {
                    fragment,
                    first,
                    second: goal,
                });
            }
            Some(_) => continue,
            None => {}
        }
        owner.insert(fragment, goal);
        if !members.contains_key(&goal) {
            goal_order.push(goal);
        }
        members.entry(goal).or_default().push(fragment);
    }

    for fragment in &mut fragments {
        fragment.status = if owner.contains_key(&fragment.id) {
            FragmentStatus::Assigned
        } else {
            FragmentStatus::Unassigned
        };
    }

    let entries = goal_order
        .iter()
        .enumerate()
        .map(|(pos, goal)| {
            let mut entry = CommitEntry::new(EntryId(pos + 1), goals_by_id[goal].title.clone());
            entry.fragment_ids = members[goal].iter().copied().collect();
            entry
        })
        .collect();

    let plan = Plan {
        fragments,
        entries,
        finalized: false,
    };
    plan.validate()?;
    Ok(plan)
}

impl Plan {
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn fragment(&self, id: FragmentId) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.id == id)
    }

    pub fn entries(&self) -> &[CommitEntry] {
        &self.entries
    }

    pub fn entry(&self, id: EntryId) -> Option<&CommitEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries an executor will materialize, in commit order.
    pub fn live_entries(&self) -> impl Iterator<Item = &CommitEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_live() && !e.fragment_ids.is_empty())
    }

    pub fn unassigned(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments
            .iter()
            .filter(|f| f.status == FragmentStatus::Unassigned)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Fragments of an entry in id order.
    pub fn entry_fragments(&self, entry: &CommitEntry) -> Vec<&Fragment> {
        entry
            .fragment_ids
            .iter()
            .filter_map(|id| self.fragment(*id))
            .collect()
    }

    /// Fragments of an entry grouped by file, files sorted by path.
    pub fn files_of(&self, entry: &CommitEntry) -> Vec<(PathBuf, Vec<&Fragment>)> {
        let mut grouped: BTreeMap<PathBuf, Vec<&Fragment>> = BTreeMap::new();
        for fragment in self.entry_fragments(entry) {
            grouped
                .entry(fragment.file_path.clone())
                .or_default()
                .push(fragment);
        }
        grouped.into_iter().collect()
    }

    /// Check the partition invariants:
    /// no fragment in two entries, assigned fragments in exactly one live entry,
    /// discarded and unassigned fragments in none.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<FragmentId, EntryId> = HashMap::new();
        for entry in &self.entries {
            for &id in &entry.fragment_ids {
                if let Some(&first) = seen.get(&id) {
                    return Err(PlanError::Overlap {
                        fragment: id,
                        first,
                        second: entry.id,
                    });
                }
                let Some(fragment) = self.fragment(id) else {
                    return Err(PlanError::UnknownFragment(id));
                };
                if !entry.is_live() {
                    return Err(PlanError::StatusMismatch {
                        fragment: id,
                        detail: format!("listed in discarded entry {}", entry.id),
                    });
                }
                if fragment.status != FragmentStatus::Assigned {
                    return Err(PlanError::StatusMismatch {
                        fragment: id,
                        detail: format!("{:?} but listed in entry {}", fragment.status, entry.id),
                    });
                }
                seen.insert(id, entry.id);
            }
        }

        if let Some(orphan) = self
            .fragments
            .iter()
            .find(|f| f.status == FragmentStatus::Assigned && !seen.contains_key(&f.id))
        {
            return Err(PlanError::StatusMismatch {
                fragment: orphan.id,
                detail: "assigned but not listed in any entry".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn entries_mut(&mut self) -> &mut Vec<CommitEntry> {
        &mut self.entries
    }

    pub(crate) fn entry_mut(&mut self, id: EntryId) -> Option<&mut CommitEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub(crate) fn set_status(&mut self, ids: impl IntoIterator<Item = FragmentId>, status: FragmentStatus) {
        for id in ids {
            if let Some(fragment) = self.fragments.iter_mut().find(|f| f.id == id) {
                fragment.status = status;
            }
        }
    }

    pub(crate) fn set_finalized(&mut self) {
        self.finalized = true;
    }

    /// Drop an entry's fragments from the plan for good, leaving the entry in
    /// `state`.
    pub(crate) fn release_entry(&mut self, id: EntryId, state: EntryState) {
        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        entry.state = state;
        let dropped = std::mem::take(&mut entry.fragment_ids);
        self.set_status(dropped, FragmentStatus::Discarded);
    }

    pub(crate) fn mark_applied(&mut self, id: EntryId) {
        if let Some(entry) = self.entry_mut(id) {
            entry.state = EntryState::Applied;
        }
    }

    /// Serializable form of the plan, keyed by fragment id and content hash.
    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            version: SNAPSHOT_VERSION,
            entries: self
                .entries
                .iter()
                .map(|e| EntrySnapshot {
                    id: e.id,
                    message: e.message.clone(),
                    state: e.state,
                    fragments: e.fragment_ids.iter().copied().collect(),
                })
                .collect(),
            fragments: self
                .fragments
                .iter()
                .map(|f| FragmentRecord {
                    id: f.id,
                    file: f.file_path.clone(),
                    hash: f.content_hash.clone(),
                    status: f.status,
                })
                .collect(),
        }
    }

    /// Rebuild a plan from a snapshot against freshly parsed fragments.
    ///
    /// Every fragment must match its recorded file and hash, so a snapshot can
    /// never be replayed against a different diff.
    pub fn from_snapshot(snapshot: &PlanSnapshot, mut fragments: Vec<Fragment>) -> Result<Plan> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PlanError::SnapshotMismatch(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if snapshot.fragments.len() != fragments.len() {
            return Err(PlanError::SnapshotMismatch(format!(
                "snapshot has {} fragments, diff has {}",
                snapshot.fragments.len(),
                fragments.len()
            )));
        }

        let records: HashMap<FragmentId, &FragmentRecord> =
            snapshot.fragments.iter().map(|r| (r.id, r)).collect();
        for fragment in &mut fragments {
            let record = records
                .get(&fragment.id)
                .ok_or(PlanError::UnknownFragment(fragment.id))?;
            if record.hash != fragment.content_hash || record.file != fragment.file_path {
                return Err(PlanError::SnapshotMismatch(format!(
                    "fragment {} in {} changed since the plan was saved",
                    fragment.id,
                    fragment.file_path.display()
                )));
            }
            fragment.status = record.status;
        }

        let entries = snapshot
            .entries
            .iter()
            .map(|e| CommitEntry {
                id: e.id,
                message: e.message.clone(),
                fragment_ids: e.fragments.iter().copied().collect(),
                state: e.state,
            })
            .collect();

        let plan = Plan {
            fragments,
            entries,
            finalized: false,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// One patch for a whole entry, with a single header per file.
    pub fn entry_patch(&self, entry: &CommitEntry) -> Vec<u8> {
        let mut out = Vec::new();
        for (_, fragments) in self.files_of(entry) {
            for (n, fragment) in fragments.iter().enumerate() {
                if n == 0 {
                    out.extend_from_slice(&fragment.patch);
                } else {
                    let hunk = fragment
                        .patch
                        .windows(3)
                        .position(|w| w == b"\n@@")
                        .map_or(0, |p| p + 1);
                    out.extend_from_slice(&fragment.patch[hunk..]);
                }
            }
        }
        out
    }
}

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub version: u32,
    pub entries: Vec<EntrySnapshot>,
    pub fragments: Vec<FragmentRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub id: EntryId,
    pub message: String,
    pub state: EntryState,
    pub fragments: Vec<FragmentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRecord {
    pub id: FragmentId,
    pub file: PathBuf,
    pub hash: String,
    pub status: FragmentStatus,
}

/// Write `diff.<id>.patch` for every live entry plus `plan.json`.
///
/// Returns the written paths.
pub fn write_drafts(plan: &Plan, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    for entry in plan.live_entries() {
        let path = dir.join(format!("diff.{}.patch", entry.id));
        fs::write(&path, plan.entry_patch(entry))?;
        written.push(path);
    }

    let json = serde_json::to_string_pretty(&plan.snapshot()).map_err(std::io::Error::other)?;
    let path = dir.join("plan.json");
    fs::write(&path, json)?;
    written.push(path);

    Ok(written)
}

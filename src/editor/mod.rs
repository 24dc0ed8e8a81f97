//! In-memory plan editing.
//!
//! Every operation runs against a working copy of the plan, the partition
//! invariants are checked, and only then does the copy replace the plan.
//! Nothing here touches the repository or the filesystem.

use crate::plan::{Plan, PlanError};
use crate::{CommitEntry, EntryId, EntryState, FragmentId, FragmentStatus};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which fragments of an entry a move applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentSelector {
    /// Every fragment of this file within the source entry.
    File(PathBuf),
    /// One fragment, written `#<id>`.
    Fragment(FragmentId),
}

impl FragmentSelector {
    pub fn parse(input: &str) -> Self {
        match input.strip_prefix('#').and_then(|n| n.parse().ok()) {
            Some(n) => FragmentSelector::Fragment(FragmentId(n)),
            None => FragmentSelector::File(PathBuf::from(input)),
        }
    }
}

impl fmt::Display for FragmentSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentSelector::File(path) => write!(f, "file '{}'", path.display()),
            FragmentSelector::Fragment(id) => write!(f, "fragment {}", id),
        }
    }
}

/// Editing errors. All are recoverable: the plan is left untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditorError {
    #[error("{selector} not found in commit {entry}")]
    SelectorNotFound {
        selector: FragmentSelector,
        entry: EntryId,
    },
    #[error("commit {0} does not exist")]
    UnknownEntry(EntryId),
    #[error("commit {0} is discarded")]
    EntryDiscarded(EntryId),
    #[error("no commit with changes is left in the plan")]
    EmptyPlan,
    #[error("commit message cannot be empty")]
    EmptyMessage,
    #[error("the plan is finalized")]
    Finalized,
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("edit would break the plan: {0}")]
    Invariant(#[from] PlanError),
}

pub type Result<T> = std::result::Result<T, EditorError>;

/// Owns a plan for the duration of an editing session.
#[derive(Debug)]
pub struct PlanEditor {
    plan: Plan,
}

impl PlanEditor {
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Run `op` on a copy of the plan and keep the result only if the
    /// invariants still hold.
    fn edit<T>(&mut self, op: impl FnOnce(&mut Plan) -> Result<T>) -> Result<T> {
        if self.plan.is_finalized() {
            return Err(EditorError::Finalized);
        }
        let mut draft = self.plan.clone();
        let value = op(&mut draft)?;
        draft.validate()?;
        self.plan = draft;
        Ok(value)
    }

    /// Move the selected fragments from one entry to another.
    ///
    /// Returns how many fragments moved. Moving within the same entry is a
    /// no-op.
    pub fn move_fragments(
        &mut self,
        selector: &FragmentSelector,
        from: EntryId,
        to: EntryId,
    ) -> Result<usize> {
        self.edit(|plan| {
            let source = plan.entry(from).ok_or(EditorError::UnknownEntry(from))?;
            if from == to {
                return Ok(0);
            }
            let target = plan.entry(to).ok_or(EditorError::UnknownEntry(to))?;
            if !target.is_live() {
                return Err(EditorError::EntryDiscarded(to));
            }

            let selected: Vec<FragmentId> = source
                .fragment_ids
                .iter()
                .copied()
                .filter(|id| match selector {
                    FragmentSelector::Fragment(wanted) => id == wanted,
                    FragmentSelector::File(path) => plan
                        .fragment(*id)
                        .is_some_and(|fragment| fragment.is_in(path)),
                })
                .collect();
            if selected.is_empty() {
                return Err(EditorError::SelectorNotFound {
                    selector: selector.clone(),
                    entry: from,
                });
            }

            if let Some(source) = plan.entry_mut(from) {
                for id in &selected {
                    source.fragment_ids.remove(id);
                }
            }
            if let Some(target) = plan.entry_mut(to) {
                target.fragment_ids.extend(selected.iter().copied());
            }
            Ok(selected.len())
        })
    }

    pub fn rename(&mut self, entry: EntryId, message: &str) -> Result<()> {
        let message = message.trim();
        self.edit(|plan| {
            if message.is_empty() {
                return Err(EditorError::EmptyMessage);
            }
            let entry = plan.entry_mut(entry).ok_or(EditorError::UnknownEntry(entry))?;
            entry.message = message.to_string();
            Ok(())
        })
    }

    /// Discard an entry; its fragments will never be applied in this run.
    ///
    /// Returns how many fragments were discarded. Discarding an already
    /// discarded entry is a no-op.
    pub fn discard(&mut self, entry: EntryId) -> Result<usize> {
        self.edit(|plan| {
            let current = plan.entry(entry).ok_or(EditorError::UnknownEntry(entry))?;
            if !current.is_live() {
                return Ok(0);
            }
            let count = current.fragment_ids.len();
            plan.release_entry(entry, EntryState::Discarded);
            Ok(count)
        })
    }

    /// Append an empty pending entry and return its id.
    pub fn new_entry(&mut self, message: &str) -> Result<EntryId> {
        let message = message.trim();
        self.edit(|plan| {
            if message.is_empty() {
                return Err(EditorError::EmptyMessage);
            }
            let id = EntryId(plan.entries().iter().map(|e| e.id.0).max().unwrap_or(0) + 1);
            plan.entries_mut().push(CommitEntry::new(id, message));
            Ok(id)
        })
    }

    /// Freeze the plan and hand it out for execution.
    ///
    /// Fails while no live entry holds a fragment; the session stays usable.
    pub fn finalize(&mut self) -> Result<Plan> {
        if self.plan.is_finalized() {
            return Err(EditorError::Finalized);
        }
        if self.plan.live_entries().next().is_none() {
            return Err(EditorError::EmptyPlan);
        }
        self.plan.validate()?;
        self.plan.set_finalized();
        Ok(self.plan.clone())
    }

    /// Apply one parsed command.
    pub fn apply(&mut self, command: EditorCommand) -> Result<CommandOutcome> {
        match command {
            EditorCommand::Move { from, to, selector } => {
                let moved = self.move_fragments(&selector, from, to)?;
                Ok(CommandOutcome::Edited(if moved == 0 {
                    "Nothing moved".to_string()
                } else {
                    format!("Moved {} ({} fragment(s)) from commit {} to {}", selector, moved, from, to)
                }))
            }
            EditorCommand::Rename { entry, message } => {
                self.rename(entry, &message)?;
                Ok(CommandOutcome::Edited(format!("Commit {} renamed", entry)))
            }
            EditorCommand::Discard(entry) => {
                let count = self.discard(entry)?;
                Ok(CommandOutcome::Edited(format!(
                    "Commit {} discarded ({} fragment(s))",
                    entry, count
                )))
            }
            EditorCommand::New(message) => {
                let id = self.new_entry(&message)?;
                Ok(CommandOutcome::Edited(format!("Commit {} created: {}", id, message.trim())))
            }
            EditorCommand::Execute => Ok(CommandOutcome::Finalized(self.finalize()?)),
            EditorCommand::Quit => Ok(CommandOutcome::Quit),
        }
    }

    /// Fragments that ended up discarded, for the closing summary.
    pub fn discarded_count(&self) -> usize {
        self.plan
            .fragments()
            .iter()
            .filter(|f| f.status == FragmentStatus::Discarded)
            .count()
    }
}

/// A line typed at the editor prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorCommand {
    Move {
        from: EntryId,
        to: EntryId,
        selector: FragmentSelector,
    },
    Rename { entry: EntryId, message: String },
    Discard(EntryId),
    New(String),
    Execute,
    Quit,
}

#[derive(Debug)]
pub enum CommandOutcome {
    Edited(String),
    Finalized(Plan),
    Quit,
}

impl EditorCommand {
    /// Parse `m <from> <to> <file|#id>`, `r <id> <message>`, `d <id>`,
    /// `n <message>`, `e` or `q`.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match verb.to_lowercase().as_str() {
            "m" | "move" => {
                let mut parts = rest.splitn(3, char::is_whitespace);
                let from = parse_entry(parts.next())?;
                let to = parse_entry(parts.next())?;
                let selector = parts
                    .next()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| EditorError::InvalidCommand("usage: m <from> <to> <file|#fragment>".into()))?;
                Ok(EditorCommand::Move {
                    from,
                    to,
                    selector: FragmentSelector::parse(selector),
                })
            }
            "r" | "rename" => {
                let (id, message) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let entry = parse_entry(Some(id))?;
                if message.trim().is_empty() {
                    return Err(EditorError::InvalidCommand("usage: r <id> <message>".into()));
                }
                Ok(EditorCommand::Rename {
                    entry,
                    message: message.trim().to_string(),
                })
            }
            "d" | "discard" => Ok(EditorCommand::Discard(parse_entry(Some(rest))?)),
            "n" | "new" => {
                if rest.is_empty() {
                    return Err(EditorError::InvalidCommand("usage: n <message>".into()));
                }
                Ok(EditorCommand::New(rest.to_string()))
            }
            "e" | "execute" => Ok(EditorCommand::Execute),
            "q" | "quit" => Ok(EditorCommand::Quit),
            "" => Err(EditorError::InvalidCommand("empty command".into())),
            other => Err(EditorError::InvalidCommand(format!("unknown command '{}'", other))),
        }
    }
}

fn parse_entry(token: Option<&str>) -> Result<EntryId> {
    let token = token.map(str::trim).unwrap_or_default();
    token
        .parse()
        .map(EntryId)
        .map_err(|_| EditorError::InvalidCommand(format!("'{}' is not a commit id", token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_diff;
    use crate::plan::build_plan;
    use crate::{Goal, GoalId};

    const DIFF: &str = "diff --git a/src/a.rs b/src/a.rs
--- a/src/a.rs
+++ b/src/a.rs
@@ -1,1 +1,1 @@
-a
+A
@@ -9,1 +9,1 @@
-i
+I
diff --git a/src/b.rs b/src/b.rs
--- a/src/b.rs
+++ b/src/b.rs
@@ -1,1 +1,1 @@
-b
+B
diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
@@ -1,1 +1,1 @@
-r
+R
";

    fn editor() -> PlanEditor {
        let goals = vec![
            Goal { id: GoalId(1), title: "Code".into(), description: String::new() },
            Goal { id: GoalId(2), title: "Docs".into(), description: String::new() },
        ];
        let assignment = [
            (FragmentId(1), GoalId(1)),
            (FragmentId(2), GoalId(1)),
            (FragmentId(3), GoalId(1)),
            (FragmentId(4), GoalId(2)),
        ];
        PlanEditor::new(build_plan(parse_diff(DIFF), &goals, &assignment).unwrap())
    }

    fn members(editor: &PlanEditor, id: usize) -> Vec<usize> {
        editor
            .plan()
            .entry(EntryId(id))
            .unwrap()
            .fragment_ids
            .iter()
            .map(|f| f.0)
            .collect()
    }

    #[test]
    fn move_by_file_takes_every_hunk_of_that_file() {
        let mut ed = editor();
        let moved = ed
            .move_fragments(&FragmentSelector::parse("src/a.rs"), EntryId(1), EntryId(2))
            .unwrap();
        assert_eq!(moved, 2);
        assert_eq!(members(&ed, 1), vec![3]);
        assert_eq!(members(&ed, 2), vec![1, 2, 4]);
    }

    #[test]
    fn move_and_move_back_restores_membership() {
        let mut ed = editor();
        let before = ed.plan().clone();
        let sel = FragmentSelector::parse("src/a.rs");
        ed.move_fragments(&sel, EntryId(1), EntryId(2)).unwrap();
        ed.move_fragments(&sel, EntryId(2), EntryId(1)).unwrap();
        assert_eq!(ed.plan(), &before);
    }

    #[test]
    fn move_single_fragment_by_id() {
        let mut ed = editor();
        ed.move_fragments(&FragmentSelector::parse("#2"), EntryId(1), EntryId(2))
            .unwrap();
        assert_eq!(members(&ed, 1), vec![1, 3]);
        assert_eq!(members(&ed, 2), vec![2, 4]);
    }

    #[test]
    fn move_of_absent_selector_fails_and_changes_nothing() {
        let mut ed = editor();
        let before = ed.plan().clone();
        let err = ed
            .move_fragments(&FragmentSelector::parse("README.md"), EntryId(1), EntryId(2))
            .unwrap_err();
        assert!(matches!(err, EditorError::SelectorNotFound { entry: EntryId(1), .. }));
        assert_eq!(ed.plan(), &before);
    }

    #[test]
    fn move_within_the_same_entry_is_a_no_op() {
        let mut ed = editor();
        let before = ed.plan().clone();
        let moved = ed
            .move_fragments(&FragmentSelector::parse("nope.rs"), EntryId(1), EntryId(1))
            .unwrap();
        assert_eq!(moved, 0);
        assert_eq!(ed.plan(), &before);
    }

    #[test]
    fn move_into_a_discarded_entry_is_rejected() {
        let mut ed = editor();
        ed.discard(EntryId(2)).unwrap();
        let err = ed
            .move_fragments(&FragmentSelector::parse("src/b.rs"), EntryId(1), EntryId(2))
            .unwrap_err();
        assert_eq!(err, EditorError::EntryDiscarded(EntryId(2)));
    }

    #[test]
    fn discard_marks_fragments_and_is_idempotent() {
        let mut ed = editor();
        assert_eq!(ed.discard(EntryId(2)).unwrap(), 1);
        let plan = ed.plan();
        assert_eq!(plan.entry(EntryId(2)).unwrap().state, EntryState::Discarded);
        assert_eq!(plan.fragment(FragmentId(4)).unwrap().status, FragmentStatus::Discarded);

        let after_first = ed.plan().clone();
        assert_eq!(ed.discard(EntryId(2)).unwrap(), 0);
        assert_eq!(ed.plan(), &after_first);
        assert_eq!(ed.discarded_count(), 1);
    }

    #[test]
    fn rename_requires_a_known_entry() {
        let mut ed = editor();
        ed.rename(EntryId(1), "  Refactor core  ").unwrap();
        assert_eq!(ed.plan().entry(EntryId(1)).unwrap().message, "Refactor core");
        assert_eq!(ed.rename(EntryId(9), "x"), Err(EditorError::UnknownEntry(EntryId(9))));
        assert_eq!(ed.rename(EntryId(1), "  "), Err(EditorError::EmptyMessage));
    }

    #[test]
    fn new_entry_is_appended_and_can_receive_fragments() {
        let mut ed = editor();
        let id = ed.new_entry("Split out b").unwrap();
        assert_eq!(id, EntryId(3));
        assert_eq!(ed.plan().entries().last().unwrap().id, id);
        ed.move_fragments(&FragmentSelector::parse("src/b.rs"), EntryId(1), id)
            .unwrap();
        assert_eq!(members(&ed, 3), vec![3]);
    }

    #[test]
    fn finalize_rejects_a_plan_without_changes() {
        let mut ed = editor();
        ed.discard(EntryId(1)).unwrap();
        ed.discard(EntryId(2)).unwrap();
        ed.new_entry("empty").unwrap();
        assert_eq!(ed.finalize().unwrap_err(), EditorError::EmptyPlan);

        // The session keeps working after a rejected finalize.
        assert!(ed.new_entry("another").is_ok());
    }

    #[test]
    fn finalize_freezes_the_plan() {
        let mut ed = editor();
        let plan = ed.finalize().unwrap();
        assert!(plan.is_finalized());
        assert_eq!(ed.rename(EntryId(1), "late"), Err(EditorError::Finalized));
    }

    #[test]
    fn commands_parse() {
        assert_eq!(
            EditorCommand::parse("m 1 2 src/dir with space/f.rs").unwrap(),
            EditorCommand::Move {
                from: EntryId(1),
                to: EntryId(2),
                selector: FragmentSelector::File(PathBuf::from("src/dir with space/f.rs")),
            }
        );
        assert_eq!(
            EditorCommand::parse("r 3 Fix the parser").unwrap(),
            EditorCommand::Rename { entry: EntryId(3), message: "Fix the parser".into() }
        );
        assert_eq!(EditorCommand::parse("d 2").unwrap(), EditorCommand::Discard(EntryId(2)));
        assert_eq!(EditorCommand::parse("n Docs").unwrap(), EditorCommand::New("Docs".into()));
        assert_eq!(EditorCommand::parse("E").unwrap(), EditorCommand::Execute);
        assert!(EditorCommand::parse("m 1").is_err());
        assert!(EditorCommand::parse("d x").is_err());
        assert!(EditorCommand::parse("z").is_err());
    }

    #[test]
    fn apply_reports_errors_without_ending_the_session() {
        let mut ed = editor();
        assert!(ed.apply(EditorCommand::parse("d 7").unwrap()).is_err());
        assert!(matches!(
            ed.apply(EditorCommand::parse("m 1 2 #4").unwrap()),
            Err(EditorError::SelectorNotFound { .. })
        ));
        assert!(matches!(
            ed.apply(EditorCommand::Execute).unwrap(),
            CommandOutcome::Finalized(_)
        ));
    }
}

//! Grouping fragments into goals.
//!
//! Classification is an external concern. The `Classifier` trait is the seam
//! it plugs into; the two implementations here need no network access.

use crate::{Fragment, FragmentId, Goal, GoalId};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Component, Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("failed to read assignment file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid assignment file: {0}")]
    Format(#[from] serde_json::Error),
    #[error("classifier produced no goals")]
    NoGoals,
}

pub type Result<T> = std::result::Result<T, ClassifyError>;

/// Anything that can turn fragments into goals and an assignment stream.
///
/// The assignment is ordered: plan entries follow the first appearance of
/// each goal in it. A failure in either step is fatal to plan construction.
pub trait Classifier {
    fn identify_goals(&self, fragments: &[Fragment], user_context: &str) -> Result<Vec<Goal>>;

    fn classify(
        &self,
        fragments: &[Fragment],
        goals: &[Goal],
        user_context: &str,
    ) -> Result<Vec<(FragmentId, GoalId)>>;
}

/// One goal per top-level directory.
#[derive(Debug, Default)]
pub struct DirectoryClassifier;

const ROOT_GROUP: &str = "project root";

fn top_level(path: &Path) -> String {
    let mut components = path.components().filter(|c| matches!(c, Component::Normal(_)));
    match (components.next(), components.next()) {
        (Some(first), Some(_)) => first.as_os_str().to_string_lossy().into_owned(),
        _ => ROOT_GROUP.to_string(),
    }
}

impl DirectoryClassifier {
    fn groups(fragments: &[Fragment]) -> Vec<String> {
        let mut seen = Vec::new();
        for fragment in fragments {
            let group = top_level(&fragment.file_path);
            if !seen.contains(&group) {
                seen.push(group);
            }
        }
        seen
    }
}

impl Classifier for DirectoryClassifier {
    fn identify_goals(&self, fragments: &[Fragment], user_context: &str) -> Result<Vec<Goal>> {
        let goals: Vec<Goal> = Self::groups(fragments)
            .into_iter()
            .enumerate()
            .map(|(i, group)| Goal {
                id: GoalId(i + 1),
                title: format!("Update {}", group),
                description: user_context.trim().to_string(),
            })
            .collect();
        if goals.is_empty() && !fragments.is_empty() {
            return Err(ClassifyError::NoGoals);
        }
        Ok(goals)
    }

    fn classify(
        &self,
        fragments: &[Fragment],
        goals: &[Goal],
        _user_context: &str,
    ) -> Result<Vec<(FragmentId, GoalId)>> {
        let by_title: BTreeMap<&str, GoalId> =
            goals.iter().map(|g| (g.title.as_str(), g.id)).collect();
        Ok(fragments
            .iter()
            .filter_map(|fragment| {
                let title = format!("Update {}", top_level(&fragment.file_path));
                by_title.get(title.as_str()).map(|goal| (fragment.id, *goal))
            })
            .collect())
    }
}

/// Goals and assignment as written by an external classifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentFile {
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub assignment: Vec<(FragmentId, GoalId)>,
}

/// Replays an `AssignmentFile`. Fragments it does not mention stay unassigned.
#[derive(Debug)]
pub struct AssignmentFileClassifier {
    file: AssignmentFile,
}

impl AssignmentFileClassifier {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ClassifyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: AssignmentFile = serde_json::from_str(raw)?;
        if file.goals.is_empty() {
            return Err(ClassifyError::NoGoals);
        }
        Ok(Self { file })
    }
}

impl Classifier for AssignmentFileClassifier {
    fn identify_goals(&self, _fragments: &[Fragment], _user_context: &str) -> Result<Vec<Goal>> {
        Ok(self.file.goals.clone())
    }

    fn classify(
        &self,
        _fragments: &[Fragment],
        _goals: &[Goal],
        _user_context: &str,
    ) -> Result<Vec<(FragmentId, GoalId)>> {
        Ok(self.file.assignment.clone())
    }
}

/// JSON record for `git-split fragments`.
#[derive(Debug, Serialize)]
pub struct FragmentExport<'a> {
    pub id: FragmentId,
    pub file: &'a Path,
    pub header: String,
    pub hash: &'a str,
    pub patch: Cow<'a, str>,
}

impl<'a> From<&'a Fragment> for FragmentExport<'a> {
    fn from(fragment: &'a Fragment) -> Self {
        Self {
            id: fragment.id,
            file: &fragment.file_path,
            header: fragment.header(),
            hash: &fragment.content_hash,
            patch: fragment.patch_text(),
        }
    }
}

/// Run both classifier steps.
pub fn run(
    classifier: &dyn Classifier,
    fragments: &[Fragment],
    user_context: &str,
) -> Result<(Vec<Goal>, Vec<(FragmentId, GoalId)>)> {
    let goals = classifier.identify_goals(fragments, user_context)?;
    tracing::debug!(goals = goals.len(), "goals identified");
    let assignment = classifier.classify(fragments, &goals, user_context)?;
    tracing::debug!(assigned = assignment.len(), "fragments classified");
    Ok((goals, assignment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_diff;

    const DIFF: &str = "diff --git a/src/a.rs b/src/a.rs
--- a/src/a.rs
+++ b/src/a.rs
@@ -1 +1 @@
-a
+A
diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
@@ -1 +1 @@
-r
+R
diff --git a/src/deep/b.rs b/src/deep/b.rs
--- a/src/deep/b.rs
+++ b/src/deep/b.rs
@@ -1 +1 @@
-b
+B
";

    #[test]
    fn directory_classifier_groups_by_top_level_dir() {
        let fragments = parse_diff(DIFF);
        let (goals, assignment) = run(&DirectoryClassifier, &fragments, "").unwrap();
        let titles: Vec<_> = goals.iter().map(|g| g.title.as_str()).collect();
        assert_eq!(titles, vec!["Update src", "Update project root"]);
        assert_eq!(
            assignment,
            vec![
                (FragmentId(1), GoalId(1)),
                (FragmentId(2), GoalId(2)),
                (FragmentId(3), GoalId(1)),
            ]
        );
    }

    #[test]
    fn assignment_file_is_replayed_verbatim() {
        let raw = r#"{
            "goals": [{"id": 1, "title": "Docs"}, {"id": 2, "title": "Code", "description": "core"}],
            "assignment": [[2, 1], [1, 2]]
        }"#;
        let classifier = AssignmentFileClassifier::from_json(raw).unwrap();
        let fragments = parse_diff(DIFF);
        let (goals, assignment) = run(&classifier, &fragments, "").unwrap();
        assert_eq!(goals[1].description, "core");
        assert_eq!(assignment, vec![(FragmentId(2), GoalId(1)), (FragmentId(1), GoalId(2))]);
    }

    #[test]
    fn assignment_file_without_goals_is_rejected() {
        assert!(matches!(
            AssignmentFileClassifier::from_json(r#"{"goals": []}"#),
            Err(ClassifyError::NoGoals)
        ));
        assert!(matches!(
            AssignmentFileClassifier::from_json("not json"),
            Err(ClassifyError::Format(_))
        ));
    }
}

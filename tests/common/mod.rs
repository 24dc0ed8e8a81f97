#![allow(dead_code)]

use git_split::classify::{self, DirectoryClassifier};
use git_split::editor::PlanEditor;
use git_split::git::Git;
use git_split::plan::{Plan, build_plan};
use git_split::{Fragment, parser::parse_diff};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// A throwaway repository with `main` checked out.
pub struct TestRepo {
    pub dir: TempDir,
    pub git: Git,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let git = Git::open(dir.path());
        let repo = Self { dir, git };
        repo.run(&["init", "-q"]);
        repo.run(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        repo.run(&["config", "user.name", "Test User"]);
        repo.run(&["config", "user.email", "test@example.com"]);
        repo.run(&["config", "commit.gpgsign", "false"]);
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run git in the repository and return stdout; panics on failure.
    pub fn run(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).unwrap()
    }

    pub fn write(&self, rel: &str, content: impl AsRef<[u8]>) {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path().join(rel)).unwrap()
    }

    pub fn read_bytes(&self, rel: &str) -> Vec<u8> {
        fs::read(self.path().join(rel)).unwrap()
    }

    pub fn commit_all(&self, message: &str) -> String {
        self.run(&["add", "-A"]);
        self.run(&["commit", "-q", "-m", message]);
        self.head()
    }

    pub fn head(&self) -> String {
        self.run(&["rev-parse", "HEAD"]).trim().to_string()
    }

    pub fn branch(&self) -> String {
        self.run(&["branch", "--show-current"]).trim().to_string()
    }

    pub fn status(&self) -> String {
        self.run(&["status", "--porcelain"])
    }

    pub fn subjects(&self, range: &str) -> Vec<String> {
        self.run(&["log", "--reverse", "--format=%s", range])
            .lines()
            .map(str::to_string)
            .collect()
    }
}

pub const BASE: &str = "one\ntwo\nthree\n";
pub const CHANGED: &str = "one\nTWO\nthree\n";

pub fn dirs(count: usize) -> Vec<String> {
    (1..=count).map(|n| format!("d{}/f.txt", n)).collect()
}

/// `main` holds `count` files in their own directories; `feature` changes
/// each of them in a single commit and is checked out.
pub fn feature_repo(count: usize) -> TestRepo {
    let repo = TestRepo::new();
    for file in dirs(count) {
        repo.write(&file, BASE);
    }
    repo.commit_all("initial");
    repo.run(&["checkout", "-q", "-b", "feature"]);
    for file in dirs(count) {
        repo.write(&file, CHANGED);
    }
    repo.commit_all("feature work");
    repo
}

/// One finalized entry per top-level directory.
pub fn directory_plan(fragments: Vec<Fragment>) -> Plan {
    let (goals, assignment) = classify::run(&DirectoryClassifier, &fragments, "").unwrap();
    let plan = build_plan(fragments, &goals, &assignment).unwrap();
    PlanEditor::new(plan).finalize().unwrap()
}

pub fn plan_for(diff: impl AsRef<[u8]>) -> Plan {
    directory_plan(parse_diff(diff))
}

/// Make a fragment's context disagree with the repository so it no longer applies.
pub fn break_context(fragment: &mut Fragment) {
    let text = String::from_utf8(fragment.patch.clone()).unwrap();
    fragment.patch = text.replace("-two", "-zwei").into_bytes();
}

mod common;

use assert_cmd::Command;
use common::{BASE, CHANGED, TestRepo, feature_repo};
use git_split::executor::isolation::STASH_LABEL;
use git_split::state::{Journal, NewRun, RunStatus};
use predicates::prelude::*;

fn git_split(repo: &TestRepo) -> Command {
    let mut cmd = Command::cargo_bin("git-split").unwrap();
    cmd.current_dir(repo.path())
        .env_remove("GIT_SPLIT_TARGET")
        .env_remove("GIT_SPLIT_MODE")
        .env_remove("GIT_SPLIT_TEST_CMD")
        .env_remove("GIT_SPLIT_THEME")
        .env_remove("RUST_LOG");
    cmd
}

fn journal(repo: &TestRepo) -> Journal {
    Journal::open(&repo.git.state_dir().unwrap().join("journal.db")).unwrap()
}

#[test]
fn help_describes_the_tool() {
    Command::cargo_bin("git-split")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Split a large change"))
        .stdout(predicate::str::contains("recover"));
}

#[test]
fn history_is_empty_in_a_fresh_repository() {
    let repo = TestRepo::new();
    repo.write("a.txt", BASE);
    repo.commit_all("initial");

    git_split(&repo)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs recorded"));
}

#[test]
fn fragments_are_exported_as_json() {
    let repo = feature_repo(2);
    let output = git_split(&repo).arg("fragments").output().unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let list = json.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["id"], 1);
    assert_eq!(list[0]["file"], "d1/f.txt");
    assert_eq!(list[1]["header"], "@@ -1,3 +1,3 @@");
    // Read-only: still on the branch, nothing rewritten.
    assert_eq!(repo.branch(), "feature");
    assert_eq!(repo.subjects("main..HEAD"), vec!["feature work"]);
}

#[test]
fn execute_splits_the_branch_and_records_the_run() {
    let repo = feature_repo(2);
    git_split(&repo)
        .args(["split", "--execute", "--target", "main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[Commit 1]: Update d1"))
        .stdout(predicate::str::contains("Created 2 commit(s)"));

    assert_eq!(repo.subjects("main..HEAD"), vec!["Update d1", "Update d2"]);
    assert!(repo.path().join(".git-split.draft/diff.1.patch").exists());
    assert!(repo.path().join(".git-split.draft/plan.json").exists());

    let runs = journal(&repo).recent_runs(5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Done);
    assert_eq!(runs[0].commits, 2);
    assert_eq!(runs[0].mode, "normal");

    git_split(&repo)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("[done] 2/2 commits"));
}

#[test]
fn failing_test_command_exits_nonzero_and_rolls_back() {
    let repo = feature_repo(2);
    let original = repo.head();
    git_split(&repo)
        .args(["-e", "--no-drafts", "--test-cmd", "exit 1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Rolled back").or(predicate::str::contains("failed")));

    assert_eq!(repo.head(), original);
    assert_eq!(repo.status(), "");
    let runs = journal(&repo).recent_runs(1).unwrap();
    assert_eq!(runs[0].status, RunStatus::RolledBack);
}

#[test]
fn step_mode_warns_that_the_test_command_is_not_run() {
    let repo = feature_repo(2);
    git_split(&repo)
        .args(["-e", "--no-drafts", "--mode", "step", "--test-cmd", "exit 1"])
        .write_stdin("c\nc\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("test command is not run in step mode"))
        .stdout(predicate::str::contains("Created 2 commit(s)"));

    assert_eq!(repo.subjects("main..HEAD"), vec!["Update d1", "Update d2"]);
}

#[test]
fn assignment_file_drives_the_plan_and_its_snapshot_replays() {
    let repo = feature_repo(3);
    let dir = tempfile::tempdir().unwrap();
    let assignment = dir.path().join("assignment.json");
    std::fs::write(
        &assignment,
        r#"{"goals": [{"id": 1, "title": "Odd files"}, {"id": 2, "title": "Even file"}],
            "assignment": [[1, 1], [2, 2], [3, 1]]}"#,
    )
    .unwrap();

    git_split(&repo)
        .args(["-e", "--assignment"])
        .arg(&assignment)
        .assert()
        .success();
    assert_eq!(repo.subjects("main..HEAD"), vec!["Odd files", "Even file"]);

    // The branch diff is unchanged by the split, so the snapshot still fits.
    git_split(&repo)
        .args(["-e", "--no-drafts", "--plan", ".git-split.draft/plan.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded plan"));
    assert_eq!(repo.subjects("main..HEAD"), vec!["Odd files", "Even file"]);
}

#[test]
fn recover_cleans_up_after_a_dead_run() {
    let repo = TestRepo::new();
    repo.write("a.txt", BASE);
    let base = repo.commit_all("initial");

    // A run that died on its ephemeral branch with a half-done commit and
    // an isolation stash still in the list.
    repo.run(&["checkout", "-q", "-b", "git-split-draft-1-deadbeef"]);
    repo.write("b.txt", "partial\n");
    repo.commit_all("Half done");
    repo.write("a.txt", CHANGED);
    repo.run(&["stash", "push", "-q", "-m", &format!("{} 1-abc", STASH_LABEL)]);
    let id = journal(&repo)
        .begin_run(&NewRun {
            source: "git-branch",
            target: Some("main"),
            mode: "step",
            restore_point: Some(&base),
            original_branch: Some("main"),
            ephemeral_branch: Some("git-split-draft-1-deadbeef"),
            entries: 2,
        })
        .unwrap();

    git_split(&repo)
        .args(["recover", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recovery complete"));

    assert_eq!(repo.branch(), "main");
    assert_eq!(repo.head(), base);
    assert!(!repo.git.branch_exists("git-split-draft-1-deadbeef").unwrap());
    assert!(repo.git.stashes_labelled(STASH_LABEL).unwrap().is_empty());
    assert_eq!(repo.read("a.txt"), CHANGED);

    let runs = journal(&repo).recent_runs(1).unwrap();
    assert_eq!(runs[0].id, id);
    assert_eq!(runs[0].status, RunStatus::Recovered);

    git_split(&repo)
        .args(["recover", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to recover"));
}

#[test]
fn outside_a_repository_fails() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("git-split")
        .unwrap()
        .current_dir(dir.path())
        .env("GIT_CEILING_DIRECTORIES", dir.path().parent().unwrap())
        .arg("history")
        .assert()
        .failure();
}

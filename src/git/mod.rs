use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not in a git repository")]
    NotARepo,
    #[error("`git {command}` failed ({}): {stderr}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("invalid git ref: {0}")]
    InvalidRef(String),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit {}", code),
        None => "killed by signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Outcome of `git stash push`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StashPush {
    /// A stash entry was created; holds its commit id.
    Saved(String),
    NothingToSave,
}

/// Outcome of restoring a stash entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StashPop {
    Restored,
    /// The pop stopped on conflicts; the stash entry is still in the list.
    Conflict(String),
}

/// Handle on one repository. Every primitive is a blocking `git` subprocess
/// run from the repository root, with its real exit status surfaced.
#[derive(Debug, Clone)]
pub struct Git {
    root: PathBuf,
}

impl Git {
    /// Locate the repository containing the current directory.
    pub fn discover() -> Result<Self> {
        let output = Command::new("git")
            .arg("rev-parse")
            .arg("--show-toplevel")
            .output()?;

        if !output.status.success() {
            return Err(GitError::NotARepo);
        }

        Ok(Self::open(path_from_bytes(output.stdout.trim_ascii_end())))
    }

    /// Use `root` as the repository working tree without probing it.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(cwd = %self.root.display(), "git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()?;
        Ok(output)
    }

    /// Run and require success, returning stdout.
    fn run_checked(&self, args: &[&str]) -> Result<String> {
        Ok(String::from_utf8(self.run_raw(args)?)?)
    }

    /// Run and require success, returning stdout untouched.
    fn run_raw(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(failure(args, &output));
        }
        Ok(output.stdout)
    }

    /// Absolute path of the `.git` directory (handles worktrees).
    pub fn git_dir(&self) -> Result<PathBuf> {
        let out = self.run_raw(&["rev-parse", "--absolute-git-dir"])?;
        Ok(path_from_bytes(out.trim_ascii_end()))
    }

    /// Directory for git-split's own run files, created on demand.
    pub fn state_dir(&self) -> Result<PathBuf> {
        let dir = self.git_dir()?.join("git-split");
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Get the current branch name (None for detached HEAD).
    pub fn current_branch(&self) -> Result<Option<String>> {
        let branch = self.run_checked(&["branch", "--show-current"])?;
        let branch = branch.trim();
        if branch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(branch.to_string()))
        }
    }

    pub fn head_sha(&self) -> Result<String> {
        Ok(self.run_checked(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn merge_base(&self, a: &str, b: &str) -> Result<String> {
        validate_git_ref(a)?;
        validate_git_ref(b)?;
        Ok(self.run_checked(&["merge-base", a, b])?.trim().to_string())
    }

    /// Number of commits reachable from `to` but not from `from`.
    pub fn count_commits(&self, from: &str, to: &str) -> Result<usize> {
        let range = format!("{}..{}", from, to);
        let out = self.run_checked(&["rev-list", "--count", &range])?;
        Ok(out.trim().parse().unwrap_or(0))
    }

    /// Subjects of the commits in `from..to`, oldest first.
    pub fn commit_subjects(&self, from: &str, to: &str) -> Result<Vec<String>> {
        let range = format!("{}..{}", from, to);
        let out = self.run_checked(&["log", "--reverse", "--format=%s", &range])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Diff between two refs, as the raw bytes git printed.
    pub fn diff_refs(&self, from: &str, to: &str) -> Result<Vec<u8>> {
        validate_git_ref(from)?;
        validate_git_ref(to)?;
        let range = format!("{}..{}", from, to);
        self.run_raw(&["diff", "--no-color", "--no-ext-diff", &range])
    }

    /// Uncommitted changes (staged and unstaged) against HEAD.
    pub fn diff_worktree(&self) -> Result<Vec<u8>> {
        self.run_raw(&["diff", "--no-color", "--no-ext-diff", "HEAD"])
    }

    /// Apply a patch to the index only, leaving the working tree alone.
    pub fn apply_cached(&self, patch: &[u8]) -> Result<()> {
        let args = ["apply", "--cached", "--whitespace=nowarn", "-"];
        debug!(cwd = %self.root.display(), "git {}", args.join(" "));
        let mut child = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(patch)?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(failure(&args, &output));
        }
        Ok(())
    }

    /// Clear the staging area (mixed reset to HEAD).
    pub fn reset_index(&self) -> Result<()> {
        self.run_checked(&["reset", "-q"])?;
        Ok(())
    }

    /// Create a commit from the index and return its id.
    pub fn commit(&self, message: &str) -> Result<String> {
        self.run_checked(&["commit", "-q", "-m", message])?;
        self.head_sha()
    }

    /// Move the branch to `rev`, keeping index and working tree.
    pub fn reset_soft(&self, rev: &str) -> Result<()> {
        self.run_checked(&["reset", "-q", "--soft", rev])?;
        Ok(())
    }

    /// Make index and tracked files match HEAD. Only used while an isolation
    /// stash holds the discarded content.
    pub fn reset_hard(&self) -> Result<()> {
        self.run_checked(&["reset", "-q", "--hard"])?;
        Ok(())
    }

    /// Create `name` at HEAD and switch to it, carrying local changes along.
    pub fn create_branch(&self, name: &str) -> Result<()> {
        validate_git_ref(name)?;
        self.run_checked(&["checkout", "-q", "-b", name])?;
        Ok(())
    }

    pub fn switch_branch(&self, name: &str) -> Result<()> {
        validate_git_ref(name)?;
        self.run_checked(&["checkout", "-q", name])?;
        Ok(())
    }

    /// Force-delete a branch. Callers only ever delete branches they created.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        validate_git_ref(name)?;
        self.run_checked(&["branch", "-D", name])?;
        Ok(())
    }

    pub fn rename_branch(&self, old: &str, new: &str) -> Result<()> {
        validate_git_ref(old)?;
        validate_git_ref(new)?;
        self.run_checked(&["branch", "-m", old, new])?;
        Ok(())
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        let refname = format!("refs/heads/{}", name);
        let output = self.run(&["show-ref", "--verify", "--quiet", &refname])?;
        Ok(output.status.success())
    }

    /// Hide every tracked change that is not staged, keeping the index (and its
    /// content in the working tree) in place.
    pub fn stash_keep_index(&self, label: &str) -> Result<StashPush> {
        self.stash_push(&["stash", "push", "--keep-index", "-m", label])
    }

    /// Stash every local change, untracked files included, leaving a clean tree.
    pub fn stash_everything(&self, label: &str) -> Result<StashPush> {
        self.stash_push(&["stash", "push", "--include-untracked", "-m", label])
    }

    fn stash_push(&self, args: &[&str]) -> Result<StashPush> {
        let output = self.run(args)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stdout.contains("No local changes to save") || stderr.contains("No local changes to save") {
            return Ok(StashPush::NothingToSave);
        }
        if !output.status.success() {
            return Err(failure(args, &output));
        }
        let sha = self.run_checked(&["rev-parse", "stash@{0}"])?;
        Ok(StashPush::Saved(sha.trim().to_string()))
    }

    /// Find the `stash@{n}` reference of the stash entry whose commit is `sha`.
    pub fn stash_ref(&self, sha: &str) -> Result<Option<String>> {
        let out = self.run_checked(&["stash", "list", "--format=%H"])?;
        Ok(out
            .lines()
            .position(|line| line.trim() == sha)
            .map(|n| format!("stash@{{{}}}", n)))
    }

    /// Stash entries whose message contains `label`, as `stash@{n}` references.
    pub fn stashes_labelled(&self, label: &str) -> Result<Vec<String>> {
        let out = self.run_checked(&["stash", "list", "--format=%gd%x09%gs"])?;
        Ok(out
            .lines()
            .filter_map(|line| line.split_once('\t'))
            .filter(|(_, subject)| subject.contains(label))
            .map(|(reference, _)| reference.to_string())
            .collect())
    }

    /// Restore a stash entry into the working tree and drop it.
    pub fn stash_pop(&self, reference: &str) -> Result<StashPop> {
        let args = ["stash", "pop", "-q", reference];
        let output = self.run(&args)?;
        if output.status.success() {
            return Ok(StashPop::Restored);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr);
        if combined.contains("CONFLICT") || combined.contains("would be overwritten") {
            return Ok(StashPop::Conflict(combined.trim().to_string()));
        }
        Err(failure(&args, &output))
    }

    /// Untracked, non-ignored files relative to the repository root.
    pub fn untracked_files(&self) -> Result<Vec<PathBuf>> {
        let out = self.run_raw(&["ls-files", "--others", "--exclude-standard", "-z"])?;
        Ok(out
            .split(|&b| b == 0)
            .filter(|p| !p.is_empty())
            .map(path_from_bytes)
            .collect())
    }
}

/// A path as git printed it. Paths are bytes on unix, so nothing is lost there.
#[cfg(unix)]
pub fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
pub fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

fn failure(args: &[&str], output: &Output) -> GitError {
    let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        stderr = String::from_utf8_lossy(&output.stdout).trim().to_string();
    }
    GitError::CommandFailed {
        command: args.join(" "),
        code: output.status.code(),
        stderr,
    }
}

/// Validate a git ref to prevent option injection (only for user-supplied refs).
pub fn validate_git_ref(ref_str: &str) -> Result<()> {
    if ref_str.is_empty() {
        return Err(GitError::InvalidRef("Empty git ref".to_string()));
    }
    if ref_str.starts_with('-') {
        return Err(GitError::InvalidRef(format!(
            "git ref may not start with '-': {}",
            ref_str
        )));
    }

    for ch in ref_str.chars() {
        if !ch.is_alphanumeric()
            && !matches!(
                ch,
                '-' | '_' | '/' | '.' | '~' | '^' | '@' | ':' | '{' | '}'
            )
        {
            return Err(GitError::InvalidRef(format!(
                "Invalid character in git ref: '{}'",
                ch
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_git_ref_valid() {
        assert!(validate_git_ref("main").is_ok());
        assert!(validate_git_ref("feature/foo").is_ok());
        assert!(validate_git_ref("HEAD~1").is_ok());
        assert!(validate_git_ref("v1.2.3").is_ok());
        assert!(validate_git_ref("origin/main").is_ok());
        assert!(validate_git_ref("git-split-draft-1700000000-ab12cd34").is_ok());
        assert!(validate_git_ref("@{-1}").is_ok());
    }

    #[test]
    fn test_validate_git_ref_invalid() {
        assert!(validate_git_ref(";rm -rf").is_err());
        assert!(validate_git_ref("$(cmd)").is_err());
        assert!(validate_git_ref("foo bar").is_err());
        assert!(validate_git_ref("foo\nbar").is_err());
        assert!(validate_git_ref("--force").is_err());
        assert!(validate_git_ref("").is_err());
    }

    #[test]
    fn command_failure_names_the_command() {
        let err = GitError::CommandFailed {
            command: "apply --cached -".to_string(),
            code: Some(1),
            stderr: "patch does not apply".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "`git apply --cached -` failed (exit 1): patch does not apply"
        );
    }

    #[test]
    fn head_outside_a_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let git = Git::open(dir.path());
        assert!(git.head_sha().is_err());
    }
}

use super::{
    CreatedCommit, ExecError, ExecutionSummary, RunOutcome, Stage, fail, runnable, stage_entry,
    transition,
};
use crate::context::ExecutionContext;
use crate::interrupt;
use crate::plan::Plan;
use std::path::Path;
use std::process::Command;

/// Apply every live entry in order, then run the verification command.
///
/// Any failure, including a failed verification after all commits
/// succeeded, undoes the whole run.
pub fn execute(ctx: &ExecutionContext, plan: &mut Plan, test_cmd: Option<&str>) -> RunOutcome {
    transition(Stage::Ready);
    let mut commits: Vec<CreatedCommit> = Vec::new();

    if interrupt::interrupted() {
        return fail(ctx, ExecError::Interrupted { entry: None }, commits);
    }
    if let Err(e) = ctx.prepare_base() {
        return fail(ctx, ExecError::git(None, e), commits);
    }

    let ids = runnable(plan);
    let total = ids.len();
    for (i, id) in ids.into_iter().enumerate() {
        if interrupt::interrupted() {
            return fail(ctx, ExecError::Interrupted { entry: Some(id) }, commits);
        }
        let Some(entry) = plan.entry(id).cloned() else { continue };

        transition(Stage::Applying(id));
        println!("  Applying commit {}/{}: {}", i + 1, total, entry.message);
        if let Err(e) = stage_entry(ctx, plan, &entry) {
            return fail(ctx, e, commits);
        }

        let sha = match ctx.git().commit(&entry.message) {
            Ok(sha) => sha,
            Err(e) => return fail(ctx, ExecError::git(Some(id), e), commits),
        };
        transition(Stage::Committed(id));
        println!("✓ Committed {} {}", &sha[..sha.len().min(8)], entry.message);
        plan.mark_applied(id);
        commits.push(CreatedCommit {
            entry: id,
            sha,
            message: entry.message,
        });
    }
    transition(Stage::AllCommitted);

    let mut tested = false;
    if let Some(command) = test_cmd.map(str::trim).filter(|c| !c.is_empty()) {
        if interrupt::interrupted() {
            return fail(ctx, ExecError::Interrupted { entry: None }, commits);
        }
        transition(Stage::Testing);
        println!("  Running verification: {}", command);
        if let Err(e) = run_verification(ctx.git().root(), command) {
            return fail(ctx, e, commits);
        }
        println!("✓ Verification passed");
        tested = true;
    }

    transition(Stage::Done);
    RunOutcome::Done(ExecutionSummary {
        commits,
        skipped: Vec::new(),
        tested,
    })
}

/// Run `command` through `sh -c` in the repository root.
pub fn run_verification(root: &Path, command: &str) -> Result<(), ExecError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(root)
        .output()
        .map_err(|e| ExecError::TestFailure {
            command: command.to_string(),
            status: format!("could not start: {}", e),
            output: String::new(),
        })?;

    if output.status.success() {
        return Ok(());
    }
    let status = match output.status.code() {
        Some(code) => format!("exit {}", code),
        None => "killed by signal".to_string(),
    };
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if !text.trim().is_empty() {
        eprintln!("{}", text.trim_end());
    }
    Err(ExecError::TestFailure {
        command: command.to_string(),
        status,
        output: text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_reports_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_verification(dir.path(), "true").is_ok());
        match run_verification(dir.path(), "echo broken; exit 3") {
            Err(ExecError::TestFailure { status, output, .. }) => {
                assert_eq!(status, "exit 3");
                assert!(output.contains("broken"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

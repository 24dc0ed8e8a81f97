use anyhow::{Context, Result, bail};
use std::path::Path;

use git_split::classify::{self, AssignmentFileClassifier, Classifier, DirectoryClassifier, FragmentExport};
use git_split::cli::{self, Commands, Mode, PlanAction, PlanSource, RunConfig};
use git_split::context::{self, ApplyBase, ExecutionContext};
use git_split::editor::PlanEditor;
use git_split::executor::decision::TerminalDecisions;
use git_split::executor::isolation::{self, HIDDEN_DIR, STASH_LABEL};
use git_split::executor::{ExecError, RunOutcome, normal};
use git_split::git::{Git, StashPop};
use git_split::highlight::Highlighter;
use git_split::parser::parse_diff;
use git_split::plan::{Plan, PlanSnapshot, build_plan, write_drafts};
use git_split::rollback::{RestorePoint, RollbackManager};
use git_split::state::{Journal, NewRun, RunStatus};
use git_split::tui::{EditorExit, run_editor};
use git_split::{DiffSource, interrupt, logging};

/// Files shown per commit in the plan listing.
const LISTED_FILES: usize = 5;

fn main() -> Result<()> {
    let args = cli::parse_args();
    logging::init(args.verbose);
    interrupt::install();

    let code = match args.command {
        None => handle_split(args.split.into_config())?,
        Some(Commands::Split(split)) => handle_split(split.into_config())?,
        Some(Commands::Fragments(source)) => {
            handle_fragments(&source.diff_source())?;
            0
        }
        Some(Commands::Recover(recover)) => handle_recover(recover.yes)?,
        Some(Commands::History(history)) => {
            handle_history(history.limit)?;
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Plan, optionally edit, and execute a split.
fn handle_split(cfg: RunConfig) -> Result<i32> {
    let git = Git::discover()?;
    let mut ctx = ExecutionContext::open(&git, cfg.source.clone())?;

    let diff = ctx.load_diff()?;
    let fragments = parse_diff(&diff);
    if fragments.is_empty() {
        println!("No changes to split");
        ctx.release()?;
        return Ok(0);
    }
    tracing::debug!(fragments = fragments.len(), "diff parsed");

    let mut plan = load_plan(&cfg, fragments)?;

    if let ApplyBase::MergeBase(base) = ctx.base() {
        let rewound = ctx.rewound_commits()?;
        println!(
            "⚠ The branch will be rewritten: {} commit(s) since {} ({}) are replaced by the plan",
            rewound.len(),
            cfg.source.target().unwrap_or_default(),
            &base[..base.len().min(8)]
        );
    }

    let unassigned = plan.unassigned().count();
    if unassigned > 0 {
        println!(
            "⚠ {} fragment(s) were not classified and will stay uncommitted",
            unassigned
        );
    }

    if cfg.mode == Mode::Step && cfg.test_cmd.is_some() {
        println!("⚠ The test command is not run in step mode, each commit is checked by hand");
    }

    save_drafts(&cfg, &git, &plan);
    display_plan(&plan);

    let mut action = cfg.action;
    if action == PlanAction::Ask {
        let answer = interrupt::prompt("\n(e)xecute, (ed)it plan, (c)ancel: ")
            .context("No answer")?;
        action = match answer.to_lowercase().as_str() {
            "e" | "execute" => PlanAction::Execute,
            "ed" | "edit" => PlanAction::Edit,
            _ => {
                println!("Cancelled, nothing was changed");
                ctx.release()?;
                return Ok(0);
            }
        };
    }

    let mut editor = PlanEditor::new(plan);
    plan = if action == PlanAction::Edit {
        let (highlighter, found) = Highlighter::with_theme(&cfg.theme);
        if !found {
            eprintln!("⚠ Unknown theme '{}', using the default", cfg.theme);
        }
        match run_editor(editor, highlighter)? {
            EditorExit::Execute(plan) => {
                save_drafts(&cfg, &git, &plan);
                display_plan(&plan);
                plan
            }
            EditorExit::Quit => {
                println!("Cancelled, nothing was changed");
                ctx.release()?;
                return Ok(0);
            }
        }
    } else {
        editor.finalize()?
    };

    if ctx.source().kind() == "file" {
        println!("⚠ The diff comes from a file: there is no restore point, so a failed run");
        println!("  cannot be rolled back automatically");
        if !cfg.assume_yes && !interrupt::confirm("Continue?").context("No answer")? {
            println!("Cancelled, nothing was changed");
            ctx.release()?;
            return Ok(0);
        }
    }

    let head_before = git.head_sha()?;
    ctx.capture_restore_point()?;

    let mut journal = Journal::open(&git.state_dir()?.join("journal.db"))?;
    let run_id = journal.begin_run(&NewRun {
        source: ctx.source().kind(),
        target: ctx.source().target(),
        mode: cfg.mode.as_str(),
        restore_point: ctx.restore_point().map(RestorePoint::sha),
        original_branch: ctx.guard().original_branch(),
        ephemeral_branch: ctx.guard().ephemeral_branch(),
        entries: plan.live_entries().count(),
    })?;

    println!();
    let outcome = match cfg.mode {
        Mode::Normal => normal::execute(&ctx, &mut plan, cfg.test_cmd.as_deref()),
        Mode::Step => isolation::execute(&ctx, &mut plan, &mut TerminalDecisions),
    };

    let commits = report(&outcome, &head_before);
    // Commits left on the ephemeral branch by a halted run are kept too.
    if (outcome.is_success() || !commits.is_empty())
        && let Some(kept) = ctx.keep_result()
    {
        println!("  Commits are kept on branch '{}'", kept);
    }

    let error = outcome.error();
    let detail = error.map(|e| e.to_string());
    journal.finish_run(
        run_id,
        RunStatus::parse(outcome.status())?,
        commits.len(),
        error.and_then(ExecError::entry),
        detail.as_deref(),
    )?;

    if let Err(e) = ctx.release() {
        eprintln!("✗ Could not switch back to the original branch: {}", e);
        return Ok(1);
    }
    Ok(if outcome.is_success() { 0 } else { 1 })
}

/// Classify fragments into a plan, or rebuild a saved snapshot.
fn load_plan(cfg: &RunConfig, fragments: Vec<git_split::Fragment>) -> Result<Plan> {
    let classifier: Box<dyn Classifier> = match &cfg.plan_source {
        PlanSource::Snapshot(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read plan {}", path.display()))?;
            let snapshot: PlanSnapshot = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid plan {}", path.display()))?;
            let plan = Plan::from_snapshot(&snapshot, fragments)?;
            println!("✓ Loaded plan from {}", path.display());
            return Ok(plan);
        }
        PlanSource::AssignmentFile(path) => Box::new(AssignmentFileClassifier::load(path)?),
        PlanSource::Directories => Box::new(DirectoryClassifier),
    };

    let (goals, assignment) = classify::run(classifier.as_ref(), &fragments, &cfg.context)
        .context("Classification failed")?;
    Ok(build_plan(fragments, &goals, &assignment)?)
}

fn save_drafts(cfg: &RunConfig, git: &Git, plan: &Plan) {
    let Some(dir) = &cfg.draft_dir else { return };
    let dir = git.root().join(dir);
    match write_drafts(plan, &dir) {
        Ok(written) => println!("✓ {} draft file(s) written to {}", written.len(), dir.display()),
        Err(e) => {
            tracing::warn!(error = %e, "writing drafts failed");
            eprintln!("⚠ Could not write drafts to {}: {}", dir.display(), e);
        }
    }
}

fn display_plan(plan: &Plan) {
    let live: Vec<_> = plan.live_entries().collect();
    println!();
    println!("Proposed plan ({} commit(s))", live.len());
    println!("─────────────────────────────────────");
    for entry in live {
        let files = plan.files_of(entry);
        println!("[Commit {}]: {}", entry.id, entry.message);
        println!(
            "    {} fragment(s) in {} file(s)",
            entry.fragment_ids.len(),
            files.len()
        );
        for (path, _) in files.iter().take(LISTED_FILES) {
            println!("    {}", path.display());
        }
        if files.len() > LISTED_FILES {
            println!("    ... and {} more", files.len() - LISTED_FILES);
        }
    }
}

/// Print the final state of a run. Returns the commits still on the branch.
fn report(outcome: &RunOutcome, head_before: &str) -> Vec<String> {
    println!();
    match outcome {
        RunOutcome::Done(summary) => {
            println!("✓ Created {} commit(s)", summary.commits.len());
            for commit in &summary.commits {
                println!("    {} {}", &commit.sha[..commit.sha.len().min(8)], commit.message);
            }
            if !summary.skipped.is_empty() {
                let skipped: Vec<_> = summary.skipped.iter().map(|id| id.to_string()).collect();
                println!("  Skipped commit(s): {}", skipped.join(", "));
            }
            if summary.tested {
                println!("  Verification passed");
            }
            summary.commits.iter().map(|c| c.sha.clone()).collect()
        }
        RunOutcome::RolledBack { error, restore_point } => {
            match error.entry() {
                Some(entry) => eprintln!("✗ Run failed at commit {}: {}", entry, error),
                None => eprintln!("✗ Run failed: {}", error),
            }
            eprintln!("  Rolled back to restore point {}; no commits were kept", restore_point);
            Vec::new()
        }
        RunOutcome::Halted { error, commits } => {
            eprintln!("✗ Run halted: {}", error);
            if let ExecError::IsolationRestoreConflict { detail, .. } = error {
                eprintln!("  Hidden changes could not be restored cleanly:");
                eprintln!("{}", detail);
                eprintln!("  Resolve the conflicts by hand; nothing was rolled back.");
                eprintln!("  Leftover stash entries are labelled '{}'", STASH_LABEL);
            } else {
                eprintln!("  No restore point exists for this run.");
                eprintln!(
                    "  {} commit(s) from this run remain; HEAD before the run was {}",
                    commits.len(),
                    &head_before[..head_before.len().min(8)]
                );
                eprintln!("  Undo them with `git reset --soft {}` if needed", head_before);
            }
            commits.iter().map(|c| c.sha.clone()).collect()
        }
    }
}

/// Print the extracted fragments as JSON.
fn handle_fragments(source: &DiffSource) -> Result<()> {
    let git = Git::discover()?;
    let diff = context::peek_diff(&git, source)?;
    let fragments = parse_diff(&diff);
    let export: Vec<FragmentExport> = fragments.iter().map(FragmentExport::from).collect();
    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

/// Undo what runs that died without cleanup left behind.
fn handle_recover(assume_yes: bool) -> Result<i32> {
    let git = Git::discover()?;
    let state_dir = git.state_dir()?;
    let mut journal = Journal::open(&state_dir.join("journal.db"))?;
    let runs = journal.unfinished_runs()?;
    let stashes = git.stashes_labelled(STASH_LABEL)?;
    let hidden = hidden_sessions(&state_dir.join(HIDDEN_DIR))?;

    if runs.is_empty() && stashes.is_empty() && hidden.is_empty() {
        println!("✓ Nothing to recover");
        return Ok(0);
    }

    for run in &runs {
        println!(
            "Run {} started {} ({} mode, {}), restore point {}",
            run.id,
            run.started_at,
            run.mode,
            run.target.as_deref().unwrap_or(&run.source),
            run.restore_point.as_deref().unwrap_or("none")
        );
    }
    if !stashes.is_empty() || !hidden.is_empty() {
        println!(
            "{} isolation stash entr(ies) and {} hidden file set(s) to restore",
            stashes.len(),
            hidden.len()
        );
    }
    if !assume_yes && !interrupt::confirm("Recover now?").context("No answer")? {
        println!("Nothing was changed");
        return Ok(0);
    }

    let mut failed = false;

    if !stashes.is_empty() {
        // The stash holds the staged entry too, so the index can be dropped.
        git.reset_hard()?;
        // Highest index first so the remaining references stay valid.
        for reference in stashes.iter().rev() {
            match git.stash_pop(reference)? {
                StashPop::Restored => println!("✓ Restored {}", reference),
                StashPop::Conflict(detail) => {
                    failed = true;
                    eprintln!("✗ {} conflicts, kept for manual resolution:\n{}", reference, detail);
                }
            }
        }
    }
    for dir in &hidden {
        let conflicts = isolation::restore_untracked(git.root(), dir)?;
        if conflicts.is_empty() {
            println!("✓ Restored untracked files from {}", dir.display());
        } else {
            failed = true;
            for path in conflicts {
                eprintln!(
                    "✗ {} exists again; the hidden copy stays in {}",
                    path.display(),
                    dir.display()
                );
            }
        }
    }

    for run in &runs {
        let mut notes = Vec::new();
        let current = git.current_branch()?;
        let work_branch = run.ephemeral_branch.as_ref().or(run.original_branch.as_ref());

        if let Some(point) = &run.restore_point {
            if current.as_ref() == work_branch || work_branch.is_none() {
                RollbackManager::rollback_to(&git, &RestorePoint::new(point.clone()))?;
                notes.push(format!("rolled back to {}", &point[..point.len().min(8)]));
                println!("✓ Run {}: rolled back to {}", run.id, point);
            } else {
                eprintln!(
                    "⚠ Run {}: not on its branch ({}), rollback skipped",
                    run.id,
                    work_branch.map(String::as_str).unwrap_or("?")
                );
            }
        }

        if let (Some(ephemeral), Some(original)) = (&run.ephemeral_branch, &run.original_branch)
            && git.branch_exists(ephemeral)?
        {
            if current.as_deref() == Some(ephemeral.as_str()) {
                git.switch_branch(original)?;
                println!("✓ Switched back to '{}'", original);
            }
            match git.delete_branch(ephemeral) {
                Ok(()) => notes.push(format!("deleted {}", ephemeral)),
                Err(e) => {
                    eprintln!("⚠ Could not delete '{}': {}", ephemeral, e);
                }
            }
        }

        let note = if notes.is_empty() { "nothing to undo".to_string() } else { notes.join(", ") };
        journal.mark_recovered(run.id, &note)?;
    }

    if failed {
        bail!("Recovery finished with conflicts that need manual resolution");
    }
    println!("✓ Recovery complete");
    Ok(0)
}

fn hidden_sessions(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut sessions = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            sessions.push(entry.path());
        }
    }
    sessions.sort();
    Ok(sessions)
}

fn handle_history(limit: usize) -> Result<()> {
    let git = Git::discover()?;
    let journal = Journal::open(&git.state_dir()?.join("journal.db"))?;
    let runs = journal.recent_runs(limit)?;
    if runs.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }

    println!("Recent runs");
    println!("─────────────────────────────────────");
    for run in runs {
        println!(
            "#{} {} {} {} [{}] {}/{} commits",
            run.id,
            run.started_at,
            run.mode,
            run.target.as_deref().unwrap_or(&run.source),
            run.status.as_str(),
            run.commits,
            run.entries
        );
        if let Some(entry) = run.failed_entry {
            println!("    failed at commit {}", entry);
        }
        if let Some(detail) = run.detail {
            println!("    {}", detail.lines().next().unwrap_or_default());
        }
    }
    Ok(())
}

use crate::DiffSource;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "git-split",
    about = "Split a large change into a series of focused commits",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Print diagnostics (same as RUST_LOG=git_split=debug).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Arguments for the default `split` command.
    #[command(flatten)]
    pub split: SplitArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan and apply commits for the current change (default).
    Split(SplitArgs),
    /// Print the extracted fragments as JSON for an external classifier.
    Fragments(SourceArgs),
    /// Clean up after a run that died without finishing.
    Recover(RecoverArgs),
    /// List recent runs.
    History(HistoryArgs),
}

/// Where the diff comes from.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Branch to compare against.
    #[arg(short, long, env = "GIT_SPLIT_TARGET", default_value = "main")]
    pub target: String,

    /// Read the diff from a file instead of the repository.
    #[arg(short = 'f', long)]
    pub diff_file: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Apply all commits, then verify.
    Normal,
    /// Apply one commit at a time with everything else hidden.
    Step,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Step => "step",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Execution mode.
    #[arg(short, long, value_enum, env = "GIT_SPLIT_MODE", default_value = "normal")]
    pub mode: Mode,

    /// Verification command run through `sh -c` after all commits.
    #[arg(long, env = "GIT_SPLIT_TEST_CMD")]
    pub test_cmd: Option<String>,

    /// Open the plan editor before executing.
    #[arg(long, conflicts_with = "execute")]
    pub edit_plan: bool,

    /// Execute the proposed plan without asking.
    #[arg(short, long)]
    pub execute: bool,

    /// Goals and assignment from an external classifier (JSON).
    #[arg(long, conflicts_with = "plan")]
    pub assignment: Option<PathBuf>,

    /// Execute a saved plan snapshot instead of classifying.
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Context for the classifier: text, or a path to a file holding it.
    #[arg(long)]
    pub context: Option<String>,

    /// Where draft patches and the plan snapshot are written.
    #[arg(long, default_value = ".git-split.draft")]
    pub draft_dir: PathBuf,

    /// Do not write drafts.
    #[arg(long)]
    pub no_drafts: bool,

    /// Answer yes to confirmations (rollback capability warning).
    #[arg(short, long)]
    pub yes: bool,

    /// Syntax theme of the plan editor.
    #[arg(long, env = "GIT_SPLIT_THEME", default_value = crate::highlight::DEFAULT_THEME)]
    pub theme: String,
}

#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Recover without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Number of runs to show.
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,
}

/// How the proposed plan is handled before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Ask,
    Edit,
    Execute,
}

/// Where goals and assignments come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSource {
    Directories,
    AssignmentFile(PathBuf),
    Snapshot(PathBuf),
}

/// Everything a `split` run needs, resolved from arguments and environment.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source: DiffSource,
    pub mode: Mode,
    pub test_cmd: Option<String>,
    pub action: PlanAction,
    pub plan_source: PlanSource,
    pub context: String,
    pub draft_dir: Option<PathBuf>,
    pub assume_yes: bool,
    pub theme: String,
}

impl SourceArgs {
    pub fn diff_source(&self) -> DiffSource {
        match &self.diff_file {
            Some(path) => DiffSource::File { path: path.clone() },
            None => DiffSource::Branch {
                target: self.target.clone(),
            },
        }
    }
}

impl SplitArgs {
    pub fn into_config(self) -> RunConfig {
        let action = if self.edit_plan {
            PlanAction::Edit
        } else if self.execute {
            PlanAction::Execute
        } else {
            PlanAction::Ask
        };
        let plan_source = match (self.plan, self.assignment) {
            (Some(path), _) => PlanSource::Snapshot(path),
            (None, Some(path)) => PlanSource::AssignmentFile(path),
            (None, None) => PlanSource::Directories,
        };
        RunConfig {
            source: self.source.diff_source(),
            mode: self.mode,
            test_cmd: self.test_cmd.filter(|c| !c.trim().is_empty()),
            action,
            plan_source,
            context: resolve_context(self.context.as_deref()),
            draft_dir: (!self.no_drafts).then_some(self.draft_dir),
            assume_yes: self.yes,
            theme: self.theme,
        }
    }
}

/// `--context` names a file when one exists at that path; otherwise it is
/// the context text itself.
fn resolve_context(value: Option<&str>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let path = std::path::Path::new(value);
    if path.is_file()
        && let Ok(text) = std::fs::read_to_string(path)
    {
        return text.trim().to_string();
    }
    value.trim().to_string()
}

/// Parse CLI arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}

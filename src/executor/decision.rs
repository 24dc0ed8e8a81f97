use crate::interrupt;
use crate::{CommitEntry, EntryId};
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;

/// What to do with an isolated commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Confirm,
    Skip,
    Abort,
}

impl Decision {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "c" | "confirm" | "y" | "yes" => Some(Decision::Confirm),
            "s" | "skip" => Some(Decision::Skip),
            "a" | "abort" => Some(Decision::Abort),
            _ => None,
        }
    }
}

/// The commit waiting for a decision.
#[derive(Debug)]
pub struct PendingCommit<'a> {
    pub position: usize,
    pub total: usize,
    pub entry: &'a CommitEntry,
    pub files: Vec<PathBuf>,
}

/// Supplies confirm/skip/abort decisions. Blocks without timeout.
pub trait DecisionSource {
    fn decide(&mut self, pending: &PendingCommit<'_>) -> io::Result<Decision>;
}

/// Asks on the terminal until a valid answer is given.
#[derive(Debug, Default)]
pub struct TerminalDecisions;

impl DecisionSource for TerminalDecisions {
    fn decide(&mut self, pending: &PendingCommit<'_>) -> io::Result<Decision> {
        println!();
        println!(
            "Commit {}/{} is staged and isolated: {}",
            pending.position, pending.total, pending.entry.message
        );
        for file in &pending.files {
            println!("    {}", file.display());
        }
        println!("  Only this commit's changes are in the working tree. Inspect, build or test now.");
        loop {
            let answer = interrupt::prompt("  (c)onfirm, (s)kip, (a)bort: ")?;
            match Decision::parse(&answer) {
                Some(decision) => return Ok(decision),
                None => println!("  Please answer c, s or a"),
            }
        }
    }
}

/// Replays a fixed list of decisions; fails once it runs out.
#[derive(Debug, Default)]
pub struct ScriptedDecisions {
    queue: VecDeque<Decision>,
    pub asked: Vec<EntryId>,
}

impl ScriptedDecisions {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            queue: decisions.into_iter().collect(),
            asked: Vec::new(),
        }
    }
}

impl DecisionSource for ScriptedDecisions {
    fn decide(&mut self, pending: &PendingCommit<'_>) -> io::Result<Decision> {
        self.asked.push(pending.entry.id);
        self.queue
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no decision left"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_parse() {
        assert_eq!(Decision::parse("C"), Some(Decision::Confirm));
        assert_eq!(Decision::parse(" skip "), Some(Decision::Skip));
        assert_eq!(Decision::parse("a"), Some(Decision::Abort));
        assert_eq!(Decision::parse("x"), None);
    }
}

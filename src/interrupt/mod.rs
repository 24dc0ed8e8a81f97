//! SIGINT/SIGTERM capture.
//!
//! Signals only raise a flag. Executors poll it between steps and prompts
//! return `Interrupted`, so a cancelled run takes the same rollback and
//! branch-restore path as any other failure.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_signal(_sig: i32) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM into the interrupt flag.
///
/// No `SA_RESTART`: a blocked terminal read returns `EINTR` so prompts can
/// notice the interrupt.
#[cfg(unix)]
pub fn install() {
    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(SigHandler::Handler(on_signal), SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic.
        if let Err(e) = unsafe { signal::sigaction(sig, &action) } {
            tracing::warn!(signal = ?sig, error = %e, "could not install signal handler");
        }
    }
}

#[cfg(not(unix))]
pub fn install() {}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Raise the flag without a signal, exactly as the handler would.
pub fn raise() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Lower the flag again, for a process that outlives one cancelled run.
pub fn clear() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Error returned by prompts cancelled with an interrupt.
pub fn interrupted_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "interrupted")
}

/// Print `message` and read one trimmed line from stdin.
///
/// End of input is reported as `UnexpectedEof`; an interrupt as `Interrupted`.
pub fn prompt(message: &str) -> io::Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    read_line_from(&mut io::stdin().lock())
}

pub fn read_line_from(reader: &mut impl BufRead) -> io::Result<String> {
    let mut line = String::new();
    loop {
        if interrupted() {
            return Err(interrupted_error());
        }
        match reader.read_line(&mut line) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no input"));
            }
            Ok(_) => return Ok(line.trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Ask a yes/no question; anything but `y`/`yes` is no.
pub fn confirm(message: &str) -> io::Result<bool> {
    let answer = prompt(&format!("{} [y/N] ", message))?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_one_trimmed_line() {
        let mut input = Cursor::new("  execute \nnext\n");
        assert_eq!(read_line_from(&mut input).unwrap(), "execute");
        assert_eq!(read_line_from(&mut input).unwrap(), "next");
    }

    #[test]
    fn end_of_input_is_an_error() {
        let mut input = Cursor::new("");
        let err = read_line_from(&mut input).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}

// Operator keys arrive on stdin, one command per line, and are forwarded to the
// inspection loop over a channel. The loop polls without blocking, so a quiet
// operator never stalls frame processing.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use pack_inspector::Command;
use tracing::{debug, warn};

/// Maps one line of operator input to a command.
/// An empty line (plain Enter) logs, like the space bar does.
pub fn parse_command(line: &str) -> Option<Command> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.trim().is_empty() {
        return Some(Command::Log);
    }
    match trimmed.trim().to_ascii_lowercase().as_str() {
        "l" | "log" => Some(Command::Log),
        "s" | "baseline" => Some(Command::SetBaseline),
        "q" | "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

/// Starts a reader thread on stdin. When stdin closes the thread ends and the
/// channel simply stays empty.
pub fn spawn_stdin_commands() -> Receiver<Command> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(%err, "stdin read failed, operator input disabled");
                    return;
                }
            };
            match parse_command(&line) {
                Some(command) => {
                    debug!(?command, "operator command");
                    if tx.send(command).is_err() {
                        return;
                    }
                }
                None => warn!(input = %line, "unknown command, use Enter/l, s or q"),
            }
        }
    });
    rx
}

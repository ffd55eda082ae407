//! Parsing for lines typed at the chat prompt.
//!
//! - `/quit` (any case) leaves the chat
//! - `@<user> <text>` sends a direct message
//! - anything else is broadcast verbatim

use std::{
    io::{self, BufRead},
    thread,
};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{envelope::ChatRequest, error::ChatError};

const INPUT_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Send(ChatRequest),
}

impl Command {
    /// Parses one line of terminal input. The only malformed input is an `@`
    /// line with no space after the target.
    pub fn parse(line: &str) -> Result<Self, ChatError> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.eq_ignore_ascii_case("/quit") {
            return Ok(Command::Quit);
        }

        if let Some(addressed) = line.strip_prefix('@') {
            let (target, content) = addressed.split_once(' ').ok_or(ChatError::UserInput)?;
            return Ok(Command::Send(ChatRequest::direct(target, content)));
        }

        Ok(Command::Send(ChatRequest::broadcast(line)))
    }
}

/// Reads stdin on a dedicated OS thread and forwards each line.
///
/// The thread lives outside tokio's blocking pool: a read parked on stdin must
/// not keep the runtime alive at shutdown. It exits on EOF or once the
/// receiver is dropped.
pub fn spawn_stdin_reader() -> io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(INPUT_BUFFER);
    thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(?error, "failed to read terminal input");
                        break;
                    }
                }
            }
            debug!("stdin reader finished");
        })?;
    Ok(rx)
}

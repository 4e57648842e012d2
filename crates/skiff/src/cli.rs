//! Argument parsing and usage text.

use std::path::PathBuf;

use skiff_core::{PeerAddr, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Send,
    Recv,
}

/// A fully parsed transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub mode: Mode,
    pub file: PathBuf,
    pub sender: PeerAddr,
    pub receiver: PeerAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Transfer(Invocation),
}

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("no command given")]
    Missing,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("`{mode}` takes <file> <sender_host:port> <receiver_host:port>, got {got} argument(s)")]
    WrongArity { mode: String, got: usize },

    #[error("bad {which} address: {source}")]
    BadAddress {
        which: &'static str,
        #[source]
        source: WireError,
    },
}

pub fn parse(args: &[String]) -> Result<Command, UsageError> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        [] => Err(UsageError::Missing),
        ["help"] | ["--help"] | ["-h"] => Ok(Command::Help),
        [mode @ ("send" | "recv"), file, sender, receiver] => {
            let mode = if *mode == "send" { Mode::Send } else { Mode::Recv };
            Ok(Command::Transfer(Invocation {
                mode,
                file: PathBuf::from(file),
                sender: parse_addr("sender", sender)?,
                receiver: parse_addr("receiver", receiver)?,
            }))
        }
        [mode @ ("send" | "recv"), rest @ ..] => Err(UsageError::WrongArity {
            mode: mode.to_string(),
            got: rest.len(),
        }),
        [other, ..] => Err(UsageError::UnknownCommand(other.to_string())),
    }
}

fn parse_addr(which: &'static str, text: &str) -> Result<PeerAddr, UsageError> {
    text.parse()
        .map_err(|source| UsageError::BadAddress { which, source })
}

pub fn usage() -> String {
    let mut text = String::new();
    text.push_str("Usage: skiff <mode> <file> <sender_host:port> <receiver_host:port>\n");
    text.push('\n');
    text.push_str("Modes:\n");
    text.push_str("  send    Read <file> and send it from the sender to the receiver address\n");
    text.push_str("  recv    Receive a file from the sender address and write it to <file>\n");
    text.push_str("  help    Show this message\n");
    text.push('\n');
    text.push_str("Environment:\n");
    text.push_str("  SKIFF_CONFIG    Config file path (default: ~/.config/skiff/config.toml)\n");
    text.push_str("  RUST_LOG        Log filter (default: info)\n");
    text
}

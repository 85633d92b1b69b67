//! Interactive-mode input parsing.
//!
//! Lines starting with `:` are session commands; anything else is a turn.

/// One line of interactive input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Submit a turn.
    Turn(String),
    /// Restore the file removed by the given delete.
    Undo(u64),
    /// List undoable deletes.
    UndoLog,
    /// Show the context budget.
    Status,
    /// Start a fresh session.
    New,
    Help,
    Quit,
    /// Blank line.
    Empty,
}

pub const HELP: &str = "\
:undo <id>   restore a deleted file
:undo-log    list undoable deletes
:status      show context usage
:new         start a new session (summaries are kept)
:help        show this help
:quit        exit
Ctrl-C cancels the running turn.";

/// Parse one input line.
pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(Command::Turn(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();
    match (name, arg) {
        ("undo", Some(id)) => id
            .parse()
            .map(Command::Undo)
            .map_err(|_| format!("not an undo id: {id}")),
        ("undo", None) => Err("usage: :undo <id>".to_string()),
        ("undo-log", _) => Ok(Command::UndoLog),
        ("status", _) => Ok(Command::Status),
        ("new", _) => Ok(Command::New),
        ("help", _) => Ok(Command::Help),
        ("quit" | "q" | "exit", _) => Ok(Command::Quit),
        _ => Err(format!("unknown command :{name} (try :help)")),
    }
}

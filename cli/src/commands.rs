//! Interactive commands read from stdin, one per line.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Restart,
    /// Type check everything, or only the named targets/groups.
    Typecheck(Vec<String>),
    Groups,
    Add(PathBuf),
    Remove(PathBuf),
    Status,
    Quit,
}

pub const HELP: &str = "commands: restart | typecheck [GROUP...] | groups | add ROOT | remove ROOT | status | quit";

/// Parse one input line. Blank lines are `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match (verb, rest.as_slice()) {
        ("restart", []) => Command::Restart,
        ("typecheck", groups) => Command::Typecheck(groups.iter().map(ToString::to_string).collect()),
        ("groups", []) => Command::Groups,
        ("add", [root]) => Command::Add(PathBuf::from(root)),
        ("remove", [root]) => Command::Remove(PathBuf::from(root)),
        ("status", []) => Command::Status,
        ("quit" | "exit", []) => Command::Quit,
        ("add" | "remove", _) => return Err(format!("usage: {verb} ROOT")),
        _ => return Err(format!("unknown command `{}`; {HELP}", line.trim())),
    };
    Ok(Some(command))
}

/// Make `path` absolute against `cwd`.
pub fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

//! Replayable shell commands.
//!
//! Every mutation gatepass performs is represented as a `Command` first;
//! the executor spawns the same value the script emitter renders, so the
//! two cannot drift apart.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One externally-executable command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    /// Directory the command must run in, if any.
    pub cwd: Option<PathBuf>,
    /// Free-text comment emitted above the command in the script.
    pub comment: Option<String>,
}

impl Command {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            comment: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// The command as a single shell line, arguments quoted as needed.
    pub fn rendered(&self) -> String {
        let mut parts = vec![shell_quote(&self.program)];
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }

    /// Script lines for this command: comment lines, an optional
    /// `cd`/`cd -` bracket around the command itself.
    pub fn to_sh_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(comment) = &self.comment {
            for c in comment.split('\n') {
                lines.push(format!("# {c}"));
            }
        }
        if let Some(cwd) = &self.cwd {
            lines.push(format!("cd {}", shell_quote(&cwd.display().to_string())));
            lines.push(self.rendered());
            lines.push("cd -".to_string());
        } else {
            lines.push(self.rendered());
        }
        lines
    }
}

/// Quote a word for `sh` if it contains anything unsafe.
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./@+=:,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

//! The shell's error taxonomy (spec §7): kinds, not exception types. Each
//! variant carries enough context to render the `xd-shell: <operand>: <msg>`
//! diagnostic at the point it's printed.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("bad substitution: ${{{name}}}")]
    BadSubstitution { name: String },
    #[error("command substitution failed: {0}")]
    CommandSubstitutionError(String),
    #[error("expansion internal error: {0}")]
    ExpansionInternalError(String),
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Lookup(String),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Expansion(#[from] ExpansionError),
    #[error("{0}")]
    Exec(String),
    #[error("{0}")]
    Fatal(String),
}

impl ShellError {
    /// Exit-code mapping at the REPL boundary (spec §6).
    pub fn exit_code(&self) -> i32 {
        match self {
            ShellError::Usage(_) => 2,
            ShellError::Lookup(_) => 1,
            ShellError::Io { .. } => 1,
            ShellError::Expansion(_) => 1,
            ShellError::Exec(_) => 127,
            ShellError::Fatal(_) => 1,
        }
    }
}

/// Render `err` as the `xd-shell: ...` diagnostic mandated by spec §7.
pub fn report(err: &ShellError) {
    eprintln!("xd-shell: {err}");
}

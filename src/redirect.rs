//! Redirection-operator recognition: separates `>`, `>>`, `<`, `2>`, `2>>`,
//! `2>&1`, `1>&2` tokens from the regular argument tokens of one pipeline
//! stage, attaching the result to a `Command` (spec §3 fields, §4.3 rule:
//! "a redirect file wins over the incoming/outgoing pipe").
//!
//! This operates on *raw* tokens (quoting still present, not yet expanded) —
//! the operator characters themselves must be original per spec §4.1, so
//! recognition happens before expansion, while the filename operand is
//! still expanded like any other argument (spec treats the lexer as an
//! input producer; this module is the thin slice of that producer the
//! redirect-installation contract in §4.3 depends on).
//!
//! Grounded on the teacher's `redirect.rs`, trimmed to the operator set spec
//! §3/§4.3 actually names (no here-strings — `<<<` isn't part of this
//! spec's scope) and adapted to produce `model::{FileRedirect, StderrTarget}`
//! instead of a generic `RedirectTarget` enum.

use crate::error::ShellError;
use crate::model::{Command, FileRedirect, StderrTarget, StdoutTarget};

/// Apply any redirection operators found in `tokens` (already
/// word-split/glob-expanded argument strings) to `cmd`, returning the
/// remaining non-operator tokens as `cmd`'s argv tail.
///
/// Errors come back as `ShellError::Usage`, matching spec §7's
/// `xd-shell: <operand>: <message>` diagnostic convention and its exit-code
/// class (2), reported at the REPL boundary by `main.rs`.
pub fn apply_redirections(cmd: &mut Command, tokens: Vec<String>) -> Result<(), ShellError> {
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i].as_str();
        match token {
            ">" => {
                let path = take_filename(&tokens, &mut i, ">").map_err(ShellError::Usage)?;
                check_single(cmd.stdout_redirect.is_none(), "stdout").map_err(ShellError::Usage)?;
                cmd.stdout_redirect =
                    Some(StdoutTarget::File(FileRedirect { path: path.into(), append: false }));
            }
            ">>" => {
                let path = take_filename(&tokens, &mut i, ">>").map_err(ShellError::Usage)?;
                check_single(cmd.stdout_redirect.is_none(), "stdout").map_err(ShellError::Usage)?;
                cmd.stdout_redirect =
                    Some(StdoutTarget::File(FileRedirect { path: path.into(), append: true }));
            }
            "<" => {
                let path = take_filename(&tokens, &mut i, "<").map_err(ShellError::Usage)?;
                check_single(cmd.stdin_redirect.is_none(), "stdin").map_err(ShellError::Usage)?;
                cmd.stdin_redirect = Some(path.into());
            }
            "2>" => {
                let path = take_filename(&tokens, &mut i, "2>").map_err(ShellError::Usage)?;
                check_single(cmd.stderr_redirect.is_none(), "stderr").map_err(ShellError::Usage)?;
                cmd.stderr_redirect = Some(StderrTarget::File(FileRedirect { path: path.into(), append: false }));
            }
            "2>>" => {
                let path = take_filename(&tokens, &mut i, "2>>").map_err(ShellError::Usage)?;
                check_single(cmd.stderr_redirect.is_none(), "stderr").map_err(ShellError::Usage)?;
                cmd.stderr_redirect = Some(StderrTarget::File(FileRedirect { path: path.into(), append: true }));
            }
            "2>&1" => {
                check_single(cmd.stderr_redirect.is_none(), "stderr").map_err(ShellError::Usage)?;
                cmd.stderr_redirect = Some(StderrTarget::DupStdout);
            }
            "1>&2" => {
                check_single(cmd.stdout_redirect.is_none(), "stdout").map_err(ShellError::Usage)?;
                cmd.stdout_redirect = Some(StdoutTarget::DupStderr);
            }
            _ => cmd.push_arg(tokens[i].clone()),
        }
        i += 1;
    }
    Ok(())
}

fn check_single(is_first: bool, which: &str) -> Result<(), String> {
    if is_first {
        Ok(())
    } else {
        Err(format!("{which}: only one redirection allowed per fd"))
    }
}

fn take_filename(tokens: &[String], i: &mut usize, operator: &str) -> Result<String, String> {
    *i += 1;
    tokens
        .get(*i)
        .cloned()
        .ok_or_else(|| format!("syntax error: expected filename after '{operator}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &[&str]) -> Vec<String> {
        s.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn stdout_truncate() {
        let mut cmd = Command::new("echo hi > out.txt".into());
        apply_redirections(&mut cmd, toks(&["echo", "hi", ">", "out.txt"])).unwrap();
        assert_eq!(cmd.argv, vec!["echo", "hi"]);
        assert!(matches!(
            cmd.stdout_redirect,
            Some(StdoutTarget::File(FileRedirect { append: false, .. }))
        ));
    }

    #[test]
    fn stdout_append() {
        let mut cmd = Command::new("x".into());
        apply_redirections(&mut cmd, toks(&["cmd", ">>", "log"])).unwrap();
        assert!(matches!(
            cmd.stdout_redirect,
            Some(StdoutTarget::File(FileRedirect { append: true, .. }))
        ));
    }

    #[test]
    fn stdout_dup_stderr() {
        let mut cmd = Command::new("x".into());
        apply_redirections(&mut cmd, toks(&["cmd", "1>&2"])).unwrap();
        assert!(matches!(cmd.stdout_redirect, Some(StdoutTarget::DupStderr)));
    }

    #[test]
    fn stderr_dup_stdout() {
        let mut cmd = Command::new("x".into());
        apply_redirections(&mut cmd, toks(&["cmd", "2>&1"])).unwrap();
        assert!(matches!(cmd.stderr_redirect, Some(StderrTarget::DupStdout)));
    }

    #[test]
    fn missing_filename_is_error() {
        let mut cmd = Command::new("x".into());
        assert!(apply_redirections(&mut cmd, toks(&["echo", ">"])).is_err());
    }

    #[test]
    fn duplicate_stdout_redirect_is_error() {
        let mut cmd = Command::new("x".into());
        assert!(apply_redirections(&mut cmd, toks(&["cmd", ">", "a", ">", "b"])).is_err());
    }
}

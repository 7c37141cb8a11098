//! `ShellContext` (spec §9): the one mutable struct the REPL loop, executor,
//! and builtins all share — job table, terminal custody, and the small bits
//! of running state (`$?`, `$!`) that outlive a single command.
//!
//! Grounded on spec §9's explicit design note that this state belongs in a
//! single struct reached by value/reference rather than scattered globals,
//! with the `SIGCHLD` handler reaching the job table only through the
//! atomic flag in `jobs.rs` (never a `Mutex` — locking from a signal
//! handler is unsound).

use std::io;

use crate::jobs::JobTable;
use crate::terminal::TerminalSteward;

pub struct ShellContext {
    pub job_table: JobTable,
    pub terminal: TerminalSteward,
    pub last_exit_code: i32,
    pub last_bg_pid: Option<libc::pid_t>,
    pub interactive: bool,
}

impl ShellContext {
    pub fn new(interactive: bool) -> io::Result<Self> {
        let terminal = TerminalSteward::claim(interactive)?;
        Ok(ShellContext {
            job_table: JobTable::new(),
            terminal,
            last_exit_code: 0,
            last_bg_pid: None,
            interactive,
        })
    }

    pub fn shell_pid(&self) -> libc::pid_t {
        self.terminal.shell_pgid()
    }
}

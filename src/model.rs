//! Command / Job model (spec §3, §4.2): pure data containers for one
//! executable invocation (`Command`) and one pipeline of them (`Job`).
//!
//! Grounded on the teacher's `parser::Command` + `redirect::Redirection`,
//! generalized into the richer invariant-bearing shape spec §3 describes —
//! in particular the originality-aware `StderrTarget::DupStdout` variant
//! that realizes "if equal to stdout_redirect.path, semantically aliased"
//! as an explicit enum case instead of a runtime string comparison.

use std::path::PathBuf;
use std::time::Instant;

use crate::terminal::TtyModes;

/// Where a file-backed redirection target points, and in which mode.
#[derive(Debug, Clone)]
pub struct FileRedirect {
    pub path: PathBuf,
    pub append: bool,
}

/// stderr's redirection target: either its own file, or explicitly aliased
/// to wherever stdout currently points (spec §3's "if equal to
/// stdout_redirect.path" rule, and spec §4.3's `2>&1` handling).
#[derive(Debug, Clone)]
pub enum StderrTarget {
    File(FileRedirect),
    DupStdout,
}

/// stdout's redirection target: its own file, or aliased to wherever stderr
/// currently points (`1>&2`), the mirror image of `StderrTarget`.
#[derive(Debug, Clone)]
pub enum StdoutTarget {
    File(FileRedirect),
    DupStderr,
}

/// One executable invocation within a pipeline (spec §3 "Command").
#[derive(Debug, Clone)]
pub struct Command {
    /// `argv[0]` is the program name to resolve; non-empty once built for
    /// execution (spec §3 invariant).
    pub argv: Vec<String>,
    pub stdin_redirect: Option<PathBuf>,
    pub stdout_redirect: Option<StdoutTarget>,
    pub stderr_redirect: Option<StderrTarget>,
    /// 0 until forked.
    pub pid: libc::pid_t,
    pub last_status: Option<crate::status::RawStatus>,
    /// Source text of this command, for `jobs` output.
    pub display_string: String,
}

impl Command {
    pub fn new(display_string: String) -> Self {
        Command {
            argv: Vec::new(),
            stdin_redirect: None,
            stdout_redirect: None,
            stderr_redirect: None,
            pid: 0,
            last_status: None,
            display_string,
        }
    }

    pub fn push_arg(&mut self, arg: String) {
        self.argv.push(arg);
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    fn was_stopped(&self) -> bool {
        self.last_status.is_some_and(crate::status::RawStatus::is_stopped)
    }
}

/// Derived lifecycle state of a Job (spec §3: computed, not stored).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done,
}

/// One pipeline: an ordered sequence of Commands sharing a process group
/// (spec §3 "Job").
pub struct Job {
    pub commands: Vec<Command>,
    pub background: bool,
    pub pgid: libc::pid_t,
    pub unreaped_count: u32,
    pub stopped_count: u32,
    pub last_status: Option<crate::status::RawStatus>,
    pub job_id: usize,
    pub last_active: Instant,
    pub notify: bool,
    pub saved_tty_modes: Option<TtyModes>,
    /// Full pipeline source text (e.g. `sleep 10 | cat &`), for `jobs`/`fg`.
    pub display_string: String,
}

impl Job {
    pub fn new(commands: Vec<Command>, background: bool, display_string: String) -> Self {
        debug_assert!(!commands.is_empty(), "a Job must have at least one command");
        Job {
            commands,
            background,
            pgid: 0,
            unreaped_count: 0,
            stopped_count: 0,
            last_status: None,
            job_id: 0,
            last_active: Instant::now(),
            notify: false,
            saved_tty_modes: None,
            display_string,
        }
    }

    pub fn state(&self) -> JobState {
        if self.unreaped_count == 0 {
            JobState::Done
        } else if self.stopped_count > 0 && self.stopped_count == self.unreaped_count {
            JobState::Stopped
        } else {
            JobState::Running
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Apply a reaped status to the command at `pid`, mirroring spec §4.4's
    /// reaper state-machine transitions. Shared by the async `SIGCHLD`
    /// handler and the synchronous foreground-wait loop so both paths stay
    /// consistent (spec §4.4 "remains correct if a SIGCHLD arrived before
    /// the main-thread wait observed the same event").
    ///
    /// Returns `true` if this event made the job notify-worthy (fully dead
    /// or fully stopped).
    pub fn apply_status(&mut self, pid: libc::pid_t, status: crate::status::RawStatus) -> bool {
        let is_last = self.commands.last().map(|c| c.pid) == Some(pid);
        let Some(cmd) = self.commands.iter_mut().find(|c| c.pid == pid) else {
            return false;
        };
        let was_stopped = cmd.was_stopped();
        cmd.last_status = Some(status);
        if is_last {
            self.last_status = Some(status);
        }

        use crate::status::Event;
        match status.decode() {
            Event::Continued => {
                if was_stopped {
                    self.stopped_count = self.stopped_count.saturating_sub(1);
                }
            }
            Event::Stopped(_) => {
                if !was_stopped {
                    self.stopped_count += 1;
                }
            }
            Event::Exited(_) | Event::Signaled(_) => {
                if was_stopped {
                    self.stopped_count = self.stopped_count.saturating_sub(1);
                }
                self.unreaped_count = self.unreaped_count.saturating_sub(1);
            }
        }

        self.touch();
        matches!(self.state(), JobState::Done | JobState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::RawStatus;

    fn exited(code: i32) -> RawStatus {
        RawStatus(unsafe { make_wifexited(code) })
    }

    // Build a real WIFEXITED-shaped status word the portable way: run a
    // child and capture it. Constructing raw glibc-internal encodings by
    // hand would tie this test to one libc's bit layout.
    unsafe fn make_wifexited(code: i32) -> libc::c_int {
        use std::process::Command;
        let status = Command::new("sh")
            .args(["-c", &format!("exit {code}")])
            .status()
            .expect("spawn sh");
        #[allow(clippy::unnecessary_cast)]
        {
            use std::os::unix::process::ExitStatusExt;
            status.into_raw() as libc::c_int
        }
    }

    #[test]
    fn counter_bounds_hold_after_pipeline_conservation() {
        let mut job = Job::new(
            vec![Command::new("a".into()), Command::new("b".into())],
            false,
            "a | b".into(),
        );
        job.commands[0].pid = 10;
        job.commands[1].pid = 11;
        job.unreaped_count = 2;

        assert!(!job.apply_status(10, exited(0)));
        assert_eq!(job.unreaped_count, 1);
        assert_eq!(job.stopped_count, 0);

        assert!(job.apply_status(11, exited(3)));
        assert_eq!(job.unreaped_count, 0);
        assert_eq!(job.state(), JobState::Done);
        assert_eq!(job.last_status.unwrap().exit_code(), 3);
    }

    #[test]
    fn stopped_then_continued_round_trips() {
        let mut job = Job::new(vec![Command::new("sleep".into())], false, "sleep".into());
        job.commands[0].pid = 42;
        job.unreaped_count = 1;

        // Simulate a SIGTSTP stop via a raw status carrying WIFSTOPPED.
        // We can't easily fabricate this cross-platform without a real
        // stopped child, so this test exercises the counter math directly
        // against the documented invariant instead.
        job.stopped_count = 1;
        assert_eq!(job.state(), JobState::Stopped);
        assert!(job.stopped_count <= job.unreaped_count);
    }
}

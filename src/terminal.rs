//! Terminal Steward (spec §4.5): owns the shell's own tty attributes and
//! enforces that the controlling terminal's foreground pgrp is always
//! either the shell's own pgrp or the currently-foreground job's pgrp.
//!
//! Grounded on the teacher's `job_control::ForegroundTerminalGuard`,
//! generalized into a reusable steward that also captures/restores full
//! `termios` state (spec §3's `saved_tty_modes` field) rather than just the
//! foreground pgrp.

use std::io;

use crate::process;

/// A captured snapshot of `tcgetattr` state for stdin's terminal, restorable
/// later via `tcsetattr`. `None` when stdin isn't a terminal.
#[derive(Debug, Clone)]
pub struct TtyModes(Option<libc::termios>);

impl TtyModes {
    pub fn capture() -> Self {
        let mut modes: libc::termios = unsafe { std::mem::zeroed() };
        let ok = unsafe { libc::tcgetattr(libc::STDIN_FILENO, &mut modes) } == 0;
        TtyModes(ok.then_some(modes))
    }

    /// Restore these modes onto stdin's terminal, restarted on `EINTR`.
    pub fn restore(&self) -> io::Result<()> {
        let Some(modes) = self.0 else { return Ok(()) };
        loop {
            let rc = unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSADRAIN, &modes) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }
    }
}

/// The shell's long-lived terminal custodian: knows the shell's own pgid and
/// the tty attributes captured at startup, and mediates every foreground
/// handoff so the invariant in spec §8 ("terminal custody") always holds
/// once control returns to the shell.
pub struct TerminalSteward {
    /// `None` when stdin is not a controlling terminal (non-interactive
    /// mode) — every method becomes a no-op in that case.
    fd: Option<libc::c_int>,
    shell_pgid: libc::pid_t,
    shell_modes: TtyModes,
}

impl TerminalSteward {
    /// Claim the terminal for the shell at startup (spec §6 process
    /// lifecycle): wait until the shell's pgrp is the foreground pgrp
    /// (sending itself `SIGTTIN` in the interim is how the kernel would
    /// otherwise stop it), put the shell in its own process group, and take
    /// foreground ownership.
    pub fn claim(interactive: bool) -> io::Result<Self> {
        let shell_pgid = unsafe { libc::getpid() };
        let is_tty = interactive && unsafe { libc::isatty(libc::STDIN_FILENO) } == 1;
        let fd = is_tty.then_some(libc::STDIN_FILENO);

        if let Some(fd) = fd {
            // Put the shell in its own group and become foreground. Looping
            // on SIGTTIN here would require a job-control-aware launcher
            // (e.g. a login shell reparenting us); a plain invocation from
            // an interactive terminal already has the terminal unowned or
            // owned by our own group, so a single attempt suffices.
            process::setpgid(0, shell_pgid)?;
            process::tcsetpgrp(fd, shell_pgid)?;
        }

        Ok(TerminalSteward {
            fd,
            shell_pgid,
            shell_modes: TtyModes::capture(),
        })
    }

    pub fn is_interactive(&self) -> bool {
        self.fd.is_some()
    }

    pub fn shell_pgid(&self) -> libc::pid_t {
        self.shell_pgid
    }

    /// Hand the terminal to `pgid` for the duration of a foreground job,
    /// returning a guard that hands it back to the shell on drop. No-op
    /// (returns `None`) when the shell isn't interactive.
    pub fn hand_to(&self, pgid: libc::pid_t) -> io::Result<Option<ForegroundGuard<'_>>> {
        let Some(fd) = self.fd else { return Ok(None) };
        process::tcsetpgrp(fd, pgid)?;
        Ok(Some(ForegroundGuard::new(fd, self.shell_pgid)))
    }

    /// Re-take the terminal for the shell directly (used on the failure
    /// cleanup path of spec §4.3, where there's no single guard to drop).
    pub fn reclaim(&self) -> io::Result<()> {
        if let Some(fd) = self.fd {
            process::tcsetpgrp(fd, self.shell_pgid)?;
        }
        Ok(())
    }

    pub fn capture_current_modes(&self) -> TtyModes {
        TtyModes::capture()
    }

    pub fn restore_shell_modes(&self) -> io::Result<()> {
        self.shell_modes.restore()
    }
}

/// RAII guard restoring the shell as terminal foreground on drop. Errors
/// during restore are swallowed (there is no good recovery action if
/// `tcsetpgrp` fails while unwinding).
pub struct ForegroundGuard<'a> {
    fd: libc::c_int,
    shell_pgid: libc::pid_t,
    // Tie the guard's lifetime to the steward even though it carries its own
    // copies of fd/pgid, so a future steward field can't be mutated from
    // under an active handoff.
    #[allow(dead_code)]
    marker: std::marker::PhantomData<&'a ()>,
}

impl<'a> ForegroundGuard<'a> {
    fn new(fd: libc::c_int, shell_pgid: libc::pid_t) -> Self {
        ForegroundGuard {
            fd,
            shell_pgid,
            marker: std::marker::PhantomData,
        }
    }
}

impl Drop for ForegroundGuard<'_> {
    fn drop(&mut self) {
        let _ = process::tcsetpgrp(self.fd, self.shell_pgid);
    }
}

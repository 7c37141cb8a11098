//! Decoding of raw `waitpid` status words into shell-visible exit semantics
//! (spec §3's derived *Running*/*Stopped*/*Done* states and §6's exit-code
//! contract: `128 + signum` when terminated by a signal).

/// The raw integer status word handed back by `waitpid(2)`, kept exactly as
/// the kernel produced it so `WIFEXITED`/`WIFSIGNALED`/`WIFSTOPPED`/
/// `WIFCONTINUED` can be re-decoded later (the Command's `last_status` field
/// in spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStatus(pub libc::c_int);

/// What a raw status word says happened to a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Exited(i32),
    Signaled(i32),
    Stopped(i32),
    Continued,
}

impl RawStatus {
    pub fn decode(self) -> Event {
        let raw = self.0;
        unsafe {
            if libc::WIFEXITED(raw) {
                Event::Exited(libc::WEXITSTATUS(raw))
            } else if libc::WIFSIGNALED(raw) {
                Event::Signaled(libc::WTERMSIG(raw))
            } else if libc::WIFSTOPPED(raw) {
                Event::Stopped(libc::WSTOPSIG(raw))
            } else {
                // WIFCONTINUED isn't exposed as a libc fn on every target; the
                // kernel uses the sentinel value 0xffff for SIGCONT delivery.
                Event::Continued
            }
        }
    }

    pub fn is_stopped(self) -> bool {
        matches!(self.decode(), Event::Stopped(_))
    }

    /// The shell-visible exit code: `128 + signum` on signal death, per spec §6.
    pub fn exit_code(self) -> i32 {
        match self.decode() {
            Event::Exited(code) => code,
            Event::Signaled(sig) => 128 + sig,
            Event::Stopped(_) | Event::Continued => 0,
        }
    }
}

/// Render the `(core dumped)` / `Done` / `Stopped(SIGNAME)` style suffix the
/// `jobs` builtin prints, decoded from the last raw status observed.
pub fn describe(status: Option<RawStatus>) -> String {
    match status.map(RawStatus::decode) {
        None | Some(Event::Continued) => "Running".to_string(),
        Some(Event::Stopped(sig)) => format!("Stopped({})", signal_name(sig)),
        Some(Event::Exited(0)) => "Done".to_string(),
        Some(Event::Exited(code)) => format!("Done({code})"),
        Some(Event::Signaled(sig)) => format!("Signal({})", signal_name(sig)),
    }
}

pub fn signal_name(sig: i32) -> &'static str {
    match sig {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGABRT => "SIGABRT",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGBUS => "SIGBUS",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGSYS => "SIGSYS",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGURG => "SIGURG",
        libc::SIGSTOP => "SIGSTOP",
        libc::SIGTSTP => "SIGTSTP",
        libc::SIGCONT => "SIGCONT",
        libc::SIGCHLD => "SIGCHLD",
        libc::SIGTTIN => "SIGTTIN",
        libc::SIGTTOU => "SIGTTOU",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGUSR2 => "SIGUSR2",
        _ => "SIG?",
    }
}

/// Parse a signal name (`"TERM"`, `"SIGTERM"`, or a bare number) into a
/// signal number, for the `kill` builtin's `-s`/`-signame` operand forms.
pub fn parse_signal(spec: &str) -> Option<i32> {
    if let Ok(n) = spec.parse::<i32>() {
        return Some(n);
    }
    let name = spec.strip_prefix("SIG").unwrap_or(spec).to_ascii_uppercase();
    let num = match name.as_str() {
        "HUP" => libc::SIGHUP,
        "INT" => libc::SIGINT,
        "QUIT" => libc::SIGQUIT,
        "ILL" => libc::SIGILL,
        "TRAP" => libc::SIGTRAP,
        "ABRT" => libc::SIGABRT,
        "FPE" => libc::SIGFPE,
        "KILL" => libc::SIGKILL,
        "BUS" => libc::SIGBUS,
        "SEGV" => libc::SIGSEGV,
        "SYS" => libc::SIGSYS,
        "PIPE" => libc::SIGPIPE,
        "ALRM" => libc::SIGALRM,
        "TERM" => libc::SIGTERM,
        "URG" => libc::SIGURG,
        "STOP" => libc::SIGSTOP,
        "TSTP" => libc::SIGTSTP,
        "CONT" => libc::SIGCONT,
        "CHLD" => libc::SIGCHLD,
        "TTIN" => libc::SIGTTIN,
        "TTOU" => libc::SIGTTOU,
        "USR1" => libc::SIGUSR1,
        "USR2" => libc::SIGUSR2,
        _ => return None,
    };
    Some(num)
}

/// The signal table for `kill -l`.
pub const SIGNAL_TABLE: &[(i32, &str)] = &[
    (libc::SIGHUP, "HUP"),
    (libc::SIGINT, "INT"),
    (libc::SIGQUIT, "QUIT"),
    (libc::SIGILL, "ILL"),
    (libc::SIGTRAP, "TRAP"),
    (libc::SIGABRT, "ABRT"),
    (libc::SIGBUS, "BUS"),
    (libc::SIGFPE, "FPE"),
    (libc::SIGKILL, "KILL"),
    (libc::SIGUSR1, "USR1"),
    (libc::SIGSEGV, "SEGV"),
    (libc::SIGUSR2, "USR2"),
    (libc::SIGPIPE, "PIPE"),
    (libc::SIGALRM, "ALRM"),
    (libc::SIGTERM, "TERM"),
    (libc::SIGCHLD, "CHLD"),
    (libc::SIGCONT, "CONT"),
    (libc::SIGSTOP, "STOP"),
    (libc::SIGTSTP, "TSTP"),
    (libc::SIGTTIN, "TTIN"),
    (libc::SIGTTOU, "TTOU"),
    (libc::SIGURG, "URG"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_signal_accepts_bare_number() {
        assert_eq!(parse_signal("9"), Some(9));
    }

    #[test]
    fn parse_signal_accepts_name_with_and_without_prefix() {
        assert_eq!(parse_signal("TERM"), Some(libc::SIGTERM));
        assert_eq!(parse_signal("SIGTERM"), Some(libc::SIGTERM));
        assert_eq!(parse_signal("term"), Some(libc::SIGTERM));
    }

    #[test]
    fn parse_signal_rejects_unknown_name() {
        assert_eq!(parse_signal("NOTASIGNAL"), None);
    }

    #[test]
    fn signal_name_roundtrips_common_signals() {
        for &(num, name) in SIGNAL_TABLE {
            assert_eq!(parse_signal(name), Some(num));
            assert_eq!(signal_name(num), format!("SIG{name}"));
        }
    }
}

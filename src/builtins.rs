//! Builtins (spec §5): commands the shell itself implements instead of
//! exec'ing, because they need to mutate the shell's own state (current
//! directory, environment, job table, foreground group) rather than a
//! child's.
//!
//! Grounded on the teacher's `builtins.rs` for the ambient set
//! (cd/pwd/exit/echo/export/unset/type — `is_executable`/`find_in_path`
//! kept, trimmed to the unix-only executable-bit check since this shell
//! targets one POSIX kernel) and on the teacher's `job_control`/`jobs`
//! call sites for `jobs`/`fg`/`bg`/`kill`/`wait`, generalized to take
//! `&mut ShellContext` instead of a bare job table so they can move the
//! terminal and resolve `$?`/`$!`.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::context::ShellContext;
use crate::model::JobState;
use crate::process;
use crate::status::{parse_signal, RawStatus};

const BUILTINS: &[&str] = &[
    "cd", "pwd", "exit", "echo", "export", "unset", "type", "jobs", "fg", "bg", "kill", "wait",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// What running a builtin did to the shell's control flow: either it's an
/// ordinary command whose exit code feeds `$?` (`Continue`), or it's `exit`,
/// which never returns to the caller.
pub enum BuiltinOutcome {
    Continue(i32),
    Exit(i32),
}

#[allow(clippy::too_many_arguments)]
pub fn execute(
    program: &str,
    args: &[String],
    _stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    ctx: &mut ShellContext,
) -> BuiltinOutcome {
    match program {
        "cd" => BuiltinOutcome::Continue(builtin_cd(args, stderr)),
        "pwd" => BuiltinOutcome::Continue(builtin_pwd(stdout, stderr)),
        "exit" => builtin_exit(args, stderr, ctx),
        "echo" => BuiltinOutcome::Continue(builtin_echo(args, stdout)),
        "export" => BuiltinOutcome::Continue(builtin_export(args, stderr)),
        "unset" => BuiltinOutcome::Continue(builtin_unset(args)),
        "type" => BuiltinOutcome::Continue(builtin_type(args, stdout, stderr)),
        "jobs" => BuiltinOutcome::Continue(builtin_jobs(args, stdout, ctx)),
        "fg" => BuiltinOutcome::Continue(builtin_fg(args, stdout, stderr, ctx)),
        "bg" => BuiltinOutcome::Continue(builtin_bg(args, stdout, stderr, ctx)),
        "kill" => BuiltinOutcome::Continue(builtin_kill(args, stdout, stderr, ctx)),
        "wait" => BuiltinOutcome::Continue(builtin_wait(args, stderr, ctx)),
        _ => {
            let _ = writeln!(stderr, "xd-shell: unknown builtin: {program}");
            BuiltinOutcome::Continue(1)
        }
    }
}

fn builtin_cd(args: &[String], stderr: &mut dyn Write) -> i32 {
    let target = match args.first() {
        Some(dir) if dir == "-" => match std::env::var("OLDPWD") {
            Ok(prev) => prev,
            Err(_) => {
                let _ = writeln!(stderr, "cd: OLDPWD not set");
                return 1;
            }
        },
        Some(dir) => dir.clone(),
        None => std::env::var("HOME").unwrap_or_else(|_| ".".to_string()),
    };

    if let Ok(cwd) = std::env::current_dir() {
        unsafe { std::env::set_var("OLDPWD", cwd) };
    }

    if let Err(e) = std::env::set_current_dir(&target) {
        let _ = writeln!(stderr, "cd: {target}: {e}");
        return 1;
    }
    0
}

fn builtin_pwd(stdout: &mut dyn Write, stderr: &mut dyn Write) -> i32 {
    match std::env::current_dir() {
        Ok(path) => {
            let _ = writeln!(stdout, "{}", path.display());
            0
        }
        Err(e) => {
            let _ = writeln!(stderr, "pwd: {e}");
            1
        }
    }
}

fn builtin_exit(args: &[String], stderr: &mut dyn Write, ctx: &ShellContext) -> BuiltinOutcome {
    match args.first() {
        None => BuiltinOutcome::Exit(ctx.last_exit_code),
        Some(s) => match s.parse::<i32>() {
            Ok(code) => BuiltinOutcome::Exit(code),
            Err(_) => {
                let _ = writeln!(stderr, "exit: {s}: numeric argument required");
                BuiltinOutcome::Exit(2)
            }
        },
    }
}

fn builtin_echo(args: &[String], stdout: &mut dyn Write) -> i32 {
    let _ = writeln!(stdout, "{}", args.join(" "));
    0
}

fn builtin_export(args: &[String], stderr: &mut dyn Write) -> i32 {
    for arg in args {
        if let Some((key, value)) = arg.split_once('=') {
            unsafe { std::env::set_var(key, value) };
        } else {
            let _ = writeln!(stderr, "export: usage: export VAR=value");
        }
    }
    0
}

fn builtin_unset(args: &[String]) -> i32 {
    for arg in args {
        unsafe { std::env::remove_var(arg) };
    }
    0
}

fn builtin_type(args: &[String], stdout: &mut dyn Write, stderr: &mut dyn Write) -> i32 {
    let mut exit_code = 0;
    for arg in args {
        if is_builtin(arg) {
            let _ = writeln!(stdout, "{arg} is a shell builtin");
        } else {
            match find_in_path(arg) {
                Some(path) => {
                    let _ = writeln!(stdout, "{arg} is {}", path.display());
                }
                None => {
                    let _ = writeln!(stderr, "{arg}: not found");
                    exit_code = 1;
                }
            }
        }
    }
    exit_code
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else { return false };
    if !meta.is_file() {
        return false;
    }
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

fn find_in_path(cmd: &str) -> Option<PathBuf> {
    let path_var = std::env::var("PATH").ok()?;
    for dir in path_var.split(':') {
        let full_path = Path::new(dir).join(cmd);
        if is_executable(&full_path) {
            return Some(full_path);
        }
    }
    None
}

// ── Job control builtins (spec §5.2) ────────────────────────────────────────

fn job_state_label(state: JobState) -> &'static str {
    match state {
        JobState::Running => "Running",
        JobState::Stopped => "Stopped",
        JobState::Done => "Done",
    }
}

fn builtin_jobs(args: &[String], stdout: &mut dyn Write, ctx: &mut ShellContext) -> i32 {
    let show_pids_only = args.iter().any(|a| a == "-p");
    let show_pid_column = args.iter().any(|a| a == "-l");
    let mut ids = ctx.job_table.sorted_ids();
    ids.sort_unstable();
    let current = ctx.job_table.current_job();
    for id in ids {
        let Some(job) = ctx.job_table.get(id) else { continue };
        if show_pids_only {
            let _ = writeln!(stdout, "{}", job.pgid);
            continue;
        }
        let marker = if Some(id) == current { "+" } else { " " };
        if show_pid_column {
            let _ = writeln!(
                stdout,
                "[{id}]{marker}  {:<7} {:<8} {}",
                job.pgid,
                job_state_label(job.state()),
                job.display_string
            );
        } else {
            let _ = writeln!(
                stdout,
                "[{id}]{marker}  {:<8} {}",
                job_state_label(job.state()),
                job.display_string
            );
        }
    }
    0
}

fn builtin_fg(
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    ctx: &mut ShellContext,
) -> i32 {
    if !ctx.interactive {
        let _ = writeln!(stderr, "fg: no job control in this shell");
        return 1;
    }
    let spec = args.first().map(String::as_str).unwrap_or("");
    let id = match ctx.job_table.resolve_jobspec(spec) {
        Ok(id) => id,
        Err(msg) => {
            let _ = writeln!(stderr, "fg: {msg}");
            return 1;
        }
    };
    let Some(job) = ctx.job_table.get(id) else {
        let _ = writeln!(stderr, "fg: {spec}: no such job");
        return 1;
    };
    let pgid = job.pgid;
    let _ = writeln!(stdout, "{}", job.display_string);

    if let Err(e) = process::kill(-pgid, libc::SIGCONT) {
        let _ = writeln!(stderr, "fg: {e}");
    }
    let guard = ctx.terminal.hand_to(pgid).unwrap_or_else(|e| {
        let _ = writeln!(stderr, "fg: {e}");
        None
    });

    let state = ctx.job_table.wait_foreground(id);
    drop(guard);

    match state {
        JobState::Stopped => {
            if let Some(job) = ctx.job_table.get_mut(id) {
                job.saved_tty_modes = Some(ctx.terminal.capture_current_modes());
            }
            let _ = ctx.terminal.restore_shell_modes();
            0
        }
        JobState::Done => {
            let code = ctx
                .job_table
                .get(id)
                .and_then(|j| j.last_status)
                .map(RawStatus::exit_code)
                .unwrap_or(0);
            ctx.job_table.remove(id);
            ctx.last_exit_code = code;
            code
        }
        JobState::Running => 0,
    }
}

fn builtin_bg(
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    ctx: &mut ShellContext,
) -> i32 {
    let specs: Vec<&str> = if args.is_empty() { vec![""] } else { args.iter().map(String::as_str).collect() };
    let mut last_code = 0;
    for spec in specs {
        let id = match ctx.job_table.resolve_jobspec(spec) {
            Ok(id) => id,
            Err(msg) => {
                let _ = writeln!(stderr, "bg: {msg}");
                last_code = 1;
                continue;
            }
        };
        let Some(job) = ctx.job_table.get_mut(id) else { continue };
        if job.state() != JobState::Stopped {
            let _ = writeln!(stderr, "bg: job {id} already in background");
            last_code = 1;
            continue;
        }
        job.background = true;
        job.notify = true;
        let pgid = job.pgid;
        let _ = writeln!(stdout, "[{id}] {}", job.display_string);
        if let Err(e) = process::kill(-pgid, libc::SIGCONT) {
            let _ = writeln!(stderr, "bg: {e}");
            last_code = 1;
        }
        ctx.last_bg_pid = Some(pgid);
    }
    last_code
}

fn builtin_kill(
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    ctx: &mut ShellContext,
) -> i32 {
    if args.first().map(String::as_str) == Some("-l") {
        for (num, name) in crate::status::SIGNAL_TABLE {
            let _ = writeln!(stdout, "{num}) SIG{name}");
        }
        return 0;
    }

    let mut signal = libc::SIGTERM;
    let mut rest = args;
    match rest.first().map(String::as_str) {
        Some("-s") | Some("-n") => {
            let Some(value) = rest.get(1) else {
                let _ = writeln!(stderr, "kill: option requires an argument");
                return 2;
            };
            match parse_signal(value) {
                Some(sig) => {
                    signal = sig;
                    rest = &rest[2..];
                }
                None => {
                    let _ = writeln!(stderr, "kill: unknown signal: {value}");
                    return 1;
                }
            }
        }
        Some(flag) if flag.starts_with('-') && flag.len() > 1 => {
            let name = &flag[1..];
            match parse_signal(name) {
                Some(sig) => {
                    signal = sig;
                    rest = &rest[1..];
                }
                None => {
                    let _ = writeln!(stderr, "kill: unknown signal: {name}");
                    return 1;
                }
            }
        }
        _ => {}
    }

    if rest.is_empty() {
        let _ = writeln!(stderr, "kill: usage: kill [-s sig|-n num|-sig] pid|%job ...");
        return 2;
    }

    let mut last_code = 0;
    for target in rest {
        if let Some(spec) = target.strip_prefix('%') {
            let id = match ctx.job_table.resolve_jobspec(&format!("%{spec}")) {
                Ok(id) => id,
                Err(msg) => {
                    let _ = writeln!(stderr, "kill: {msg}");
                    last_code = 1;
                    continue;
                }
            };
            let Some(job) = ctx.job_table.get(id) else {
                let _ = writeln!(stderr, "kill: {target}: no such job");
                last_code = 1;
                continue;
            };
            // A non-interactive shell has no real job-control group of its
            // own to signal by pgid (spec §4.4's "falls back to per-pid to
            // avoid interfering with a foreign process group").
            if ctx.interactive {
                if let Err(e) = process::kill(-job.pgid, signal) {
                    let _ = writeln!(stderr, "kill: ({target}): {e}");
                    last_code = 1;
                }
            } else {
                for cmd in &job.commands {
                    if let Err(e) = process::kill(cmd.pid, signal) {
                        let _ = writeln!(stderr, "kill: ({target}): {e}");
                        last_code = 1;
                    }
                }
            }
        } else {
            match target.parse::<libc::pid_t>() {
                Ok(pid) => {
                    if let Err(e) = process::kill(pid, signal) {
                        let _ = writeln!(stderr, "kill: ({target}): {e}");
                        last_code = 1;
                    }
                }
                Err(_) => {
                    let _ = writeln!(
                        stderr,
                        "kill: {target}: arguments must be process or job IDs"
                    );
                    last_code = 1;
                }
            }
        }
    }
    last_code
}

fn builtin_wait(args: &[String], stderr: &mut dyn Write, ctx: &mut ShellContext) -> i32 {
    if let Some(spec) = args.first() {
        let id = match ctx.job_table.resolve_jobspec(spec) {
            Ok(id) => id,
            Err(msg) => {
                let _ = writeln!(stderr, "wait: {msg}");
                return 1;
            }
        };
        let state = ctx.job_table.wait_foreground(id);
        let code = match state {
            JobState::Done => {
                let code = ctx
                    .job_table
                    .get(id)
                    .and_then(|j| j.last_status)
                    .map(RawStatus::exit_code)
                    .unwrap_or(0);
                ctx.job_table.remove(id);
                code
            }
            _ => 0,
        };
        return code;
    }

    let ids = ctx.job_table.sorted_ids();
    let mut last_code = 0;
    for id in ids {
        if ctx.job_table.wait_foreground(id) == JobState::Done {
            last_code = ctx
                .job_table
                .get(id)
                .and_then(|j| j.last_status)
                .map(RawStatus::exit_code)
                .unwrap_or(0);
            ctx.job_table.remove(id);
        }
    }
    last_code
}

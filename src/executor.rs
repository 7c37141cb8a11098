//! Job Executor (spec §4.3): turns one already-expanded pipeline of
//! `model::Command`s into real OS processes, wires the pipes between them,
//! installs redirections, hands the terminal to the new process group for
//! the duration of a foreground job, and registers background/stopped jobs.
//!
//! Grounded on the teacher's `executor::execute_pipeline` (the
//! `InputHandle`/`OutputHandle` resolution shape, the pre_exec-based pgid
//! assignment, the non-last-builtin-runs-on-a-thread trick) generalized
//! from the teacher's inconsistent 6-arg `builtins::execute` contract to
//! this repository's `ShellContext`-based one, and from synchronous
//! `libc::waitpid(-pgid, ..., WUNTRACED)` polling to the shared
//! `Job::apply_status` state machine (via `JobTable::wait_foreground`) so
//! the foreground wait path and the async `SIGCHLD` reaper agree on what a
//! status word means (spec §4.4).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::process::Stdio;

use os_pipe::{pipe, PipeReader, PipeWriter};

use crate::builtins::{self, BuiltinOutcome};
use crate::context::ShellContext;
use crate::model::{Command, Job, JobState, StderrTarget, StdoutTarget};
use crate::process;
use crate::status::RawStatus;

/// Run one parsed, expanded, redirect-resolved pipeline. `commands` is
/// non-empty — the REPL loop already drops blank lines before calling in.
pub fn execute_job(
    ctx: &mut ShellContext,
    mut commands: Vec<Command>,
    background: bool,
    display_string: String,
) -> i32 {
    if commands.len() == 1 && !background && builtins::is_builtin(commands[0].program()) {
        return run_builtin_foreground(ctx, &mut commands[0]);
    }

    let stage_count = commands.len();
    let mut child_pids: Vec<libc::pid_t> = Vec::with_capacity(stage_count);
    let mut builtin_threads: Vec<std::thread::JoinHandle<()>> = Vec::new();
    let mut pipeline_pgid: Option<libc::pid_t> = None;
    let mut prev_pipe: Option<PipeReader> = None;
    let mut spawn_failed = false;

    for (idx, cmd) in commands.iter_mut().enumerate() {
        let is_last = idx + 1 == stage_count;

        let stdin_default =
            prev_pipe.take().map(InputHandle::Pipe).unwrap_or(InputHandle::Inherit);
        let (stdout_default, next_reader) = if is_last {
            (OutputHandle::Inherit, None)
        } else {
            match pipe() {
                Ok((reader, writer)) => (OutputHandle::Pipe(writer), Some(reader)),
                Err(e) => {
                    eprintln!("xd-shell: pipe: {e}");
                    spawn_failed = true;
                    break;
                }
            }
        };

        let resolved = match resolve_redirections(cmd, stdin_default, stdout_default) {
            Ok(r) => r,
            Err(msg) => {
                eprintln!("xd-shell: {msg}");
                spawn_failed = true;
                break;
            }
        };

        if builtins::is_builtin(cmd.program()) {
            let mut reader = resolved.stdin.into_reader();
            let mut writer = match resolved.stdout.into_writer() {
                Ok(w) => w,
                Err(msg) => {
                    eprintln!("xd-shell: {msg}");
                    spawn_failed = true;
                    break;
                }
            };
            let mut err_writer = match resolved.stderr.into_writer() {
                Ok(w) => w,
                Err(msg) => {
                    eprintln!("xd-shell: {msg}");
                    spawn_failed = true;
                    break;
                }
            };

            if is_last {
                // This is the pipeline's tail: no downstream reader to
                // starve, so run inline and let its exit code become the
                // pipeline's.
                let outcome = builtins::execute(
                    cmd.program(),
                    &cmd.argv[1..],
                    &mut *reader,
                    &mut *writer,
                    &mut *err_writer,
                    ctx,
                );
                let _ = writer.flush();
                let _ = err_writer.flush();
                match outcome {
                    BuiltinOutcome::Exit(code) => std::process::exit(code),
                    BuiltinOutcome::Continue(code) => {
                        ctx.last_exit_code = code;
                        return code;
                    }
                }
            } else {
                // Job-control builtins mid-pipeline have no process group of
                // their own to act on, so give the thread a throwaway local
                // table (matching the teacher's own grounded handling of
                // this case).
                let program = cmd.program().to_string();
                let args = cmd.argv[1..].to_vec();
                let handle = std::thread::spawn(move || {
                    let mut scratch = ShellContext::new(false).expect("scratch context");
                    let _ = builtins::execute(
                        &program,
                        &args,
                        &mut *reader,
                        &mut *writer,
                        &mut *err_writer,
                        &mut scratch,
                    );
                    let _ = writer.flush();
                    let _ = err_writer.flush();
                });
                builtin_threads.push(handle);
            }
        } else {
            match spawn_external(cmd, resolved, pipeline_pgid) {
                Ok(pid) => {
                    cmd.pid = pid;
                    if pipeline_pgid.is_none() {
                        pipeline_pgid = Some(pid);
                    }
                    child_pids.push(pid);
                }
                Err(e) => {
                    eprintln!("xd-shell: {}: {}", cmd.program(), command_error_message(&e));
                    spawn_failed = true;
                    break;
                }
            }
        }

        prev_pipe = next_reader;
    }

    if spawn_failed {
        if let Some(pgid) = pipeline_pgid {
            let _ = process::kill(-pgid, libc::SIGTERM);
        }
        for pid in &child_pids {
            let _ = process::wait_pid_blocking(*pid);
        }
        for handle in builtin_threads {
            let _ = handle.join();
        }
        // spec §4.3 failure cleanup: re-establish terminal ownership of the
        // shell even though the happy path only hands it off once a job is
        // fully built — a partially-spawned pipeline may have raced a
        // process in its own group into requesting the foreground.
        let _ = ctx.terminal.reclaim();
        return 127;
    }

    if child_pids.is_empty() {
        // Every stage was a builtin; the tail already returned above, so
        // reaching here means every non-tail stage was also a builtin with
        // no external command anywhere in the pipeline.
        for handle in builtin_threads {
            let _ = handle.join();
        }
        return ctx.last_exit_code;
    }

    let pgid = pipeline_pgid.expect("at least one external command spawned a pgid");
    let mut job = Job::new(commands, background, display_string);
    job.pgid = pgid;
    job.unreaped_count = child_pids.len() as u32;

    if background {
        ctx.last_bg_pid = Some(pgid);
        let job_id = ctx.job_table.insert(job);
        println!("[{job_id}] {pgid}");
        return 0;
    }

    for handle in builtin_threads {
        let _ = handle.join();
    }

    let job_id = ctx.job_table.insert(job);
    let guard = ctx.terminal.hand_to(pgid).unwrap_or_else(|e| {
        eprintln!("xd-shell: failed to move terminal to job group {pgid}: {e}");
        None
    });

    let state = ctx.job_table.wait_foreground(job_id);
    drop(guard);

    match state {
        JobState::Stopped => {
            if let Some(job) = ctx.job_table.get_mut(job_id) {
                job.saved_tty_modes = Some(ctx.terminal.capture_current_modes());
                println!("[{job_id}]+  Stopped  {}", job.display_string);
            }
            let _ = ctx.terminal.restore_shell_modes();
            0
        }
        JobState::Done => {
            let code = ctx
                .job_table
                .get(job_id)
                .and_then(|j| j.last_status)
                .map(RawStatus::exit_code)
                .unwrap_or(0);
            ctx.job_table.remove(job_id);
            ctx.last_exit_code = code;
            code
        }
        JobState::Running => unreachable!("wait_foreground only returns a terminal state"),
    }
}

/// Run one pipeline for command substitution (spec §4.1 stage 3): "a child
/// process is forked with a pipe replacing its stdout ... parent reads until
/// EOF". Unlike [`execute_job`] this never backgrounds, never takes the
/// terminal, and always waits synchronously — command substitution is
/// foreground-only by construction. Returns the captured bytes (before
/// trailing-newline stripping, which stage 3 does) and the pipeline's exit
/// code, which becomes the new `$?` (spec §4.1 stage 3).
pub fn execute_captured(ctx: &mut ShellContext, mut commands: Vec<Command>) -> (Vec<u8>, i32) {
    if commands.len() == 1 && builtins::is_builtin(commands[0].program()) {
        return run_builtin_captured(ctx, &mut commands[0]);
    }

    let (cap_reader, cap_writer) = match pipe() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("xd-shell: pipe: {e}");
            return (Vec::new(), 1);
        }
    };

    let stage_count = commands.len();
    let mut child_pids: Vec<libc::pid_t> = Vec::with_capacity(stage_count);
    let mut builtin_threads: Vec<std::thread::JoinHandle<()>> = Vec::new();
    let mut pipeline_pgid: Option<libc::pid_t> = None;
    let mut prev_pipe: Option<PipeReader> = None;
    let mut spawn_failed = false;
    let mut cap_writer = Some(cap_writer);

    for (idx, cmd) in commands.iter_mut().enumerate() {
        let is_last = idx + 1 == stage_count;

        let stdin_default =
            prev_pipe.take().map(InputHandle::Pipe).unwrap_or(InputHandle::Inherit);
        let (stdout_default, next_reader) = if is_last {
            // The capture pipe's write end is consumed exactly once, by
            // whichever stage is last — every earlier stage still gets a
            // fresh inter-stage pipe like `execute_job`.
            (OutputHandle::Pipe(cap_writer.take().expect("tail stage runs once")), None)
        } else {
            match pipe() {
                Ok((reader, writer)) => (OutputHandle::Pipe(writer), Some(reader)),
                Err(e) => {
                    eprintln!("xd-shell: pipe: {e}");
                    spawn_failed = true;
                    break;
                }
            }
        };

        let resolved = match resolve_redirections(cmd, stdin_default, stdout_default) {
            Ok(r) => r,
            Err(msg) => {
                eprintln!("xd-shell: {msg}");
                spawn_failed = true;
                break;
            }
        };

        if builtins::is_builtin(cmd.program()) {
            let mut reader = resolved.stdin.into_reader();
            let mut writer = match resolved.stdout.into_writer() {
                Ok(w) => w,
                Err(msg) => {
                    eprintln!("xd-shell: {msg}");
                    spawn_failed = true;
                    break;
                }
            };
            let mut err_writer = match resolved.stderr.into_writer() {
                Ok(w) => w,
                Err(msg) => {
                    eprintln!("xd-shell: {msg}");
                    spawn_failed = true;
                    break;
                }
            };
            let program = cmd.program().to_string();
            let args = cmd.argv[1..].to_vec();
            let handle = std::thread::spawn(move || {
                let mut scratch = ShellContext::new(false).expect("scratch context");
                let _ = builtins::execute(
                    &program,
                    &args,
                    &mut *reader,
                    &mut *writer,
                    &mut *err_writer,
                    &mut scratch,
                );
                let _ = writer.flush();
                let _ = err_writer.flush();
            });
            builtin_threads.push(handle);
        } else {
            match spawn_external(cmd, resolved, pipeline_pgid) {
                Ok(pid) => {
                    cmd.pid = pid;
                    if pipeline_pgid.is_none() {
                        pipeline_pgid = Some(pid);
                    }
                    child_pids.push(pid);
                }
                Err(e) => {
                    eprintln!("xd-shell: {}: {}", cmd.program(), command_error_message(&e));
                    spawn_failed = true;
                    break;
                }
            }
        }

        prev_pipe = next_reader;
    }
    drop(cap_writer); // in case we broke out before reaching the tail stage

    if spawn_failed {
        if let Some(pgid) = pipeline_pgid {
            let _ = process::kill(-pgid, libc::SIGTERM);
        }
        for pid in &child_pids {
            let _ = process::wait_pid_blocking(*pid);
        }
        for handle in builtin_threads {
            let _ = handle.join();
        }
        return (Vec::new(), 127);
    }

    // Read to EOF before reaping: the write end only closes once every
    // process sharing it (the tail stage, plus any mid-pipeline builtin
    // thread that inherited a dup of it) has exited, so this drains
    // whatever the pipeline produced without racing its completion.
    let mut captured = Vec::new();
    let mut reader = cap_reader;
    let _ = reader.read_to_end(&mut captured);

    for handle in builtin_threads {
        let _ = handle.join();
    }

    if child_pids.is_empty() {
        return (captured, ctx.last_exit_code);
    }

    let pgid = pipeline_pgid.expect("at least one external command spawned a pgid");
    let mut job = Job::new(commands, false, String::new());
    job.pgid = pgid;
    job.unreaped_count = child_pids.len() as u32;
    let job_id = ctx.job_table.insert(job);

    let state = ctx.job_table.wait_foreground(job_id);
    let code = match state {
        JobState::Done => {
            let code = ctx
                .job_table
                .get(job_id)
                .and_then(|j| j.last_status)
                .map(RawStatus::exit_code)
                .unwrap_or(0);
            ctx.job_table.remove(job_id);
            code
        }
        JobState::Stopped => {
            // A stopped command substitution has no reasonable foreground
            // to return to (there is no terminal handoff here); leave the
            // job registered so `jobs`/`fg` can still recover it later.
            0
        }
        JobState::Running => unreachable!("wait_foreground only returns a terminal state"),
    };
    (captured, code)
}

fn run_builtin_captured(ctx: &mut ShellContext, cmd: &mut Command) -> (Vec<u8>, i32) {
    let resolved = match resolve_redirections(cmd, InputHandle::Inherit, OutputHandle::Inherit) {
        Ok(r) => r,
        Err(msg) => {
            eprintln!("xd-shell: {msg}");
            return (Vec::new(), 1);
        }
    };
    let mut reader = resolved.stdin.into_reader();
    let mut err_writer = match resolved.stderr.into_writer() {
        Ok(w) => w,
        Err(msg) => {
            eprintln!("xd-shell: {msg}");
            return (Vec::new(), 1);
        }
    };

    // An explicit `>` redirect on the substituted command wins over capture
    // (e.g. `$(echo hi > file)` writes to the file and substitutes nothing),
    // matching spec §4.3's "a redirect file wins" rule applied to the
    // capture pipe as just another default stdout.
    let mut buf = Vec::new();
    let outcome = if cmd.stdout_redirect.is_some() {
        let mut writer = match resolved.stdout.into_writer() {
            Ok(w) => w,
            Err(msg) => {
                eprintln!("xd-shell: {msg}");
                return (Vec::new(), 1);
            }
        };
        let o = builtins::execute(
            cmd.program(),
            &cmd.argv[1..],
            &mut *reader,
            &mut *writer,
            &mut *err_writer,
            ctx,
        );
        let _ = writer.flush();
        o
    } else {
        builtins::execute(cmd.program(), &cmd.argv[1..], &mut *reader, &mut buf, &mut *err_writer, ctx)
    };
    let _ = err_writer.flush();

    match outcome {
        // `exit` inside `$(...)` ends the (notional) subshell that evaluates
        // the substitution, not the interactive shell driving it — since
        // this fast path never actually forks, that just means treating it
        // like any other exit code rather than tearing down the process.
        BuiltinOutcome::Exit(code) => {
            ctx.last_exit_code = code;
            (buf, code)
        }
        BuiltinOutcome::Continue(code) => {
            ctx.last_exit_code = code;
            (buf, code)
        }
    }
}

// ── Redirection resolution ──────────────────────────────────────────────────

enum InputHandle {
    Inherit,
    Pipe(PipeReader),
    File(File),
}

enum OutputHandle {
    Inherit,
    File(File),
    Pipe(PipeWriter),
}

impl InputHandle {
    fn into_stdio(self) -> Stdio {
        match self {
            InputHandle::Inherit => Stdio::inherit(),
            InputHandle::Pipe(r) => Stdio::from(r),
            InputHandle::File(f) => Stdio::from(f),
        }
    }

    fn into_reader(self) -> Box<dyn io::Read + Send> {
        match self {
            InputHandle::Inherit => Box::new(io::stdin()),
            InputHandle::Pipe(r) => Box::new(r),
            InputHandle::File(f) => Box::new(f),
        }
    }
}

impl OutputHandle {
    fn try_clone(&self) -> Result<OutputHandle, String> {
        match self {
            OutputHandle::Inherit => Ok(OutputHandle::Inherit),
            OutputHandle::File(f) => {
                f.try_clone().map(OutputHandle::File).map_err(|e| format!("dup: {e}"))
            }
            OutputHandle::Pipe(w) => {
                w.try_clone().map(OutputHandle::Pipe).map_err(|e| format!("dup: {e}"))
            }
        }
    }

    fn into_stdio(self) -> Stdio {
        match self {
            OutputHandle::Inherit => Stdio::inherit(),
            OutputHandle::File(f) => Stdio::from(f),
            OutputHandle::Pipe(w) => Stdio::from(w),
        }
    }

    fn into_writer(self) -> Result<Box<dyn Write + Send>, String> {
        Ok(match self {
            OutputHandle::Inherit => Box::new(io::stdout()),
            OutputHandle::File(f) => Box::new(f),
            OutputHandle::Pipe(w) => Box::new(w),
        })
    }
}

struct Resolved {
    stdin: InputHandle,
    stdout: OutputHandle,
    stderr: OutputHandle,
}

fn open_output(path: &std::path::Path, append: bool) -> Result<OutputHandle, String> {
    let file = if append {
        OpenOptions::new().create(true).append(true).open(path)
    } else {
        OpenOptions::new().create(true).write(true).truncate(true).open(path)
    };
    file.map(OutputHandle::File).map_err(|e| format!("{}: {e}", path.display()))
}

fn resolve_redirections(
    cmd: &Command,
    stdin_default: InputHandle,
    stdout_default: OutputHandle,
) -> Result<Resolved, String> {
    let stdin = match &cmd.stdin_redirect {
        Some(path) => {
            InputHandle::File(File::open(path).map_err(|e| format!("{}: {e}", path.display()))?)
        }
        None => stdin_default,
    };

    let stdout_is_dup = matches!(cmd.stdout_redirect, Some(StdoutTarget::DupStderr));
    let stderr_is_dup = matches!(cmd.stderr_redirect, Some(StderrTarget::DupStdout));
    if stdout_is_dup && stderr_is_dup {
        return Err("stdout and stderr cannot each alias the other".to_string());
    }

    let (stdout, stderr) = if stdout_is_dup {
        let stderr = match &cmd.stderr_redirect {
            Some(StderrTarget::File(r)) => open_output(&r.path, r.append)?,
            Some(StderrTarget::DupStdout) => unreachable!("ruled out above"),
            None => OutputHandle::Inherit,
        };
        let stdout = stderr.try_clone()?;
        (stdout, stderr)
    } else {
        let stdout = match &cmd.stdout_redirect {
            Some(StdoutTarget::File(r)) => open_output(&r.path, r.append)?,
            Some(StdoutTarget::DupStderr) => unreachable!("handled above"),
            None => stdout_default,
        };
        let stderr = match &cmd.stderr_redirect {
            Some(StderrTarget::File(r)) => open_output(&r.path, r.append)?,
            Some(StderrTarget::DupStdout) => stdout.try_clone()?,
            None => OutputHandle::Inherit,
        };
        (stdout, stderr)
    };

    Ok(Resolved { stdin, stdout, stderr })
}

fn spawn_external(
    cmd: &Command,
    resolved: Resolved,
    pipeline_pgid: Option<libc::pid_t>,
) -> io::Result<libc::pid_t> {
    use std::os::unix::process::CommandExt;

    let mut process_cmd = std::process::Command::new(cmd.program());
    process_cmd.args(&cmd.argv[1..]);
    process_cmd.stdin(resolved.stdin.into_stdio());
    process_cmd.stdout(resolved.stdout.into_stdio());
    process_cmd.stderr(resolved.stderr.into_stdio());

    let target_pgid = pipeline_pgid.unwrap_or(0);
    unsafe {
        process_cmd.pre_exec(move || {
            process::restore_default_dispositions()?;
            process::setpgid(0, target_pgid)?;
            Ok(())
        });
    }

    let child = process_cmd.spawn()?;
    let pid = child.id() as libc::pid_t;
    // Parent-side half of the setpgid race (spec §4.3 step 1): whichever
    // side loses gets EACCES/ESRCH, already treated as success by
    // `process::setpgid`.
    let leader = pipeline_pgid.unwrap_or(pid);
    process::setpgid(pid, leader)?;
    // This executor reaps children itself through the job table's own
    // `waitpid` calls, not `Child::wait`, which would otherwise race the
    // job table for the same exit status — so the `Child` handle is
    // dropped without ever being waited on.
    std::mem::forget(child);
    Ok(pid)
}

fn command_error_message(e: &io::Error) -> String {
    if e.kind() == io::ErrorKind::NotFound {
        "command not found".to_string()
    } else {
        e.to_string()
    }
}

fn run_builtin_foreground(ctx: &mut ShellContext, cmd: &mut Command) -> i32 {
    let resolved = match resolve_redirections(cmd, InputHandle::Inherit, OutputHandle::Inherit) {
        Ok(r) => r,
        Err(msg) => {
            eprintln!("xd-shell: {msg}");
            return 1;
        }
    };
    let mut reader = resolved.stdin.into_reader();
    let mut writer = match resolved.stdout.into_writer() {
        Ok(w) => w,
        Err(msg) => {
            eprintln!("xd-shell: {msg}");
            return 1;
        }
    };
    let mut err_writer = match resolved.stderr.into_writer() {
        Ok(w) => w,
        Err(msg) => {
            eprintln!("xd-shell: {msg}");
            return 1;
        }
    };

    let outcome = builtins::execute(
        cmd.program(),
        &cmd.argv[1..],
        &mut *reader,
        &mut *writer,
        &mut *err_writer,
        ctx,
    );
    let _ = writer.flush();
    let _ = err_writer.flush();

    match outcome {
        BuiltinOutcome::Exit(code) => std::process::exit(code),
        BuiltinOutcome::Continue(code) => {
            ctx.last_exit_code = code;
            code
        }
    }
}

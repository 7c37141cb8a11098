//! The REPL loop: reads one line, parses it into a pipeline, expands each
//! token, resolves redirections, and hands the assembled job to the
//! executor — then, before showing the next prompt, drains the job table of
//! anything the `SIGCHLD` reaper noticed in the meantime (spec §4.4
//! "Refresh"). Everything this file wires together is specified in full by
//! its own module; this file is just the data/control flow of spec §2's
//! "parser → Expansion Engine → ... → Job Executor → ... → Job Table" line.
//!
//! Grounded on the teacher's `main.rs` REPL shape (prompt/read/execute loop,
//! `ctrlc` for `SIGINT` UI feedback) but rebuilt around `ShellContext` and
//! the job-control modules the teacher's `main.rs` never actually wired in.

mod builtins;
mod config;
mod context;
mod editor;
mod error;
mod executor;
mod expander;
mod jobs;
mod model;
mod parser;
mod process;
mod redirect;
mod status;
mod terminal;

use std::io::{self, Write};

use context::ShellContext;
use editor::LineEditor;
use error::ExpansionError;
use expander::ExpansionContext;
use model::Command;

fn main() {
    env_logger::init();

    let argv0 = std::env::args().next().unwrap_or_default();
    config::ShellConfig::establish(&argv0);

    let interactive = stdin_is_terminal_like();
    let mut ctx = match ShellContext::new(interactive) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("xd-shell: failed to initialize terminal: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = jobs::install_sigchld_handler() {
        eprintln!("xd-shell: failed to install SIGCHLD handler: {e}");
        std::process::exit(1);
    }
    install_ignored_dispositions();

    // SIGINT is trapped for UI feedback only (spec §5): it never reaches a
    // foreground job through this handler, only through the kernel's own
    // terminal-driven signal delivery to the foreground process group.
    ctrlc::set_handler(|| {
        if !editor::EDITOR_ACTIVE.load(std::sync::atomic::Ordering::Relaxed) {
            println!();
            let _ = io::stdout().flush();
        }
    })
    .expect("failed to install SIGINT handler");

    let mut editor = LineEditor::new();
    let exit_code = run_repl(&mut ctx, &mut editor);
    std::process::exit(exit_code);
}

/// `true` when stdin looks like a real keyboard session worth driving job
/// control and the line editor for — both are harmless no-ops otherwise, but
/// a piped/redirected stdin (tests, scripts) should behave non-interactively.
fn stdin_is_terminal_like() -> bool {
    use crossterm::tty::IsTty;
    io::stdin().is_tty()
}

/// Ignore the job-control signals spec §5 says the shell's own main process
/// must never react to (they exist to control a *foreground job's* process
/// group, not the shell itself). `SIGPIPE` is included too: without this, a
/// pipeline stage like `yes | head -1` whose reader exits early would kill
/// the *shell* the instant it wrote to the closed pipe, not just `yes`.
fn install_ignored_dispositions() {
    for &sig in &[
        libc::SIGTSTP,
        libc::SIGTTIN,
        libc::SIGTTOU,
        libc::SIGQUIT,
        libc::SIGTERM,
        libc::SIGPIPE,
    ] {
        unsafe {
            libc::signal(sig, libc::SIG_IGN);
        }
    }
}

fn run_repl(ctx: &mut ShellContext, editor: &mut LineEditor) -> i32 {
    loop {
        refresh_jobs(ctx);

        let prompt = "xd-shell> ";
        let line = match editor.read_line(prompt) {
            Ok(Some(line)) => line,
            Ok(None) => {
                println!();
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                eprintln!("xd-shell: {e}");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        editor.add_to_history(trimmed);

        match run_line(ctx, trimmed) {
            Some(code) => ctx.last_exit_code = code,
            None => break, // `exit` builtin requested shutdown
        }
    }
    ctx.last_exit_code
}

/// Parse, expand, and execute one input line. Returns `None` only when the
/// line invoked `exit` and the process should terminate; `Some(code)`
/// otherwise (including on a syntax or expansion error, which still leaves
/// the shell alive per spec §7's propagation policy).
fn run_line(ctx: &mut ShellContext, line: &str) -> Option<i32> {
    let parsed = match parser::parse_line(line) {
        Ok(Some(job)) => job,
        Ok(None) => return Some(ctx.last_exit_code),
        Err(err) => {
            error::report(&err);
            return Some(err.exit_code());
        }
    };

    let mut commands = Vec::with_capacity(parsed.commands.len());
    for stage in &parsed.commands {
        let display = stage.tokens.join(" ");
        let mut cmd = Command::new(display);

        let mut expanded = Vec::new();
        for token in &stage.tokens {
            match expand_one(ctx, token) {
                Ok(mut words) => expanded.append(&mut words),
                Err(e) => {
                    eprintln!("xd-shell: {e}");
                    return Some(1);
                }
            }
        }

        if let Err(err) = redirect::apply_redirections(&mut cmd, expanded) {
            error::report(&err);
            return Some(err.exit_code());
        }
        if cmd.argv.is_empty() {
            continue;
        }
        commands.push(cmd);
    }

    if commands.is_empty() {
        return Some(ctx.last_exit_code);
    }

    // `exit` is only meaningful as the whole (single-command, foreground)
    // line, matching spec §5.2's builtin CLI surface — elsewhere it behaves
    // like any other builtin exit code via the executor's fast path.
    if commands.len() == 1 && !parsed.background && commands[0].program() == "exit" {
        ctx.last_exit_code = exit_now(ctx, &commands[0].argv[1..]);
        return None;
    }

    let display_string = if parsed.background { format!("{line} &") } else { line.to_string() };
    let code = executor::execute_job(ctx, commands, parsed.background, display_string);
    ctx.last_exit_code = code;
    Some(code)
}

fn exit_now(ctx: &ShellContext, args: &[String]) -> i32 {
    match args.first() {
        None => ctx.last_exit_code,
        Some(s) => s.parse::<i32>().unwrap_or_else(|_| {
            eprintln!("xd-shell: exit: {s}: numeric argument required");
            2
        }),
    }
}

/// Expand one raw token against the shell's live state, threading command
/// substitution back through [`run_line`]'s own pipeline machinery (spec
/// §4.1 stage 3: "re-enters the parser on the substring"). `ctx` is reached
/// through a raw pointer rather than a second `&mut` borrow because the
/// expansion engine's contract (spec §4.1: `expand(token, env, aliases)`)
/// deliberately takes its command-substitution callback as a plain `Fn`, not
/// `FnMut` — safe here because the shell is single-threaded and the pointer
/// never outlives this call.
fn expand_one(ctx: &mut ShellContext, token: &str) -> Result<Vec<String>, ExpansionError> {
    let ctx_ptr: *mut ShellContext = ctx;
    let run_sub = move |line: &str| -> Result<(Vec<u8>, i32), ExpansionError> {
        let ctx = unsafe { &mut *ctx_ptr };
        Ok(run_command_substitution(ctx, line))
    };

    let mut expand_ctx = ExpansionContext {
        last_exit_code: ctx.last_exit_code,
        shell_pid: ctx.shell_pid(),
        last_bg_pid: ctx.last_bg_pid,
        run_command_substitution: &run_sub,
    };
    let result = expander::expand(token, &mut expand_ctx);
    // Command substitution may have updated `$?`; propagate it back even
    // when later stages of this same token's expansion go on to fail.
    ctx.last_exit_code = expand_ctx.last_exit_code;
    result
}

/// Build and run the pipeline inside a `$( ... )`, capturing its stdout
/// (spec §4.1 stage 3). Recurses through [`expand_one`] for the substring's
/// own tokens, exactly like a top-level line, so nested substitutions,
/// redirections, and pipes inside the parentheses all work the same way.
fn run_command_substitution(ctx: &mut ShellContext, line: &str) -> (Vec<u8>, i32) {
    let parsed = match parser::parse_line(line) {
        Ok(Some(job)) => job,
        Ok(None) => return (Vec::new(), 0),
        Err(err) => {
            error::report(&err);
            return (Vec::new(), err.exit_code());
        }
    };

    let mut commands = Vec::with_capacity(parsed.commands.len());
    for stage in &parsed.commands {
        let display = stage.tokens.join(" ");
        let mut cmd = Command::new(display);
        let mut expanded = Vec::new();
        for token in &stage.tokens {
            match expand_one(ctx, token) {
                Ok(mut words) => expanded.append(&mut words),
                Err(e) => {
                    eprintln!("xd-shell: {e}");
                    return (Vec::new(), 1);
                }
            }
        }
        if let Err(err) = redirect::apply_redirections(&mut cmd, expanded) {
            error::report(&err);
            return (Vec::new(), err.exit_code());
        }
        if !cmd.argv.is_empty() {
            commands.push(cmd);
        }
    }

    if commands.is_empty() {
        return (Vec::new(), 0);
    }
    executor::execute_captured(ctx, commands)
}

/// Before-each-prompt refresh (spec §4.4): drain every pending `SIGCHLD`
/// event into the job table, print a status line for anything that just
/// became notify-worthy, and drop jobs that are fully reaped and reported.
fn refresh_jobs(ctx: &mut ShellContext) {
    if !jobs::take_pending_sigchld() {
        return;
    }
    let notify_ids = ctx.job_table.reap_available();
    for id in notify_ids {
        let Some(job) = ctx.job_table.get(id) else { continue };
        match job.state() {
            model::JobState::Done => {
                // A background job finishing between prompts never touches
                // `$?` (spec §4.4's refresh only prints and reaps) — only a
                // foreground wait updates it.
                println!("[{id}]+  {}  {}", status::describe(job.last_status), job.display_string);
                ctx.job_table.remove(id);
            }
            model::JobState::Stopped => {
                println!("[{id}]+  Stopped  {}", job.display_string);
            }
            model::JobState::Running => {}
        }
    }
}

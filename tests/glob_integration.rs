use std::io::Write;
use std::process::{Command, Stdio};

fn run_shell_in(lines: &[&str], cwd: &std::path::Path) -> std::process::Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_xd-shell"))
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn xd-shell");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            writeln!(stdin, "{line}").expect("write line");
        }
        writeln!(stdin, "exit").expect("write exit");
    }

    child.wait_with_output().expect("wait output")
}

#[test]
fn glob_expands_to_matching_files_in_sorted_order() {
    let dir = tempfile::tempdir().expect("create temp dir");
    for name in ["b.txt", "a.txt", "c.txt"] {
        std::fs::write(dir.path().join(name), "").unwrap();
    }

    let output = run_shell_in(&["echo *.txt"], dir.path());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "a.txt b.txt c.txt", "stdout was: {stdout}");
}

#[test]
fn glob_with_no_matches_stays_literal() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let output = run_shell_in(&["echo *.nonexistent_ext_xyz"], dir.path());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "*.nonexistent_ext_xyz", "stdout was: {stdout}");
}

#[test]
fn redirection_writes_into_temp_directory() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let out_path = dir.path().join("out.txt");

    let cmd = format!("echo hello > {}", out_path.display());
    let output = run_shell_in(&[cmd.as_str()], dir.path());
    assert!(output.status.success(), "shell did not exit cleanly");

    let contents = std::fs::read_to_string(&out_path).expect("read redirected file");
    assert_eq!(contents.trim(), "hello");
}

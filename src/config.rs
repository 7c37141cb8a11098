//! Environment contract (spec §6): the handful of variables this shell reads
//! and writes at startup, captured once into a small value instead of ad-hoc
//! `std::env::var` calls scattered through the REPL — the "Configuration"
//! addition this crate's ambient stack carries per SPEC_FULL.md §2a.
//!
//! Grounded on the teacher's `builtins::cd` (which already reads/writes
//! `OLDPWD` inline) generalized into one place that also owns `PATH`'s
//! documented default and `SHLVL`'s login/non-login accounting.

/// Default `PATH` spec §6 mandates when the variable is unset in the
/// process environment this shell inherits.
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/local/sbin:/usr/bin:/usr/sbin:/bin:/sbin";

/// Captured once at startup; read-mostly afterwards (the live values of
/// `HOME`/`PWD`/`OLDPWD`/`PATH` that matter to expansion and exec are read
/// straight out of the process environment at the point of use, since a
/// running shell permits `export`/`cd` to change them — `ShellConfig` only
/// owns the handful of facts that are fixed for the life of the process).
pub struct ShellConfig {
    pub shlvl: u32,
    pub is_login: bool,
}

impl ShellConfig {
    /// Establish the environment contract of spec §6: default `PATH` if
    /// unset, `PWD` reflecting the real cwd, and `SHLVL` incremented for a
    /// non-login invocation or reset to `1` for a login one (`argv[0]`
    /// starting with `-`, the convention this corpus's login-aware shells
    /// use to recognize the login case).
    pub fn establish(argv0: &str) -> Self {
        if std::env::var_os("PATH").is_none() {
            unsafe { std::env::set_var("PATH", DEFAULT_PATH) };
        }

        if let Ok(cwd) = std::env::current_dir() {
            unsafe { std::env::set_var("PWD", cwd) };
        }

        let is_login = argv0.starts_with('-');
        let shlvl = if is_login {
            1
        } else {
            std::env::var("SHLVL").ok().and_then(|v| v.parse::<u32>().ok()).unwrap_or(0) + 1
        };
        unsafe { std::env::set_var("SHLVL", shlvl.to_string()) };

        ShellConfig { shlvl, is_login }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_shell_resets_shlvl_to_one() {
        unsafe { std::env::set_var("SHLVL", "9") };
        let cfg = ShellConfig::establish("-xd-shell");
        assert!(cfg.is_login);
        assert_eq!(cfg.shlvl, 1);
        assert_eq!(std::env::var("SHLVL").unwrap(), "1");
    }

    #[test]
    fn non_login_shell_increments_shlvl() {
        unsafe { std::env::set_var("SHLVL", "2") };
        let cfg = ShellConfig::establish("xd-shell");
        assert!(!cfg.is_login);
        assert_eq!(cfg.shlvl, 3);
    }

    #[test]
    fn missing_path_gets_default() {
        unsafe { std::env::remove_var("PATH") };
        ShellConfig::establish("xd-shell");
        assert_eq!(std::env::var("PATH").unwrap(), DEFAULT_PATH);
    }
}

//! Expansion Engine (spec §4.1): six strictly ordered stages threading an
//! *originality mask* from one raw token through to a final argv. This is
//! one of the two subsystems spec §1 calls "the hard engineering" here.
//!
//! Grounded on the teacher's `expander.rs` (tilde/variable/glob passes kept
//! as the starting shape) but rebuilt around a tagged-character type per
//! spec §9's allowance ("either [a parallel bit-sequence or a tagged
//! character type] is acceptable") instead of the teacher's untracked
//! string concatenation, since the teacher's version re-expands already
//! substituted text and can't express quote-context-dependent splitting.
//!
//! Open Question resolution (recorded in full in DESIGN.md): spec §4.1
//! stage 4's prose says word splitting happens "only where [field
//! separator] characters are original", but spec §8's own worked example
//! (`PATH="a b"; ls $PATH` splitting into two args) and the design
//! rationale paragraph both require splitting on *synthetic* whitespace
//! produced by an unquoted expansion. This implementation follows the
//! worked example: splitting and globbing key off quote context only: originality
//! gates stage 1/2/3 re-expansion and stage 6 quote-mark elision, not
//! field-splitting.

use crate::error::ExpansionError;

/// One character of a token mid-expansion, carrying the two bits of
/// bookkeeping every later stage needs.
#[derive(Debug, Clone, Copy)]
struct Elem {
    ch: char,
    /// Came from the user's source token (`true`) vs. introduced by a prior
    /// expansion stage (`false`). Gates stage 1/2/3 re-triggering and stage
    /// 6's decision to elide a quote mark.
    original: bool,
    /// Inside a quoted region (either kind) or immediately escaped by a
    /// backslash — suppresses word-splitting (stage 4) and globbing
    /// (stage 5) regardless of `original`.
    protected: bool,
    /// This char is itself a syntactic delimiter (a quote mark that opened
    /// or closed a region, or an escaping backslash) and must be dropped in
    /// stage 6 rather than emitted as data.
    elide: bool,
}

impl Elem {
    fn original(ch: char) -> Self {
        Elem { ch, original: true, protected: false, elide: false }
    }

    fn synthetic(ch: char) -> Self {
        Elem { ch, original: false, protected: false, elide: false }
    }
}

/// The working string during expansion: parallel to spec §3's
/// `MaskedString`, except the "mask" here is carried per-`Elem` rather than
/// as a separate `Vec<bool>` (an equivalent encoding — see the module docs).
#[derive(Debug, Clone, Default)]
struct MaskedString(Vec<Elem>);

impl MaskedString {
    fn from_token(token: &str) -> Self {
        MaskedString(token.chars().map(Elem::original).collect())
    }

    fn push(&mut self, elem: Elem) {
        self.0.push(elem);
    }

    fn extend_synthetic(&mut self, s: &str) {
        self.0.extend(s.chars().map(Elem::synthetic));
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything stage 2/3's parameter and command-substitution lookups need,
/// injected rather than imported so the engine doesn't depend on the
/// executor/job-table modules directly (the engine's contract in spec §4.1
/// is `expand(token, env, aliases)`; `aliases`/general variable tables are
/// out of this repository's scope per spec §1, so only the pieces spec's
/// environment contract §6 and exit-code machinery actually need are here).
pub struct ExpansionContext<'a> {
    pub last_exit_code: i32,
    pub shell_pid: libc::pid_t,
    pub last_bg_pid: Option<libc::pid_t>,
    /// Runs `line` as a fresh (non-interactive, foreground) pipeline and
    /// captures its stdout, per spec §4.1 stage 3: "a child process is
    /// forked with a pipe replacing its stdout ... re-enters the parser on
    /// the substring". Returns the captured bytes and the child's exit
    /// status (the latter becomes the shell's new `last_exit_code`).
    pub run_command_substitution: &'a dyn Fn(&str) -> Result<(Vec<u8>, i32), ExpansionError>,
}

/// Expand one raw token into zero or more final argument strings.
pub fn expand(token: &str, ctx: &mut ExpansionContext) -> Result<Vec<String>, ExpansionError> {
    let masked = MaskedString::from_token(token);
    let masked = tilde_expand(masked);
    let masked = expand_params_and_commands(masked, ctx)?;
    let fragments = word_split(masked);
    let fragments = glob_expand(fragments)?;
    Ok(fragments.into_iter().map(quote_remove).collect())
}

// ── Stage 1: tilde expansion ────────────────────────────────────────────────

fn tilde_expand(ms: MaskedString) -> MaskedString {
    let Some(first) = ms.0.first() else { return ms };
    if !(first.original && first.ch == '~') {
        return ms;
    }

    let mut prefix_end = 1;
    while prefix_end < ms.0.len() && ms.0[prefix_end].ch != '/' {
        prefix_end += 1;
    }
    let prefix: String = ms.0[1..prefix_end].iter().map(|e| e.ch).collect();

    let replacement = match prefix.as_str() {
        "" => std::env::var("HOME").ok().or_else(home_from_passwd_db),
        "+" => std::env::var("PWD").ok(),
        "-" => std::env::var("OLDPWD").ok(),
        name => home_of_user(name),
    };

    let Some(replacement) = replacement else { return ms };

    let mut out = MaskedString::default();
    out.extend_synthetic(&replacement);
    out.0.extend_from_slice(&ms.0[prefix_end..]);
    out
}

fn home_from_passwd_db() -> Option<String> {
    let uid = unsafe { libc::getuid() };
    home_from_passwd_entry(unsafe { libc::getpwuid(uid) })
}

fn home_of_user(name: &str) -> Option<String> {
    let c_name = std::ffi::CString::new(name).ok()?;
    home_from_passwd_entry(unsafe { libc::getpwnam(c_name.as_ptr()) })
}

/// SAFETY: `entry` must be a pointer returned by `getpwuid`/`getpwnam` (or
/// null); neither function is called concurrently (single-threaded shell).
fn home_from_passwd_entry(entry: *mut libc::passwd) -> Option<String> {
    if entry.is_null() {
        return None;
    }
    let dir = unsafe { (*entry).pw_dir };
    if dir.is_null() {
        return None;
    }
    let cstr = unsafe { std::ffi::CStr::from_ptr(dir) };
    cstr.to_str().ok().map(str::to_string)
}

// ── Stages 2 & 3: parameter expansion + command substitution ───────────────

#[derive(Clone, Copy, PartialEq)]
enum QuoteState {
    Normal,
    Single,
    Double,
}

fn expand_params_and_commands(
    ms: MaskedString,
    ctx: &mut ExpansionContext,
) -> Result<MaskedString, ExpansionError> {
    let input = ms.0;
    let mut out = Vec::with_capacity(input.len());
    let mut state = QuoteState::Normal;
    let mut i = 0;

    while i < input.len() {
        let elem = input[i];

        if !elem.original {
            out.push(elem);
            i += 1;
            continue;
        }

        match (state, elem.ch) {
            (QuoteState::Normal, '\'') => {
                out.push(Elem { elide: true, ..elem });
                state = QuoteState::Single;
                i += 1;
            }
            (QuoteState::Single, '\'') => {
                out.push(Elem { elide: true, ..elem });
                state = QuoteState::Normal;
                i += 1;
            }
            (QuoteState::Single, _) => {
                out.push(Elem { protected: true, ..elem });
                i += 1;
            }
            (QuoteState::Normal, '"') => {
                out.push(Elem { elide: true, ..elem });
                state = QuoteState::Double;
                i += 1;
            }
            (QuoteState::Double, '"') => {
                out.push(Elem { elide: true, ..elem });
                state = QuoteState::Normal;
                i += 1;
            }
            (QuoteState::Normal, '\\') | (QuoteState::Double, '\\') => {
                i = consume_escape(&input, i, state, &mut out);
            }
            (_, '$') => {
                i = expand_dollar(&input, i, state, &mut out, ctx)?;
            }
            (st, ch) => {
                out.push(Elem { protected: st != QuoteState::Normal, ..Elem { ch, ..elem } });
                i += 1;
            }
        }
    }

    Ok(MaskedString(out))
}

/// Handle a `\` at `input[i]` (known original, not inside single quotes).
/// Unquoted: escapes literally anything. Double-quoted: only `\\ $ " <LF>`
/// are real escapes (spec §4.1 stage 6's "double-quoted context downgrading
/// backslash to literal" rule, applied here too so the scanner's quote/$
/// detection agrees with what quote removal will later do).
fn consume_escape(input: &[Elem], i: usize, state: QuoteState, out: &mut Vec<Elem>) -> usize {
    let backslash = input[i];
    let Some(&next) = input.get(i + 1) else {
        out.push(Elem { protected: state != QuoteState::Normal, ..backslash });
        return i + 1;
    };

    let real_escape = match state {
        QuoteState::Normal => true,
        QuoteState::Double => next.original && matches!(next.ch, '\\' | '$' | '"' | '\n'),
        QuoteState::Single => unreachable!("single-quote backslash handled by caller"),
    };

    if real_escape {
        out.push(Elem { elide: true, ..backslash });
        out.push(Elem { protected: true, ..next });
        i + 2
    } else {
        // Backslash is literal data; re-examine `next` on its own merits
        // (it may still be a quote char or `$`).
        out.push(Elem { protected: true, ..backslash });
        i + 1
    }
}

/// Handle a `$` at `input[i]` (known original). Returns the next index to
/// resume scanning from.
fn expand_dollar(
    input: &[Elem],
    i: usize,
    state: QuoteState,
    out: &mut Vec<Elem>,
    ctx: &mut ExpansionContext,
) -> Result<usize, ExpansionError> {
    let protected = state != QuoteState::Normal;
    let Some(&next) = input.get(i + 1) else {
        out.push(Elem { protected, ..input[i] });
        return Ok(i + 1);
    };

    if !next.original {
        out.push(Elem { protected, ..input[i] });
        return Ok(i + 1);
    }

    match next.ch {
        '{' => expand_braced_param(input, i, state, out, ctx),
        '(' => expand_command_substitution(input, i, state, out, ctx),
        '?' => {
            push_value(out, &ctx.last_exit_code.to_string(), protected);
            Ok(i + 2)
        }
        '$' => {
            push_value(out, &ctx.shell_pid.to_string(), protected);
            Ok(i + 2)
        }
        '!' => {
            push_value(out, &ctx.last_bg_pid.map(|p| p.to_string()).unwrap_or_default(), protected);
            Ok(i + 2)
        }
        c if is_ident_start(c) => {
            let mut j = i + 1;
            let mut name = String::new();
            while let Some(&e) = input.get(j) {
                if e.original && is_ident_continue(e.ch) {
                    name.push(e.ch);
                    j += 1;
                } else {
                    break;
                }
            }
            let value = std::env::var(&name).unwrap_or_default();
            push_value(out, &value, protected);
            Ok(j)
        }
        _ => {
            out.push(Elem { protected, ..input[i] });
            Ok(i + 1)
        }
    }
}

/// Emit `value` as synthetic chars (originality bit clear — see module docs:
/// originality still gates re-expansion, not splitting). `protected` carries
/// forward whatever `QuoteState` was active at the expansion site, so a
/// parameter/command substitution performed inside double quotes stays
/// immune to stage 4 word-splitting and stage 5 globbing just like any other
/// double-quoted character (spec §8 "Double-quote dollar passthrough").
fn push_value(out: &mut Vec<Elem>, value: &str, protected: bool) {
    out.extend(value.chars().map(|ch| Elem { protected, ..Elem::synthetic(ch) }));
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

fn expand_braced_param(
    input: &[Elem],
    i: usize,
    state: QuoteState,
    out: &mut Vec<Elem>,
    ctx: &mut ExpansionContext,
) -> Result<usize, ExpansionError> {
    // input[i] == '$', input[i+1] == '{'
    let mut j = i + 2;
    let mut name = String::new();
    while let Some(&e) = input.get(j) {
        if e.original && e.ch == '}' {
            break;
        }
        name.push(e.ch);
        j += 1;
    }
    if input.get(j).is_none() {
        return Err(ExpansionError::BadSubstitution { name });
    }
    let end = j; // index of '}'

    let is_identifier = !name.is_empty()
        && is_ident_start(name.chars().next().unwrap())
        && name.chars().all(is_ident_continue);
    let is_special = matches!(name.as_str(), "$" | "?" | "!");

    if !is_identifier && !is_special {
        return Err(ExpansionError::BadSubstitution { name });
    }

    let value = match name.as_str() {
        "$" => ctx.shell_pid.to_string(),
        "?" => ctx.last_exit_code.to_string(),
        "!" => ctx.last_bg_pid.map(|p| p.to_string()).unwrap_or_default(),
        _ => std::env::var(&name).unwrap_or_default(),
    };
    push_value(out, &value, state != QuoteState::Normal);
    Ok(end + 1)
}

fn expand_command_substitution(
    input: &[Elem],
    i: usize,
    state: QuoteState,
    out: &mut Vec<Elem>,
    ctx: &mut ExpansionContext,
) -> Result<usize, ExpansionError> {
    // input[i] == '$', input[i+1] == '('
    let Some(close) = find_matching_paren(input, i + 2) else {
        return Err(ExpansionError::CommandSubstitutionError(
            "unterminated $( ... )".to_string(),
        ));
    };
    let inner: String = input[i + 2..close].iter().map(|e| e.ch).collect();

    let (captured, exit_code) = (ctx.run_command_substitution)(&inner)?;
    ctx.last_exit_code = exit_code;

    let mut text = String::from_utf8_lossy(&captured).into_owned();
    while text.ends_with('\n') {
        text.pop();
    }
    push_value(out, &text, state != QuoteState::Normal);
    Ok(close + 1)
}

/// Find the index of the `)` matching the `(` at `start - 1` (i.e. `start`
/// is the index right after the opening paren), honoring nested
/// parens/quotes within the substitution so an embedded `$(...)` or a `)`
/// inside a quoted string doesn't end the scan early.
fn find_matching_paren(input: &[Elem], start: usize) -> Option<usize> {
    let mut depth = 1i32;
    let mut state = QuoteState::Normal;
    let mut k = start;
    while k < input.len() {
        let ch = input[k].ch;
        match state {
            QuoteState::Single => {
                if ch == '\'' {
                    state = QuoteState::Normal;
                }
            }
            QuoteState::Double => {
                if ch == '"' {
                    state = QuoteState::Normal;
                } else if ch == '\\' {
                    k += 1; // skip the escaped char
                }
            }
            QuoteState::Normal => match ch {
                '\'' => state = QuoteState::Single,
                '"' => state = QuoteState::Double,
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(k);
                    }
                }
                _ => {}
            },
        }
        k += 1;
    }
    None
}

// ── Stage 4: word splitting ─────────────────────────────────────────────────

fn word_split(ms: MaskedString) -> Vec<MaskedString> {
    let mut fragments = Vec::new();
    let mut current = MaskedString::default();

    for elem in ms.0 {
        let is_separator = !elem.protected && matches!(elem.ch, ' ' | '\t' | '\n');
        if is_separator {
            if !current.is_empty() {
                fragments.push(std::mem::take(&mut current));
            }
        } else {
            current.push(elem);
        }
    }
    if !current.is_empty() {
        fragments.push(current);
    }
    fragments
}

// ── Stage 5: filename expansion (globbing) ──────────────────────────────────

fn glob_expand(fragments: Vec<MaskedString>) -> Result<Vec<MaskedString>, ExpansionError> {
    let mut out = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        let has_active_glob_char = fragment
            .0
            .iter()
            .any(|e| !e.protected && !e.elide && matches!(e.ch, '*' | '?' | '['));

        if !has_active_glob_char {
            out.push(fragment);
            continue;
        }

        let pattern = build_glob_pattern(&fragment);
        match glob::glob(&pattern) {
            Ok(paths) => {
                let mut matches: Vec<String> = paths
                    .filter_map(|entry| entry.ok())
                    .map(|path| path.to_string_lossy().into_owned())
                    .collect();
                if matches.is_empty() {
                    out.push(fragment);
                } else {
                    matches.sort_by_key(|s| s.to_ascii_lowercase());
                    for m in matches {
                        let mut ms = MaskedString::default();
                        ms.extend_synthetic(&m);
                        out.push(ms);
                    }
                }
            }
            Err(e) => {
                return Err(ExpansionError::ExpansionInternalError(format!(
                    "bad glob pattern: {e}"
                )));
            }
        }
    }
    Ok(out)
}

/// Render a fragment as a `glob`-crate pattern: protected/elided chars and
/// non-active metacharacters are bracket-escaped so only genuinely "live"
/// `* ? [` participate in matching.
fn build_glob_pattern(fragment: &MaskedString) -> String {
    let mut pattern = String::new();
    for elem in &fragment.0 {
        if elem.elide {
            continue;
        }
        let active = !elem.protected && matches!(elem.ch, '*' | '?' | '[');
        if active {
            pattern.push(elem.ch);
        } else if matches!(elem.ch, '*' | '?' | '[' | ']') {
            pattern.push('[');
            pattern.push(elem.ch);
            pattern.push(']');
        } else {
            pattern.push(elem.ch);
        }
    }
    pattern
}

// ── Stage 6: quote removal ──────────────────────────────────────────────────

fn quote_remove(fragment: MaskedString) -> String {
    fragment.0.iter().filter(|e| !e.elide).map(|e| e.ch).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExpansionContext<'static> {
        ExpansionContext {
            last_exit_code: 0,
            shell_pid: unsafe { libc::getpid() },
            last_bg_pid: None,
            run_command_substitution: &|_| Ok((Vec::new(), 0)),
        }
    }

    fn expand_str(token: &str) -> Vec<String> {
        expand(token, &mut ctx()).expect("expand should not fail")
    }

    #[test]
    fn literal_token_is_idempotent() {
        assert_eq!(expand_str("hello"), vec!["hello"]);
    }

    #[test]
    fn single_quote_is_fully_opaque() {
        assert_eq!(expand_str("'a $b *c'"), vec!["a $b *c"]);
    }

    #[test]
    fn double_quote_expands_dollar_but_not_split_or_glob() {
        unsafe { std::env::set_var("XDSH_TEST_VAR", "a b") };
        assert_eq!(expand_str("\"$XDSH_TEST_VAR\""), vec!["a b"]);
        unsafe { std::env::remove_var("XDSH_TEST_VAR") };
    }

    #[test]
    fn unquoted_variable_word_splits_on_synthetic_whitespace() {
        unsafe { std::env::set_var("XDSH_TEST_PATH", "a b") };
        assert_eq!(expand_str("$XDSH_TEST_PATH"), vec!["a", "b"]);
        unsafe { std::env::remove_var("XDSH_TEST_PATH") };
    }

    #[test]
    fn quoted_glob_char_stays_literal() {
        unsafe { std::env::set_var("XDSH_TEST_STAR", "*") };
        assert_eq!(expand_str("\"$XDSH_TEST_STAR\""), vec!["*"]);
        unsafe { std::env::remove_var("XDSH_TEST_STAR") };
    }

    #[test]
    fn backslash_escapes_space_outside_quotes() {
        assert_eq!(expand_str(r"hello\ world"), vec!["hello world"]);
    }

    #[test]
    fn backslash_in_double_quotes_only_escapes_special_set() {
        assert_eq!(expand_str("\"a\\nb\""), vec!["a\\nb"]);
        assert_eq!(expand_str("\"a\\\"b\""), vec!["a\"b"]);
    }

    #[test]
    fn exit_code_and_pid_variables() {
        let mut c = ctx();
        c.last_exit_code = 42;
        assert_eq!(expand("$?", &mut c).unwrap(), vec!["42"]);
        assert_eq!(expand("$$", &mut c).unwrap(), vec![c.shell_pid.to_string()]);
    }

    #[test]
    fn braced_param_bad_substitution_errors() {
        let mut c = ctx();
        let err = expand("${1bad}", &mut c).unwrap_err();
        assert!(matches!(err, ExpansionError::BadSubstitution { .. }));
    }

    #[test]
    fn undefined_variable_is_empty() {
        assert_eq!(expand_str("$XDSH_DEFINITELY_UNSET_ABC"), Vec::<String>::new());
    }

    #[test]
    fn command_substitution_strips_trailing_newlines_and_splits_internal() {
        let mut c = ExpansionContext {
            last_exit_code: 0,
            shell_pid: 1,
            last_bg_pid: None,
            run_command_substitution: &|_| Ok((b"one\ntwo\n".to_vec(), 0)),
        };
        assert_eq!(expand("$(printf 'one\\ntwo\\n')", &mut c).unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn no_glob_match_keeps_pattern_literal() {
        assert_eq!(
            expand_str("*.definitely_not_a_real_extension_xyz"),
            vec!["*.definitely_not_a_real_extension_xyz"]
        );
    }

    #[test]
    fn tilde_expands_only_as_first_character() {
        assert_eq!(expand_str("foo~bar"), vec!["foo~bar"]);
    }

    #[test]
    fn tilde_plus_expands_pwd() {
        unsafe { std::env::set_var("PWD", "/tmp/somewhere") };
        assert_eq!(expand_str("~+/x"), vec!["/tmp/somewhere/x"]);
    }
}

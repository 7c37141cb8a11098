//! Property-based tests for the expansion engine's documented invariants.
//!
//! These drive `xd_shell`'s expansion entry point directly rather than
//! spawning a subprocess, the way the teacher's own unit tests do — the
//! properties are about the pure function, not process behavior.

use proptest::prelude::*;

#[path = "../src/error.rs"]
mod error;
#[path = "../src/expander.rs"]
mod expander;

use error::ExpansionError;
use expander::ExpansionContext;

fn ctx() -> ExpansionContext<'static> {
    ExpansionContext {
        last_exit_code: 0,
        shell_pid: std::process::id() as libc::pid_t,
        last_bg_pid: None,
        run_command_substitution: &|_| Ok((Vec::new(), 0)),
    }
}

/// Characters with no special meaning to any expansion stage: no `$`, `~`,
/// glob metacharacters, quotes, or backslash.
fn plain_char() -> impl Strategy<Value = char> {
    prop_oneof![
        Just('a'), Just('z'), Just('A'), Just('Z'), Just('0'), Just('9'),
        Just('_'), Just('-'), Just('.'), Just(','), Just(':'), Just('='),
    ]
}

proptest! {
    /// "Expansion idempotence on literals": a token built from no special
    /// characters expands to exactly itself as a single word.
    #[test]
    fn idempotence_on_literal_tokens(chars in prop::collection::vec(plain_char(), 1..12)) {
        let token: String = chars.into_iter().collect();
        let mut c = ctx();
        let result = expander::expand(&token, &mut c).unwrap();
        prop_assert_eq!(result, vec![token]);
    }

    /// "Single-quote opacity": anything inside single quotes (short of
    /// another single quote) comes out byte-for-byte, as one word, with no
    /// splitting, globbing, or parameter expansion applied.
    #[test]
    fn single_quote_opacity(chars in prop::collection::vec(
        prop_oneof![plain_char(), Just(' '), Just('$'), Just('*'), Just('~'), Just('?')],
        0..16,
    )) {
        let body: String = chars.into_iter().collect();
        let token = format!("'{body}'");
        let mut c = ctx();
        let result = expander::expand(&token, &mut c).unwrap();
        prop_assert_eq!(result, vec![body]);
    }

    /// "Double-quote dollar passthrough": word splitting and globbing are
    /// suppressed inside double quotes, even when the quoted text contains
    /// the characters that would otherwise trigger them.
    #[test]
    fn double_quotes_suppress_splitting_and_globbing(chars in prop::collection::vec(
        prop_oneof![plain_char(), Just(' '), Just('*'), Just('?')],
        0..16,
    )) {
        let body: String = chars.into_iter().collect();
        let token = format!("\"{body}\"");
        let mut c = ctx();
        let result = expander::expand(&token, &mut c).unwrap();
        // Exactly one word, regardless of embedded spaces or glob chars.
        prop_assert_eq!(result.len(), 1);
        prop_assert_eq!(&result[0], &body);
    }
}

#[test]
fn bad_substitution_is_reported_as_an_expansion_error() {
    let mut c = ctx();
    let err = expander::expand("${0bad}", &mut c).unwrap_err();
    assert!(matches!(err, ExpansionError::BadSubstitution { .. }));
}

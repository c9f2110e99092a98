//! Result types for expect operations

mod error;

pub use error::{ExpectError, PatternError, TransportError};

use std::fmt;

/// What the last successful wait matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum After {
    /// Text matched by a literal or regex pattern.
    Text(String),
    /// The [`Pattern::Eof`](crate::Pattern::Eof) sentinel matched.
    Eof,
    /// The [`Pattern::Timeout`](crate::Pattern::Timeout) sentinel matched.
    Timeout,
}

impl After {
    /// The matched text, or `None` for a sentinel.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            After::Text(text) => Some(text),
            After::Eof | After::Timeout => None,
        }
    }
}

/// Outcome of the most recent wait on a session.
///
/// A successful wait overwrites every field. A wait that fails with a
/// timeout or end of stream sets `before` to the text seen so far and clears
/// the rest, so `before` is always the place to look for partial output.
///
/// # Examples
///
/// ```no_run
/// use console_expect::{Pattern, Session};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let mut session = Session::spawn("cmd").await?;
/// session.send_line("echo user@example.com").await?;
/// session.expect(Pattern::regex(r"(\w+)@(\w+)\.(\w+)")?).await?;
///
/// let result = session.last_match();
/// // captures[0] is the full match, the rest are the groups
/// println!("User: {}", result.captures[1]);
/// println!("Before match: {}", result.before);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Index of the pattern that matched, in request order.
    pub pattern_index: Option<usize>,

    /// Text that appeared before the match.
    ///
    /// For an end-of-stream outcome this is everything that was left in the
    /// buffer.
    pub before: String,

    /// The matched text or sentinel.
    pub after: Option<After>,

    /// Captured groups (for regex patterns).
    ///
    /// Index 0 is the full match, 1+ are the groups. Groups that did not
    /// participate are empty strings. Literal matches carry only index 0.
    pub captures: Vec<String>,
}

impl MatchResult {
    pub(crate) fn failed(before: String) -> Self {
        Self {
            before,
            ..Self::default()
        }
    }
}

/// Ways of asking a target program to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Deliver Ctrl+C to the target's console.
    Interrupt,
    /// Ask the capture process to terminate the target.
    Terminate,
    /// Kill the capture process and the target unconditionally.
    Kill,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Interrupt => "interrupt",
            Signal::Terminate => "terminate",
            Signal::Kill => "kill",
        };
        f.write_str(name)
    }
}

/// How a target program ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The target exited with this code.
    Exited(i32),
    /// The session was ended by a forced kill.
    Signaled(Signal),
}

impl ExitStatus {
    /// Exit code, if the target exited on its own.
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(*code),
            ExitStatus::Signaled(_) => None,
        }
    }

    /// Returns `true` when the target exited with code 0.
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {code}"),
            ExitStatus::Signaled(signal) => write!(f, "ended by {signal}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_text() {
        assert_eq!(After::Text("ok".into()).as_text(), Some("ok"));
        assert_eq!(After::Eof.as_text(), None);
    }

    #[test]
    fn test_failed_result_keeps_only_before() {
        let result = MatchResult::failed("partial".into());
        assert_eq!(result.before, "partial");
        assert!(result.after.is_none());
        assert!(result.pattern_index.is_none());
        assert!(result.captures.is_empty());
    }

    #[test]
    fn test_exit_status() {
        assert!(ExitStatus::Exited(0).success());
        assert!(!ExitStatus::Exited(3).success());
        assert_eq!(ExitStatus::Exited(3).code(), Some(3));
        assert_eq!(ExitStatus::Signaled(Signal::Kill).code(), None);
        assert_eq!(ExitStatus::Signaled(Signal::Kill).to_string(), "ended by kill");
    }
}

//! Pattern matching for expect operations

mod matcher;
mod search;

pub use search::{RegexSearcher, SearchMatch, Searcher, StringSearcher};

use crate::result::PatternError;
use regex::bytes::Regex;
use std::fmt;

/// Pattern types for matching process output.
///
/// A wait is always given a *list* of patterns; the index of the pattern
/// that matched is returned. Any single pattern, string, slice, array or
/// `Vec` converts into such a list through [`IntoPatterns`].
///
/// # Pattern Types
///
/// - **Exact**: literal text
/// - **Regex**: regular expression over the raw bytes, `.` matches newlines
/// - **Eof**: sentinel that matches when the output stream ends
/// - **Timeout**: sentinel that matches when the deadline passes
///
/// # Examples
///
/// ```
/// use console_expect::Pattern;
///
/// let p1 = Pattern::exact("password: ");
/// let p2 = Pattern::regex(r"\d+").unwrap();
/// let p3 = Pattern::Eof;
/// let p4 = Pattern::Timeout;
/// ```
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Literal text.
    Exact(String),

    /// Regular expression match.
    ///
    /// The matched text and all capture groups end up in the session's
    /// [`MatchResult`](crate::MatchResult).
    Regex(Regex),

    /// Match end of stream.
    ///
    /// Matches once the target has exited and all its output has been read.
    Eof,

    /// Match timeout condition.
    ///
    /// Turns a timeout into an ordinary match instead of an error.
    Timeout,
}

impl Pattern {
    /// Create a literal pattern.
    ///
    /// # Examples
    ///
    /// ```
    /// use console_expect::Pattern;
    ///
    /// let pattern = Pattern::exact("C:\\>");
    /// let pattern2 = Pattern::exact(String::from(">>> "));
    /// ```
    pub fn exact(s: impl Into<String>) -> Self {
        Pattern::Exact(s.into())
    }

    /// Create a regex pattern.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::InvalidRegex`] if the pattern is invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use console_expect::Pattern;
    ///
    /// let pattern = Pattern::regex(r"\d+").unwrap();
    /// let pattern = Pattern::regex(r"(?i)hello").unwrap();
    /// ```
    pub fn regex(pattern: &str) -> Result<Self, PatternError> {
        Ok(Pattern::Regex(matcher::compile(pattern)?))
    }

    /// Check if this is a sentinel pattern (EOF, Timeout)
    pub fn is_special(&self) -> bool {
        matches!(self, Pattern::Eof | Pattern::Timeout)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact(s) => write!(f, "{s:?}"),
            Pattern::Regex(r) => write!(f, "re({:?})", r.as_str()),
            Pattern::Eof => f.write_str("EOF"),
            Pattern::Timeout => f.write_str("TIMEOUT"),
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Pattern::Exact(s.to_string())
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Pattern::Exact(s)
    }
}

impl From<Regex> for Pattern {
    fn from(r: Regex) -> Self {
        Pattern::Regex(r)
    }
}

/// Conversion into the ordered pattern list a wait operates on.
///
/// A single value becomes a one-element list.
pub trait IntoPatterns {
    /// Convert into a list of patterns
    fn into_patterns(self) -> Vec<Pattern>;
}

impl IntoPatterns for Pattern {
    fn into_patterns(self) -> Vec<Pattern> {
        vec![self]
    }
}

impl IntoPatterns for &str {
    fn into_patterns(self) -> Vec<Pattern> {
        vec![Pattern::from(self)]
    }
}

impl IntoPatterns for String {
    fn into_patterns(self) -> Vec<Pattern> {
        vec![Pattern::Exact(self)]
    }
}

impl<P: Into<Pattern>> IntoPatterns for Vec<P> {
    fn into_patterns(self) -> Vec<Pattern> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<P: Into<Pattern>, const N: usize> IntoPatterns for [P; N] {
    fn into_patterns(self) -> Vec<Pattern> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<P: Clone + Into<Pattern>> IntoPatterns for &[P] {
    fn into_patterns(self) -> Vec<Pattern> {
        self.iter().cloned().map(Into::into).collect()
    }
}

impl<P: Clone + Into<Pattern>> IntoPatterns for &Vec<P> {
    fn into_patterns(self) -> Vec<Pattern> {
        self.as_slice().into_patterns()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_values_become_lists() {
        assert_eq!("x".into_patterns().len(), 1);
        assert_eq!(String::from("x").into_patterns().len(), 1);
        assert_eq!(Pattern::Eof.into_patterns().len(), 1);
    }

    #[test]
    fn test_lists_keep_order() {
        let patterns = [Pattern::exact("a"), Pattern::Eof, Pattern::Timeout].into_patterns();
        assert!(matches!(patterns[0], Pattern::Exact(ref s) if s == "a"));
        assert!(matches!(patterns[1], Pattern::Eof));
        assert!(matches!(patterns[2], Pattern::Timeout));

        let strings = vec!["one", "two"].into_patterns();
        assert_eq!(strings.len(), 2);

        let owned = vec![Pattern::exact("a")];
        assert_eq!((&owned).into_patterns().len(), 1);
        assert_eq!(owned.as_slice().into_patterns().len(), 1);
    }

    #[test]
    fn test_regex_is_dotall() {
        let Pattern::Regex(regex) = Pattern::regex("a.b").unwrap() else {
            panic!("expected a regex pattern");
        };
        assert!(regex.is_match(b"a\nb"));
    }

    #[test]
    fn test_invalid_regex() {
        assert!(matches!(
            Pattern::regex("[unclosed"),
            Err(PatternError::InvalidRegex(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(Pattern::exact("a\"b").to_string(), r#""a\"b""#);
        assert_eq!(Pattern::regex(r"\d+").unwrap().to_string(), r#"re("\\d+")"#);
        assert_eq!(Pattern::Eof.to_string(), "EOF");
        assert_eq!(Pattern::Timeout.to_string(), "TIMEOUT");
        assert!(Pattern::Timeout.is_special());
        assert!(!Pattern::exact("x").is_special());
    }
}

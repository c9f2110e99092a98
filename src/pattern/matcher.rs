//! Pattern matcher implementations

use crate::result::PatternError;
use regex::bytes::{Regex, RegexBuilder};

/// Result of a pattern match
#[derive(Debug, Clone)]
pub struct Match {
    /// Start position of the match
    pub start: usize,
    /// End position of the match
    pub end: usize,
    /// Captured groups, index 0 is the full match
    pub captures: Vec<String>,
}

/// Trait for pattern matching
pub trait Matcher: Send + Sync {
    /// Find the leftmost match that starts at or after `start`.
    ///
    /// Positions in the returned [`Match`] are absolute offsets into
    /// `buffer`.
    fn find_at(&self, buffer: &[u8], start: usize) -> Option<Match>;
}

/// Exact string matcher using Boyer-Moore-Horspool algorithm
#[derive(Debug, Clone)]
pub struct ExactMatcher {
    pattern: Vec<u8>,
    bad_char_table: [usize; 256],
}

impl ExactMatcher {
    /// Create a new exact matcher
    pub fn new(pattern: impl Into<Vec<u8>>) -> Result<Self, PatternError> {
        let pattern = pattern.into();

        if pattern.is_empty() {
            return Err(PatternError::EmptyPattern);
        }

        // Build bad character table for Boyer-Moore-Horspool
        let mut bad_char_table = [pattern.len(); 256];
        for (i, &byte) in pattern.iter().enumerate().take(pattern.len() - 1) {
            bad_char_table[byte as usize] = pattern.len() - 1 - i;
        }

        Ok(Self {
            pattern,
            bad_char_table,
        })
    }

    /// Length of the literal in bytes
    pub fn len(&self) -> usize {
        self.pattern.len()
    }
}

impl Matcher for ExactMatcher {
    fn find_at(&self, buffer: &[u8], start: usize) -> Option<Match> {
        let n = self.pattern.len();
        let mut pos = start;
        while pos + n <= buffer.len() {
            if buffer[pos..pos + n] == self.pattern[..] {
                return Some(Match {
                    start: pos,
                    end: pos + n,
                    captures: vec![String::from_utf8_lossy(&self.pattern).into_owned()],
                });
            }

            // Shift using bad character table
            let shift_char = buffer[pos + n - 1];
            pos += self.bad_char_table[shift_char as usize];
        }

        None
    }
}

/// Regex matcher over raw bytes.
///
/// `.` matches newlines too, since console output is matched as one block
/// rather than line by line.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
}

impl RegexMatcher {
    /// Compile a new regex matcher
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        Ok(Self {
            regex: compile(pattern)?,
        })
    }

    /// Wrap an already compiled regex
    pub fn from_regex(regex: Regex) -> Self {
        Self { regex }
    }
}

impl Matcher for RegexMatcher {
    fn find_at(&self, buffer: &[u8], start: usize) -> Option<Match> {
        if start > buffer.len() {
            return None;
        }
        let captures = self.regex.captures_at(buffer, start)?;
        let full_match = captures.get(0)?;

        let capture_strings = captures
            .iter()
            .map(|cap| {
                cap.map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
                    .unwrap_or_default()
            })
            .collect();

        Some(Match {
            start: full_match.start(),
            end: full_match.end(),
            captures: capture_strings,
        })
    }
}

/// Compile `pattern` the way every regex pattern is compiled
pub(crate) fn compile(pattern: &str) -> Result<Regex, PatternError> {
    Ok(RegexBuilder::new(pattern)
        .dot_matches_new_line(true)
        .build()?)
}

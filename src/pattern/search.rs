//! Multi-pattern searchers
//!
//! A searcher runs every pattern of a request over the buffer and picks one
//! winner: the match that starts earliest, with ties going to the pattern
//! declared first. This keeps results independent of how the output was
//! chunked, as long as each candidate was fully visible when the search ran.

use super::matcher::{ExactMatcher, Matcher, RegexMatcher};
use super::Pattern;
use crate::result::PatternError;
use std::fmt;

/// The winning match of one search pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    /// Index of the winning pattern in the request
    pub index: usize,
    /// Start offset in the searched buffer
    pub start: usize,
    /// End offset in the searched buffer
    pub end: usize,
    /// Captured groups, index 0 is the full match
    pub captures: Vec<String>,
}

/// A compiled pattern request.
pub trait Searcher: fmt::Display + Send + Sync {
    /// Search `buffer`, of which the last `freshlen` bytes arrived since
    /// the previous pass. `search_window` limits the search to the tail of
    /// the buffer.
    fn search(
        &self,
        buffer: &[u8],
        freshlen: usize,
        search_window: Option<usize>,
    ) -> Option<SearchMatch>;

    /// Position of the [`Pattern::Eof`] sentinel, if requested
    fn eof_index(&self) -> Option<usize>;

    /// Position of the [`Pattern::Timeout`] sentinel, if requested
    fn timeout_index(&self) -> Option<usize>;
}

#[derive(Debug, Default)]
struct Sentinels {
    eof: Option<usize>,
    timeout: Option<usize>,
}

impl Sentinels {
    fn record(&mut self, index: usize, pattern: &Pattern) -> bool {
        match pattern {
            Pattern::Eof => {
                self.eof.get_or_insert(index);
                true
            }
            Pattern::Timeout => {
                self.timeout.get_or_insert(index);
                true
            }
            _ => false,
        }
    }
}

fn describe(f: &mut fmt::Formatter<'_>, kind: &str, patterns: &[String]) -> fmt::Result {
    write!(f, "{kind} [")?;
    for (index, pattern) in patterns.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{index}: {pattern}")?;
    }
    f.write_str("]")
}

/// Searcher for literal strings.
///
/// Only the part of the buffer that could contain a match involving fresh
/// bytes is scanned: the last `freshlen + pattern length` bytes, or the
/// search window when one is set.
pub struct StringSearcher {
    matchers: Vec<(usize, ExactMatcher)>,
    sentinels: Sentinels,
    descriptions: Vec<String>,
}

impl StringSearcher {
    /// Build a searcher from literal and sentinel patterns.
    ///
    /// # Errors
    ///
    /// [`PatternError::NotLiteral`] for a regex pattern and
    /// [`PatternError::EmptyPattern`] for an empty string.
    pub fn new(patterns: &[Pattern]) -> Result<Self, PatternError> {
        let mut matchers = Vec::new();
        let mut sentinels = Sentinels::default();

        for (index, pattern) in patterns.iter().enumerate() {
            if sentinels.record(index, pattern) {
                continue;
            }
            match pattern {
                Pattern::Exact(s) => matchers.push((index, ExactMatcher::new(s.as_bytes())?)),
                _ => return Err(PatternError::NotLiteral(index)),
            }
        }

        Ok(Self {
            matchers,
            sentinels,
            descriptions: patterns.iter().map(ToString::to_string).collect(),
        })
    }
}

impl Searcher for StringSearcher {
    fn search(
        &self,
        buffer: &[u8],
        freshlen: usize,
        search_window: Option<usize>,
    ) -> Option<SearchMatch> {
        let mut best: Option<SearchMatch> = None;

        for (index, matcher) in &self.matchers {
            let offset = match search_window {
                Some(window) => buffer.len().saturating_sub(window),
                None => buffer.len().saturating_sub(freshlen + matcher.len()),
            };
            let Some(found) = matcher.find_at(buffer, offset) else {
                continue;
            };
            if best.as_ref().is_none_or(|b| found.start < b.start) {
                best = Some(SearchMatch {
                    index: *index,
                    start: found.start,
                    end: found.end,
                    captures: found.captures,
                });
            }
        }

        best
    }

    fn eof_index(&self) -> Option<usize> {
        self.sentinels.eof
    }

    fn timeout_index(&self) -> Option<usize> {
        self.sentinels.timeout
    }
}

impl fmt::Display for StringSearcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe(f, "literal patterns", &self.descriptions)
    }
}

/// Searcher for regular expressions.
///
/// Literal strings in the request are matched as escaped regexes. The whole
/// buffer is scanned every pass (or the search window when one is set), so
/// `freshlen` is ignored.
pub struct RegexSearcher {
    matchers: Vec<(usize, RegexMatcher)>,
    sentinels: Sentinels,
    descriptions: Vec<String>,
}

impl RegexSearcher {
    /// Build a searcher from regex, literal and sentinel patterns.
    ///
    /// # Errors
    ///
    /// [`PatternError::EmptyPattern`] for an empty literal string.
    pub fn new(patterns: &[Pattern]) -> Result<Self, PatternError> {
        let mut matchers = Vec::new();
        let mut sentinels = Sentinels::default();

        for (index, pattern) in patterns.iter().enumerate() {
            if sentinels.record(index, pattern) {
                continue;
            }
            let matcher = match pattern {
                Pattern::Exact(s) if s.is_empty() => return Err(PatternError::EmptyPattern),
                Pattern::Exact(s) => RegexMatcher::new(&regex::escape(s))?,
                Pattern::Regex(r) => RegexMatcher::from_regex(r.clone()),
                Pattern::Eof | Pattern::Timeout => continue,
            };
            matchers.push((index, matcher));
        }

        Ok(Self {
            matchers,
            sentinels,
            descriptions: patterns.iter().map(ToString::to_string).collect(),
        })
    }
}

impl Searcher for RegexSearcher {
    fn search(
        &self,
        buffer: &[u8],
        _freshlen: usize,
        search_window: Option<usize>,
    ) -> Option<SearchMatch> {
        let start = search_window.map_or(0, |window| buffer.len().saturating_sub(window));
        let mut best: Option<SearchMatch> = None;

        for (index, matcher) in &self.matchers {
            let Some(found) = matcher.find_at(buffer, start) else {
                continue;
            };
            if best.as_ref().is_none_or(|b| found.start < b.start) {
                best = Some(SearchMatch {
                    index: *index,
                    start: found.start,
                    end: found.end,
                    captures: found.captures,
                });
            }
        }

        best
    }

    fn eof_index(&self) -> Option<usize> {
        self.sentinels.eof
    }

    fn timeout_index(&self) -> Option<usize> {
        self.sentinels.timeout
    }
}

impl fmt::Display for RegexSearcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe(f, "regex patterns", &self.descriptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const COUNT: &[u8] = b"1, 2, 3, 4, 5, 6, 7, 8, 9, 10";

    fn literal(patterns: &[&str]) -> StringSearcher {
        let patterns: Vec<Pattern> = patterns.iter().map(|p| Pattern::exact(*p)).collect();
        StringSearcher::new(&patterns).unwrap()
    }

    fn regex(patterns: &[&str]) -> RegexSearcher {
        let patterns: Vec<Pattern> = patterns.iter().map(|p| Pattern::regex(p).unwrap()).collect();
        RegexSearcher::new(&patterns).unwrap()
    }

    #[test]
    fn test_literal_tie_goes_to_first_declared() {
        let found = literal(&["7, 8", "7, 8, 9", "7, 8"])
            .search(COUNT, COUNT.len(), None)
            .unwrap();
        assert_eq!(found.index, 0);
        assert_eq!(&COUNT[found.start..found.end], b"7, 8");
    }

    #[test]
    fn test_literal_earliest_start_wins() {
        let found = literal(&["3, 4", "2, 3, 4"])
            .search(COUNT, COUNT.len(), None)
            .unwrap();
        assert_eq!(found.index, 1);

        let found = literal(&["5,", "5, 6"])
            .search(COUNT, COUNT.len(), None)
            .unwrap();
        assert_eq!(found.index, 0);
        assert_eq!(&COUNT[found.start..found.end], b"5,");
    }

    #[test]
    fn test_regex_tie_breaks_match_literal() {
        let found = regex(&["7, 8", "7, 8, 9", "7, 8"])
            .search(COUNT, 0, None)
            .unwrap();
        assert_eq!(found.index, 0);

        let found = regex(&[r"3, 4", r"2, 3, 4"]).search(COUNT, 0, None).unwrap();
        assert_eq!(found.index, 1);

        let found = regex(&[r"5,", r"5, 6"]).search(COUNT, 0, None).unwrap();
        assert_eq!(found.index, 0);
    }

    #[test]
    fn test_literal_only_scans_fresh_tail() {
        let searcher = literal(&["abc"]);
        let found = searcher.search(b"abcabc", 1, None).unwrap();
        assert_eq!(found.start, 3);

        // "ab" was already searched, only "c" is new
        let found = searcher.search(b"xxabc", 1, None).unwrap();
        assert_eq!(found.start, 2);

        assert!(searcher.search(b"abcxxx", 2, None).is_none());
    }

    #[test]
    fn test_regex_ignores_freshlen() {
        let found = regex(&["abc"]).search(b"abcxxx", 1, None).unwrap();
        assert_eq!(found.start, 0);
    }

    #[test]
    fn test_search_window() {
        let buffer = b"abc----abc";
        assert_eq!(literal(&["abc"]).search(buffer, 0, Some(4)).unwrap().start, 7);
        assert_eq!(regex(&["abc"]).search(buffer, 0, Some(4)).unwrap().start, 7);
        assert!(literal(&["abc"]).search(buffer, 0, Some(2)).is_none());
        assert!(regex(&["abc"]).search(buffer, 0, Some(2)).is_none());
        assert_eq!(literal(&["abc"]).search(buffer, 0, Some(100)).unwrap().start, 0);
    }

    #[test]
    fn test_regex_captures() {
        let found = regex(&[r"(\d+), (\d+)"]).search(COUNT, 0, None).unwrap();
        assert_eq!(found.captures, vec!["1, 2", "1", "2"]);
    }

    #[test]
    fn test_literal_in_regex_searcher_is_escaped() {
        let searcher = RegexSearcher::new(&[Pattern::exact("a.b")]).unwrap();
        assert!(searcher.search(b"axb", 0, None).is_none());
        assert_eq!(searcher.search(b"xa.b", 0, None).unwrap().start, 1);
    }

    #[test]
    fn test_sentinel_indices() {
        let patterns = [Pattern::exact("x"), Pattern::Timeout, Pattern::Eof];
        let searcher = StringSearcher::new(&patterns).unwrap();
        assert_eq!(searcher.eof_index(), Some(2));
        assert_eq!(searcher.timeout_index(), Some(1));

        let searcher = RegexSearcher::new(&[Pattern::Eof]).unwrap();
        assert_eq!(searcher.eof_index(), Some(0));
        assert_eq!(searcher.timeout_index(), None);
        assert!(searcher.search(b"anything", 8, None).is_none());
    }

    #[test]
    fn test_repeated_sentinels_report_first_occurrence() {
        let patterns = [
            Pattern::Eof,
            Pattern::Timeout,
            Pattern::exact("x"),
            Pattern::Eof,
            Pattern::Timeout,
        ];
        let literal = StringSearcher::new(&patterns).unwrap();
        assert_eq!(literal.eof_index(), Some(0));
        assert_eq!(literal.timeout_index(), Some(1));

        let regex = RegexSearcher::new(&patterns).unwrap();
        assert_eq!(regex.eof_index(), Some(0));
        assert_eq!(regex.timeout_index(), Some(1));
        assert_eq!(regex.search(b"..x", 3, None).unwrap().index, 2);
    }

    #[test]
    fn test_literal_searcher_rejects_regex() {
        let patterns = [Pattern::exact("ok"), Pattern::regex("o+").unwrap()];
        assert!(matches!(
            StringSearcher::new(&patterns),
            Err(PatternError::NotLiteral(1))
        ));
    }

    #[test]
    fn test_empty_literal_rejected() {
        assert!(matches!(
            StringSearcher::new(&[Pattern::exact("")]),
            Err(PatternError::EmptyPattern)
        ));
        assert!(matches!(
            RegexSearcher::new(&[Pattern::exact("")]),
            Err(PatternError::EmptyPattern)
        ));
    }

    #[test]
    fn test_display_lists_patterns() {
        let patterns = [Pattern::exact("ok"), Pattern::Eof];
        assert_eq!(
            StringSearcher::new(&patterns).unwrap().to_string(),
            r#"literal patterns [0: "ok", 1: EOF]"#
        );
        assert_eq!(
            RegexSearcher::new(&patterns).unwrap().to_string(),
            r#"regex patterns [0: "ok", 1: EOF]"#
        );
    }

    fn naive_first(buffer: &[u8], needle: &[u8]) -> Option<usize> {
        buffer.windows(needle.len()).position(|w| w == needle)
    }

    proptest! {
        #[test]
        fn prop_literal_winner_is_earliest_then_first(
            buffer in "[ab]{0,24}",
            needles in prop::collection::vec("[ab]{1,3}", 1..5),
        ) {
            let patterns: Vec<Pattern> = needles.iter().map(|n| Pattern::exact(n.as_str())).collect();
            let searcher = StringSearcher::new(&patterns).unwrap();
            let bytes = buffer.as_bytes();

            let expected = needles
                .iter()
                .enumerate()
                .filter_map(|(i, n)| naive_first(bytes, n.as_bytes()).map(|start| (start, i)))
                .min();

            let found = searcher.search(bytes, bytes.len(), None).map(|m| (m.start, m.index));
            prop_assert_eq!(found, expected);

            let regex_searcher = RegexSearcher::new(&patterns).unwrap();
            let found = regex_searcher.search(bytes, 0, None).map(|m| (m.start, m.index));
            prop_assert_eq!(found, expected);
        }
    }
}

//! Sessions: the expect engine on top of a byte channel

mod builder;
mod child;
mod run;

pub use builder::SessionBuilder;
pub use child::{split_command_line, ChildSession, CAPTURE_EXECUTABLE};
pub use run::{run, CallbackAction, Response, RunCallback, RunEvent, RunOutput};

use crate::buffer::{split_eof_marker, ExpectBuffer, EOF_MARKER};
use crate::pattern::{IntoPatterns, Pattern, RegexSearcher, SearchMatch, Searcher, StringSearcher};
use crate::result::{
    After, ExitStatus, ExpectError, MatchResult, PatternError, Signal, TransportError,
};
use crate::transport::{ByteChannel, Received};
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::panic::Location;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Longest single wait for output before the deadline is checked again
const RECEIVE_POLL: Duration = Duration::from_millis(200);

type Caller = &'static Location<'static>;

/// Main session for interacting with a program.
///
/// A `Session` owns a [`ByteChannel`] (normally a [`ChildSession`]: a
/// program running in a hidden console) and the buffer of output received
/// from it. Waits consume the buffer up to the end of each match; whatever
/// follows stays for the next wait.
///
/// Every operation takes `&mut self`, so a session serves one waiter at a
/// time.
///
/// # Examples
///
/// ```no_run
/// use console_expect::{Pattern, Session};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut session = Session::builder()
///     .timeout(Duration::from_secs(30))
///     .spawn("cmd.exe")
///     .await?;
///
/// session.expect(Pattern::regex(r"[A-Z]:\\.*>")?).await?;
/// session.send_line("ver").await?;
/// session.expect("Microsoft Windows").await?;
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Session<T: ByteChannel = ChildSession> {
    channel: T,
    buffer: ExpectBuffer,
    last: MatchResult,
    timeout: Option<Duration>,
    maxread: usize,
    search_window: Option<usize>,
    delay_before_send: Duration,
    eof: bool,
    logfile: Option<Box<dyn Write + Send>>,
}

impl Session<ChildSession> {
    /// Create a new session builder.
    ///
    /// This is the recommended way to create a session as it allows you to
    /// configure timeouts, echo, the transport and more.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Spawn a command line with default settings.
    ///
    /// Shorthand for `Session::builder().spawn(command)`. The command line
    /// is split the way Windows programs split theirs; the program is then
    /// looked up on `PATH`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use console_expect::Session;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut session = Session::spawn("cmd.exe /c echo hello").await?;
    /// session.expect("hello").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn spawn(command: &str) -> Result<Self, ExpectError> {
        SessionBuilder::new().spawn(command).await
    }

    /// Process id of the target program
    pub fn target_pid(&self) -> u32 {
        self.channel.target_pid()
    }

    /// Returns `true` while the target runs.
    ///
    /// Once the end of output was seen the target is considered gone, even
    /// if the capture process is still winding down.
    pub fn is_alive(&mut self) -> Result<bool, ExpectError> {
        if self.eof {
            return Ok(false);
        }
        self.channel.is_alive()
    }

    /// Wait for the target to exit and return its status.
    pub async fn wait(&mut self) -> Result<ExitStatus, ExpectError> {
        self.channel.wait().await
    }

    /// Ask the target to exit; with `force`, kill it if it does not.
    ///
    /// Returns whether the target is gone.
    pub async fn terminate(&mut self, force: bool) -> Result<bool, ExpectError> {
        self.channel.terminate(force).await
    }

    /// Deliver `signal` to the target.
    pub async fn kill(&mut self, signal: Signal) -> Result<(), ExpectError> {
        self.channel.kill(signal).await
    }

    /// Show the target's console window so a person can watch or type.
    pub async fn interact(&mut self) -> Result<(), ExpectError> {
        self.channel.set_visible(true).await
    }

    /// Hide the console window again.
    pub async fn stop_interact(&mut self) -> Result<(), ExpectError> {
        self.channel.set_visible(false).await
    }

    /// Disconnect and end the target.
    pub async fn close(&mut self) -> Result<(), ExpectError> {
        self.channel.close().await
    }
}

impl<T: ByteChannel> Session<T> {
    /// The underlying channel
    pub fn channel(&self) -> &T {
        &self.channel
    }

    /// The underlying channel, mutably
    pub fn channel_mut(&mut self) -> &mut T {
        &mut self.channel
    }

    /// Default timeout for waits
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Change the default timeout for waits
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Returns `true` once the end of output was seen
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Text before the last match, or everything seen before a failed wait
    pub fn before(&self) -> &str {
        &self.last.before
    }

    /// What the last successful wait matched
    pub fn after(&self) -> Option<&After> {
        self.last.after.as_ref()
    }

    /// Capture groups of the last match, index 0 being the whole match
    pub fn captures(&self) -> &[String] {
        &self.last.captures
    }

    /// Index of the pattern that matched last
    pub fn match_index(&self) -> Option<usize> {
        self.last.pattern_index
    }

    /// Everything recorded about the last wait
    pub fn last_match(&self) -> &MatchResult {
        &self.last
    }

    /// Output received but not yet consumed by a match
    pub fn buffer(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    /// Send raw bytes to the target.
    ///
    /// Waits for the configured send delay first. Returns the number of
    /// bytes sent.
    ///
    /// # Errors
    ///
    /// [`ExpectError::Eof`] once the end of output was seen, and
    /// [`ExpectError::Closed`] if the channel is gone.
    #[track_caller]
    pub fn send<'a>(
        &'a mut self,
        data: &'a [u8],
    ) -> impl Future<Output = Result<usize, ExpectError>> + 'a {
        let caller = Location::caller();
        self.send_from(data, caller)
    }

    /// Send `line` followed by `"\r\n"`.
    #[track_caller]
    pub fn send_line(&mut self, line: &str) -> impl Future<Output = Result<usize, ExpectError>> + '_ {
        let caller = Location::caller();
        let line = format!("{line}\r\n");
        async move { self.send_from(line.as_bytes(), caller).await }
    }

    /// Send the end-of-file character (Ctrl+D).
    ///
    /// Programs only treat it as end of input at the start of a line.
    #[track_caller]
    pub fn send_eof(&mut self) -> impl Future<Output = Result<usize, ExpectError>> + '_ {
        let caller = Location::caller();
        async move { self.send_from(&[EOF_MARKER], caller).await }
    }

    /// Send each item in turn, without adding line breaks.
    #[track_caller]
    pub fn write_lines<I, S>(&mut self, lines: I) -> impl Future<Output = Result<(), ExpectError>> + '_
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let caller = Location::caller();
        let lines: Vec<String> = lines.into_iter().map(|s| s.as_ref().to_owned()).collect();
        self.send_each(lines, caller)
    }

    async fn send_each(&mut self, lines: Vec<String>, caller: Caller) -> Result<(), ExpectError> {
        for line in lines {
            self.send_from(line.as_bytes(), caller).await?;
        }
        Ok(())
    }

    async fn send_from(&mut self, data: &[u8], caller: Caller) -> Result<usize, ExpectError> {
        if self.eof {
            return Err(ExpectError::Eof {
                before: self.buffer.to_string_lossy(),
                caller,
            });
        }
        if !self.delay_before_send.is_zero() {
            tokio::time::sleep(self.delay_before_send).await;
        }
        self.log(data);
        match self.channel.send(data).await {
            Ok(()) => {
                trace!(len = data.len(), "sent");
                Ok(data.len())
            }
            Err(TransportError::Closed) => Err(ExpectError::Closed),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for any of `patterns`, using the session timeout.
    ///
    /// Literal strings are matched as written; use [`Pattern::regex`] for
    /// regular expressions. Returns the index of the winning pattern: the
    /// one whose match starts earliest, the first declared on a tie.
    ///
    /// # Errors
    ///
    /// [`ExpectError::Timeout`] or [`ExpectError::Eof`] when neither happens
    /// to be in `patterns` as a sentinel.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use console_expect::{Pattern, Session};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let mut session = Session::spawn("cmd.exe").await?;
    /// match session.expect(["success", "error"]).await? {
    ///     0 => println!("ok"),
    ///     _ => println!("failed: {}", session.before()),
    /// }
    ///
    /// let index = session
    ///     .expect(vec![Pattern::exact("done"), Pattern::Eof, Pattern::Timeout])
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    #[track_caller]
    pub fn expect(
        &mut self,
        patterns: impl IntoPatterns,
    ) -> impl Future<Output = Result<usize, ExpectError>> + '_ {
        let timeout = self.timeout;
        self.expect_within(patterns, timeout)
    }

    /// Like [`expect`](Self::expect) with an explicit timeout; `None` waits
    /// indefinitely.
    #[track_caller]
    pub fn expect_within(
        &mut self,
        patterns: impl IntoPatterns,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<usize, ExpectError>> + '_ {
        let caller = Location::caller();
        let searcher = RegexSearcher::new(&patterns.into_patterns())
            .map(|s| Box::new(s) as Box<dyn Searcher>);
        self.expect_prepared(searcher, timeout, caller)
    }

    /// Wait for literal strings only, using the session timeout.
    ///
    /// Only output near the end of the buffer is scanned on each pass,
    /// which is faster than [`expect`](Self::expect) on long outputs.
    ///
    /// # Errors
    ///
    /// [`PatternError::NotLiteral`](crate::PatternError::NotLiteral) before
    /// anything is read if a regex is among `patterns`.
    #[track_caller]
    pub fn expect_exact(
        &mut self,
        patterns: impl IntoPatterns,
    ) -> impl Future<Output = Result<usize, ExpectError>> + '_ {
        let timeout = self.timeout;
        self.expect_exact_within(patterns, timeout)
    }

    /// Like [`expect_exact`](Self::expect_exact) with an explicit timeout.
    #[track_caller]
    pub fn expect_exact_within(
        &mut self,
        patterns: impl IntoPatterns,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<usize, ExpectError>> + '_ {
        let caller = Location::caller();
        let searcher = StringSearcher::new(&patterns.into_patterns())
            .map(|s| Box::new(s) as Box<dyn Searcher>);
        self.expect_prepared(searcher, timeout, caller)
    }

    async fn expect_prepared(
        &mut self,
        searcher: Result<Box<dyn Searcher>, PatternError>,
        timeout: Option<Duration>,
        caller: Caller,
    ) -> Result<usize, ExpectError> {
        let searcher = searcher?;
        let window = self.search_window;
        self.expect_loop(searcher.as_ref(), timeout, window, caller).await
    }

    /// Wait with a prepared searcher, timeout and search window.
    #[track_caller]
    pub fn expect_searcher<'a>(
        &'a mut self,
        searcher: &'a dyn Searcher,
        timeout: Option<Duration>,
        search_window: Option<usize>,
    ) -> impl Future<Output = Result<usize, ExpectError>> + 'a {
        let caller = Location::caller();
        self.expect_loop(searcher, timeout, search_window, caller)
    }

    /// Read `size` characters, or everything until the end of output when
    /// `size` is `None`.
    ///
    /// Returns less if the output ends first.
    #[track_caller]
    pub fn read(
        &mut self,
        size: Option<usize>,
    ) -> impl Future<Output = Result<String, ExpectError>> + '_ {
        let caller = Location::caller();
        async move {
            let timeout = self.timeout;
            let window = self.search_window;
            match size {
                Some(0) => Ok(String::new()),
                Some(chars) => {
                    let searcher = CharCount { chars };
                    let index = self.expect_loop(&searcher, timeout, window, caller).await?;
                    Ok(self.take_text(index == 0))
                }
                None => {
                    let searcher = RegexSearcher::new(&[Pattern::Eof])?;
                    self.expect_loop(&searcher, timeout, window, caller).await?;
                    Ok(self.last.before.clone())
                }
            }
        }
    }

    /// Read one line including its `"\r\n"`.
    ///
    /// The last line of the output may lack the line break. An empty string
    /// means the output has ended.
    #[track_caller]
    pub fn read_line(&mut self) -> impl Future<Output = Result<String, ExpectError>> + '_ {
        let caller = Location::caller();
        async move { self.read_line_from(caller).await }
    }

    /// Read lines until the output ends.
    #[track_caller]
    pub fn read_lines(&mut self) -> impl Future<Output = Result<Vec<String>, ExpectError>> + '_ {
        let caller = Location::caller();
        async move {
            let mut lines = Vec::new();
            loop {
                let line = self.read_line_from(caller).await?;
                if line.is_empty() {
                    return Ok(lines);
                }
                lines.push(line);
            }
        }
    }

    async fn read_line_from(&mut self, caller: Caller) -> Result<String, ExpectError> {
        let searcher = RegexSearcher::new(&[Pattern::exact("\r\n"), Pattern::Eof])?;
        let timeout = self.timeout;
        let window = self.search_window;
        let index = self.expect_loop(&searcher, timeout, window, caller).await?;
        let mut line = self.last.before.clone();
        if index == 0 {
            line.push_str("\r\n");
        }
        Ok(line)
    }

    /// The matched text for a text match, otherwise what came before.
    fn take_text(&self, matched: bool) -> String {
        match (&self.last.after, matched) {
            (Some(After::Text(text)), true) => text.clone(),
            _ => self.last.before.clone(),
        }
    }

    async fn expect_loop(
        &mut self,
        searcher: &dyn Searcher,
        timeout: Option<Duration>,
        search_window: Option<usize>,
        caller: Caller,
    ) -> Result<usize, ExpectError> {
        debug!(%searcher, ?timeout, buffered = self.buffer.len(), "waiting");
        let deadline = timeout.and_then(|t| Some((Instant::now().checked_add(t)?, t)));
        let mut freshlen = self.buffer.len();

        loop {
            if let Some(found) = searcher.search(self.buffer.as_bytes(), freshlen, search_window) {
                return Ok(self.matched(found));
            }
            if self.eof {
                return self.reached_eof(searcher, caller);
            }

            let now = Instant::now();
            let wait = match deadline {
                Some((at, duration)) if now >= at => {
                    return self.timed_out(searcher, duration, caller)
                }
                Some((at, _)) => (at - now).min(RECEIVE_POLL),
                None => RECEIVE_POLL,
            };

            freshlen = match self.fill(wait).await {
                Ok(n) => n,
                Err(e) => {
                    self.last = MatchResult::failed(self.buffer.to_string_lossy());
                    return Err(e);
                }
            };
        }
    }

    /// Receive one chunk into the buffer, returning how many bytes were
    /// added.
    async fn fill(&mut self, wait: Duration) -> Result<usize, ExpectError> {
        let chunk = match self.channel.receive(self.maxread, wait).await {
            Ok(Received::Data(chunk)) => chunk,
            Ok(Received::Idle) => return Ok(0),
            Ok(Received::Closed) => {
                debug!("channel closed, treating as end of output");
                self.eof = true;
                return Ok(0);
            }
            // Closed on this side: the session must not be used any more.
            Err(TransportError::Closed) => return Err(ExpectError::Closed),
            Err(e) => return Err(e.into()),
        };

        let (data, eof) = split_eof_marker(&chunk);
        self.log(data);
        self.buffer.append(data);
        if eof {
            debug!("end of output marker received");
            self.eof = true;
        }
        Ok(data.len())
    }

    fn matched(&mut self, found: SearchMatch) -> usize {
        let bytes = self.buffer.as_bytes();
        let before = String::from_utf8_lossy(&bytes[..found.start]).into_owned();
        let after = String::from_utf8_lossy(&bytes[found.start..found.end]).into_owned();
        self.buffer.consume(found.end);
        trace!(index = found.index, "matched");
        self.last = MatchResult {
            pattern_index: Some(found.index),
            before,
            after: Some(After::Text(after)),
            captures: found.captures,
        };
        found.index
    }

    fn reached_eof(&mut self, searcher: &dyn Searcher, caller: Caller) -> Result<usize, ExpectError> {
        let before = String::from_utf8_lossy(&self.buffer.take()).into_owned();
        match searcher.eof_index() {
            Some(index) => {
                self.last = MatchResult {
                    pattern_index: Some(index),
                    before,
                    after: Some(After::Eof),
                    captures: Vec::new(),
                };
                Ok(index)
            }
            None => {
                debug!(%searcher, "end of output without a match");
                self.last = MatchResult::failed(before.clone());
                Err(ExpectError::Eof { before, caller })
            }
        }
    }

    fn timed_out(
        &mut self,
        searcher: &dyn Searcher,
        duration: Duration,
        caller: Caller,
    ) -> Result<usize, ExpectError> {
        let before = self.buffer.to_string_lossy();
        match searcher.timeout_index() {
            Some(index) => {
                self.last = MatchResult {
                    pattern_index: Some(index),
                    before,
                    after: Some(After::Timeout),
                    captures: Vec::new(),
                };
                Ok(index)
            }
            None => {
                debug!(%searcher, ?duration, "timed out");
                self.last = MatchResult::failed(before.clone());
                Err(ExpectError::Timeout {
                    duration,
                    before,
                    searcher: searcher.to_string(),
                    caller,
                })
            }
        }
    }

    fn log(&mut self, data: &[u8]) {
        if let Some(logfile) = self.logfile.as_mut() {
            if let Err(e) = logfile.write_all(data).and_then(|()| logfile.flush()) {
                warn!(error = %e, "failed to write session log, disabling it");
                self.logfile = None;
            }
        }
    }
}

impl<T: ByteChannel> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("buffered", &self.buffer.len())
            .field("last", &self.last)
            .field("eof", &self.eof)
            .field("timeout", &self.timeout)
            .field("maxread", &self.maxread)
            .field("search_window", &self.search_window)
            .field("delay_before_send", &self.delay_before_send)
            .finish_non_exhaustive()
    }
}

/// Matches once `chars` complete characters are buffered.
struct CharCount {
    chars: usize,
}

impl Searcher for CharCount {
    fn search(&self, buffer: &[u8], _freshlen: usize, _window: Option<usize>) -> Option<SearchMatch> {
        let valid = match std::str::from_utf8(buffer) {
            Ok(text) => text,
            Err(e) => std::str::from_utf8(&buffer[..e.valid_up_to()]).unwrap_or_default(),
        };
        let end = match valid.char_indices().nth(self.chars) {
            Some((end, _)) => end,
            None if valid.chars().count() == self.chars => valid.len(),
            None => return None,
        };
        Some(SearchMatch {
            index: 0,
            start: 0,
            end,
            captures: Vec::new(),
        })
    }

    fn eof_index(&self) -> Option<usize> {
        Some(1)
    }

    fn timeout_index(&self) -> Option<usize> {
        None
    }
}

impl fmt::Display for CharCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0: {} characters, 1: EOF]", self.chars)
    }
}

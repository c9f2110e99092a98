//! One-shot runs driven by pattern/response tables

use super::{Caller, Session, SessionBuilder};
use crate::pattern::{Pattern, RegexSearcher};
use crate::result::{After, ExitStatus, ExpectError, MatchResult};
use crate::transport::ByteChannel;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use tracing::debug;

/// Bytes taken from the channel per read during a run
const RUN_MAXREAD: usize = 2000;

/// What a callback wants the run to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Keep waiting for the next event
    Continue,
    /// Send this text, then keep waiting
    Send(String),
    /// End the run
    Stop,
}

/// Information handed to a callback.
#[derive(Debug)]
pub struct RunEvent<'a> {
    /// Number of events handled before this one
    pub event_count: usize,
    /// The match that triggered the callback
    pub result: &'a MatchResult,
}

/// Callback signature for [`Response::Callback`]
pub type RunCallback = Box<dyn FnMut(&RunEvent<'_>) -> CallbackAction + Send>;

/// How to answer when an event's pattern shows up.
pub enum Response {
    /// Send this text as is; include `"\r\n"` where Enter is needed
    Text(String),
    /// Decide at run time
    Callback(RunCallback),
}

impl Response {
    /// Wrap a closure as a response.
    ///
    /// # Examples
    ///
    /// ```
    /// use console_expect::{CallbackAction, Response};
    ///
    /// let ticks = Response::callback(|event| {
    ///     if event.event_count >= 10 {
    ///         CallbackAction::Stop
    ///     } else {
    ///         CallbackAction::Continue
    ///     }
    /// });
    /// # drop(ticks);
    /// ```
    pub fn callback<F>(f: F) -> Self
    where
        F: FnMut(&RunEvent<'_>) -> CallbackAction + Send + 'static,
    {
        Response::Callback(Box::new(f))
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Response::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl From<&str> for Response {
    fn from(text: &str) -> Self {
        Response::Text(text.to_string())
    }
}

impl From<String> for Response {
    fn from(text: String) -> Self {
        Response::Text(text)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// All output seen during the run
    pub output: String,
    /// How the target ended, when requested
    pub exit_status: Option<ExitStatus>,
}

/// Spawn `command`, answer its prompts from `events` and return everything
/// it printed.
///
/// The run ends when a callback returns [`CallbackAction::Stop`], when the
/// output ends, or when the default timeout passes without any event. Put
/// [`Pattern::Timeout`] in `events` to be called on every quiet period
/// instead.
///
/// # Examples
///
/// ```no_run
/// use console_expect::run;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listing = run("cmd /c dir", Vec::new()).await?;
/// println!("{listing}");
/// # Ok(())
/// # }
/// ```
pub async fn run(command: &str, events: Vec<(Pattern, Response)>) -> Result<String, ExpectError> {
    let out = SessionBuilder::new()
        .maxread(RUN_MAXREAD)
        .run(command, events, false)
        .await?;
    Ok(out.output)
}

impl<T: ByteChannel> Session<T> {
    /// Answer events until a callback stops the run, the output ends or a
    /// wait times out. Returns all output seen on the way.
    #[track_caller]
    pub fn run_events(
        &mut self,
        events: Vec<(Pattern, Response)>,
    ) -> impl Future<Output = Result<String, ExpectError>> + '_ {
        let caller = Location::caller();
        self.run_from(events, caller)
    }

    async fn run_from(
        &mut self,
        events: Vec<(Pattern, Response)>,
        caller: Caller,
    ) -> Result<String, ExpectError> {
        let (patterns, mut responses): (Vec<Pattern>, Vec<Response>) = events.into_iter().unzip();
        let searcher = RegexSearcher::new(&patterns)?;
        let mut output = String::new();
        let mut event_count = 0;

        loop {
            let timeout = self.timeout;
            let window = self.search_window;
            let index = match self.expect_loop(&searcher, timeout, window, caller).await {
                Ok(index) => index,
                Err(e) if e.is_timeout() || e.is_eof() => {
                    output.push_str(e.before().unwrap_or_default());
                    break;
                }
                Err(e) => return Err(e),
            };

            output.push_str(&self.last.before);
            if let Some(After::Text(text)) = &self.last.after {
                output.push_str(text);
            }
            let at_eof = matches!(self.last.after, Some(After::Eof));

            let reply = match &mut responses[index] {
                Response::Text(text) => Some(text.clone()),
                Response::Callback(callback) => {
                    let event = RunEvent {
                        event_count,
                        result: &self.last,
                    };
                    match callback(&event) {
                        CallbackAction::Continue => None,
                        CallbackAction::Send(text) => Some(text),
                        CallbackAction::Stop => {
                            debug!(event_count, "run stopped by callback");
                            break;
                        }
                    }
                }
            };
            event_count += 1;

            // Nothing more can arrive once the output has ended.
            if at_eof {
                break;
            }
            if let Some(reply) = reply {
                match self.send_from(reply.as_bytes(), caller).await {
                    Ok(_) => {}
                    Err(e) if e.is_eof() => break,
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(output)
    }
}

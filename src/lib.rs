//! console-expect: expect-style automation of Windows console programs
//!
//! Console programs that insist on a real console (they refuse to talk to a
//! pipe, or only prompt when attached to one) cannot be driven through their
//! standard handles. console-expect starts each such program inside a
//! hidden console owned by a small capture process. The capture process
//! scrapes the console screen, forwards whatever appeared to your program,
//! and types your input as key presses. On top of that byte stream sits a
//! familiar expect API: wait for patterns, send lines, read output.
//!
//! # Features
//!
//! - **Async/await**: Built on tokio
//! - **Pattern matching**: Literal strings and regular expressions, plus
//!   `Eof` and `Timeout` sentinels that turn those outcomes into matches
//! - **Earliest match wins**: Among several patterns the one whose match
//!   starts first is chosen, the first declared on a tie
//! - **Useful failures**: Timeouts and end of output carry the text seen so
//!   far and the location of the failing call
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use console_expect::{Pattern, Session};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::builder()
//!         .timeout(Duration::from_secs(30))
//!         .spawn("python -i")
//!         .await?;
//!
//!     session.expect(">>> ").await?;
//!     session.send_line("print('Hello, World!')").await?;
//!     session.expect(">>> ").await?;
//!     println!("Output: {}", session.before());
//!
//!     session.send_line("exit()").await?;
//!     session.expect(Pattern::Eof).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Pattern Matching
//!
//! ```rust,no_run
//! use console_expect::{Pattern, Session};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let mut session = Session::spawn("cmd").await?;
//! // Exact string
//! session.expect("password: ").await?;
//!
//! // Regex
//! session.expect(Pattern::regex(r"\d+")?).await?;
//!
//! // Several patterns, with the end of output as a normal outcome
//! let patterns = vec![
//!     Pattern::exact("success"),
//!     Pattern::exact("error"),
//!     Pattern::Eof,
//! ];
//! match session.expect(patterns).await? {
//!     0 => println!("Success!"),
//!     1 => println!("Error occurred"),
//!     _ => println!("Process ended"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # How it fits together
//!
//! The host side ([`Session`]) and the capture process
//! (`console-capture`, built from this crate) talk over a named pipe or a
//! loopback socket ([`transport`]). The capture side ([`capture`]) turns
//! screen changes into a byte stream and sends `0x04` once the target has
//! exited. The capture process exits with the target's exit code.

#![warn(missing_docs)]

mod buffer;
pub mod capture;
mod pattern;
mod result;
mod session;
pub mod transport;

// Public API exports
pub use pattern::{IntoPatterns, Pattern, RegexSearcher, SearchMatch, Searcher, StringSearcher};
pub use result::{
    After, ExitStatus, ExpectError, MatchResult, PatternError, Signal, TransportError,
};
pub use session::{
    run, split_command_line, CallbackAction, ChildSession, Response, RunCallback, RunEvent,
    RunOutput, Session, SessionBuilder, CAPTURE_EXECUTABLE,
};
pub use transport::{ByteChannel, TransportKind};

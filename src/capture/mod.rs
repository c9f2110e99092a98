//! Capture side of a session
//!
//! The capture process owns the console the target runs in. Each poll it
//! forwards newly scraped output to the host, types whatever the host sent
//! into the console input queue, and checks whether the target is still
//! running. When the cursor nears the bottom of the screen buffer the target
//! is suspended while the buffer is compacted.

pub mod input;
pub mod screen;
#[cfg(windows)]
pub mod windows;

pub use input::{InputAction, InputDecoder};
pub use screen::{ConsoleSession, Coord, ScreenBuffer, FILL_CHAR};

use crate::buffer::EOF_MARKER;
use crate::result::TransportError;
use crate::transport::{ByteChannel, Control, Received};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Largest chunk read from the host per poll
const READ_CHUNK: usize = 4096;

/// Time allowed per typed character for the console to consume its input
const INPUT_SETTLE_PER_CHAR: Duration = Duration::from_millis(100);
const INPUT_SETTLE_BASE: Duration = Duration::from_millis(500);
const INPUT_SETTLE_POLL: Duration = Duration::from_millis(50);

/// A console hosting one target program.
///
/// The Windows implementation lives in [`windows`]; tests drive the loop
/// with an in-memory console.
pub trait Console: ScreenBuffer + Send {
    /// Queue `text` as key presses on the console input
    fn write_input(&mut self, text: &str) -> io::Result<()>;

    /// Number of input events not yet read by the target
    fn pending_input(&self) -> io::Result<usize>;

    /// Exit code of the target, or `None` while it runs
    fn exit_code(&mut self) -> io::Result<Option<u32>>;

    /// Pause the target's primary thread
    fn suspend(&mut self) -> io::Result<()>;

    /// Undo [`suspend`](Self::suspend)
    fn resume(&mut self) -> io::Result<()>;

    /// Deliver Ctrl+C to the console
    fn interrupt(&mut self) -> io::Result<()>;

    /// Terminate the target
    fn terminate(&mut self) -> io::Result<()>;

    /// Show or hide the console window
    fn set_visible(&mut self, visible: bool) -> io::Result<()>;
}

/// Tuning for [`CaptureLoop`].
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Leave typed characters visible on screen
    pub echo: bool,
    /// Longest wait for host input per poll
    pub poll_interval: Duration,
    /// Cursor row that triggers compaction
    pub max_cursor_row: usize,
    /// Pause between noticing the exit and the final read
    pub exit_drain_delay: Duration,
    /// Pause between the end-of-stream marker and closing the connection
    pub linger: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            echo: true,
            poll_interval: Duration::from_millis(100),
            max_cursor_row: 8000,
            exit_drain_delay: Duration::from_millis(100),
            linger: Duration::from_secs(1),
        }
    }
}

/// Failures that stop the capture loop.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// A console call failed
    #[error("Console error: {0}")]
    Console(#[from] io::Error),

    /// The connection to the host failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Join a program and its arguments into one Windows command line,
/// quoting each part so the C runtime splits it back the same way.
pub fn command_line(parts: &[String]) -> String {
    let mut line = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        quote_arg(part, &mut line);
    }
    line
}

fn quote_arg(arg: &str, out: &mut String) {
    if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '\u{b}', '"']) {
        out.push_str(arg);
        return;
    }
    out.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.extend(std::iter::repeat_n('\\', backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            c => {
                out.extend(std::iter::repeat_n('\\', backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    // Backslashes before the closing quote must not escape it.
    out.extend(std::iter::repeat_n('\\', backslashes * 2));
    out.push('"');
}

enum Ending {
    TargetExited(u32),
    HostGone,
}

/// Relays one console to one host connection until either side ends.
pub struct CaptureLoop<C: Console> {
    console: C,
    session: ConsoleSession,
    input: InputDecoder,
    options: CaptureOptions,
}

impl<C: Console> CaptureLoop<C> {
    /// Prepare to relay `console`, which must already be filled with
    /// [`FILL_CHAR`].
    pub fn new(console: C, options: CaptureOptions) -> io::Result<Self> {
        let session = ConsoleSession::new(console.size()?);
        Ok(Self {
            console,
            session,
            input: InputDecoder::new(),
            options,
        })
    }

    /// Run until the target exits or the host disconnects.
    ///
    /// Returns the code the capture process should exit with: the target's
    /// exit code, or 1 if the target had to be terminated without
    /// reporting one.
    pub async fn run<T: ByteChannel>(mut self, mut channel: T) -> Result<u32, CaptureError> {
        info!(width = self.session.width(), "capture loop started");
        match self.serve(&mut channel).await? {
            Ending::TargetExited(code) => {
                info!(code, "target exited");
                self.finish(&mut channel).await;
                Ok(code)
            }
            Ending::HostGone => {
                warn!("host disconnected, terminating target");
                if let Err(e) = self.console.terminate() {
                    warn!(error = %e, "failed to terminate target");
                }
                let code = self.console.exit_code().ok().flatten().unwrap_or(1);
                channel.close().await;
                Ok(code)
            }
        }
    }

    async fn serve<T: ByteChannel>(&mut self, channel: &mut T) -> Result<Ending, CaptureError> {
        loop {
            match self.poll(channel).await {
                Ok(None) => {}
                Ok(Some(code)) => return Ok(Ending::TargetExited(code)),
                Err(CaptureError::Transport(TransportError::Closed)) => return Ok(Ending::HostGone),
                Err(e) => return Err(e),
            }
        }
    }

    /// One cycle: forward output, apply input, check the target.
    async fn poll<T: ByteChannel>(&mut self, channel: &mut T) -> Result<Option<u32>, CaptureError> {
        self.forward(channel).await?;

        match channel.receive(READ_CHUNK, self.options.poll_interval).await? {
            Received::Data(bytes) => {
                for action in self.input.feed(&bytes) {
                    self.apply(action).await?;
                }
            }
            Received::Idle => {}
            Received::Closed => return Err(TransportError::Closed.into()),
        }

        if let Some(code) = self.console.exit_code()? {
            return Ok(Some(code));
        }

        let cursor = self.console.cursor()?;
        if cursor.y > self.options.max_cursor_row {
            debug!(row = cursor.y, "screen buffer nearly full");
            self.relieve(channel).await?;
        }
        Ok(None)
    }

    async fn forward<T: ByteChannel>(&mut self, channel: &mut T) -> Result<(), CaptureError> {
        let delta = self.session.read_to_cursor(&self.console)?;
        if !delta.is_empty() {
            trace!(len = delta.len(), "forwarding output");
            channel.send(delta.as_bytes()).await?;
        }
        Ok(())
    }

    /// Drain and compact with the target suspended.
    async fn relieve<T: ByteChannel>(&mut self, channel: &mut T) -> Result<(), CaptureError> {
        self.console.suspend()?;
        let drained = self.forward(channel).await;
        let compacted = drained.and_then(|()| {
            self.session
                .compact(&mut self.console)
                .map_err(CaptureError::from)
        });
        self.console.resume()?;
        compacted
    }

    async fn apply(&mut self, action: InputAction) -> Result<(), CaptureError> {
        match action {
            InputAction::Text(text) => self.type_text(&text).await?,
            InputAction::Control(control) => {
                debug!(?control, "control request");
                match control {
                    Control::Terminate => self.console.terminate()?,
                    Control::Interrupt => self.console.interrupt()?,
                    Control::Show => self.console.set_visible(true)?,
                    Control::Hide => self.console.set_visible(false)?,
                }
            }
        }
        Ok(())
    }

    async fn type_text(&mut self, text: &str) -> io::Result<()> {
        let count = text.chars().count();
        let start = self.console.cursor()?;
        self.console.write_input(text)?;

        let settle = INPUT_SETTLE_PER_CHAR
            .saturating_mul(u32::try_from(count).unwrap_or(u32::MAX))
            .saturating_add(INPUT_SETTLE_BASE);
        let deadline = Instant::now() + settle;
        while self.console.pending_input()? > 0 && Instant::now() < deadline {
            tokio::time::sleep(INPUT_SETTLE_POLL).await;
        }

        if !self.options.echo {
            self.console.fill_cells(FILL_CHAR, count, start)?;
        }
        Ok(())
    }

    /// Send the last output and the end-of-stream marker, then hang up.
    /// The host may already be gone, so failures are only logged.
    async fn finish<T: ByteChannel>(&mut self, channel: &mut T) {
        tokio::time::sleep(self.options.exit_drain_delay).await;
        if let Err(e) = self.forward(channel).await {
            debug!(error = %e, "final read failed");
        }
        if let Err(e) = channel.send(&[EOF_MARKER]).await {
            debug!(error = %e, "failed to send end of stream");
        }
        tokio::time::sleep(self.options.linger).await;
        channel.close().await;
    }
}

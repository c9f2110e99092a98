//! Session builder for configuration

use super::child::{split_command_line, ChildSession, LaunchOptions};
use super::run::{Response, RunOutput};
use super::Session;
use crate::buffer::ExpectBuffer;
use crate::pattern::Pattern;
use crate::result::{ExpectError, MatchResult};
use crate::transport::{ByteChannel, TransportKind};
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for expect operations (in seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum bytes taken from the channel per read
const DEFAULT_MAXREAD: usize = 60000;

/// Default pause before each send
const DEFAULT_DELAY_BEFORE_SEND: Duration = Duration::from_millis(100);

/// Default grace period after a terminate request
const DEFAULT_DELAY_AFTER_TERMINATE: Duration = Duration::from_secs(2);

/// Default screen polling period of the capture process
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default time allowed for the capture process to open its endpoint
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for configuring and spawning sessions.
///
/// Provides a fluent interface for configuring session options before
/// spawning a process. Every session carries its own configuration; nothing
/// is read from global state or environment variables.
///
/// # Defaults
///
/// - Timeout: 30 seconds
/// - Max read: 60000 bytes
/// - Echo: enabled
/// - Delay before send: 100 ms
/// - Delay after terminate: 2 seconds
/// - Transport: named pipe on Windows, loopback socket elsewhere
///
/// # Examples
///
/// ```no_run
/// use console_expect::Session;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Session::builder()
///     .timeout(Duration::from_secs(60))
///     .echo(false)
///     .codepage(65001)
///     .spawn("python -i")
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    timeout: Option<Duration>,
    maxread: usize,
    search_window: Option<usize>,
    delay_before_send: Duration,
    logfile: Option<Box<dyn Write + Send>>,
    launch: LaunchOptions,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("timeout", &self.timeout)
            .field("maxread", &self.maxread)
            .field("search_window", &self.search_window)
            .field("delay_before_send", &self.delay_before_send)
            .field("logfile", &self.logfile.is_some())
            .field("launch", &self.launch)
            .finish()
    }
}

impl SessionBuilder {
    /// Create a new session builder with default configuration.
    ///
    /// See the [`SessionBuilder`] documentation for default values.
    pub fn new() -> Self {
        Self {
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            maxread: DEFAULT_MAXREAD,
            search_window: None,
            delay_before_send: DEFAULT_DELAY_BEFORE_SEND,
            logfile: None,
            launch: LaunchOptions {
                echo: true,
                codepage: None,
                cwd: None,
                env: Vec::new(),
                transport: TransportKind::default(),
                interact: false,
                capture_executable: None,
                capture_log: None,
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                delay_after_terminate: DEFAULT_DELAY_AFTER_TERMINATE,
                poll_interval: DEFAULT_POLL_INTERVAL,
            },
        }
    }

    /// Set the timeout for expect operations.
    ///
    /// If a pattern is not matched within this duration, `expect()` will
    /// return a timeout error unless `Pattern::Timeout` is in the pattern
    /// list.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use console_expect::Session;
    /// use std::time::Duration;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let session = Session::builder()
    ///     .timeout(Duration::from_secs(60))
    ///     .spawn("python -i")
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable timeout (wait indefinitely).
    ///
    /// When timeout is disabled, `expect()` will wait forever unless the
    /// pattern matches or the output ends.
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Maximum number of bytes taken from the channel per read (default:
    /// 60000).
    pub fn maxread(mut self, maxread: usize) -> Self {
        self.maxread = maxread.max(1);
        self
    }

    /// Only search the last `size` bytes of the buffer.
    ///
    /// Speeds up waits on programs that produce a lot of output, at the cost
    /// of missing matches that start further back.
    pub fn search_window_size(mut self, size: usize) -> Self {
        self.search_window = Some(size);
        self
    }

    /// Whether typed input shows up in the output (default: `true`).
    pub fn echo(mut self, echo: bool) -> Self {
        self.launch.echo = echo;
        self
    }

    /// Output code page for the target's console, e.g. `65001` for UTF-8.
    pub fn codepage(mut self, codepage: u32) -> Self {
        self.launch.codepage = Some(codepage);
        self
    }

    /// Working directory of the target.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.launch.cwd = Some(dir.into());
        self
    }

    /// Set one environment variable for the target.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.launch.env.push((key.into(), value.into()));
        self
    }

    /// Set several environment variables for the target.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.launch
            .env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Copy everything sent and received to `writer`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use console_expect::Session;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let log = std::fs::File::create("session.log")?;
    /// let session = Session::builder().logfile(log).spawn("cmd").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn logfile(mut self, writer: impl Write + Send + 'static) -> Self {
        self.logfile = Some(Box::new(writer));
        self
    }

    /// Endpoint kind between this process and the capture process.
    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.launch.transport = kind;
        self
    }

    /// Start with the target's console window visible.
    pub fn interact(mut self, visible: bool) -> Self {
        self.launch.interact = visible;
        self
    }

    /// Path of the capture executable.
    ///
    /// By default `console-capture` is looked up next to the current
    /// executable.
    pub fn capture_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.launch.capture_executable = Some(path.into());
        self
    }

    /// Have the capture process write its diagnostics to `path`.
    ///
    /// `level` is a tracing filter such as `"debug"` or
    /// `"console_expect=trace"`.
    pub fn capture_log(mut self, path: impl Into<PathBuf>, level: impl Into<String>) -> Self {
        self.launch.capture_log = Some((path.into(), level.into()));
        self
    }

    /// How long to wait for the capture process to accept the connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.launch.connect_timeout = timeout;
        self
    }

    /// Pause before each send (default: 100 ms).
    ///
    /// Gives slow programs time to switch to reading input.
    pub fn delay_before_send(mut self, delay: Duration) -> Self {
        self.delay_before_send = delay;
        self
    }

    /// How long `terminate` waits for the target to exit (default: 2 s).
    pub fn delay_after_terminate(mut self, delay: Duration) -> Self {
        self.launch.delay_after_terminate = delay;
        self
    }

    /// How often the capture process looks at the screen (default: 100 ms).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.launch.poll_interval = interval;
        self
    }

    /// Spawn a command line and return a configured session.
    ///
    /// The command line is split with the usual Windows quoting rules; the
    /// first word names the program.
    ///
    /// # Errors
    ///
    /// Returns [`ExpectError::SpawnError`] if:
    /// - The command line is empty
    /// - The program cannot be found
    /// - The capture process cannot be started or cannot launch the program
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use console_expect::Session;
    /// use std::time::Duration;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let session = Session::builder()
    ///     .timeout(Duration::from_secs(30))
    ///     .spawn(r#"cmd.exe /k "prompt $G""#)
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn spawn(self, command: &str) -> Result<Session, ExpectError> {
        let mut parts = split_command_line(command).into_iter();
        let Some(program) = parts.next() else {
            return Err(ExpectError::SpawnError("Empty command".to_string()));
        };
        let args: Vec<String> = parts.collect();
        self.spawn_args(&program, &args).await
    }

    /// Spawn `program` with separate arguments.
    pub async fn spawn_args(
        self,
        program: &str,
        args: &[String],
    ) -> Result<Session, ExpectError> {
        if program.trim().is_empty() {
            return Err(ExpectError::SpawnError("Empty command".to_string()));
        }
        let child = ChildSession::start(program, args, &self.launch).await?;
        Ok(self.attach(child))
    }

    /// Run the expect engine over an already connected channel.
    ///
    /// Launch options have no effect here.
    pub fn attach<T: ByteChannel>(self, channel: T) -> Session<T> {
        Session {
            channel,
            buffer: ExpectBuffer::new(),
            last: MatchResult::default(),
            timeout: self.timeout,
            maxread: self.maxread,
            search_window: self.search_window,
            delay_before_send: self.delay_before_send,
            eof: false,
            logfile: self.logfile,
        }
    }

    /// Spawn `command`, answer its prompts from `events` until it ends, and
    /// collect its output.
    ///
    /// With `with_exit_status`, waits for the target and reports how it
    /// ended.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use console_expect::{Pattern, Response, SessionBuilder};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let out = SessionBuilder::new()
    ///     .run(
    ///         "python -i",
    ///         vec![(Pattern::exact(">>> "), Response::from("exit()\r\n"))],
    ///         true,
    ///     )
    ///     .await?;
    /// println!("{} ({:?})", out.output, out.exit_status);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(
        self,
        command: &str,
        events: Vec<(Pattern, Response)>,
        with_exit_status: bool,
    ) -> Result<RunOutput, ExpectError> {
        let mut session = self.spawn(command).await?;
        let output = session.run_events(events).await?;
        let exit_status = if with_exit_status {
            Some(session.wait().await?)
        } else {
            None
        };
        session.close().await?;
        Ok(RunOutput {
            output,
            exit_status,
        })
    }
}

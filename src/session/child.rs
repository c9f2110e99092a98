//! The capture process as seen from the host

use crate::result::{ExitStatus, ExpectError, Signal, TransportError};
use crate::transport::handshake::Hello;
use crate::transport::{self, ByteChannel, Connection, Control, Received, TransportKind};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Base name of the capture executable
pub const CAPTURE_EXECUTABLE: &str = "console-capture";

/// Everything needed to start the capture process.
#[derive(Debug, Clone)]
pub(crate) struct LaunchOptions {
    pub echo: bool,
    pub codepage: Option<u32>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
    pub transport: TransportKind,
    pub interact: bool,
    pub capture_executable: Option<PathBuf>,
    pub capture_log: Option<(PathBuf, String)>,
    pub connect_timeout: Duration,
    pub delay_after_terminate: Duration,
    pub poll_interval: Duration,
}

/// A target program running in its own console, reached through a capture
/// process.
///
/// Output and input flow through the [`ByteChannel`] implementation; the
/// inherent methods manage the lifecycle. Call [`close`](Self::close) when
/// done. Dropping a `ChildSession` that is still running kills both
/// processes.
pub struct ChildSession {
    capture: Child,
    connection: Option<Connection>,
    target_pid: u32,
    status: Option<ExitStatus>,
    killed: bool,
    delay_after_terminate: Duration,
}

impl ChildSession {
    /// Start `command` with `args` under a new capture process.
    pub(crate) async fn start(
        command: &str,
        args: &[String],
        options: &LaunchOptions,
    ) -> Result<Self, ExpectError> {
        let program = resolve_program(command, options.cwd.as_deref())?;
        let capture_exe = match &options.capture_executable {
            Some(path) => path.clone(),
            None => default_capture_executable()?,
        };

        let mut cmd = Command::new(&capture_exe);
        cmd.arg("--transport")
            .arg(options.transport.to_string())
            .arg("--echo")
            .arg(options.echo.to_string())
            .arg("--poll-ms")
            .arg(options.poll_interval.as_millis().to_string());
        if options.interact {
            cmd.arg("--interact");
        }
        if let Some(cp) = options.codepage {
            cmd.arg("--codepage").arg(cp.to_string());
        }
        if let Some((path, level)) = &options.capture_log {
            cmd.arg("--log-file").arg(path).arg("--log-level").arg(level);
        }
        cmd.arg("--").arg(&program).args(args);

        if let Some(dir) = &options.cwd {
            cmd.current_dir(dir);
        }
        cmd.envs(options.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(windows::Win32::System::Threading::CREATE_NEW_CONSOLE.0);

        let mut capture = cmd.spawn().map_err(|e| {
            ExpectError::SpawnError(format!("failed to start {}: {e}", capture_exe.display()))
        })?;
        let capture_pid = capture
            .id()
            .ok_or_else(|| ExpectError::SpawnError("capture process exited at once".to_string()))?;
        info!(program = %program.display(), capture_pid, "capture process started");

        let connecting = transport::connect(options.transport, capture_pid, options.connect_timeout);
        let mut connection = tokio::select! {
            connection = connecting => connection?,
            status = capture.wait() => {
                return Err(ExpectError::SpawnError(format!(
                    "capture process exited before accepting a connection ({})",
                    status.map_or_else(|e| e.to_string(), |s| s.to_string())
                )));
            }
        };

        let target_pid = match Hello::read(&mut connection, options.connect_timeout).await? {
            Hello::Launched { target_pid } => target_pid,
            Hello::Failed { reason } => {
                return Err(ExpectError::SpawnError(format!(
                    "{} could not be started: {reason}",
                    program.display()
                )))
            }
        };
        info!(target_pid, endpoint = connection.endpoint(), "session established");

        Ok(Self {
            capture,
            connection: Some(connection),
            target_pid,
            status: None,
            killed: false,
            delay_after_terminate: options.delay_after_terminate,
        })
    }

    /// Process id of the target program
    pub fn target_pid(&self) -> u32 {
        self.target_pid
    }

    /// Process id of the capture process, while it runs
    pub fn capture_pid(&self) -> Option<u32> {
        self.capture.id()
    }

    async fn send_control(&mut self, control: Control) -> Result<(), ExpectError> {
        let connection = self.connection.as_mut().ok_or(ExpectError::Closed)?;
        debug!(?control, "sending control request");
        connection.send(&control.to_bytes()).await?;
        Ok(())
    }

    fn record(&mut self, status: std::process::ExitStatus) -> ExitStatus {
        let status = match status.code() {
            Some(code) if !self.killed => ExitStatus::Exited(code),
            _ => ExitStatus::Signaled(Signal::Kill),
        };
        debug!(%status, "capture process ended");
        *self.status.get_or_insert(status)
    }

    /// Returns `true` while the target runs.
    pub fn is_alive(&mut self) -> Result<bool, ExpectError> {
        if self.status.is_some() {
            return Ok(false);
        }
        match self.capture.try_wait()? {
            Some(status) => {
                self.record(status);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Wait for the target to end.
    ///
    /// The capture process exits with the target's exit code, so this is
    /// the target's status. Repeated calls return the same value.
    pub async fn wait(&mut self) -> Result<ExitStatus, ExpectError> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.capture.wait().await?;
        Ok(self.record(status))
    }

    async fn wait_a_while(&mut self) -> Result<bool, ExpectError> {
        let _ = tokio::time::timeout(self.delay_after_terminate, self.capture.wait()).await;
        Ok(!self.is_alive()?)
    }

    /// Ask the target to end, and kill it if `force` is set and asking did
    /// not work.
    ///
    /// Returns whether the target is gone. A target that survives is
    /// reported as `Ok(false)`, not as an error.
    pub async fn terminate(&mut self, force: bool) -> Result<bool, ExpectError> {
        if !self.is_alive()? {
            return Ok(true);
        }
        if let Err(e) = self.send_control(Control::Terminate).await {
            debug!(error = %e, "terminate request not delivered");
        }
        if self.wait_a_while().await? {
            return Ok(true);
        }
        if !force {
            return Ok(false);
        }

        warn!(target_pid = self.target_pid, "target ignored terminate, killing");
        self.force_kill();
        self.wait_a_while().await
    }

    fn force_kill(&mut self) {
        self.killed = true;
        kill_process(self.target_pid);
        if let Err(e) = self.capture.start_kill() {
            debug!(error = %e, "failed to kill capture process");
        }
    }

    /// Deliver `signal` to the target.
    pub async fn kill(&mut self, signal: Signal) -> Result<(), ExpectError> {
        info!(%signal, target_pid = self.target_pid, "signalling target");
        match signal {
            Signal::Interrupt => self.send_control(Control::Interrupt).await,
            Signal::Terminate => self.send_control(Control::Terminate).await,
            Signal::Kill => self.terminate(true).await.map(|_| ()),
        }
    }

    /// Show or hide the target's console window.
    pub async fn set_visible(&mut self, visible: bool) -> Result<(), ExpectError> {
        let control = if visible { Control::Show } else { Control::Hide };
        self.send_control(control).await
    }

    /// Disconnect and make sure both processes are gone.
    ///
    /// The capture process terminates the target when the host hangs up;
    /// if that does not happen in time both are killed.
    pub async fn close(&mut self) -> Result<(), ExpectError> {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        if self.is_alive()? && !self.wait_a_while().await? {
            self.force_kill();
            self.wait_a_while().await?;
        }
        Ok(())
    }
}

impl ByteChannel for ChildSession {
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self.connection.as_mut() {
            Some(connection) => connection.send(data).await,
            None => Err(TransportError::Closed),
        }
    }

    async fn receive(&mut self, max: usize, wait: Duration) -> Result<Received, TransportError> {
        match self.connection.as_mut() {
            Some(connection) => connection.receive(max, wait).await,
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
    }
}

impl Drop for ChildSession {
    fn drop(&mut self) {
        if matches!(self.capture.try_wait(), Ok(None)) {
            debug!(target_pid = self.target_pid, "session dropped while running");
            kill_process(self.target_pid);
            // kill_on_drop takes care of the capture process
        }
    }
}

#[cfg(windows)]
fn kill_process(pid: u32) {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

    unsafe {
        if let Ok(handle) = OpenProcess(PROCESS_TERMINATE, false, pid) {
            let _ = TerminateProcess(handle, 1);
            let _ = CloseHandle(handle);
        }
    }
}

#[cfg(not(windows))]
fn kill_process(pid: u32) {
    debug!(pid, "no direct kill on this platform, relying on the capture process");
}

/// Split a command string into program and arguments the way the Windows C
/// runtime does.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_part = false;
    let mut quoted = false;
    let mut backslashes = 0usize;

    for c in line.chars() {
        match c {
            '\\' => {
                backslashes += 1;
                in_part = true;
            }
            '"' => {
                current.extend(std::iter::repeat_n('\\', backslashes / 2));
                if backslashes % 2 == 1 {
                    current.push('"');
                } else {
                    quoted = !quoted;
                }
                backslashes = 0;
                in_part = true;
            }
            ' ' | '\t' if !quoted => {
                current.extend(std::iter::repeat_n('\\', backslashes));
                backslashes = 0;
                if in_part {
                    parts.push(std::mem::take(&mut current));
                    in_part = false;
                }
            }
            c => {
                current.extend(std::iter::repeat_n('\\', backslashes));
                backslashes = 0;
                current.push(c);
                in_part = true;
            }
        }
    }
    current.extend(std::iter::repeat_n('\\', backslashes));
    if in_part {
        parts.push(current);
    }
    parts
}

/// Find the executable `command` names, searching `PATH` for bare names.
pub(crate) fn resolve_program(command: &str, cwd: Option<&Path>) -> Result<PathBuf, ExpectError> {
    let not_found =
        || ExpectError::SpawnError(format!("command not found or not executable: {command}"));
    let path = Path::new(command);

    if path.components().count() > 1 || path.is_absolute() {
        let path = match cwd {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        };
        return candidates(&path)
            .into_iter()
            .find(|p| is_executable(p))
            .ok_or_else(not_found);
    }

    let search_path = env::var_os("PATH").unwrap_or_default();
    env::split_paths(&search_path)
        .flat_map(|dir| candidates(&dir.join(command)))
        .find(|p| is_executable(p))
        .ok_or_else(not_found)
}

#[cfg(windows)]
fn candidates(base: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if base.extension().is_some() {
        found.push(base.to_path_buf());
    }
    let exts = env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string());
    for ext in exts.split(';').filter(|e| !e.is_empty()) {
        let mut name = base.as_os_str().to_owned();
        name.push(ext);
        found.push(PathBuf::from(name));
    }
    found
}

#[cfg(not(windows))]
fn candidates(base: &Path) -> Vec<PathBuf> {
    vec![base.to_path_buf()]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// `console-capture` next to the running executable, or one directory up
/// (test binaries live in `target/<profile>/deps`).
fn default_capture_executable() -> Result<PathBuf, ExpectError> {
    let exe = env::current_exe()?;
    let name = format!("{CAPTURE_EXECUTABLE}{}", env::consts::EXE_SUFFIX);
    let found = exe
        .parent()
        .into_iter()
        .flat_map(|dir| [Some(dir), dir.parent()])
        .flatten()
        .map(|dir| dir.join(&name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            ExpectError::SpawnError(format!(
                "{name} not found next to {}; set SessionBuilder::capture_executable",
                exe.display()
            ))
        });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionBuilder;

    #[cfg(windows)]
    fn exiting_with(code: i32) -> Command {
        let mut cmd = Command::new("cmd.exe");
        cmd.arg("/C").arg(format!("exit {code}"));
        cmd
    }

    #[cfg(not(windows))]
    fn exiting_with(code: i32) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(format!("exit {code}"));
        cmd
    }

    /// A session whose capture process exits at once, without a connection.
    fn finished_session(code: i32) -> ChildSession {
        let capture = exiting_with(code)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        ChildSession {
            capture,
            connection: None,
            target_pid: 0,
            status: None,
            killed: false,
            delay_after_terminate: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_wait_and_is_alive_repeat_after_exit() {
        let mut child = finished_session(3);
        assert_eq!(child.wait().await.unwrap(), ExitStatus::Exited(3));
        assert_eq!(child.wait().await.unwrap(), ExitStatus::Exited(3));
        assert!(!child.is_alive().unwrap());
        assert!(!child.is_alive().unwrap());
        assert!(child.terminate(true).await.unwrap());
        assert_eq!(child.wait().await.unwrap(), ExitStatus::Exited(3));
    }

    #[tokio::test]
    async fn test_is_alive_records_status_for_wait() {
        let mut child = finished_session(4);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while child.is_alive().unwrap() {
            assert!(tokio::time::Instant::now() < deadline, "child never exited");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(child.status, Some(ExitStatus::Exited(4)));
        assert!(!child.is_alive().unwrap());
        assert_eq!(child.wait().await.unwrap(), ExitStatus::Exited(4));
    }

    #[tokio::test]
    async fn test_closed_child_rejects_io() {
        let mut child = finished_session(0);
        child.wait().await.unwrap();
        child.close().await.unwrap();

        assert!(matches!(
            child.receive(16, Duration::from_millis(10)).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(child.send(b"x").await, Err(TransportError::Closed)));
        assert!(matches!(child.set_visible(true).await, Err(ExpectError::Closed)));

        let mut session = SessionBuilder::new()
            .timeout(Duration::from_millis(100))
            .delay_before_send(Duration::ZERO)
            .attach(child);
        assert!(matches!(session.expect("x").await, Err(ExpectError::Closed)));
        assert!(matches!(session.read(None).await, Err(ExpectError::Closed)));
        assert!(matches!(session.send_line("x").await, Err(ExpectError::Closed)));
        assert!(session.wait().await.unwrap().success());
    }

    #[test]
    fn test_split_command_line() {
        assert_eq!(split_command_line("cmd.exe /c ver"), ["cmd.exe", "/c", "ver"]);
        assert_eq!(
            split_command_line(r#"python -c "print('a b')""#),
            ["python", "-c", "print('a b')"]
        );
        assert_eq!(split_command_line("  spaced   out  "), ["spaced", "out"]);
        assert_eq!(split_command_line(r#"echo """#), ["echo", ""]);
        assert_eq!(split_command_line(r#"tool "say \"hi\"""#), ["tool", r#"say "hi""#]);
        assert_eq!(
            split_command_line(r#""C:\Program Files\app\\" x"#),
            [r"C:\Program Files\app\", "x"]
        );
        assert_eq!(split_command_line(r"C:\dir\file"), [r"C:\dir\file"]);
        assert!(split_command_line("   ").is_empty());
    }

    #[test]
    fn test_split_inverts_quoting() {
        let parts: Vec<String> = ["prog", "two words", r#"q"uote"#, r"trail\", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let line = crate::capture::command_line(&parts);
        assert_eq!(split_command_line(&line), parts);
    }

    #[test]
    fn test_unknown_command_is_a_spawn_error() {
        let result = resolve_program("surely-no-such-program-4f1c", None);
        assert!(matches!(result, Err(ExpectError::SpawnError(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolves_through_path() {
        let sh = resolve_program("sh", None).unwrap();
        assert!(sh.is_absolute());
        assert!(sh.ends_with("sh"));

        let direct = resolve_program(sh.to_str().unwrap(), None).unwrap();
        assert_eq!(direct, sh);
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_non_executable_files() {
        let dir = env::temp_dir().join(format!("console-expect-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("plain.txt");
        std::fs::write(&file, "not a program").unwrap();

        let result = resolve_program("plain.txt", Some(&dir));
        assert!(result.is_err());
        let result = resolve_program("./plain.txt", Some(&dir));
        assert!(matches!(result, Err(ExpectError::SpawnError(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(windows)]
    #[test]
    fn test_resolves_with_pathext() {
        let cmd = resolve_program("cmd", None).unwrap();
        assert!(cmd
            .to_string_lossy()
            .to_ascii_lowercase()
            .ends_with("cmd.exe"));
    }
}

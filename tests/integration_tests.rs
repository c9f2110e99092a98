//! Integration tests for console-expect
//!
//! A session is wired to a real capture loop over an in-memory stream. The
//! capture loop scrapes a small simulated console running a toy shell:
//! `echo X` prints X, `exit [N]` ends with code N, anything else is ignored.

use console_expect::capture::{
    CaptureError, CaptureLoop, CaptureOptions, Console, Coord, ScreenBuffer, FILL_CHAR,
};
use console_expect::transport::{Connection, Control};
use console_expect::{
    After, CallbackAction, ExpectError, Pattern, Response, Session, SessionBuilder,
};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

const WIDTH: usize = 40;
const HEIGHT: usize = 200;

#[derive(Debug)]
struct Screen {
    cells: Vec<char>,
    cursor: Coord,
    line: String,
    exit: Option<u32>,
    interrupts: usize,
    visibility: Vec<bool>,
}

impl Screen {
    fn print(&mut self, text: &str) {
        for c in text.chars() {
            match c {
                '\r' => self.cursor.x = 0,
                '\n' => self.cursor.y += 1,
                c => {
                    self.cells[self.cursor.x + self.cursor.y * WIDTH] = c;
                    self.cursor.x += 1;
                    if self.cursor.x == WIDTH {
                        self.cursor.x = 0;
                        self.cursor.y += 1;
                    }
                }
            }
        }
    }

    fn run_line(&mut self) {
        self.print("\r\n");
        let line = std::mem::take(&mut self.line);
        let mut words = line.splitn(2, ' ');
        match (words.next(), words.next()) {
            (Some("exit"), code) => {
                self.exit = Some(code.and_then(|c| c.trim().parse().ok()).unwrap_or(0));
                return;
            }
            (Some("echo"), Some(text)) => {
                self.print(text);
                self.print("\r\n");
            }
            _ => {}
        }
        self.print("> ");
    }
}

#[derive(Debug, Clone)]
struct ToyConsole(Arc<Mutex<Screen>>);

impl ToyConsole {
    fn new(banner: &str) -> Self {
        let mut screen = Screen {
            cells: vec![FILL_CHAR; WIDTH * HEIGHT],
            cursor: Coord::ORIGIN,
            line: String::new(),
            exit: None,
            interrupts: 0,
            visibility: Vec::new(),
        };
        screen.print(banner);
        Self(Arc::new(Mutex::new(screen)))
    }

    fn with<R>(&self, f: impl FnOnce(&mut Screen) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }
}

impl ScreenBuffer for ToyConsole {
    fn size(&self) -> io::Result<Coord> {
        Ok(Coord::new(WIDTH, HEIGHT))
    }

    fn cursor(&self) -> io::Result<Coord> {
        Ok(self.with(|s| s.cursor))
    }

    fn set_cursor(&mut self, at: Coord) -> io::Result<()> {
        self.with(|s| s.cursor = at);
        Ok(())
    }

    fn read_cells(&self, from: Coord, len: usize) -> io::Result<Vec<char>> {
        let start = (from.x + from.y * WIDTH).min(WIDTH * HEIGHT);
        let end = (start + len).min(WIDTH * HEIGHT);
        Ok(self.with(|s| s.cells[start..end].to_vec()))
    }

    fn write_cells(&mut self, cells: &[char], at: Coord) -> io::Result<()> {
        let start = at.x + at.y * WIDTH;
        self.with(|s| {
            for (cell, &c) in s.cells[start..].iter_mut().zip(cells) {
                *cell = c;
            }
        });
        Ok(())
    }

    fn fill_cells(&mut self, ch: char, len: usize, at: Coord) -> io::Result<()> {
        let start = at.x + at.y * WIDTH;
        self.with(|s| {
            for cell in s.cells[start..].iter_mut().take(len) {
                *cell = ch;
            }
        });
        Ok(())
    }
}

impl Console for ToyConsole {
    fn write_input(&mut self, text: &str) -> io::Result<()> {
        self.with(|s| {
            for c in text.chars() {
                if s.exit.is_some() {
                    break;
                }
                if c == '\r' {
                    s.run_line();
                } else {
                    s.line.push(c);
                    s.print(&c.to_string());
                }
            }
        });
        Ok(())
    }

    fn pending_input(&self) -> io::Result<usize> {
        Ok(0)
    }

    fn exit_code(&mut self) -> io::Result<Option<u32>> {
        Ok(self.with(|s| s.exit))
    }

    fn suspend(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn resume(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn interrupt(&mut self) -> io::Result<()> {
        self.with(|s| {
            s.interrupts += 1;
            s.line.clear();
            s.print("^C\r\n> ");
        });
        Ok(())
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.with(|s| {
            s.exit.get_or_insert(1);
        });
        Ok(())
    }

    fn set_visible(&mut self, visible: bool) -> io::Result<()> {
        self.with(|s| s.visibility.push(visible));
        Ok(())
    }
}

struct Harness {
    session: Session<Connection>,
    console: ToyConsole,
    capture: JoinHandle<Result<u32, CaptureError>>,
}

fn start_with(echo: bool, builder: SessionBuilder) -> Harness {
    let console = ToyConsole::new("toy shell\r\n> ");
    let options = CaptureOptions {
        echo,
        poll_interval: Duration::from_millis(5),
        exit_drain_delay: Duration::from_millis(5),
        linger: Duration::from_millis(5),
        ..CaptureOptions::default()
    };
    let (host, capture) = tokio::io::duplex(4096);
    let capture_loop = CaptureLoop::new(console.clone(), options).unwrap();
    let capture = tokio::spawn(capture_loop.run(Connection::from_stream(capture, "capture")));
    let session = builder
        .delay_before_send(Duration::ZERO)
        .attach(Connection::from_stream(host, "host"));
    Harness {
        session,
        console,
        capture,
    }
}

fn start() -> Harness {
    start_with(true, SessionBuilder::new().timeout(Duration::from_secs(5)))
}

#[tokio::test]
async fn test_prompt_and_echoed_command() {
    let mut h = start();

    assert_eq!(h.session.expect("> ").await.unwrap(), 0);
    assert_eq!(h.session.before(), "toy shell\r\n");

    h.session.send_line("echo hello").await.unwrap();
    h.session.expect("hello\r\n> ").await.unwrap();
    assert_eq!(h.session.before(), "echo hello\r\n");
    assert_eq!(h.session.after(), Some(&After::Text("hello\r\n> ".into())));
}

#[tokio::test]
async fn test_earliest_pattern_wins() {
    let mut h = start();
    h.session.expect("> ").await.unwrap();
    h.session.send_line("echo beta alpha").await.unwrap();

    // Both appear in the echoed command; "beta" starts first.
    let index = h.session.expect(["alpha", "beta"]).await.unwrap();
    assert_eq!(index, 1);
    assert_eq!(h.session.before(), "echo ");
}

#[tokio::test]
async fn test_regex_captures() {
    let mut h = start();
    h.session.expect("> ").await.unwrap();
    h.session.send_line("echo build 1234 ok").await.unwrap();

    let pattern = Pattern::regex(r"build (\d+) (\w+)\r\n>").unwrap();
    h.session.expect(pattern).await.unwrap();
    // The echoed command line has no "\r\n>" after "ok"; the output line does.
    assert_eq!(h.session.captures(), ["build 1234 ok\r\n>", "1234", "ok"]);
}

#[tokio::test]
async fn test_echo_off_hides_typed_text() {
    let mut h = start_with(false, SessionBuilder::new().timeout(Duration::from_secs(5)));
    h.session.expect("> ").await.unwrap();

    h.session.send_line("echo visible").await.unwrap();
    h.session.expect("visible\r\n> ").await.unwrap();
    assert!(!h.session.before().contains("echo"), "{:?}", h.session.before());
}

#[tokio::test]
async fn test_target_exit_ends_output() {
    let mut h = start();
    h.session.expect("> ").await.unwrap();
    h.session.send_line("exit 7").await.unwrap();

    let index = h.session.expect(vec![Pattern::exact("never"), Pattern::Eof]).await.unwrap();
    assert_eq!(index, 1);
    assert_eq!(h.session.after(), Some(&After::Eof));
    assert!(h.session.before().starts_with("exit 7"));
    assert!(h.session.is_eof());

    assert_eq!(h.capture.await.unwrap().unwrap(), 7);
    assert!(h.session.send_line("echo late").await.unwrap_err().is_eof());
}

#[tokio::test]
async fn test_eof_without_sentinel_is_an_error() {
    let mut h = start();
    h.session.expect("> ").await.unwrap();
    h.session.send_line("exit").await.unwrap();

    let err = h.session.expect("never").await.unwrap_err();
    assert!(err.is_eof());
    assert!(err.before().unwrap().starts_with("exit"));
    assert!(err.to_string().contains("integration_tests.rs"), "{err}");
}

#[tokio::test]
async fn test_timeout_carries_partial_output() {
    let mut h = start_with(true, SessionBuilder::new().timeout(Duration::from_millis(200)));

    let err = assert_err!(h.session.expect("never").await);
    match &err {
        ExpectError::Timeout {
            before, searcher, ..
        } => {
            assert_eq!(before, "toy shell\r\n> ");
            assert!(searcher.contains("\"never\""), "{searcher}");
        }
        other => panic!("unexpected {other:?}"),
    }

    // The text is still there for the next wait.
    assert_ok!(h.session.expect("toy").await);
}

#[tokio::test]
async fn test_interrupt_reaches_console() {
    let mut h = start();
    h.session.expect("> ").await.unwrap();

    h.session.send(b"half typed").await.unwrap();
    h.session.send(&Control::Interrupt.to_bytes()).await.unwrap();
    h.session.expect("^C\r\n> ").await.unwrap();
    assert_eq!(h.session.before(), "half typed");
    assert_eq!(h.console.with(|s| s.interrupts), 1);

    h.session.send(&Control::Show.to_bytes()).await.unwrap();
    h.session.send(&Control::Hide.to_bytes()).await.unwrap();
    h.session.send(&Control::Terminate.to_bytes()).await.unwrap();
    h.session.expect(Pattern::Eof).await.unwrap();
    assert_eq!(h.console.with(|s| s.visibility.clone()), [true, false]);
    assert_eq!(h.capture.await.unwrap().unwrap(), 1);
}

#[tokio::test]
async fn test_read_lines_until_exit() {
    let mut h = start();
    h.session.expect("> ").await.unwrap();
    h.session.write_lines(["echo one\r\n", "exit\r\n"]).await.unwrap();

    let lines = h.session.read_lines().await.unwrap();
    assert_eq!(lines, ["echo one\r\n", "one\r\n", "> exit\r\n"]);
}

#[tokio::test]
async fn test_expect_exact_over_capture() {
    let mut h = start();
    assert_eq!(h.session.expect_exact(["shell", "toy"]).await.unwrap(), 1);

    let err = h
        .session
        .expect_exact(vec![Pattern::exact("> "), Pattern::regex(">").unwrap()])
        .await
        .unwrap_err();
    assert!(matches!(err, ExpectError::PatternError(_)));
}

#[tokio::test]
async fn test_run_events_drives_the_shell() {
    let mut h = start();

    let mut sent = 0;
    let prompt = Response::callback(move |_event| {
        sent += 1;
        match sent {
            1 => CallbackAction::Send("echo ran\r\n".into()),
            _ => CallbackAction::Send("exit\r\n".into()),
        }
    });
    let output = h
        .session
        .run_events(vec![(Pattern::exact("> "), prompt)])
        .await
        .unwrap();

    assert_eq!(output, "toy shell\r\n> echo ran\r\nran\r\n> exit\r\n");
    assert_eq!(h.capture.await.unwrap().unwrap(), 0);
}

#[tokio::test]
async fn test_host_going_away_terminates_target() {
    let h = start();
    drop(h.session);
    assert_eq!(h.capture.await.unwrap().unwrap(), 1);
    assert_eq!(h.console.with(|s| s.exit), Some(1));
}

/// Real consoles; these need the capture binary and a Windows desktop
/// session.
#[cfg(windows)]
mod windows_console {
    use console_expect::{ExitStatus, ExpectError, Pattern, Session, SessionBuilder, Signal};
    use std::time::Duration;

    fn builder() -> SessionBuilder {
        Session::builder()
            .capture_executable(env!("CARGO_BIN_EXE_console-capture"))
            .timeout(Duration::from_secs(20))
    }

    #[tokio::test]
    async fn test_cmd_echo_and_exit_code() {
        let mut session = builder()
            .spawn("cmd.exe /c echo Hello World& exit 5")
            .await
            .unwrap();
        session.expect("Hello World").await.unwrap();
        session.expect(Pattern::Eof).await.unwrap();
        assert_eq!(session.wait().await.unwrap(), ExitStatus::Exited(5));
        assert_eq!(session.wait().await.unwrap(), ExitStatus::Exited(5));
        assert!(!session.is_alive().unwrap());
        assert!(!session.channel_mut().is_alive().unwrap());
        assert!(!session.channel_mut().is_alive().unwrap());
    }

    #[tokio::test]
    async fn test_interactive_prompt() {
        let mut session = builder().spawn("cmd.exe /k prompt $G$G").await.unwrap();
        session.expect(">>").await.unwrap();
        session.send_line("echo %COMSPEC%").await.unwrap();
        session
            .expect(Pattern::regex(r"(?i)cmd\.exe").unwrap())
            .await
            .unwrap();
        session.send_line("exit").await.unwrap();
        session.expect(Pattern::Eof).await.unwrap();
        assert!(session.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_terminate_and_kill() {
        let mut session = builder()
            .delay_after_terminate(Duration::from_millis(500))
            .spawn("cmd.exe")
            .await
            .unwrap();
        assert!(session.is_alive().unwrap());
        assert!(session.terminate(true).await.unwrap());
        assert!(!session.is_alive().unwrap());

        let mut session = builder().spawn("cmd.exe").await.unwrap();
        session.kill(Signal::Kill).await.unwrap();
        assert_eq!(
            session.wait().await.unwrap(),
            ExitStatus::Signaled(Signal::Kill)
        );
    }

    #[tokio::test]
    async fn test_socket_transport() {
        let mut session = builder()
            .transport(console_expect::TransportKind::Socket { port: 14321 })
            .spawn("cmd.exe /c echo over tcp")
            .await
            .unwrap();
        session.expect("over tcp").await.unwrap();
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_program() {
        let err = builder()
            .spawn("surely-not-a-real-program-1234")
            .await
            .unwrap_err();
        assert!(matches!(err, ExpectError::SpawnError(_)));
    }

    #[tokio::test]
    async fn test_run_collects_output() {
        let out = builder()
            .run("cmd.exe /c echo collected& exit 2", Vec::new(), true)
            .await
            .unwrap();
        assert!(out.output.contains("collected"), "{}", out.output);
        assert_eq!(out.exit_status, Some(ExitStatus::Exited(2)));
    }
}

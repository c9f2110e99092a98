//! Capture process: runs one program in this process's console and relays
//! the console screen to the host that started it.

use clap::{ArgAction, Parser};
use console_expect::transport::TransportKind;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[cfg_attr(not(windows), allow(dead_code))]
#[command(name = "console-capture")]
#[command(author, version, about = "Relay a console program's screen to a console-expect host", long_about = None)]
struct Args {
    /// Endpoint to open: pipe, socket or socket:<port>
    #[arg(long, default_value_t = TransportKind::default())]
    transport: TransportKind,

    /// Keep typed input visible on screen
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    echo: bool,

    /// Start with the console window visible
    #[arg(long)]
    interact: bool,

    /// Console output code page (65001 for UTF-8)
    #[arg(long)]
    codepage: Option<u32>,

    /// Screen polling period in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    /// Write diagnostics to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Tracing filter for the log file
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Program to run, followed by its arguments
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    // The console belongs to the target, so diagnostics only go to a file.
    let Some(path) = &args.log_file else {
        return Ok(());
    };
    let file = std::fs::File::create(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(&args.log_level)?)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[cfg(windows)]
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    use console_expect::capture::windows::{ConsoleSetup, WinConsole};
    use console_expect::capture::{CaptureLoop, CaptureOptions};
    use console_expect::transport::handshake::Hello;
    use console_expect::transport::Listener;
    use std::time::Duration;
    use tracing::{error, info};

    let args = Args::parse();
    init_logging(&args)?;
    info!(transport = %args.transport, command = ?args.command, "capture starting");

    let listener = Listener::bind(args.transport, std::process::id()).await?;
    let mut connection = listener.accept().await?;

    let setup = ConsoleSetup {
        codepage: args.codepage,
        visible: args.interact,
    };
    let console = match WinConsole::launch(&setup, &args.command) {
        Ok(console) => console,
        Err(e) => {
            error!(error = %e, "failed to launch target");
            Hello::Failed {
                reason: e.to_string(),
            }
            .write(&mut connection)
            .await?;
            std::process::exit(1);
        }
    };
    Hello::Launched {
        target_pid: console.target_pid(),
    }
    .write(&mut connection)
    .await?;

    let options = CaptureOptions {
        echo: args.echo,
        poll_interval: Duration::from_millis(args.poll_ms.max(1)),
        ..CaptureOptions::default()
    };
    let code = CaptureLoop::new(console, options)?.run(connection).await?;
    info!(code, "capture finished");
    // Exit codes are DWORDs; the bit pattern is what the host reads back.
    std::process::exit(code as i32);
}

#[cfg(not(windows))]
fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;
    anyhow::bail!("console-capture needs a Windows console")
}

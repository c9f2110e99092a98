//! Named pipe endpoints (Windows only)

use super::Connection;
use crate::result::TransportError;
use std::time::Duration;

#[cfg(windows)]
pub use imp::{connect, PipeListener};

#[cfg(not(windows))]
pub use unsupported::{connect, PipeListener};

#[cfg(windows)]
mod imp {
    use super::*;
    use crate::transport::CONNECT_RETRY_INTERVAL;
    use std::io;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};
    use tokio::time::Instant;
    use tracing::debug;
    use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_PIPE_BUSY};

    /// Open the client end of `name`, retrying until the server exists.
    pub async fn connect(name: &str, timeout: Duration) -> Result<Connection, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            match ClientOptions::new().open(name) {
                Ok(client) => {
                    debug!(pipe = name, "connected");
                    return Ok(Connection::from_stream(client, name));
                }
                Err(e) if is_not_ready(&e) => {}
                Err(source) => {
                    return Err(TransportError::Connect {
                        endpoint: name.to_string(),
                        source,
                    })
                }
            }
            if Instant::now() >= deadline {
                return Err(TransportError::ConnectTimeout {
                    endpoint: name.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
        }
    }

    fn is_not_ready(e: &io::Error) -> bool {
        let code = e.raw_os_error();
        code == Some(ERROR_FILE_NOT_FOUND.0 as i32) || code == Some(ERROR_PIPE_BUSY.0 as i32)
    }

    /// Server end of a single-client pipe.
    pub struct PipeListener {
        name: String,
        server: NamedPipeServer,
    }

    impl PipeListener {
        /// Create the first and only instance of `name`.
        pub fn create(name: &str) -> Result<Self, TransportError> {
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(name)?;
            debug!(pipe = name, "pipe created");
            Ok(Self {
                name: name.to_string(),
                server,
            })
        }

        /// Wait for the client to open the pipe.
        pub async fn accept(self) -> Result<Connection, TransportError> {
            self.server.connect().await?;
            debug!(pipe = %self.name, "client connected");
            Ok(Connection::from_stream(self.server, self.name))
        }
    }
}

#[cfg(not(windows))]
mod unsupported {
    use super::*;

    /// Named pipes are not available here.
    pub async fn connect(_name: &str, _timeout: Duration) -> Result<Connection, TransportError> {
        Err(TransportError::Unsupported("named pipes require Windows"))
    }

    /// Named pipes are not available here.
    pub struct PipeListener(());

    impl PipeListener {
        /// Always fails with [`TransportError::Unsupported`].
        pub fn create(_name: &str) -> Result<Self, TransportError> {
            Err(TransportError::Unsupported("named pipes require Windows"))
        }

        /// Never reached, since [`PipeListener::create`] always fails.
        pub async fn accept(self) -> Result<Connection, TransportError> {
            Err(TransportError::Unsupported("named pipes require Windows"))
        }
    }
}

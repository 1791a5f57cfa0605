//! Per-connection driver: admission, login exchange and the read loop

use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::TcpListener;

use crate::constants::{BLOCKED_MESSAGE, BUSY_MESSAGE, MAX_LINE, PASSWORD_PROMPT, USERNAME_PROMPT};
use crate::core::commands::Flow;
use crate::core::connection::Connection;
use crate::core::server::{ChatServer, LoginStep};
use crate::core::session::{Session, SessionPhase};
use crate::error::{ChatError, ErrorKind, Result};

/// One inbound line, or a marker for a line that exceeded [`MAX_LINE`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    TooLong,
}

/// Newline-framed reader with a per-line length cap
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::with_capacity(MAX_LINE),
        }
    }

    /// Next line without its terminator; `None` at end of stream
    pub async fn next_line(&mut self) -> Result<Option<Line>> {
        self.buf.clear();
        let read = (&mut self.inner)
            .take(MAX_LINE as u64 + 1)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        } else if self.buf.len() > MAX_LINE {
            self.discard_rest().await?;
            return Ok(Some(Line::TooLong));
        }

        Ok(Some(Line::Text(String::from_utf8_lossy(&self.buf).into_owned())))
    }

    // Skip to the end of an overlong line
    async fn discard_rest(&mut self) -> Result<()> {
        loop {
            self.buf.clear();
            let read = (&mut self.inner)
                .take(MAX_LINE as u64)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if read == 0 || self.buf.last() == Some(&b'\n') {
                return Ok(());
            }
        }
    }
}

/// Drive one client from connect to disconnect
pub async fn handle_client<S>(server: Arc<ChatServer>, stream: S, addr: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let connection = Arc::new(Connection::new(Box::new(writer), addr));

    match server.is_blocked(addr.ip()) {
        Ok(false) => {}
        Ok(true) => {
            warn!("Refused blocked address {}", addr.ip());
            connection.send_line_lossy(BLOCKED_MESSAGE).await;
            connection.close().await;
            return;
        }
        Err(e) => {
            error!("Failed to check block list for {}: {}", addr, e);
            connection.close().await;
            return;
        }
    }

    let session = match server.accept(connection.clone()) {
        Ok(session) => session,
        Err(ChatError::SessionsFull) => {
            warn!("Turned away {}: all session slots in use", addr);
            connection.send_line_lossy(BUSY_MESSAGE).await;
            connection.close().await;
            return;
        }
        Err(e) => {
            error!("Failed to allocate a session for {}: {}", addr, e);
            connection.close().await;
            return;
        }
    };

    let mut lines = LineReader::new(reader);
    match run_session(&server, &session, &mut lines).await {
        Ok(()) => {}
        Err(e) if e.is_connection_lost() => {
            debug!("Connection to {} lost: {}", session.display_name(), e)
        }
        Err(e) => error!("Session {} ended with error: {}", session.display_name(), e),
    }

    if let Err(e) = server.disconnect(&session).await {
        error!("Error cleaning up session {}: {}", session.id(), e);
    }
}

async fn run_session<R>(server: &ChatServer, session: &Session, lines: &mut LineReader<R>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    session.set_phase(SessionPhase::NamePrompt)?;
    if !login(server, session, lines).await? {
        return Ok(());
    }
    server.activate(session).await?;

    loop {
        let line = tokio::select! {
            biased;
            _ = session.logout_notified() => {
                info!("{} was logged out by the server", session.display_name());
                return Ok(());
            }
            line = lines.next_line() => line?,
        };

        match line {
            None => return Ok(()),
            Some(Line::TooLong) => {
                session
                    .send_line(&format!("Line too long (limit is {} bytes).", MAX_LINE))
                    .await?
            }
            Some(Line::Text(text)) => {
                if server.handle_line(session, &text).await? == Flow::Logout {
                    return Ok(());
                }
            }
        }
    }
}

/// Username prompt loop plus the optional admin challenge.
/// Returns false when the client should be dropped.
async fn login<R>(server: &ChatServer, session: &Session, lines: &mut LineReader<R>) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    loop {
        session.send_raw(USERNAME_PROMPT).await?;
        let name = match lines.next_line().await? {
            None => return Ok(false),
            Some(Line::TooLong) => {
                session.send_line("Username is too long.").await?;
                continue;
            }
            Some(Line::Text(name)) => name,
        };

        match server.submit_name(session, name.trim()) {
            Ok(LoginStep::Admitted) => return Ok(true),
            Ok(LoginStep::PasswordRequired) => break,
            Err(e) if matches!(e.kind(), ErrorKind::ConnectionLost | ErrorKind::Fatal) => {
                return Err(e)
            }
            Err(e) => session.send_line(&e.to_string()).await?,
        }
    }

    session.send_raw(PASSWORD_PROMPT).await?;
    let password = match lines.next_line().await? {
        None => return Ok(false),
        Some(Line::TooLong) => String::new(),
        Some(Line::Text(password)) => password,
    };
    if server.submit_password(session, &password).await? {
        return Ok(true);
    }
    session.send_line("Incorrect password.").await?;
    Ok(false)
}

/// Accept connections forever, one task per client
pub async fn serve(listener: TcpListener, server: Arc<ChatServer>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        debug!("Accepted connection from {}", addr);

        let server = server.clone();
        tokio::spawn(async move {
            handle_client(server, stream, addr).await;
        });
    }
}

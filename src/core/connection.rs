//! Client connection output handling
//! Serializes every write to one peer behind a single exclusive lock

use log::warn;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::Result;

/// Write half of a client stream, type-erased so tests can use in-memory pipes
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Represents the output side of a single client connection
pub struct Connection {
    pub addr: SocketAddr,
    pub connected_at: Instant,
    writer: Mutex<BoxedWriter>,
}

impl Connection {
    pub fn new(writer: BoxedWriter, addr: SocketAddr) -> Self {
        Self {
            addr,
            connected_at: Instant::now(),
            writer: Mutex::new(writer),
        }
    }

    /// Write text without a line terminator (used for prompts)
    pub async fn send_raw(&self, text: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Write one newline-terminated line while holding the output lock
    pub async fn send_line(&self, text: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send a line, logging instead of propagating failures.
    /// The recipient's own worker notices the broken stream on its next read.
    pub async fn send_line_lossy(&self, text: &str) -> bool {
        match self.send_line(text).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send message to client {}: {}", self.addr, e);
                false
            }
        }
    }

    /// Flush and shut down the write half, signalling end-of-stream to the peer
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            warn!("Failed to shut down connection to {}: {}", self.addr, e);
        }
    }

    /// Calculate the connection duration
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_line_appends_newline() {
        let (server, client) = tokio::io::duplex(1024);
        let connection = Connection::new(Box::new(server), test_addr());

        connection.send_line("hello").await.unwrap();
        connection.send_line("world").await.unwrap();

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("world"));
    }

    #[tokio::test]
    async fn test_concurrent_writers_never_interleave() {
        let (server, client) = tokio::io::duplex(64 * 1024);
        let connection = std::sync::Arc::new(Connection::new(Box::new(server), test_addr()));

        let mut handles = vec![];
        for i in 0..20 {
            let conn = connection.clone();
            handles.push(tokio::spawn(async move {
                let line = format!("writer{}-{}", i, "x".repeat(200));
                conn.send_line(&line).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        connection.close().await;

        let mut lines = BufReader::new(client).lines();
        let mut count = 0;
        while let Some(line) = lines.next_line().await.unwrap() {
            assert!(line.starts_with("writer"));
            assert!(line.ends_with(&"x".repeat(200)));
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[tokio::test]
    async fn test_send_after_peer_drop_fails() {
        let (server, client) = tokio::io::duplex(64);
        let connection = Connection::new(Box::new(server), test_addr());
        drop(client);

        assert!(connection.send_line("anyone there?").await.is_err());
        assert!(!connection.send_line_lossy("still nobody").await);
    }
}

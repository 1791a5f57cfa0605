#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::time::timeout;

use rusty_chat::config::ServerConfig;
use rusty_chat::constants::{PASSWORD_PROMPT, USERNAME_PROMPT};
use rusty_chat::core::server::{ChatServer, SharedServer};
use rusty_chat::handlers::handle_client;

pub const WAIT: Duration = Duration::from_secs(5);
pub const ADMIN_PASSWORD: &str = "chatadmin";

pub fn test_config() -> ServerConfig {
    ServerConfig {
        max_sessions: 8,
        max_rooms: 5,
        history_size: 5,
        ..ServerConfig::default()
    }
}

pub fn test_server() -> SharedServer {
    ChatServer::shared(test_config())
}

pub fn addr(last: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last], 40000 + last as u16))
}

/// Client end of an in-memory connection driven by `handle_client`
pub struct TestClient {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl TestClient {
    pub fn connect(server: &SharedServer, peer: SocketAddr) -> Self {
        let (client, server_end) = tokio::io::duplex(64 * 1024);
        tokio::spawn(handle_client(server.clone(), server_end, peer));
        let (reader, writer) = tokio::io::split(client);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Connect and log in as a regular user, consuming the greeting
    pub async fn login(server: &SharedServer, peer: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(server, peer);
        client.expect_prompt(USERNAME_PROMPT).await;
        client.send(name).await;
        client.expect_line_starting("Welcome to the chat server").await;
        client
            .expect_eventually(&format!("{} joined the chat room lobby.", name))
            .await;
        client
    }

    /// Connect and pass the administrator challenge
    pub async fn login_admin(server: &SharedServer, peer: SocketAddr) -> Self {
        let mut client = Self::connect(server, peer);
        client.expect_prompt(USERNAME_PROMPT).await;
        client.send("admin").await;
        client.expect_prompt(PASSWORD_PROMPT).await;
        client.send(ADMIN_PASSWORD).await;
        client.expect_line_starting("Welcome to the chat server").await;
        client
            .expect_line("You are logged in as an administrator.")
            .await;
        client
            .expect_eventually("admin joined the chat room lobby.")
            .await;
        client
    }

    pub async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Read an unterminated prompt
    pub async fn expect_prompt(&mut self, prompt: &str) {
        let mut buf = vec![0u8; prompt.len()];
        timeout(WAIT, self.reader.read_exact(&mut buf))
            .await
            .expect("timed out waiting for prompt")
            .expect("stream closed before prompt");
        assert_eq!(String::from_utf8_lossy(&buf), prompt);
    }

    /// Next line, or `None` once the server has closed the stream
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .ok()?;
        if read == 0 {
            return None;
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }

    pub async fn next_line(&mut self) -> String {
        self.read_line().await.expect("stream closed")
    }

    pub async fn expect_line(&mut self, expected: &str) {
        assert_eq!(self.next_line().await, expected);
    }

    pub async fn expect_line_starting(&mut self, prefix: &str) -> String {
        let line = self.next_line().await;
        assert!(line.starts_with(prefix), "expected {:?}, got {:?}", prefix, line);
        line
    }

    /// Skip lines until `expected` arrives; returns the skipped lines
    pub async fn expect_eventually(&mut self, expected: &str) -> Vec<String> {
        let mut skipped = Vec::new();
        loop {
            let line = self.read_line().await;
            match line {
                Some(line) if line == expected => return skipped,
                Some(line) => skipped.push(line),
                None => panic!("stream closed waiting for {:?}, saw {:?}", expected, skipped),
            }
        }
    }

    /// Skip lines until one satisfies `pred`
    pub async fn find_line<F>(&mut self, pred: F) -> String
    where
        F: Fn(&str) -> bool,
    {
        loop {
            match self.read_line().await {
                Some(line) if pred(&line) => return line,
                Some(_) => continue,
                None => panic!("stream closed before a matching line"),
            }
        }
    }

    /// Drain until the server closes the stream
    pub async fn expect_closed(&mut self) -> Vec<String> {
        let mut rest = Vec::new();
        while let Some(line) = self.read_line().await {
            rest.push(line);
        }
        rest
    }

    /// Round-trip a command so everything this client sent earlier
    /// has been fully processed by the server
    pub async fn sync(&mut self) {
        self.send("/whereami").await;
        self.find_line(|line| line.starts_with("You are in chat room "))
            .await;
    }
}

/// Wait until the registry has released down to `expected` used slots
pub async fn wait_for_slots(server: &SharedServer, expected: usize) {
    timeout(WAIT, async {
        while server.sessions().used_slots().unwrap() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("slots were not released");
}

//! Connection to the manager process.
//!
//! One connection is opened and authenticated per incoming HTTP request,
//! used strictly sequentially for that request's command pipeline, then
//! closed. Commands on a connection are answered in the order sent; callers
//! issue send→read pairs back-to-back and never interleave, because the
//! wire format frames nothing beyond "one document per command".
//!
//! There are no timeouts, retries or cancellation at this layer. Socket and
//! TLS configuration belong to the process that constructs the
//! [`ManagerConfig`].

use crate::command::Command;
use crate::entity::{self, Entity};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

/// Where the manager process listens.
///
/// Constructed once at startup from the daemon's configuration and passed
/// into every request; the engine holds no process-wide mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManagerConfig {
    /// Local unix socket.
    Unix { path: PathBuf },
    /// TCP address; TLS wrapping, when used, is applied by the caller.
    Tcp { host: String, port: u16 },
}

/// Stream type the engine can drive; lets tests substitute an in-memory
/// duplex pipe for a real socket.
pub trait ManagerStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ManagerStream for T {}

impl ManagerConfig {
    /// Open a connection for one request.
    pub async fn connect(&self) -> EngineResult<ManagerConnection<Box<dyn ManagerStream>>> {
        let stream: Box<dyn ManagerStream> = match self {
            ManagerConfig::Unix { path } => {
                let stream = UnixStream::connect(path).await.map_err(|e| {
                    log::warn!("manager connect failed on {:?}: {}", path, e);
                    EngineError::send_failed("opening the manager connection")
                })?;
                Box::new(stream)
            }
            ManagerConfig::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| {
                        log::warn!("manager connect failed on {}:{}: {}", host, port, e);
                        EngineError::send_failed("opening the manager connection")
                    })?;
                Box::new(stream)
            }
        };
        Ok(ManagerConnection::new(stream))
    }
}

/// An open, authenticated channel to the manager.
///
/// Exclusively owned by the request handling the page; never shared across
/// requests or tasks.
pub struct ManagerConnection<S> {
    stream: S,
    /// Bytes read past the end of the previous document.
    pending: Vec<u8>,
}

impl<S: ManagerStream> ManagerConnection<S> {
    /// Wrap an already connected, already authenticated stream.
    pub fn new(stream: S) -> Self {
        ManagerConnection {
            stream,
            pending: Vec::new(),
        }
    }

    /// Write one command. After a failure here the caller cannot know
    /// whether the manager executed the command.
    pub async fn send(&mut self, command: &Command, phase: &str) -> EngineResult<()> {
        log::debug!("sending {} while {}", command.name(), phase);
        self.stream
            .write_all(command.as_bytes())
            .await
            .map_err(|e| {
                log::warn!("send of {} failed: {}", command.name(), e);
                EngineError::send_failed(phase)
            })?;
        self.stream.flush().await.map_err(|e| {
            log::warn!("flush of {} failed: {}", command.name(), e);
            EngineError::send_failed(phase)
        })
    }

    /// Read one response and parse it into an entity tree.
    pub async fn read_entity(&mut self, phase: &str) -> EngineResult<Entity> {
        let document = self.read_document(phase).await?;
        Ok(Entity::parse(&document)?)
    }

    /// Read one response, returning both the parsed tree and the raw bytes.
    pub async fn read_entity_and_text(&mut self, phase: &str) -> EngineResult<(Entity, Vec<u8>)> {
        let document = self.read_document(phase).await?;
        let entity = Entity::parse(&document)?;
        Ok((entity, document))
    }

    /// Read one response and append its raw bytes onto `out` verbatim,
    /// for callers that embed the response rather than re-serialize it.
    pub async fn read_raw_append(&mut self, out: &mut Vec<u8>, phase: &str) -> EngineResult<()> {
        let document = self.read_document(phase).await?;
        out.extend_from_slice(&document);
        Ok(())
    }

    /// Close the connection at end of request.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }

    /// Accumulate bytes until exactly one document is complete and return
    /// it; bytes beyond it stay buffered for the next read.
    async fn read_document(&mut self, phase: &str) -> EngineResult<Vec<u8>> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some(end) = entity::document_end(&self.pending)? {
                let rest = self.pending.split_off(end);
                let document = std::mem::replace(&mut self.pending, rest);
                return Ok(document);
            }
            let n = self.stream.read(&mut chunk).await.map_err(|e| {
                log::warn!("read failed while {}: {}", phase, e);
                EngineError::read_failed(phase)
            })?;
            if n == 0 {
                log::warn!("manager closed mid-response while {}", phase);
                return Err(EngineError::read_failed(phase));
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandBuilder;
    use tokio::io::duplex;

    #[tokio::test]
    async fn send_then_read_round_trip() {
        let (client, mut server) = duplex(64 * 1024);
        let mut conn = ManagerConnection::new(client);

        server
            .write_all(br#"<get_tasks_response status="200" status_text="OK"/>"#)
            .await
            .unwrap();

        let command = CommandBuilder::new("get_tasks").build();
        conn.send(&command, "getting tasks").await.unwrap();

        let mut echoed = vec![0u8; command.as_bytes().len()];
        server.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, command.as_bytes());

        let entity = conn.read_entity("getting tasks").await.unwrap();
        assert_eq!(entity.name(), "get_tasks_response");
        assert_eq!(entity.status(), Some("200"));
    }

    #[tokio::test]
    async fn frames_back_to_back_documents() {
        let (client, mut server) = duplex(64 * 1024);
        let mut conn = ManagerConnection::new(client);

        // Two responses arriving in a single burst must come back as two
        // separate reads.
        server
            .write_all(b"<first_response status=\"200\"/><second_response status=\"201\"/>")
            .await
            .unwrap();

        let first = conn.read_entity("reading first").await.unwrap();
        let second = conn.read_entity("reading second").await.unwrap();
        assert_eq!(first.name(), "first_response");
        assert_eq!(second.name(), "second_response");
    }

    #[tokio::test]
    async fn reassembles_split_responses() {
        let (client, mut server) = duplex(64 * 1024);
        let mut conn = ManagerConnection::new(client);

        let task = tokio::spawn(async move {
            server.write_all(b"<get_tasks_response status=\"2").await.unwrap();
            tokio::task::yield_now().await;
            server.write_all(b"00\"><task id=\"t1\"/></get_").await.unwrap();
            tokio::task::yield_now().await;
            server.write_all(b"tasks_response>").await.unwrap();
        });

        let entity = conn.read_entity("getting tasks").await.unwrap();
        assert_eq!(entity.child("task").unwrap().attribute("id"), Some("t1"));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn peer_close_mid_response_is_read_failed() {
        let (client, mut server) = duplex(64 * 1024);
        let mut conn = ManagerConnection::new(client);

        server.write_all(b"<get_tasks_response stat").await.unwrap();
        drop(server);

        let err = conn.read_entity("getting tasks").await.unwrap_err();
        assert!(matches!(err, EngineError::ReadFailed { .. }));
        assert_eq!(err.http_status(), 500);
    }

    #[tokio::test]
    async fn send_on_closed_pipe_is_send_failed() {
        let (client, server) = duplex(16);
        drop(server);
        let mut conn = ManagerConnection::new(client);

        let command = CommandBuilder::new("get_tasks").build();
        let err = conn.send(&command, "getting tasks").await.unwrap_err();
        assert!(matches!(err, EngineError::SendFailed { .. }));
    }

    #[tokio::test]
    async fn raw_append_preserves_response_verbatim() {
        let (client, mut server) = duplex(64 * 1024);
        let mut conn = ManagerConnection::new(client);

        let raw = br#"<get_reports_response status="200"><report>  spacing kept  </report></get_reports_response>"#;
        server.write_all(raw).await.unwrap();

        let mut out = b"<prefix/>".to_vec();
        conn.read_raw_append(&mut out, "getting reports")
            .await
            .unwrap();
        let mut expected = b"<prefix/>".to_vec();
        expected.extend_from_slice(raw);
        assert_eq!(out, expected);
    }
}

//! Shared test infrastructure: a scripted in-memory manager.

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use vmp_console::Entity;

/// A fake manager process on the far end of a duplex pipe.
///
/// Answers each complete command it receives with the next scripted
/// response, records every command verbatim, then closes the connection.
/// A script shorter than the command sequence therefore simulates the
/// manager going away mid-batch.
pub struct ScriptedManager {
    handle: JoinHandle<Vec<String>>,
}

impl ScriptedManager {
    pub fn spawn(mut stream: DuplexStream, responses: Vec<String>) -> Self {
        // Engine logs show up in test output under RUST_LOG.
        let _ = env_logger::builder().is_test(true).try_init();
        let handle = tokio::spawn(async move {
            let mut received = Vec::new();
            for response in responses {
                match read_command(&mut stream).await {
                    Some(command) => received.push(command),
                    None => break,
                }
                if stream.write_all(response.as_bytes()).await.is_err() {
                    break;
                }
            }
            received
        });
        ScriptedManager { handle }
    }

    /// Wait for the manager to finish and return the commands it saw.
    pub async fn finish(self) -> Vec<String> {
        self.handle.await.expect("scripted manager panicked")
    }
}

/// Accumulate bytes until they form one complete command document.
async fn read_command(stream: &mut DuplexStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if !buf.is_empty() && Entity::parse(&buf).is_ok() {
            return Some(String::from_utf8(buf).expect("command was not UTF-8"));
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// A minimal successful response for the named command.
pub fn ok_response(command: &str) -> String {
    format!(r#"<{command}_response status="200" status_text="OK"/>"#)
}

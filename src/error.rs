//! Error types for the console engine.
//!
//! Every layer of the engine threads a single tagged result type through to
//! the page layer, replacing the per-call-site cascade of status-code
//! switches the reference console grew over time. [`EngineError::http_status`]
//! is the one place where failures map to HTTP status codes.

use crate::entity::Entity;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Main error type threaded through every engine layer.
///
/// The two transport variants must stay distinct: after a failed send the
/// caller cannot know whether the manager executed the command, and after a
/// failed read it cannot know whether the command completed. Neither is
/// retryable at this layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Writing a command to the manager failed (e.g. broken pipe).
    #[error("failed to send command to manager while {phase}")]
    SendFailed { phase: String },

    /// The manager closed or the socket errored before a well-formed
    /// response arrived.
    #[error("failed to read manager response while {phase}")]
    ReadFailed { phase: String },

    /// The response arrived but was not well-formed wire XML.
    #[error("malformed manager response: {0}")]
    Parse(#[from] ParseError),

    /// A well-formed response carried a non-success status.
    #[error("manager refused command: {status} {status_text}")]
    Protocol { status: String, status_text: String },

    /// A required or ill-formed request parameter.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A caller/logic error the UI should never be able to produce, such
    /// as a fetch-one request without a resource id.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors from parsing wire XML into an [`Entity`] tree.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Input ended before the document's root element closed.
    #[error("unexpected end of response")]
    UnexpectedEof,

    /// A closing tag did not match the element being closed.
    #[error("mismatched element nesting near byte {position}")]
    Mismatched { position: u64 },

    /// The response contained no element at all.
    #[error("response contains no root element")]
    NoRootElement,

    /// Bytes that are not valid UTF-8 or not valid XML syntax.
    #[error("invalid wire syntax: {0}")]
    Syntax(String),
}

impl EngineError {
    /// Convenience constructor for send failures, naming the phase.
    pub fn send_failed(phase: impl Into<String>) -> Self {
        EngineError::SendFailed {
            phase: phase.into(),
        }
    }

    /// Convenience constructor for read failures, naming the phase.
    pub fn read_failed(phase: impl Into<String>) -> Self {
        EngineError::ReadFailed {
            phase: phase.into(),
        }
    }

    /// Map this error to the HTTP status code the page layer should emit.
    ///
    /// This is a pure function of the error value:
    ///
    /// * transport, parse and internal errors → 500
    /// * protocol refusals → 403 for permission denials, 404 when the
    ///   manager says 404, 500 for an empty status, otherwise 400
    /// * parameter validation → 400
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::SendFailed { .. }
            | EngineError::ReadFailed { .. }
            | EngineError::Parse(_)
            | EngineError::Internal(_) => 500,
            EngineError::Protocol {
                status,
                status_text,
            } => {
                if status.is_empty() {
                    500
                } else if status_text.starts_with("Permission denied") {
                    403
                } else if status == "404" {
                    404
                } else {
                    400
                }
            }
            EngineError::Validation(_) => 400,
        }
    }
}

/// True exactly when a protocol status string denotes success.
///
/// The wire contract defines success as a status whose first character is
/// `'2'`. An empty status is an error, never success.
pub fn status_is_success(status: &str) -> bool {
    status.as_bytes().first() == Some(&b'2')
}

/// Check a top-level response entity's status and turn a refusal into a
/// [`EngineError::Protocol`].
///
/// A missing or empty `status` attribute is treated as a failure. When the
/// response carries a `status_details` child, its text is appended to the
/// diagnostic so the page layer can show the manager's full explanation.
pub fn check_response(entity: &Entity, phase: &str) -> EngineResult<()> {
    let status = entity.attribute("status").unwrap_or("");
    if status_is_success(status) {
        return Ok(());
    }
    let mut status_text = entity.attribute("status_text").unwrap_or("").to_string();
    if let Some(details) = entity.child("status_details") {
        let details = details.text();
        if !details.is_empty() {
            if !status_text.is_empty() {
                status_text.push_str(": ");
            }
            status_text.push_str(details);
        }
    }
    log::debug!(
        "manager refused command while {}: status={:?} text={:?}",
        phase,
        status,
        status_text
    );
    Err(EngineError::Protocol {
        status: status.to_string(),
        status_text,
    })
}

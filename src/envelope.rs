//! The enveloped document handed to the page-rendering layer.
//!
//! Every page — success or failure — receives one envelope-shaped XML
//! document: session and UI metadata, the validated request parameters
//! echoed back for form re-rendering, the caller's capability list, and the
//! payload fragment(s) the query engine produced. Failure paths go through
//! [`error_envelope`], so the page layer never sees a bare transport error.
//!
//! Download-style operations bypass the envelope: the payload bytes travel
//! raw and [`ResponseMetadata`] carries the out-of-band HTTP fields.

use crate::error::EngineError;
use crate::params::{Param, Params};
use crate::session::Credentials;
use chrono::Utc;
use quick_xml::escape::escape;
use std::time::Instant;

/// Version string of the wire protocol this engine speaks.
pub const PROTOCOL_VERSION: &str = "9.0";

/// Version string of this software, for the envelope header.
pub const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parameter names never echoed into an envelope: file-upload fields whose
/// payloads must not be re-embedded.
const ECHO_EXCLUDED: [&str; 2] = ["xml_file", "installer"];

/// Out-of-band response fields for download-style operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub http_status: u16,
    pub content_type: String,
    /// Filename for the content-disposition header, when the response is
    /// an attachment.
    pub content_disposition_filename: Option<String>,
    pub content_length: usize,
}

impl ResponseMetadata {
    /// Metadata for a successful download.
    pub fn for_download(content_type: &str, filename: &str, content_length: usize) -> Self {
        ResponseMetadata {
            http_status: 200,
            content_type: content_type.to_string(),
            content_disposition_filename: Some(filename.to_string()),
            content_length,
        }
    }
}

/// Rebuild the current page URL from the original query string, with any
/// `cmd=` pair stripped and the given command substituted.
pub fn caller_url(query_string: &str, cmd: &str) -> String {
    let query = query_string.strip_prefix('?').unwrap_or(query_string);
    let mut url = format!("?cmd={cmd}");
    for pair in query.split('&') {
        if pair.is_empty() || pair.starts_with("cmd=") || pair == "cmd" {
            continue;
        }
        url.push('&');
        url.push_str(pair);
    }
    url
}

/// Builds the envelope for one request.
///
/// The start instant is captured when the request handler begins, so the
/// envelope's elapsed-time field covers the whole backend conversation.
pub struct EnvelopeBuilder<'a> {
    credentials: &'a Credentials,
    params: Option<&'a Params>,
    caller: String,
    start: Instant,
}

impl<'a> EnvelopeBuilder<'a> {
    pub fn new(credentials: &'a Credentials, start: Instant) -> Self {
        EnvelopeBuilder {
            credentials,
            params: None,
            caller: String::new(),
            start,
        }
    }

    /// Echo the request's validated parameters back to the page.
    pub fn with_params(mut self, params: &'a Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Set the page URL, reconstructed from the original query string.
    pub fn with_caller(mut self, query_string: &str, cmd: &str) -> Self {
        self.caller = caller_url(query_string, cmd);
        self
    }

    /// Assemble the envelope around a payload fragment.
    pub fn build(&self, payload: &str) -> String {
        let creds = self.credentials;
        let mut doc = String::with_capacity(payload.len() + 1024);
        doc.push_str("<envelope>");
        element(&mut doc, "version", PROTOCOL_VERSION);
        element(&mut doc, "software_version", SOFTWARE_VERSION);
        element(&mut doc, "token", &creds.token);
        element(&mut doc, "caller", &self.caller);
        element(&mut doc, "time", &Utc::now().to_rfc3339());
        element(&mut doc, "timezone", &creds.timezone);
        element(&mut doc, "login", &creds.username);
        element(&mut doc, "role", &creds.role);
        element(&mut doc, "severity", &creds.severity_class);
        element(&mut doc, "i18n", &creds.language);
        element(&mut doc, "guest", if creds.guest { "1" } else { "0" });
        element(&mut doc, "client_address", &creds.client_address);
        element(
            &mut doc,
            "backend_operation",
            &format!("{:.2}", self.start.elapsed().as_secs_f64()),
        );
        if let Some(warning) = &creds.password_warning {
            element(&mut doc, "password_warning", warning);
        }
        doc.push_str("<params>");
        if let Some(params) = self.params {
            echo_params(&mut doc, params, "");
        }
        doc.push_str("</params>");
        doc.push_str("<capabilities>");
        for capability in creds.capabilities.iter() {
            element(&mut doc, "capability", capability);
        }
        doc.push_str("</capabilities>");
        doc.push_str(payload);
        doc.push_str("</envelope>");
        doc
    }
}

/// Render a failure as an envelope-shaped error document plus the HTTP
/// status the page layer should send.
///
/// The document names the failure in a fixed format; transport faults and
/// internal errors deliberately carry no more detail than their phase.
pub fn error_envelope(
    credentials: &Credentials,
    params: Option<&Params>,
    start: Instant,
    error: &EngineError,
) -> (String, u16) {
    let status = error.http_status();
    let title = match status {
        403 => "Permission denied",
        404 => "Resource missing",
        400 => "Invalid request",
        _ => "Internal error",
    };
    let mut payload = String::new();
    payload.push_str("<error_page>");
    element(&mut payload, "title", title);
    element(&mut payload, "status", &status.to_string());
    element(&mut payload, "message", &error.to_string());
    payload.push_str("</error_page>");

    let mut builder = EnvelopeBuilder::new(credentials, start);
    if let Some(params) = params {
        builder = builder.with_params(params);
    }
    (builder.build(&payload), status)
}

fn element(doc: &mut String, name: &str, text: &str) {
    doc.push('<');
    doc.push_str(name);
    doc.push('>');
    doc.push_str(&escape(text));
    doc.push_str("</");
    doc.push_str(name);
    doc.push('>');
}

/// Echo validated parameters; group members flatten to
/// `group:index:name` synthetic names. Rejected values and the upload
/// fields never appear.
fn echo_params(doc: &mut String, params: &Params, prefix: &str) {
    for (index, (name, param)) in params.iter().enumerate() {
        if ECHO_EXCLUDED.contains(&name) {
            continue;
        }
        let full_name = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}{index}:{name}")
        };
        match param {
            Param::Scalar(value) => {
                doc.push_str("<param name=\"");
                doc.push_str(&escape(&full_name));
                doc.push_str("\">");
                doc.push_str(&escape(value.as_str()));
                doc.push_str("</param>");
            }
            Param::Rejected(_) => {}
            Param::Group(members) => echo_params(doc, members, &full_name),
        }
    }
}

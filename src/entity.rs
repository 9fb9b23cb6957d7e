//! Parsed wire-protocol responses.
//!
//! Every manager response is one XML document. [`Entity::parse`] turns its
//! bytes into a navigable tree of names, attributes, ordered children and
//! text. Parsing is a pure function with no I/O: malformed input yields a
//! [`ParseError`], never a panic. Entities are read-only after parse and
//! owned by the caller that requested the read; nothing in the engine
//! caches them.

use crate::error::ParseError;
use quick_xml::Reader;
use quick_xml::events::Event;

/// One node of a parsed protocol response.
///
/// Child names are not required to be unique: [`Entity::child`] returns the
/// first match, callers that need every child of a name iterate with
/// [`Entity::children`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Entity>,
    text: String,
}

impl Entity {
    /// Parse one response document into an entity tree.
    ///
    /// Content before the root element (XML declaration, whitespace,
    /// comments) is skipped; content after the root element's close is
    /// ignored. A document with no root element at all is an error.
    pub fn parse(bytes: &[u8]) -> Result<Entity, ParseError> {
        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();
        // Entities still waiting for their end tag, root first.
        let mut stack: Vec<Entity> = Vec::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| convert_error(e, reader.buffer_position()))?;
            match event {
                Event::Start(start) => {
                    stack.push(entity_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let entity = entity_from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(entity),
                        None => return Ok(entity),
                    }
                }
                Event::End(_) => {
                    let entity = stack.pop().ok_or(ParseError::NoRootElement)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(entity),
                        None => return Ok(entity),
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        let decoded = text
                            .decode()
                            .map_err(|e| ParseError::Syntax(e.to_string()))?;
                        current.text.push_str(&decoded);
                    }
                }
                Event::CData(cdata) => {
                    if let Some(current) = stack.last_mut() {
                        let raw = std::str::from_utf8(cdata.as_ref())
                            .map_err(|e| ParseError::Syntax(e.to_string()))?;
                        current.text.push_str(raw);
                    }
                }
                // References come as their own events; fold them back into
                // the text content.
                Event::GeneralRef(reference) => {
                    if let Some(current) = stack.last_mut() {
                        let name = std::str::from_utf8(reference.as_ref())
                            .map_err(|e| ParseError::Syntax(e.to_string()))?;
                        current.text.push(resolve_reference(name)?);
                    }
                }
                Event::Eof => {
                    return Err(if stack.is_empty() {
                        ParseError::NoRootElement
                    } else {
                        ParseError::UnexpectedEof
                    });
                }
                // Declarations, comments, processing instructions and
                // doctypes never appear inside manager responses; skip them
                // if they do.
                _ => {}
            }
            buf.clear();
        }
    }

    /// The element name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute value by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&Entity> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Every child with the given name, in document order.
    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Entity> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// All children in document order.
    pub fn all_children(&self) -> &[Entity] {
        &self.children
    }

    /// Concatenated text content; empty, never absent.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The `status` attribute of a top-level response, if present.
    pub fn status(&self) -> Option<&str> {
        self.attribute("status")
    }

    /// The `status_text` attribute of a top-level response, if present.
    pub fn status_text(&self) -> Option<&str> {
        self.attribute("status_text")
    }
}

fn entity_from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<Entity, ParseError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| ParseError::Syntax(e.to_string()))?
        .to_string();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ParseError::Syntax(e.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| ParseError::Syntax(e.to_string()))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| ParseError::Syntax(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Entity {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

/// Resolve a predefined or numeric character reference.
fn resolve_reference(name: &str) -> Result<char, ParseError> {
    match name {
        "lt" => Ok('<'),
        "gt" => Ok('>'),
        "amp" => Ok('&'),
        "apos" => Ok('\''),
        "quot" => Ok('"'),
        _ => {
            let code = name
                .strip_prefix('#')
                .and_then(|num| match num.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => num.parse().ok(),
                })
                .and_then(char::from_u32);
            code.ok_or_else(|| ParseError::Syntax(format!("unresolvable reference &{name};")))
        }
    }
}

fn convert_error(error: quick_xml::Error, position: u64) -> ParseError {
    match error {
        quick_xml::Error::IllFormed(_) => ParseError::Mismatched { position },
        other => ParseError::Syntax(other.to_string()),
    }
}

/// Find where the first complete document in `bytes` ends.
///
/// Used by the transport to frame responses: the protocol sends exactly one
/// document per command with no other delimiter. Returns `Ok(Some(end))`
/// with the byte offset just past the root element's close, `Ok(None)` when
/// more bytes are needed, and an error when the buffer can never become a
/// well-formed document.
pub(crate) fn document_end(bytes: &[u8]) -> Result<Option<usize>, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    return Ok(Some(reader.buffer_position() as usize));
                }
            }
            Ok(Event::End(_)) => {
                if depth == 0 {
                    return Err(ParseError::Mismatched {
                        position: reader.buffer_position(),
                    });
                }
                depth -= 1;
                if depth == 0 {
                    return Ok(Some(reader.buffer_position() as usize));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Ok(_) => {}
            Err(quick_xml::Error::IllFormed(_)) => {
                return Err(ParseError::Mismatched {
                    position: reader.buffer_position(),
                });
            }
            // An unclosed construct at the tail of the buffer means a
            // truncated read; wait for more bytes. Any other error cannot
            // be cured by more input.
            Err(quick_xml::Error::Syntax(e)) if truncation_syntax(&e) => return Ok(None),
            Err(e) => return Err(ParseError::Syntax(e.to_string())),
        }
        buf.clear();
    }
}

/// Syntax errors that an incomplete read produces; a later read can still
/// complete the construct.
fn truncation_syntax(error: &quick_xml::errors::SyntaxError) -> bool {
    use quick_xml::errors::SyntaxError;
    matches!(
        error,
        SyntaxError::UnclosedCData
            | SyntaxError::UnclosedComment
            | SyntaxError::UnclosedDoctype
            | SyntaxError::UnclosedPIOrXmlDecl
            | SyntaxError::UnclosedTag
    )
}

//! Wire-protocol command construction.
//!
//! A [`Command`] is the immutable, fully escaped string the transport
//! writes to the manager. The only way to put caller-supplied data into one
//! is through [`CommandBuilder`], whose insertion methods escape every
//! value for the wire format; an unescaped value reaching the transport is
//! unrepresentable. [`Command::raw`] exists for protocol literals that
//! contain no interpolated data at all.

use quick_xml::escape::escape;

/// A fully escaped protocol command, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    wire: String,
}

impl Command {
    /// Wrap a protocol literal with no interpolated data.
    pub fn raw(name: &str, literal: impl Into<String>) -> Self {
        Command {
            name: name.to_string(),
            wire: literal.into(),
        }
    }

    /// The command's element name, used for logging and phase diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The escaped wire form.
    pub fn as_str(&self) -> &str {
        &self.wire
    }

    /// The escaped wire form as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.wire.as_bytes()
    }
}

/// Builder producing escaped [`Command`]s.
///
/// Element and attribute *names* are protocol literals chosen by the
/// engine; *values* and text are caller data and are escaped on insertion.
#[derive(Debug)]
pub struct CommandBuilder {
    name: String,
    attributes: String,
    body: String,
}

impl CommandBuilder {
    /// Start a command with the given element name.
    pub fn new(name: &str) -> Self {
        CommandBuilder {
            name: name.to_string(),
            attributes: String::new(),
            body: String::new(),
        }
    }

    /// Add an attribute; the value is escaped.
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.push(' ');
        self.attributes.push_str(name);
        self.attributes.push_str("=\"");
        self.attributes.push_str(&escape(value));
        self.attributes.push('"');
        self
    }

    /// Add an attribute only when a value is present.
    pub fn attr_opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.attr(name, value),
            None => self,
        }
    }

    /// Append escaped text content.
    pub fn text(mut self, value: &str) -> Self {
        self.body.push_str(&escape(value));
        self
    }

    /// Append a child element whose text content is escaped.
    pub fn element(mut self, name: &str, text: &str) -> Self {
        self.body.push('<');
        self.body.push_str(name);
        self.body.push('>');
        self.body.push_str(&escape(text));
        self.body.push_str("</");
        self.body.push_str(name);
        self.body.push('>');
        self
    }

    /// Append a fully built child command as a nested element.
    pub fn child(mut self, child: CommandBuilder) -> Self {
        self.body.push_str(child.build().as_str());
        self
    }

    /// Finish the command. Childless, text-less commands serialize as a
    /// self-closing element.
    pub fn build(self) -> Command {
        let wire = if self.body.is_empty() {
            format!("<{}{}/>", self.name, self.attributes)
        } else {
            format!(
                "<{name}{attrs}>{body}</{name}>",
                name = self.name,
                attrs = self.attributes,
                body = self.body
            )
        };
        Command {
            name: self.name,
            wire,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use proptest::prelude::*;

    #[test]
    fn builds_self_closing_without_body() {
        let command = CommandBuilder::new("get_tasks")
            .attr("task_id", "t1")
            .attr("details", "1")
            .build();
        assert_eq!(command.as_str(), r#"<get_tasks task_id="t1" details="1"/>"#);
        assert_eq!(command.name(), "get_tasks");
    }

    #[test]
    fn escapes_attribute_values_and_text() {
        let command = CommandBuilder::new("create_note")
            .attr("nvt_oid", "1.3\"><evil/><x y=\"")
            .element("text", "a <b> & \"c\"")
            .build();
        assert_eq!(
            command.as_str(),
            "<create_note nvt_oid=\"1.3&quot;&gt;&lt;evil/&gt;&lt;x y=&quot;\">\
             <text>a &lt;b&gt; &amp; &quot;c&quot;</text></create_note>"
        );
    }

    #[test]
    fn raw_passes_protocol_literals_through() {
        let command = Command::raw("help", r#"<help format="xml" type="brief"/>"#);
        assert_eq!(command.name(), "help");
        assert_eq!(command.as_str(), r#"<help format="xml" type="brief"/>"#);
        assert_eq!(command.as_bytes(), command.as_str().as_bytes());
    }

    #[test]
    fn attr_opt_skips_absent_values() {
        let command = CommandBuilder::new("get_settings")
            .attr_opt("setting_id", None)
            .attr_opt("filter", Some("name"))
            .build();
        assert_eq!(command.as_str(), r#"<get_settings filter="name"/>"#);
    }

    #[test]
    fn nested_children_stay_escaped() {
        let command = CommandBuilder::new("create_target")
            .child(CommandBuilder::new("name").text("LAN <dmz>"))
            .child(CommandBuilder::new("hosts").text("10.0.0.0/24"))
            .build();
        assert_eq!(
            command.as_str(),
            "<create_target><name>LAN &lt;dmz&gt;</name>\
             <hosts>10.0.0.0/24</hosts></create_target>"
        );
    }

    proptest! {
        // Any value inserted through the builder parses back out of the
        // matching entity attribute and text unchanged.
        #[test]
        fn escaping_round_trips(value in "\\PC*") {
            let command = CommandBuilder::new("wrapper")
                .attr("value", &value)
                .element("echo", &value)
                .build();
            let entity = Entity::parse(command.as_bytes()).unwrap();
            prop_assert_eq!(entity.attribute("value").unwrap(), value.as_str());
            prop_assert_eq!(entity.child("echo").unwrap().text(), value.as_str());
        }
    }
}

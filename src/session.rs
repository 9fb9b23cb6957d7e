//! Per-session request context.
//!
//! [`Credentials`] carries everything the engine needs to know about the
//! authenticated user: identity, UI state passed through to the envelope,
//! the set of protocol commands the user may invoke, and the per-user
//! filter memory.
//!
//! The filter memory is mutated only by list fetches of the session's own
//! request; the reference behavior never expected concurrent writers. If
//! sessions ever handle requests concurrently this state needs a lock per
//! session.

use crate::entity::Entity;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// The protocol commands an authenticated user is permitted to invoke.
///
/// Consulted before every optional enrichment lookup: a missing capability
/// means the lookup is skipped silently, never an error.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    commands: BTreeSet<String>,
}

impl CapabilitySet {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CapabilitySet {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    /// Build from the manager's help response: every `command` entity's
    /// `name` child becomes one capability.
    pub fn from_help_response(response: &Entity) -> Self {
        let mut commands = BTreeSet::new();
        collect_commands(response, &mut commands);
        CapabilitySet { commands }
    }

    /// Whether the user may invoke the named command.
    pub fn may(&self, command: &str) -> bool {
        self.commands.contains(command)
    }

    /// Capability names in stable (sorted) order, for the envelope.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn collect_commands(entity: &Entity, commands: &mut BTreeSet<String>) {
    for child in entity.all_children() {
        if child.name() == "command" {
            if let Some(name) = child.child("name") {
                let name = name.text().trim();
                if !name.is_empty() {
                    commands.insert(name.to_lowercase());
                }
            }
        } else {
            collect_commands(child, commands);
        }
    }
}

/// Per-request/session state: who is asking, what they may do, and the UI
/// state echoed back in every envelope.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub role: String,
    /// Session token included in every envelope.
    pub token: String,
    pub timezone: String,
    pub language: String,
    /// The user's severity-class preference ("nist", "bsi", ...).
    pub severity_class: String,
    pub guest: bool,
    pub client_address: String,
    /// Warning text shown when the password is about to expire.
    pub password_warning: Option<String>,
    pub capabilities: CapabilitySet,
    /// Filter context key ("report_result", "task", ...) → last used
    /// stored-filter id.
    filter_memory: HashMap<String, String>,
}

impl Credentials {
    /// Create a session context with a generated token and neutral UI
    /// defaults.
    pub fn new(username: &str, role: &str, capabilities: CapabilitySet) -> Self {
        Credentials {
            username: username.to_string(),
            role: role.to_string(),
            token: Uuid::new_v4().to_string(),
            timezone: "UTC".to_string(),
            language: "en".to_string(),
            severity_class: "nist".to_string(),
            guest: false,
            client_address: String::new(),
            password_warning: None,
            capabilities,
            filter_memory: HashMap::new(),
        }
    }

    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.timezone = timezone.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_client_address(mut self, address: &str) -> Self {
        self.client_address = address.to_string();
        self
    }

    pub fn with_guest(mut self, guest: bool) -> Self {
        self.guest = guest;
        self
    }

    /// The stored-filter id last used for a filter context, if any.
    pub fn last_filter_id(&self, context: &str) -> Option<&str> {
        self.filter_memory.get(context).map(String::as_str)
    }

    /// Record the stored-filter id for a filter context.
    pub fn remember_filter_id(&mut self, context: &str, id: &str) {
        self.filter_memory
            .insert(context.to_string(), id.to_string());
    }
}

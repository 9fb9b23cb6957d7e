//! The generic resource query engine.
//!
//! Every per-resource page handler funnels into the two operations here:
//! [`QueryEngine::fetch_one`] for a single resource with its enrichments and
//! [`QueryEngine::fetch_many`] for a filtered, paginated list. Both pipeline
//! several commands over the request's one connection, embed the raw
//! responses verbatim, and abort the whole call on the first send or read
//! failure — there are no partial results. Enrichment sub-steps whose
//! protocol command the user may not invoke are skipped silently.

use crate::command::{Command, CommandBuilder};
use crate::entity::Entity;
use crate::error::{EngineError, EngineResult, check_response};
use crate::filter::{self, FilterControls, SortOrder};
use crate::params::Params;
use crate::session::Credentials;
use crate::transport::{ManagerConnection, ManagerStream};

/// Setting UUID for the user's rows-per-page preference.
pub const ROWS_PER_PAGE_SETTING: &str = "5f5a8712-8017-11e1-8556-406186ea4fc5";

/// Setting UUID for the user's severity-class preference.
pub const SEVERITY_CLASS_SETTING: &str = "f16bb236-a32d-4cd5-a880-e0fcf2599f59";

/// Row-count sentinel: all rows, no pagination.
pub const ROWS_ALL: i64 = -1;

/// Row-count sentinel: the user's page-size setting decides.
pub const ROWS_USER_SETTING: i64 = -2;

/// Resource types whose permissions are matched by subject as well as by
/// resource.
const SUBJECT_TYPES: [&str; 3] = ["user", "group", "role"];

/// Pluralize a resource type for its list command.
///
/// Simple `+s` suffixing, except the uncountable `info`.
pub fn pluralize(resource_type: &str) -> String {
    if resource_type == "info" {
        resource_type.to_string()
    } else {
        format!("{resource_type}s")
    }
}

/// The `id` attribute a create response carries for the new resource.
pub fn created_resource_id(response: &Entity) -> Option<&str> {
    response.attribute("id")
}

/// Options for [`QueryEngine::fetch_many`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchManyOptions<'a> {
    /// Filter-memory context key; the resource type when absent.
    pub filter_context: Option<&'a str>,
    /// Append tag names for the type (still gated on `get_tags`).
    pub include_tag_names: bool,
    /// Extra attributes for the primary get command.
    pub extra_attributes: &'a [(&'a str, &'a str)],
    /// A fragment the caller wants embedded right after the primary result.
    pub extra_xml: Option<&'a str>,
}

/// Executes resource queries over one request's connection.
///
/// Borrows the connection and credentials for the request's lifetime; all
/// commands run strictly sequentially as send→read pairs.
pub struct QueryEngine<'a, S> {
    conn: &'a mut ManagerConnection<S>,
    credentials: &'a mut Credentials,
}

impl<'a, S: ManagerStream> QueryEngine<'a, S> {
    pub fn new(conn: &'a mut ManagerConnection<S>, credentials: &'a mut Credentials) -> Self {
        QueryEngine { conn, credentials }
    }

    /// Send one command, read its response, and fail on a non-success
    /// status. The convenience the thin per-resource handlers build on.
    pub async fn run(&mut self, command: &Command, phase: &str) -> EngineResult<Entity> {
        self.conn.send(command, phase).await?;
        let entity = self.conn.read_entity(phase).await?;
        check_response(&entity, phase)?;
        Ok(entity)
    }

    /// Fetch one resource with details plus its enrichments, as one XML
    /// fragment.
    ///
    /// Requires the `<type>_id` parameter; its absence is an internal
    /// error, since the UI never constructs such a request. Fragments
    /// concatenate in fixed order: related pre-lookup (where one exists for
    /// the type), the resource itself, tag names, permissions on the
    /// resource.
    pub async fn fetch_one(
        &mut self,
        resource_type: &str,
        params: &Params,
        extra_attributes: &[(&str, &str)],
    ) -> EngineResult<String> {
        let id_param = format!("{resource_type}_id");
        let id = params.value(&id_param).ok_or_else(|| {
            EngineError::Internal(format!(
                "fetching a {resource_type} requires the {id_param} parameter"
            ))
        })?;
        let id = id.to_string();

        let mut fragment: Vec<u8> = Vec::new();

        // Related pre-lookup, e.g. the permissions a role grants.
        if let Some(related) = related_lookup(resource_type, &id) {
            if self.credentials.capabilities.may("get_permissions") {
                let phase = format!("getting permissions related to the {resource_type}");
                self.conn.send(&related, &phase).await?;
                self.conn.read_raw_append(&mut fragment, &phase).await?;
            }
        }

        let phase = format!("getting a {resource_type}");
        let mut builder = CommandBuilder::new(&format!("get_{}", pluralize(resource_type)))
            .attr(&id_param, &id)
            .attr("details", "1");
        for &(name, value) in extra_attributes {
            builder = builder.attr(name, value);
        }
        let command = builder.build();
        self.conn.send(&command, &phase).await?;
        let (entity, raw) = self.conn.read_entity_and_text(&phase).await?;
        check_response(&entity, &phase)?;
        fragment.extend_from_slice(&raw);

        if self.credentials.capabilities.may("get_tags") {
            let phase = "getting tag names";
            let command = CommandBuilder::new("get_tags")
                .attr("filter", &format!("resource_type={resource_type} rows=-1"))
                .attr("names_only", "1")
                .build();
            self.conn.send(&command, phase).await?;
            self.conn.read_raw_append(&mut fragment, phase).await?;
        }

        if self.credentials.capabilities.may("get_permissions") {
            let phase = "getting permissions on the resource";
            // Ownership aware: for subject-bearing types, permissions whose
            // subject is this resource belong on the page too.
            let term = if SUBJECT_TYPES.contains(&resource_type) {
                format!("resource_uuid={id} or subject_uuid={id} rows=-1")
            } else {
                format!("resource_uuid={id} rows=-1")
            };
            let command = CommandBuilder::new("get_permissions")
                .attr("filter", &term)
                .build();
            self.conn.send(&command, phase).await?;
            self.conn.read_raw_append(&mut fragment, phase).await?;
        }

        into_fragment(fragment)
    }

    /// Fetch a filtered, paginated list with its enrichments, as one XML
    /// fragment.
    ///
    /// Resolves the effective filter first, then appends in fixed order:
    /// the list itself, any caller-supplied extra fragment, the filters
    /// applicable to the type (gated on `get_filters`), the rows-per-page
    /// setting, and tag names when requested (gated on `get_tags`).
    pub async fn fetch_many(
        &mut self,
        resource_type: &str,
        params: &Params,
        options: FetchManyOptions<'_>,
    ) -> EngineResult<String> {
        let controls = FilterControls::from_params(params);
        let filter_context = options.filter_context.unwrap_or(resource_type);
        let resolved = filter::resolve(
            self.conn,
            self.credentials,
            resource_type,
            filter_context,
            &controls,
        )
        .await;

        // Explicit pagination parameters override the term; absent ones
        // fill in a default without touching directives the inline
        // expression already carries.
        let mut term = resolved.term;
        term = match params.value("first") {
            Some(value) => {
                let first: i64 = value.parse().map_err(|_| {
                    EngineError::Validation(format!("first={value} is not a number"))
                })?;
                filter::set_token(term, "first", &first.to_string())
            }
            None => filter::set_token_default(term, "first", "1"),
        };
        term = match params.value("rows") {
            Some(value) => {
                let rows: i64 = value.parse().map_err(|_| {
                    EngineError::Validation(format!("rows={value} is not a number"))
                })?;
                filter::set_token(term, "rows", &rows.to_string())
            }
            None => filter::set_token_default(term, "rows", &ROWS_USER_SETTING.to_string()),
        };
        if let Some(field) = &controls.sort_field {
            let order = controls.sort_order.unwrap_or(SortOrder::Ascending);
            term = filter::set_sort(term, field, order);
        }

        let plural = pluralize(resource_type);
        let phase = format!("getting the {resource_type} list");
        let mut builder = CommandBuilder::new(&format!("get_{plural}"))
            .attr("filt_id", &resolved.filt_id)
            .attr("filter", &term);
        for &(name, value) in options.extra_attributes {
            builder = builder.attr(name, value);
        }
        let command = builder.build();

        let mut fragment: Vec<u8> = Vec::new();
        self.conn.send(&command, &phase).await?;
        let (entity, raw) = self.conn.read_entity_and_text(&phase).await?;
        check_response(&entity, &phase)?;
        fragment.extend_from_slice(&raw);

        if let Some(extra) = options.extra_xml {
            fragment.extend_from_slice(extra.as_bytes());
        }

        if self.credentials.capabilities.may("get_filters") {
            let phase = format!("getting filters for the {resource_type} list");
            let command = CommandBuilder::new("get_filters")
                .attr("filter", &format!("type={resource_type} rows=-1"))
                .build();
            self.conn.send(&command, &phase).await?;
            self.conn.read_raw_append(&mut fragment, &phase).await?;
        }

        {
            let phase = "getting the rows-per-page setting";
            let command = CommandBuilder::new("get_settings")
                .attr("setting_id", ROWS_PER_PAGE_SETTING)
                .build();
            self.conn.send(&command, phase).await?;
            self.conn.read_raw_append(&mut fragment, phase).await?;
        }

        if options.include_tag_names && self.credentials.capabilities.may("get_tags") {
            let phase = "getting tag names";
            let command = CommandBuilder::new("get_tags")
                .attr("filter", &format!("resource_type={resource_type} rows=-1"))
                .attr("names_only", "1")
                .build();
            self.conn.send(&command, phase).await?;
            self.conn.read_raw_append(&mut fragment, phase).await?;
        }

        into_fragment(fragment)
    }
}

/// The related pre-lookup some types carry, issued before the primary get.
fn related_lookup(resource_type: &str, id: &str) -> Option<Command> {
    match resource_type {
        "role" => Some(
            CommandBuilder::new("get_permissions")
                .attr(
                    "filter",
                    &format!("subject_uuid={id} and subject_type=role rows=-1"),
                )
                .build(),
        ),
        _ => None,
    }
}

fn into_fragment(bytes: Vec<u8>) -> EngineResult<String> {
    String::from_utf8(bytes).map_err(|e| {
        EngineError::Parse(crate::error::ParseError::Syntax(e.to_string()))
    })
}

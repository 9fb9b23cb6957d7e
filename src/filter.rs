//! Filter resolution for list requests.
//!
//! Every list page resolves exactly one effective filter before its query
//! runs: a stored filter id, the caller's inline expression, or a
//! synthesized per-type default. [`resolve`] implements the priority order
//! and, as a side effect, maintains the per-user "last filter id" memory.
//!
//! Resolution is total and deterministic: for any combination of inputs
//! exactly one branch applies, and the same inputs against unchanged
//! backend state resolve the same way.

use crate::command::CommandBuilder;
use crate::error::status_is_success;
use crate::params::Params;
use crate::session::Credentials;
use crate::transport::{ManagerConnection, ManagerStream};

/// Reserved filter id: use no stored filter, the inline expression wins.
pub const FILT_ID_NONE: &str = "0";

/// Reserved filter id: use the user's configured default filter for this
/// resource type.
pub const FILT_ID_USER_SETTING: &str = "-2";

/// The outcome of filter resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFilter {
    /// Stored filter id, or one of the two reserved sentinels.
    pub filt_id: String,
    /// Inline filter expression; may be empty when a stored filter or the
    /// user default applies.
    pub term: String,
}

/// Sort direction override from the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Raw filter inputs plus the discrete advanced-search controls.
#[derive(Debug, Clone, Default)]
pub struct FilterControls {
    /// The `filt_id` parameter exactly as supplied; `None` when absent.
    pub filt_id: Option<String>,
    pub filter: Option<String>,
    pub filter_extra: Option<String>,
    /// Ignore `filt_id`/`filter` and synthesize from the discrete controls.
    pub build_filter: bool,
    pub apply_overrides: Option<bool>,
    pub autofp: Option<bool>,
    /// Severity level checkboxes, already folded into the protocol's
    /// letter form ("hmlg" subsets).
    pub levels: Option<String>,
    pub min_qod: Option<u32>,
    pub task_id: Option<String>,
    pub search_phrase: Option<String>,
    pub owner: Option<String>,
    pub permission: Option<String>,
    pub sort_field: Option<String>,
    pub sort_order: Option<SortOrder>,
    /// SecInfo subtype ("nvt", "cve", ...) steering the info default sort.
    pub info_subtype: Option<String>,
}

impl FilterControls {
    /// Read the standard control parameters out of a request.
    pub fn from_params(params: &Params) -> Self {
        FilterControls {
            filt_id: params.value("filt_id").map(str::to_string),
            filter: params.value("filter").map(str::to_string),
            filter_extra: params.value("filter_extra").map(str::to_string),
            build_filter: params.value("build_filter") == Some("1"),
            apply_overrides: toggle(params.value("apply_overrides")),
            autofp: toggle(params.value("autofp")),
            levels: params.value("levels").map(str::to_string),
            min_qod: params.value("min_qod").and_then(|v| v.parse().ok()),
            task_id: params.value("task_id").map(str::to_string),
            search_phrase: params.value("search_phrase").map(str::to_string),
            owner: params.value("owner").map(str::to_string),
            permission: params.value("permission").map(str::to_string),
            sort_field: params.value("sort_field").map(str::to_string),
            sort_order: match params.value("sort_order") {
                Some("ascending") => Some(SortOrder::Ascending),
                Some("descending") => Some(SortOrder::Descending),
                _ => None,
            },
            info_subtype: params.value("info_type").map(str::to_string),
        }
    }

    /// The caller's inline expression: `filter` and `filter_extra` joined.
    fn inline(&self) -> String {
        let mut term = self.filter.clone().unwrap_or_default();
        if let Some(extra) = &self.filter_extra {
            if !extra.is_empty() {
                if !term.is_empty() {
                    term.push(' ');
                }
                term.push_str(extra);
            }
        }
        term
    }

    /// Whether any discrete advanced-search control arrived.
    fn has_discrete(&self) -> bool {
        self.apply_overrides.is_some()
            || self.autofp.is_some()
            || self.levels.is_some()
            || self.min_qod.is_some()
            || self.task_id.is_some()
            || self.search_phrase.is_some()
            || self.owner.is_some()
            || self.permission.is_some()
            || self.sort_field.is_some()
    }

    /// Fold the discrete controls into `term`, replacing tokens the default
    /// recipe already carries rather than duplicating them.
    fn apply_to(&self, mut term: String) -> String {
        if let Some(overrides) = self.apply_overrides {
            term = set_token(term, "apply_overrides", flag(overrides));
        }
        if let Some(autofp) = self.autofp {
            term = set_token(term, "autofp", flag(autofp));
        }
        if let Some(levels) = &self.levels {
            term = set_token(term, "levels", levels);
        }
        if let Some(min_qod) = self.min_qod {
            term = set_token(term, "min_qod", &min_qod.to_string());
        }
        if let Some(task_id) = &self.task_id {
            term = set_token(term, "task_id", task_id);
        }
        if let Some(owner) = &self.owner {
            term = set_token(term, "owner", owner);
        }
        if let Some(permission) = &self.permission {
            term = set_token(term, "permission", permission);
        }
        if let Some(field) = &self.sort_field {
            let order = self.sort_order.unwrap_or(SortOrder::Ascending);
            term = set_sort(term, field, order);
        }
        if let Some(phrase) = &self.search_phrase {
            if !phrase.is_empty() {
                if !term.is_empty() {
                    term.push(' ');
                }
                if phrase.chars().any(char::is_whitespace) {
                    term.push('"');
                    term.push_str(phrase);
                    term.push('"');
                } else {
                    term.push_str(phrase);
                }
            }
        }
        term
    }
}

fn toggle(value: Option<&str>) -> Option<bool> {
    match value {
        Some("0") => Some(false),
        Some(_) => Some(true),
        None => None,
    }
}

fn flag(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

/// The per-type default filter recipe.
pub fn default_filter_term(resource_type: &str, info_subtype: Option<&str>) -> String {
    match resource_type {
        "task" => "apply_overrides=1 rows=-2".to_string(),
        "report" => "apply_overrides=1 sort-reverse=date rows=-2".to_string(),
        "result" => "apply_overrides=1 autofp=0 rows=-2 sort-reverse=created".to_string(),
        // SecInfo sorts NVTs by modification date, advisories and CVEs by
        // publication date.
        "info" => match info_subtype {
            Some("nvt") => "sort-reverse=modified rows=-2".to_string(),
            Some(_) => "sort-reverse=created rows=-2".to_string(),
            None => "rows=-2".to_string(),
        },
        _ => "rows=-2".to_string(),
    }
}

/// Resolve the filter a list request will use.
///
/// Priority order, first match wins:
///
/// 1. a supplied (or remembered) stored filter id that still exists;
/// 2. a synthesized per-type default, when `build_filter` is set or no
///    inline expression arrived;
/// 3. the literal inline expression, stored id forced to "none".
///
/// Legacy expressions equivalent to the user default (`sort=nvt` for notes
/// and overrides, `apply_overrides=1` for tasks) are remapped to the
/// default sentinel rather than sent verbatim.
///
/// The filter memory for `filter_context` is updated only when the caller
/// explicitly supplied `filt_id`; an absent parameter reads the memory
/// instead. The stored-filter existence check degrades softly: a failure to
/// send, to read, or a non-success status all drop the stored id and fall
/// through (logged, never surfaced as a page error).
pub async fn resolve<S: ManagerStream>(
    conn: &mut ManagerConnection<S>,
    credentials: &mut Credentials,
    resource_type: &str,
    filter_context: &str,
    controls: &FilterControls,
) -> ResolvedFilter {
    let filt_id = match &controls.filt_id {
        Some(id) => {
            credentials.remember_filter_id(filter_context, id);
            Some(id.clone())
        }
        None => credentials
            .last_filter_id(filter_context)
            .map(str::to_string),
    };

    let inline = controls.inline();

    // Stored filter id takes precedence once verified. Sentinels are not
    // stored ids and skip the check.
    if let Some(id) = filt_id {
        if !id.is_empty() && id != FILT_ID_NONE && id != FILT_ID_USER_SETTING {
            if stored_filter_exists(conn, &id).await {
                return ResolvedFilter {
                    filt_id: id,
                    term: inline,
                };
            }
            log::warn!(
                "stored filter {} for {} dropped, falling back",
                id,
                filter_context
            );
        }
    }

    if controls.build_filter || inline.is_empty() {
        let term = controls.apply_to(default_filter_term(
            resource_type,
            controls.info_subtype.as_deref(),
        ));
        let filt_id = if controls.has_discrete() {
            FILT_ID_NONE
        } else {
            FILT_ID_USER_SETTING
        };
        return ResolvedFilter {
            filt_id: filt_id.to_string(),
            term,
        };
    }

    // Legacy expressions some pages still send; both mean "the user's
    // default for this type".
    let legacy_default = (inline == "sort=nvt"
        && (resource_type == "note" || resource_type == "override"))
        || (inline == "apply_overrides=1" && resource_type == "task");
    if legacy_default {
        return ResolvedFilter {
            filt_id: FILT_ID_USER_SETTING.to_string(),
            term: String::new(),
        };
    }

    ResolvedFilter {
        filt_id: FILT_ID_NONE.to_string(),
        term: inline,
    }
}

/// Lightweight existence check for a stored filter.
///
/// Any of the three failure shapes (send, read, non-success or missing
/// status) yields `false`; the reference behavior does not distinguish a
/// transport fault from a truly absent filter, and the distinct log lines
/// are the only trace of which one happened.
async fn stored_filter_exists<S: ManagerStream>(
    conn: &mut ManagerConnection<S>,
    id: &str,
) -> bool {
    let command = CommandBuilder::new("get_filters")
        .attr("filter_id", id)
        .build();
    if let Err(e) = conn.send(&command, "checking a stored filter").await {
        log::warn!("stored filter check for {} could not send: {}", id, e);
        return false;
    }
    let entity = match conn.read_entity("checking a stored filter").await {
        Ok(entity) => entity,
        Err(e) => {
            log::warn!("stored filter check for {} could not read: {}", id, e);
            return false;
        }
    };
    let status = entity.status().unwrap_or("");
    if status_is_success(status) {
        true
    } else {
        log::warn!(
            "stored filter check for {} returned status {:?}",
            id,
            status
        );
        false
    }
}

/// Replace the `key=` token in a filter term, or append one.
pub(crate) fn set_token(term: String, key: &str, value: &str) -> String {
    let prefix = format!("{key}=");
    let mut tokens: Vec<String> = term
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let replacement = format!("{key}={value}");
    match tokens.iter_mut().find(|token| token.starts_with(&prefix)) {
        Some(token) => *token = replacement,
        None => tokens.push(replacement),
    }
    tokens.join(" ")
}

/// Append a `key=` token only when the term carries none; an existing
/// directive, wherever it came from, is left alone.
pub(crate) fn set_token_default(term: String, key: &str, value: &str) -> String {
    let prefix = format!("{key}=");
    if term
        .split_whitespace()
        .any(|token| token.starts_with(&prefix))
    {
        return term;
    }
    set_token(term, key, value)
}

/// Replace any sort directive in a filter term with the given field and
/// direction.
pub(crate) fn set_sort(term: String, field: &str, order: SortOrder) -> String {
    let mut tokens: Vec<String> = term
        .split_whitespace()
        .filter(|token| !token.starts_with("sort=") && !token.starts_with("sort-reverse="))
        .map(str::to_string)
        .collect();
    tokens.push(match order {
        SortOrder::Ascending => format!("sort={field}"),
        SortOrder::Descending => format!("sort-reverse={field}"),
    });
    tokens.join(" ")
}

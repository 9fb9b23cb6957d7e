//! Decoded request parameters.
//!
//! The engine never parses raw HTTP; the request layer hands it a [`Params`]
//! multimap. A parameter value is either a [`Validated`] scalar, a rejected
//! raw value kept only so the map still records that the name arrived, or a
//! nested group (array-style parameters whose name ends with the `:`
//! grouping marker).
//!
//! [`Validated`] can only be produced by [`Validated::check`], so "was this
//! value checked for UTF-8 and size before interpolation" is carried by the
//! type instead of a pair of ad hoc flags.

use crate::error::{EngineError, EngineResult};

/// Upper bound on a single parameter value; uploads beyond this are
/// rejected at the door.
pub const MAX_VALUE_SIZE: usize = 2 * 1024 * 1024;

/// Marker suffix for group parameter names.
pub const GROUP_MARKER: char = ':';

/// A parameter value that passed UTF-8 and size validation.
///
/// Only values of this type may be interpolated into a command or echoed
/// into an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated(String);

impl Validated {
    /// Validate a raw value. This is the only constructor.
    pub fn check(raw: &[u8]) -> EngineResult<Validated> {
        if raw.len() > MAX_VALUE_SIZE {
            return Err(EngineError::Validation(format!(
                "parameter value of {} bytes exceeds the {} byte limit",
                raw.len(),
                MAX_VALUE_SIZE
            )));
        }
        let value = std::str::from_utf8(raw)
            .map_err(|_| EngineError::Validation("parameter value is not valid UTF-8".into()))?;
        Ok(Validated(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Validated {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One request parameter.
#[derive(Debug, Clone)]
pub enum Param {
    /// A value that passed validation.
    Scalar(Validated),
    /// A value that failed validation; never interpolated, never echoed.
    Rejected(Vec<u8>),
    /// Nested members of an array-style parameter.
    Group(Params),
}

/// Ordered multimap of request parameters.
#[derive(Debug, Clone, Default)]
pub struct Params {
    entries: Vec<(String, Param)>,
}

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    /// Add a raw value under `name`, validating it. Failed validation is
    /// recorded as a rejected entry rather than dropped, so the engine can
    /// distinguish "absent" from "present but unusable".
    pub fn add(&mut self, name: &str, raw: &[u8]) {
        let param = match Validated::check(raw) {
            Ok(value) => Param::Scalar(value),
            Err(e) => {
                log::debug!("rejecting parameter {}: {}", name, e);
                Param::Rejected(raw.to_vec())
            }
        };
        self.entries.push((name.to_string(), param));
    }

    /// Add an already validated value.
    pub fn add_scalar(&mut self, name: &str, value: Validated) {
        self.entries.push((name.to_string(), Param::Scalar(value)));
    }

    /// Add a nested group; `name` must end with the grouping marker.
    pub fn add_group(&mut self, name: &str, members: Params) {
        debug_assert!(name.ends_with(GROUP_MARKER));
        self.entries.push((name.to_string(), Param::Group(members)));
    }

    /// First validated scalar under `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries.iter().find_map(|(key, param)| match param {
            Param::Scalar(value) if key == name => Some(value.as_str()),
            _ => None,
        })
    }

    /// First validated scalar under `name`, as a `Validated` borrow.
    pub fn validated(&self, name: &str) -> Option<&Validated> {
        self.entries.iter().find_map(|(key, param)| match param {
            Param::Scalar(value) if key == name => Some(value),
            _ => None,
        })
    }

    /// Every validated scalar under `name`, in insertion order.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries.iter().filter_map(move |(key, param)| {
            match param {
                Param::Scalar(value) if key == name => Some(value.as_str()),
                _ => None,
            }
        })
    }

    /// First group under `name`.
    pub fn group(&self, name: &str) -> Option<&Params> {
        self.entries.iter().find_map(|(key, param)| match param {
            Param::Group(members) if key == name => Some(members),
            _ => None,
        })
    }

    /// Whether any entry (valid or not) arrived under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    /// All entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.entries
            .iter()
            .map(|(name, param)| (name.as_str(), param))
    }

    /// Required validated scalar, as a validation error when absent.
    pub fn required(&self, name: &str) -> EngineResult<&str> {
        self.value(name)
            .ok_or_else(|| EngineError::Validation(format!("missing required parameter {name}")))
    }

    /// Reassign `next_id` onto `name`.
    ///
    /// For a few resource types (assets among them) the parameter that
    /// identified the deleted resource is the same one that names the
    /// resource to show next. Callers building the follow-up page query run
    /// this first so the stale id never leaks into the next fetch. A
    /// `next_id` that is absent leaves the map untouched.
    pub fn promote_next_id(&mut self, name: &str) {
        let Some(next) = self.validated("next_id").cloned() else {
            return;
        };
        match self
            .entries
            .iter_mut()
            .find(|(key, _)| key == name)
        {
            Some((_, param)) => *param = Param::Scalar(next),
            None => self.entries.push((name.to_string(), Param::Scalar(next))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(value: &str) -> Validated {
        Validated::check(value.as_bytes()).unwrap()
    }

    #[test]
    fn validated_rejects_bad_utf8_and_oversize() {
        assert!(Validated::check(b"plain").is_ok());
        assert!(matches!(
            Validated::check(&[0xff, 0xfe]),
            Err(EngineError::Validation(_))
        ));
        let huge = vec![b'a'; MAX_VALUE_SIZE + 1];
        assert!(matches!(
            Validated::check(&huge),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn rejected_values_are_present_but_unreadable() {
        let mut params = Params::new();
        params.add("comment", &[0xff, 0x00]);
        assert!(params.contains("comment"));
        assert_eq!(params.value("comment"), None);
    }

    #[test]
    fn multimap_keeps_insertion_order() {
        let mut params = Params::new();
        params.add("level", b"high");
        params.add("level", b"medium");
        params.add("name", b"weekly");
        let levels: Vec<_> = params.values("level").collect();
        assert_eq!(levels, ["high", "medium"]);
        assert_eq!(params.value("level"), Some("high"));
    }

    #[test]
    fn groups_nest() {
        let mut members = Params::new();
        members.add("id", b"a1");
        members.add("id", b"a2");
        let mut params = Params::new();
        params.add_group("alerts:", members);

        let group = params.group("alerts:").unwrap();
        let ids: Vec<_> = group.values("id").collect();
        assert_eq!(ids, ["a1", "a2"]);
    }

    #[test]
    fn promote_next_id_overwrites_the_deleted_id() {
        let mut params = Params::new();
        params.add_scalar("asset_id", scalar("deleted-id"));
        params.add_scalar("next_id", scalar("show-me-next"));
        params.promote_next_id("asset_id");
        assert_eq!(params.value("asset_id"), Some("show-me-next"));
    }

    #[test]
    fn promote_next_id_without_next_id_is_a_no_op() {
        let mut params = Params::new();
        params.add_scalar("asset_id", scalar("deleted-id"));
        params.promote_next_id("asset_id");
        assert_eq!(params.value("asset_id"), Some("deleted-id"));
    }

    #[test]
    fn required_reports_missing_parameters() {
        let params = Params::new();
        let err = params.required("task_id").unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(err.http_status(), 400);
    }
}

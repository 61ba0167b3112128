use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const MAX_TITLE_LEN: usize = 500;
pub const MAX_ORIGINS: usize = 5;
pub const MAX_ORIGIN_LEN: usize = 500;
pub const MAX_TAGS: usize = 10;
pub const MAX_TAG_LEN: usize = 500;
pub const MAX_USERNAME_LEN: usize = 500;
pub const MAX_PASSWORD_LEN: usize = 500;
pub const MAX_NOTES_LEN: usize = 10_000;

/// What went wrong with a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Violation {
    TooLong,
    TooMany,
    MissingRequired,
    Invalid,
}

impl Violation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Violation::TooLong => "too-long",
            Violation::TooMany => "too-many",
            Violation::MissingRequired => "missing-required",
            Violation::Invalid => "invalid",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-level validation failures keyed by field path (`"title"`, `"entry.password"`, `"origins.2"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("invalid item: {}", summarize(.violations))]
pub struct ValidationError {
    violations: BTreeMap<String, Violation>,
}

impl ValidationError {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an error holding exactly one violation.
    pub fn single(path: impl Into<String>, violation: Violation) -> Self {
        let mut err = Self::new();
        err.insert(path, violation);
        err
    }

    pub fn insert(&mut self, path: impl Into<String>, violation: Violation) {
        self.violations.insert(path.into(), violation);
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<Violation> {
        self.violations.get(path).copied()
    }

    #[must_use]
    pub const fn violations(&self) -> &BTreeMap<String, Violation> {
        &self.violations
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// `Ok(())` when nothing was recorded, otherwise the collected violations.
    ///
    /// # Errors
    /// Returns `self` when at least one violation was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

fn summarize(violations: &BTreeMap<String, Violation>) -> String {
    violations
        .iter()
        .map(|(path, v)| format!("{path}: {v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn check_len(errors: &mut ValidationError, path: &str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.insert(path, Violation::TooLong);
    }
}

pub(crate) fn check_list(errors: &mut ValidationError, path: &str, values: &[String], max_items: usize, max_len: usize) {
    if values.len() > max_items {
        errors.insert(path, Violation::TooMany);
    }
    for (idx, value) in values.iter().enumerate() {
        check_len(errors, &format!("{path}.{idx}"), value, max_len);
    }
}

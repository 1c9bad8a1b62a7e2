//! A single metadata rule: a predicate over the entry and the fragment it
//! contributes when the predicate holds.

use crate::metadata::{FileKind, MetadataFragment};
use serde::{Deserialize, Serialize};

/// Predicate of a rule. Unset fields match anything; set fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    /// Required kind of the entry.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<FileKind>,

    /// Required prefix of the target path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Required suffix of the target path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl Condition {
    /// A condition matching every entry.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to one kind.
    #[must_use]
    pub fn kind(mut self, kind: FileKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restrict to paths starting with `prefix`.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Restrict to paths ending with `suffix`.
    #[must_use]
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Check the condition against a target path and kind.
    #[must_use]
    pub fn matches(&self, path: &str, kind: FileKind) -> bool {
        self.kind.map_or(true, |k| k == kind)
            && self.prefix.as_deref().map_or(true, |p| path.starts_with(p))
            && self.suffix.as_deref().map_or(true, |s| path.ends_with(s))
    }
}

/// A rule: when the condition holds, the effects are merged into the result.
///
/// In a manifest the effects sit next to `when`:
///
/// ```toml
/// [[ruleset.rule]]
/// when = { type = "directory", prefix = "/opt/app" }
/// mode = "0750"
/// user = "app"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Predicate selecting the entries this rule applies to.
    #[serde(default)]
    pub when: Condition,

    /// Metadata contributed by the rule.
    #[serde(flatten)]
    pub effects: MetadataFragment,
}

impl Rule {
    /// Create a rule.
    #[must_use]
    pub fn new(when: Condition, effects: MetadataFragment) -> Self {
        Self { when, effects }
    }

    /// Check whether this rule applies.
    #[must_use]
    pub fn matches(&self, path: &str, kind: FileKind) -> bool {
        self.when.matches(path, kind)
    }
}

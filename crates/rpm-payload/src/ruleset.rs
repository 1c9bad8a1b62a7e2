//! Named, ordered lists of rules.

use crate::metadata::{FileKind, MetadataFragment};
use crate::rule::Rule;
use serde::{Deserialize, Serialize};

/// A named ruleset.
///
/// ```toml
/// [[ruleset]]
/// id = "defaults"
///
/// [[ruleset.rule]]
/// when = { type = "directory" }
/// mode = "0755"
///
/// [[ruleset.rule]]
/// when = { prefix = "/etc/" }
/// configuration = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ruleset {
    /// Name the ruleset is referenced by.
    #[serde(rename = "id")]
    pub name: String,

    /// Rules in declaration order.
    #[serde(default, rename = "rule")]
    pub rules: Vec<Rule>,
}

impl Ruleset {
    /// Create an empty ruleset.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// Append a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Merge the effects of every matching rule in declaration order.
    ///
    /// Later matching rules override earlier ones for the fields they set.
    #[must_use]
    pub fn evaluate(&self, path: &str, kind: FileKind) -> MetadataFragment {
        self.rules
            .iter()
            .filter(|rule| rule.matches(path, kind))
            .fold(MetadataFragment::new(), |acc, rule| acc.overlay(&rule.effects))
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the ruleset has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

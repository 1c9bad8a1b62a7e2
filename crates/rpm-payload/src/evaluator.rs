//! Registry of rulesets and the layered metadata merge.
//!
//! Effective metadata for a path is, highest precedence first:
//! 1. explicit entry attributes
//! 2. the entry's ruleset, or the build-wide default ruleset if none is named
//! 3. built-in defaults per kind

use crate::metadata::{FileKind, MetadataFragment, ResolvedMetadata};
use crate::resolve::ResolveError;
use crate::ruleset::Ruleset;
use std::collections::BTreeMap;

/// Holds every ruleset of one build and resolves entry metadata against them.
#[derive(Debug, Clone, Default)]
pub struct RulesetEvaluator {
    rulesets: BTreeMap<String, Ruleset>,
    default_ruleset: Option<String>,
}

impl RulesetEvaluator {
    /// Register rulesets with an optional build-wide default.
    ///
    /// An empty default name counts as no default.
    ///
    /// # Errors
    ///
    /// Returns an error if two rulesets share a name, or if the default names
    /// a ruleset that is not registered.
    pub fn new(
        rulesets: impl IntoIterator<Item = Ruleset>,
        default_ruleset: Option<String>,
    ) -> Result<Self, ResolveError> {
        let mut registry = BTreeMap::new();
        for ruleset in rulesets {
            if registry.contains_key(&ruleset.name) {
                return Err(ResolveError::DuplicateRuleset(ruleset.name));
            }
            registry.insert(ruleset.name.clone(), ruleset);
        }

        let evaluator = Self {
            rulesets: registry,
            default_ruleset: default_ruleset.filter(|name| !name.is_empty()),
        };
        evaluator.check(None)?;
        Ok(evaluator)
    }

    /// Check that the ruleset applying for `requested` is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the applicable ruleset is not registered.
    pub fn check(&self, requested: Option<&str>) -> Result<(), ResolveError> {
        match self.effective_name(requested) {
            Some(name) if !self.rulesets.contains_key(name) => {
                Err(ResolveError::UnknownRuleset(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// The build-wide default ruleset name.
    #[must_use]
    pub fn default_ruleset(&self) -> Option<&str> {
        self.default_ruleset.as_deref()
    }

    /// Look up a ruleset by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Ruleset> {
        self.rulesets.get(name)
    }

    /// Names of all registered rulesets, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rulesets.keys().map(String::as_str)
    }

    /// The ruleset name that applies for a requested one.
    #[must_use]
    pub fn effective_name<'a>(&'a self, requested: Option<&'a str>) -> Option<&'a str> {
        requested
            .filter(|name| !name.is_empty())
            .or(self.default_ruleset.as_deref())
    }

    /// Merge the ruleset fragment and the explicit overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the applicable ruleset is not registered.
    pub fn resolve_fragment(
        &self,
        path: &str,
        kind: FileKind,
        ruleset: Option<&str>,
        overrides: &MetadataFragment,
    ) -> Result<MetadataFragment, ResolveError> {
        let base = match self.effective_name(ruleset) {
            Some(name) => self
                .rulesets
                .get(name)
                .ok_or_else(|| ResolveError::UnknownRuleset(name.to_string()))?
                .evaluate(path, kind),
            None => MetadataFragment::new(),
        };

        Ok(base.overlay(overrides))
    }

    /// Resolve the effective metadata of a path.
    ///
    /// # Errors
    ///
    /// Returns an error if the applicable ruleset is not registered.
    pub fn resolve(
        &self,
        path: &str,
        kind: FileKind,
        ruleset: Option<&str>,
        overrides: &MetadataFragment,
    ) -> Result<ResolvedMetadata, ResolveError> {
        let fragment = self.resolve_fragment(path, kind, ruleset, overrides)?;
        Ok(ResolvedMetadata::from_fragment(kind, &fragment))
    }
}

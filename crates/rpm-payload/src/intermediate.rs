//! Synthesis of implicit parent directories below configured base paths.
//!
//! Archive formats only record what they are given. When an entry lands at
//! `/opt/app/bin/run.sh` and `/opt/app` is a base path, the directories
//! `/opt/app` and `/opt/app/bin` have to be added explicitly or the package
//! will not own them.

use crate::entry::{ancestors, canonical_path, is_within};
use crate::evaluator::RulesetEvaluator;
use crate::metadata::{EntryKind, FileKind, MetadataFragment};
use crate::resolve::{ArchiveEntryDescriptor, Content, ResolveError};
use crate::sink::{EntrySink, PayloadError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;

/// Sink decorator adding missing parent directories.
///
/// Each synthesized directory is emitted once, parents before children, with
/// metadata from the default ruleset. A later explicit declaration of the same
/// directory replaces the synthesized one instead of duplicating it.
#[derive(Debug)]
pub struct IntermediateDirectorySynthesizer<'a, S> {
    inner: S,
    evaluator: &'a RulesetEvaluator,
    base_paths: Vec<String>,
    modified: Option<DateTime<Utc>>,
    emitted: HashSet<String>,
    provisional: HashSet<String>,
    collection: Option<String>,
}

impl<'a, S: EntrySink> IntermediateDirectorySynthesizer<'a, S> {
    /// Wrap a sink.
    ///
    /// # Errors
    ///
    /// Returns an error if a base path is not a valid archive path.
    pub fn new<I, P>(inner: S, evaluator: &'a RulesetEvaluator, base_paths: I) -> Result<Self, ResolveError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let base_paths = base_paths
            .into_iter()
            .map(|raw| {
                let raw = raw.as_ref();
                canonical_path(raw).map_err(|reason| ResolveError::InvalidEntry {
                    name: raw.to_string(),
                    reason: reason.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            inner,
            evaluator,
            base_paths,
            modified: None,
            emitted: HashSet::new(),
            provisional: HashSet::new(),
            collection: None,
        })
    }

    /// Stamp synthesized directories with a fixed modification time.
    #[must_use]
    pub fn with_modified(mut self, modified: Option<DateTime<Utc>>) -> Self {
        self.modified = modified;
        self
    }

    /// The wrapped sink.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap the sink.
    #[must_use]
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Directories synthesized and not replaced by an explicit declaration.
    #[must_use]
    pub fn provisional(&self) -> Vec<&str> {
        let mut paths: Vec<_> = self.provisional.iter().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    fn wants(&self, dir: &str) -> bool {
        if self.emitted.contains(dir) {
            return false;
        }
        if !self.base_paths.iter().any(|base| is_within(dir, base)) {
            return false;
        }
        // Directories below a collection root belong to the collector.
        match &self.collection {
            Some(root) => dir == root || !is_within(dir, root),
            None => true,
        }
    }

    fn synthesize_parents(&mut self, path: &str) -> Result<(), PayloadError> {
        for dir in ancestors(path) {
            if !self.wants(dir) {
                continue;
            }

            let metadata = self
                .evaluator
                .resolve(dir, FileKind::Directory, None, &MetadataFragment::new())?
                .with_modified(self.modified);
            debug!(path = dir, mode = %metadata.mode, "synthesizing intermediate directory");

            self.inner.add(ArchiveEntryDescriptor {
                target_path: dir.to_string(),
                kind: EntryKind::Directory,
                content: Content::None,
                metadata,
                digest: None,
            })?;
            self.emitted.insert(dir.to_string());
            self.provisional.insert(dir.to_string());
        }

        Ok(())
    }
}

impl<S: EntrySink> EntrySink for IntermediateDirectorySynthesizer<'_, S> {
    fn add(&mut self, entry: ArchiveEntryDescriptor) -> Result<(), PayloadError> {
        self.synthesize_parents(&entry.target_path)?;

        if entry.kind == EntryKind::Directory {
            if self.provisional.remove(&entry.target_path) {
                debug!(path = %entry.target_path, "explicit directory replaces synthesized one");
                return self.inner.supersede_directory(entry);
            }
            self.emitted.insert(entry.target_path.clone());
        }

        self.inner.add(entry)
    }

    fn supersede_directory(&mut self, entry: ArchiveEntryDescriptor) -> Result<(), PayloadError> {
        self.provisional.remove(&entry.target_path);
        self.emitted.insert(entry.target_path.clone());
        self.inner.supersede_directory(entry)
    }

    fn enter_collection(&mut self, root: &str) {
        self.collection = Some(root.to_string());
        self.inner.enter_collection(root);
    }

    fn leave_collection(&mut self) {
        self.collection = None;
        self.inner.leave_collection();
    }
}

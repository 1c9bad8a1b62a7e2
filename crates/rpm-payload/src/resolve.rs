//! Resolution of declared entries into archive entry descriptors.
//!
//! This module provides:
//! - The descriptor handed to the archive builder
//! - Per-kind materialization of declared entries
//! - The errors raised while resolving an entry

use crate::collect::{CollectedKind, TreeCollector};
use crate::digest::DigestAlgorithm;
use crate::entry::{EntrySource, PackageEntry};
use crate::evaluator::RulesetEvaluator;
use crate::metadata::{EntryKind, FileFlag, MetadataFragment, ResolvedMetadata};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while resolving an entry.
///
/// All of them reflect a defect in the declared configuration or the source
/// tree, so none is retried.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Zero or several kind selectors, or a malformed target path.
    #[error("invalid entry '{name}': {reason}")]
    InvalidEntry { name: String, reason: String },

    /// A ruleset was referenced but never registered.
    #[error("unknown ruleset '{0}'")]
    UnknownRuleset(String),

    /// Two rulesets were registered under one name.
    #[error("duplicate ruleset '{0}'")]
    DuplicateRuleset(String),

    /// The source of a file entry cannot be read.
    #[error("source file '{}' of entry '{name}' is missing or unreadable: {reason}", .path.display())]
    MissingSourceFile {
        name: String,
        path: PathBuf,
        reason: String,
    },

    /// The source directory of a collector does not exist.
    #[error("collector source directory not found: {}", .0.display())]
    CollectorSourceNotFound(PathBuf),

    /// A symbolic link entry without a target.
    #[error("symbolic link entry '{0}' has an empty target")]
    SymlinkTargetEmpty(String),

    /// The collector walk failed.
    #[error("failed to walk '{}': {source}", .root.display())]
    Walk {
        root: PathBuf,
        source: walkdir::Error,
    },

    /// A collector pattern is not a valid glob.
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },

    /// A collected file name or link target is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    /// Other filesystem failure.
    #[error("IO error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Where the content of a descriptor comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Absolute path of a source file.
    Path(PathBuf),
    /// In-memory bytes.
    Bytes(Vec<u8>),
    /// Target of a symbolic link.
    LinkTarget(String),
    /// No content (directories).
    None,
}

/// A fully resolved archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntryDescriptor {
    /// Canonical target path inside the archive.
    pub target_path: String,

    /// Kind of entry.
    pub kind: EntryKind,

    /// Content reference.
    pub content: Content,

    /// Resolved metadata.
    pub metadata: ResolvedMetadata,

    /// Digest to record for the content, set for files only.
    pub digest: Option<DigestAlgorithm>,
}

/// Turns declared entries into descriptors.
#[derive(Debug, Clone)]
pub struct EntryResolver<'a> {
    evaluator: &'a RulesetEvaluator,
    base_dir: Option<PathBuf>,
    modified: Option<DateTime<Utc>>,
    digest: DigestAlgorithm,
}

impl<'a> EntryResolver<'a> {
    /// Create a resolver over an evaluator.
    #[must_use]
    pub fn new(evaluator: &'a RulesetEvaluator) -> Self {
        Self {
            evaluator,
            base_dir: None,
            modified: None,
            digest: DigestAlgorithm::default(),
        }
    }

    /// Resolve relative source paths against this directory instead of the
    /// current working directory.
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Stamp every descriptor with a fixed modification time.
    #[must_use]
    pub fn with_modified(mut self, modified: Option<DateTime<Utc>>) -> Self {
        self.modified = modified;
        self
    }

    /// Digest algorithm recorded for file content.
    #[must_use]
    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    /// The evaluator used for metadata.
    #[must_use]
    pub fn evaluator(&self) -> &'a RulesetEvaluator {
        self.evaluator
    }

    /// The fixed modification time, if any.
    #[must_use]
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    /// Resolve one entry.
    ///
    /// Either every descriptor of the entry is returned or an error is.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is invalid, references an unknown
    /// ruleset, or its sources cannot be read.
    pub fn resolve(&self, entry: &PackageEntry) -> Result<Vec<ArchiveEntryDescriptor>, ResolveError> {
        let source = entry.source()?;
        let target = entry.target_path()?;
        self.evaluator.check(entry.ruleset.as_deref())?;

        debug!(
            entry = %entry.name,
            ruleset = ?self.evaluator.effective_name(entry.ruleset.as_deref()),
            "resolving entry"
        );

        match source {
            EntrySource::File(file) => {
                let path = self.readable_source(entry, file)?;
                debug!(entry = %entry.name, source = %path.display(), "as file");
                let descriptor = self.descriptor(entry, target, EntryKind::File, Content::Path(path), &entry.info)?;
                Ok(vec![descriptor])
            }
            EntrySource::Directory => {
                debug!(entry = %entry.name, "as directory");
                let descriptor = self.descriptor(entry, target, EntryKind::Directory, Content::None, &entry.info)?;
                Ok(vec![descriptor])
            }
            EntrySource::Symlink(link_to) => {
                if link_to.is_empty() {
                    return Err(ResolveError::SymlinkTargetEmpty(entry.name.clone()));
                }
                debug!(entry = %entry.name, link_to, "as symbolic link");
                let content = Content::LinkTarget(link_to.to_string());
                let descriptor = self.descriptor(entry, target, EntryKind::Symlink, content, &entry.info)?;
                Ok(vec![descriptor])
            }
            EntrySource::Ghost => {
                debug!(entry = %entry.name, "as ghost");
                let info = entry.info.clone().with_flag(FileFlag::Ghost, true);
                let descriptor = self.descriptor(entry, target, EntryKind::Ghost, Content::Bytes(Vec::new()), &info)?;
                Ok(vec![descriptor])
            }
            EntrySource::Collect(config) => {
                let from = self.absolute(&config.from)?;
                debug!(entry = %entry.name, from = %from.display(), "as collector");

                let items = TreeCollector::new(config)?.collect(&from)?;
                let prefix = if target == "/" {
                    target
                } else {
                    format!("{target}/")
                };

                items
                    .into_iter()
                    .map(|item| {
                        let path = format!("{prefix}{}", item.relative_path);
                        let (kind, content) = match item.kind {
                            CollectedKind::File(source) => (EntryKind::File, Content::Path(source)),
                            CollectedKind::Directory => (EntryKind::Directory, Content::None),
                            CollectedKind::Symlink(link_to) => (EntryKind::Symlink, Content::LinkTarget(link_to)),
                        };
                        self.descriptor(entry, path, kind, content, &entry.info)
                    })
                    .collect()
            }
        }
    }

    fn descriptor(
        &self,
        entry: &PackageEntry,
        target_path: String,
        kind: EntryKind,
        content: Content,
        overrides: &MetadataFragment,
    ) -> Result<ArchiveEntryDescriptor, ResolveError> {
        let metadata = self
            .evaluator
            .resolve(&target_path, kind.file_kind(), entry.ruleset.as_deref(), overrides)?
            .with_modified(self.modified);

        debug!(
            target = %target_path,
            %kind,
            mode = %metadata.mode,
            owner = ?metadata.owner,
            group = ?metadata.group,
            "resolved metadata"
        );

        Ok(ArchiveEntryDescriptor {
            target_path,
            kind,
            content,
            metadata,
            digest: (kind == EntryKind::File).then_some(self.digest),
        })
    }

    fn absolute(&self, path: &Path) -> Result<PathBuf, ResolveError> {
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        match &self.base_dir {
            Some(base) => Ok(base.join(path)),
            None => std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .map_err(|source| ResolveError::Io {
                    path: path.to_path_buf(),
                    source,
                }),
        }
    }

    fn readable_source(&self, entry: &PackageEntry, file: &Path) -> Result<PathBuf, ResolveError> {
        let path = self.absolute(file)?;
        let missing = |reason: String| ResolveError::MissingSourceFile {
            name: entry.name.clone(),
            path: path.clone(),
            reason,
        };

        let meta = fs::metadata(&path).map_err(|e| missing(e.to_string()))?;
        if !meta.is_file() {
            return Err(missing("not a regular file".to_string()));
        }
        fs::File::open(&path).map_err(|e| missing(e.to_string()))?;

        Ok(path)
    }
}

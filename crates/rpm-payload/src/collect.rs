//! Recursive collection of a source directory tree.
//!
//! The walk order of the filesystem never reaches the caller: items are
//! sorted by relative path once the walk is complete, so collecting an
//! unchanged tree always yields the same sequence.

use crate::entry::Collector;
use crate::metadata::FileKind;
use crate::resolve::ResolveError;
use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// What a collected item is and where its content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectedKind {
    /// A regular file at this absolute source path.
    File(PathBuf),
    /// A directory.
    Directory,
    /// A symbolic link with its literal, unresolved target.
    Symlink(String),
}

/// One item found below the collector root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedItem {
    /// Path relative to the collector root, with `/` separators.
    pub relative_path: String,

    /// Kind and content.
    pub kind: CollectedKind,
}

impl CollectedItem {
    /// The kind rules see for this item.
    #[must_use]
    pub fn file_kind(&self) -> FileKind {
        match self.kind {
            CollectedKind::File(_) => FileKind::File,
            CollectedKind::Directory => FileKind::Directory,
            CollectedKind::Symlink(_) => FileKind::Symlink,
        }
    }
}

/// Walks a directory and selects items with Ant-style patterns.
///
/// `*` matches within one path component, `**` spans any number of
/// components, and a pattern ending in `/` matches everything below it.
#[derive(Debug, Clone)]
pub struct TreeCollector {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
    directories: bool,
    symbolic_links: bool,
    options: MatchOptions,
}

impl TreeCollector {
    /// Compile the patterns of a collector configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern is not a valid glob.
    pub fn new(config: &Collector) -> Result<Self, ResolveError> {
        Ok(Self {
            includes: compile(&config.includes)?,
            excludes: compile(&config.excludes)?,
            directories: config.directories,
            symbolic_links: config.symbolic_links,
            options: MatchOptions {
                case_sensitive: config.case_sensitive,
                require_literal_separator: true,
                require_literal_leading_dot: false,
            },
        })
    }

    /// Check a relative path against the include and exclude patterns.
    #[must_use]
    pub fn is_selected(&self, relative: &str) -> bool {
        let included = self.includes.is_empty()
            || self
                .includes
                .iter()
                .any(|p| p.matches_with(relative, self.options));

        included
            && !self
                .excludes
                .iter()
                .any(|p| p.matches_with(relative, self.options))
    }

    /// Walk `from` and return the selected items sorted by relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` is not a directory, or if any part of the
    /// walk fails. A failed walk yields nothing.
    pub fn collect(&self, from: &Path) -> Result<Vec<CollectedItem>, ResolveError> {
        if !from.is_dir() {
            return Err(ResolveError::CollectorSourceNotFound(from.to_path_buf()));
        }

        let mut items = Vec::new();

        for entry in WalkDir::new(from).follow_links(false).min_depth(1) {
            let entry = entry.map_err(|source| ResolveError::Walk {
                root: from.to_path_buf(),
                source,
            })?;
            let relative = relative_path(from, entry.path())?;
            let file_type = entry.file_type();

            let kind = if file_type.is_symlink() {
                if !self.symbolic_links {
                    debug!(path = %relative, "ignoring symbolic link");
                    continue;
                }
                let target = fs::read_link(entry.path()).map_err(|source| ResolveError::Io {
                    path: entry.path().to_path_buf(),
                    source,
                })?;
                let target = target
                    .into_os_string()
                    .into_string()
                    .map_err(|_| ResolveError::NonUtf8Path(entry.path().to_path_buf()))?;
                CollectedKind::Symlink(target)
            } else if file_type.is_dir() {
                if !self.directories {
                    continue;
                }
                CollectedKind::Directory
            } else {
                CollectedKind::File(entry.path().to_path_buf())
            };

            if !self.is_selected(&relative) {
                continue;
            }

            items.push(CollectedItem {
                relative_path: relative,
                kind,
            });
        }

        items.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        debug!(root = %from.display(), count = items.len(), "collected tree");

        Ok(items)
    }
}

/// Compile Ant-style patterns. A trailing `/` means `/**`, and `dir/**`
/// also matches `dir` itself.
fn compile(patterns: &[String]) -> Result<Vec<Pattern>, ResolveError> {
    let mut compiled = Vec::with_capacity(patterns.len());

    for raw in patterns {
        let mut pattern = raw.replace('\\', "/");
        if pattern.ends_with('/') {
            pattern.push_str("**");
        }
        let pattern = pattern.trim_start_matches('/');
        let parse = |text: &str| {
            Pattern::new(text).map_err(|source| ResolveError::Pattern {
                pattern: raw.clone(),
                source,
            })
        };

        compiled.push(parse(pattern)?);
        if let Some(prefix) = pattern.strip_suffix("/**") {
            if !prefix.is_empty() {
                compiled.push(parse(prefix)?);
            }
        }
    }

    Ok(compiled)
}

fn relative_path(root: &Path, path: &Path) -> Result<String, ResolveError> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ResolveError::NonUtf8Path(path.to_path_buf()))?;
    Ok(parts.join("/"))
}

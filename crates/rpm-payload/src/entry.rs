//! Declared package entries and archive path handling.
//!
//! ```toml
//! [[entry]]
//! name = "/etc/app/app.conf"
//! file = "src/main/resources/app.conf"
//! configuration = true
//!
//! [[entry]]
//! name = "/opt/app/lib"
//! collect = { from = "target/lib", includes = ["**/*.jar"] }
//! ```

use crate::metadata::MetadataFragment;
use crate::resolve::ResolveError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A declared unit of package content.
///
/// Exactly one of `file`, `directory`, `link-to`, `collect` and `ghost` must
/// be set. `directory` and `ghost` only count when `true`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackageEntry {
    /// Target path inside the archive.
    pub name: String,

    /// Source file to package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Package an empty directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<bool>,

    /// Package a symbolic link pointing here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_to: Option<String>,

    /// Collect a whole source directory tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect: Option<Collector>,

    /// Package a ghost placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ghost: Option<bool>,

    /// Ruleset used for this entry instead of the build-wide default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ruleset: Option<String>,

    /// Ignore this entry entirely.
    #[serde(default)]
    pub skip: bool,

    /// Explicit attributes. These override every rule.
    #[serde(flatten)]
    pub info: MetadataFragment,
}

/// Collector configuration of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Collector {
    /// Source directory to walk.
    pub from: PathBuf,

    /// Include patterns. Empty means everything.
    #[serde(default)]
    pub includes: Vec<String>,

    /// Exclude patterns.
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Emit directories as entries.
    #[serde(default = "default_true")]
    pub directories: bool,

    /// Emit symbolic links as entries instead of skipping them.
    #[serde(default)]
    pub symbolic_links: bool,

    /// Match patterns case-sensitively.
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

fn default_true() -> bool {
    true
}

impl Collector {
    /// Collect everything below `from`.
    #[must_use]
    pub fn new(from: impl Into<PathBuf>) -> Self {
        Self {
            from: from.into(),
            includes: Vec::new(),
            excludes: Vec::new(),
            directories: true,
            symbolic_links: false,
            case_sensitive: true,
        }
    }

    /// Add an include pattern.
    #[must_use]
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.push(pattern.into());
        self
    }

    /// Add an exclude pattern.
    #[must_use]
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    /// Whether directories are emitted.
    #[must_use]
    pub fn directories(mut self, include: bool) -> Self {
        self.directories = include;
        self
    }

    /// Whether symbolic links are emitted.
    #[must_use]
    pub fn symbolic_links(mut self, include: bool) -> Self {
        self.symbolic_links = include;
        self
    }
}

/// The validated kind selector of an entry.
#[derive(Debug, Clone, Copy)]
pub enum EntrySource<'a> {
    /// A file copied from a source path.
    File(&'a Path),
    /// An empty directory.
    Directory,
    /// A symbolic link with its target.
    Symlink(&'a str),
    /// A collected directory tree.
    Collect(&'a Collector),
    /// A ghost placeholder.
    Ghost,
}

impl PackageEntry {
    /// A file entry.
    #[must_use]
    pub fn file(name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            file: Some(source.into()),
            ..Self::default()
        }
    }

    /// A directory entry.
    #[must_use]
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directory: Some(true),
            ..Self::default()
        }
    }

    /// A symbolic link entry.
    #[must_use]
    pub fn link(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link_to: Some(target.into()),
            ..Self::default()
        }
    }

    /// A ghost entry.
    #[must_use]
    pub fn ghost(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ghost: Some(true),
            ..Self::default()
        }
    }

    /// A collector entry.
    #[must_use]
    pub fn collect(name: impl Into<String>, collector: Collector) -> Self {
        Self {
            name: name.into(),
            collect: Some(collector),
            ..Self::default()
        }
    }

    /// Use a named ruleset.
    #[must_use]
    pub fn with_ruleset(mut self, ruleset: impl Into<String>) -> Self {
        self.ruleset = Some(ruleset.into());
        self
    }

    /// Set explicit attributes.
    #[must_use]
    pub fn with_info(mut self, info: MetadataFragment) -> Self {
        self.info = info;
        self
    }

    /// Mark the entry as skipped.
    #[must_use]
    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Names of the kind selectors that are set.
    #[must_use]
    pub fn selectors(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.file.is_some() {
            set.push("file");
        }
        if self.directory == Some(true) {
            set.push("directory");
        }
        if self.link_to.is_some() {
            set.push("link-to");
        }
        if self.collect.is_some() {
            set.push("collect");
        }
        if self.ghost == Some(true) {
            set.push("ghost");
        }
        set
    }

    /// Validate the selectors and return the one that is set.
    ///
    /// # Errors
    ///
    /// Returns an error if zero or more than one selector is set.
    pub fn source(&self) -> Result<EntrySource<'_>, ResolveError> {
        let selectors = self.selectors();
        if selectors.is_empty() {
            return Err(self.invalid(
                "exactly one of file, directory, link-to, collect or ghost must be set".to_string(),
            ));
        }
        if selectors.len() > 1 {
            return Err(self.invalid(format!(
                "only one of file, directory, link-to, collect or ghost may be set, found: {}",
                selectors.join(", ")
            )));
        }

        if let Some(file) = &self.file {
            Ok(EntrySource::File(file))
        } else if let Some(target) = &self.link_to {
            Ok(EntrySource::Symlink(target))
        } else if let Some(collector) = &self.collect {
            Ok(EntrySource::Collect(collector))
        } else if self.directory == Some(true) {
            Ok(EntrySource::Directory)
        } else {
            Ok(EntrySource::Ghost)
        }
    }

    /// The canonical archive path of this entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid archive path.
    pub fn target_path(&self) -> Result<String, ResolveError> {
        canonical_path(&self.name).map_err(|reason| self.invalid(reason.to_string()))
    }

    fn invalid(&self, reason: String) -> ResolveError {
        ResolveError::InvalidEntry {
            name: self.name.clone(),
            reason,
        }
    }
}

/// Canonicalize an archive path.
///
/// Backslashes become forward slashes, repeated separators collapse and any
/// trailing slash is removed, except for the root itself.
///
/// # Errors
///
/// Returns a reason if the path is relative, empty, or contains `.`, `..` or
/// NUL.
pub fn canonical_path(raw: &str) -> Result<String, &'static str> {
    let unix = raw.replace('\\', "/");

    if !unix.starts_with('/') {
        return Err("target path must be absolute");
    }
    if unix.contains('\0') {
        return Err("target path must not contain NUL");
    }

    let mut canonical = String::with_capacity(unix.len());
    for component in unix.split('/').filter(|c| !c.is_empty()) {
        if component == "." || component == ".." {
            return Err("target path must not contain '.' or '..' components");
        }
        canonical.push('/');
        canonical.push_str(component);
    }

    if canonical.is_empty() {
        canonical.push('/');
    }
    Ok(canonical)
}

/// Strict ancestors of a canonical path, shallowest first, without the root.
pub(crate) fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(|(idx, _)| idx)
        .filter(|idx| *idx > 0)
        .map(move |idx| &path[..idx])
}

/// Whether `path` equals `base` or lies below it.
pub(crate) fn is_within(path: &str, base: &str) -> bool {
    base == "/"
        || path == base
        || path
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}

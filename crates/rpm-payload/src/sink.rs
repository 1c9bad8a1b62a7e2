//! Sinks receiving resolved entries and the hand-off to the archive builder.

use crate::digest::DigestCache;
use crate::manifest::ManifestError;
use crate::metadata::EntryKind;
use crate::resolve::{ArchiveEntryDescriptor, Content, ResolveError};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while filling or writing a payload.
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("failed to digest '{}': {source}", .path.display())]
    Digest {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("archive builder rejected '{path}': {reason}")]
    Builder { path: String, reason: String },
}

/// Receives resolved entries in emission order.
///
/// Sinks compose by wrapping: a decorator implements this trait and
/// forwards to the sink it owns.
pub trait EntrySink {
    /// Add one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink cannot accept the entry.
    fn add(&mut self, entry: ArchiveEntryDescriptor) -> Result<(), PayloadError>;

    /// Replace a directory that was added provisionally, keeping its
    /// position. Adds it if nothing is recorded under that path.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink cannot accept the entry.
    fn supersede_directory(&mut self, entry: ArchiveEntryDescriptor) -> Result<(), PayloadError>;

    /// The entries that follow come from a collector rooted at `root`.
    fn enter_collection(&mut self, _root: &str) {}

    /// The current collector is done.
    fn leave_collection(&mut self) {}
}

impl<S: EntrySink + ?Sized> EntrySink for &mut S {
    fn add(&mut self, entry: ArchiveEntryDescriptor) -> Result<(), PayloadError> {
        (**self).add(entry)
    }

    fn supersede_directory(&mut self, entry: ArchiveEntryDescriptor) -> Result<(), PayloadError> {
        (**self).supersede_directory(entry)
    }

    fn enter_collection(&mut self, root: &str) {
        (**self).enter_collection(root);
    }

    fn leave_collection(&mut self) {
        (**self).leave_collection();
    }
}

/// The external writer of the package archive.
pub trait ArchiveBuilder {
    /// Take ownership of one entry and its content digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be written.
    fn add_entry(
        &mut self,
        entry: ArchiveEntryDescriptor,
        digest: Option<String>,
    ) -> Result<(), PayloadError>;
}

/// The ordered list of entries of one build.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    entries: Vec<ArchiveEntryDescriptor>,
    index: HashMap<String, usize>,
}

impl Payload {
    /// Create an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in emission order.
    #[must_use]
    pub fn entries(&self) -> &[ArchiveEntryDescriptor] {
        &self.entries
    }

    /// Look up an entry by target path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&ArchiveEntryDescriptor> {
        self.index.get(path).map(|&idx| &self.entries[idx])
    }

    /// Target paths in emission order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.target_path.as_str())
    }

    /// Consume the payload.
    #[must_use]
    pub fn into_entries(self) -> Vec<ArchiveEntryDescriptor> {
        self.entries
    }

    /// Hand every entry to the archive builder in emission order.
    ///
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// Returns an error if a digest cannot be computed or the builder fails.
    pub fn write_to<B: ArchiveBuilder + ?Sized>(
        self,
        builder: &mut B,
        cache: &mut DigestCache,
    ) -> Result<usize, PayloadError> {
        let count = self.entries.len();

        for entry in self.entries {
            let digest = match entry.digest {
                Some(algorithm) if entry.kind == EntryKind::File => cache
                    .content_digest(&entry.content, algorithm)
                    .map_err(|source| PayloadError::Digest {
                        path: match &entry.content {
                            Content::Path(path) => path.clone(),
                            _ => PathBuf::from(&entry.target_path),
                        },
                        source,
                    })?,
                _ => None,
            };
            builder.add_entry(entry, digest)?;
        }

        Ok(count)
    }
}

impl EntrySink for Payload {
    fn add(&mut self, entry: ArchiveEntryDescriptor) -> Result<(), PayloadError> {
        self.index.insert(entry.target_path.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    fn supersede_directory(&mut self, entry: ArchiveEntryDescriptor) -> Result<(), PayloadError> {
        match self.index.get(&entry.target_path) {
            Some(&idx) => {
                self.entries[idx] = entry;
                Ok(())
            }
            None => self.add(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;
    use crate::metadata::{FileKind, Mode, ResolvedMetadata};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        written: Vec<(String, Option<String>)>,
    }

    impl ArchiveBuilder for Recorder {
        fn add_entry(
            &mut self,
            entry: ArchiveEntryDescriptor,
            digest: Option<String>,
        ) -> Result<(), PayloadError> {
            self.written.push((entry.target_path, digest));
            Ok(())
        }
    }

    fn directory(path: &str, mode: Mode) -> ArchiveEntryDescriptor {
        ArchiveEntryDescriptor {
            target_path: path.to_string(),
            kind: EntryKind::Directory,
            content: Content::None,
            metadata: ResolvedMetadata {
                mode,
                ..ResolvedMetadata::defaults(FileKind::Directory)
            },
            digest: None,
        }
    }

    #[test]
    fn supersede_keeps_position() {
        let mut payload = Payload::new();
        payload.add(directory("/opt", Mode::DIRECTORY)).unwrap();
        payload.add(directory("/opt/app", Mode::DIRECTORY)).unwrap();

        let explicit = Mode::new(0o700).unwrap();
        payload.supersede_directory(directory("/opt", explicit)).unwrap();

        assert_eq!(payload.paths().collect::<Vec<_>>(), vec!["/opt", "/opt/app"]);
        assert_eq!(payload.get("/opt").unwrap().metadata.mode, explicit);
    }

    #[test]
    fn supersede_unknown_path_adds() {
        let mut payload = Payload::new();
        payload.supersede_directory(directory("/srv", Mode::DIRECTORY)).unwrap();
        assert_eq!(payload.len(), 1);
    }

    #[test]
    fn write_to_builder_with_digests() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("run.sh");
        std::fs::write(&source, b"abc").unwrap();

        let file = |path: &str| ArchiveEntryDescriptor {
            target_path: path.to_string(),
            kind: EntryKind::File,
            content: Content::Path(source.clone()),
            metadata: ResolvedMetadata::defaults(FileKind::File),
            digest: Some(DigestAlgorithm::Sha256),
        };

        let mut payload = Payload::new();
        payload.add(directory("/opt", Mode::DIRECTORY)).unwrap();
        payload.add(file("/opt/a")).unwrap();
        payload.add(file("/opt/b")).unwrap();

        let mut builder = Recorder::default();
        let mut cache = DigestCache::new();
        let written = payload.write_to(&mut builder, &mut cache).unwrap();

        let expected = DigestAlgorithm::Sha256.digest_bytes(b"abc");
        assert_eq!(written, 3);
        assert_eq!(builder.written[0], ("/opt".to_string(), None));
        assert_eq!(builder.written[1].1.as_deref(), Some(expected.as_str()));
        assert_eq!(builder.written[2].1.as_deref(), Some(expected.as_str()));
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn missing_content_fails_digest() {
        let mut payload = Payload::new();
        payload
            .add(ArchiveEntryDescriptor {
                target_path: "/gone".to_string(),
                kind: EntryKind::File,
                content: Content::Path(PathBuf::from("/nonexistent/rpm-payload/gone")),
                metadata: ResolvedMetadata::defaults(FileKind::File),
                digest: Some(DigestAlgorithm::Sha256),
            })
            .unwrap();

        let err = payload
            .write_to(&mut Recorder::default(), &mut DigestCache::new())
            .unwrap_err();
        assert!(matches!(err, PayloadError::Digest { .. }));
    }
}

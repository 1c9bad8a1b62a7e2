//! Rule-based payload resolution for RPM package builds.
//!
//! This crate provides:
//! - Parsing and validation of `payload.toml` build descriptions
//! - Rulesets assigning mode, ownership and file flags by path
//! - Resolution of file, directory, symlink, ghost and collector entries
//! - Deterministic collection of source trees with include/exclude patterns
//! - Synthesis of implicit parent directories below configured base paths
//! - File digests handed to the archive builder

mod build;
mod collect;
mod digest;
mod entry;
mod evaluator;
mod intermediate;
mod manifest;
mod metadata;
mod resolve;
mod rule;
mod ruleset;
mod sink;

pub use build::{BuildOptions, EntryFailure, FailurePolicy, FillReport, PayloadBuilder};
pub use collect::{CollectedItem, CollectedKind, TreeCollector};
pub use digest::{DigestAlgorithm, DigestCache, UnknownDigestError};
pub use entry::{canonical_path, Collector, EntrySource, PackageEntry};
pub use evaluator::RulesetEvaluator;
pub use intermediate::IntermediateDirectorySynthesizer;
pub use manifest::{BuildManifest, ManifestError, OutputTimestamp, MANIFEST_FILE};
pub use metadata::{
    EntryKind, FileFlag, FileKind, InvalidModeError, MetadataFragment, Mode, ResolvedMetadata,
};
pub use resolve::{ArchiveEntryDescriptor, Content, EntryResolver, ResolveError};
pub use rule::{Condition, Rule};
pub use ruleset::Ruleset;
pub use sink::{ArchiveBuilder, EntrySink, Payload, PayloadError};

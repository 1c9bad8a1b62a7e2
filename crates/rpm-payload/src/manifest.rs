//! Build description (`payload.toml`) parsing and validation.
//!
//! ```toml
//! default-ruleset = "defaults"
//! intermediate-directories = ["/opt/app"]
//! output-timestamp = "2024-01-01T00:00:00Z"
//! file-digest = "SHA-256"
//!
//! [[ruleset]]
//! id = "defaults"
//!
//! [[ruleset.rule]]
//! when = { type = "directory" }
//! mode = "0755"
//! user = "root"
//!
//! [[entry]]
//! name = "/opt/app/bin/run.sh"
//! file = "src/run.sh"
//! mode = "0755"
//! ```

use crate::digest::DigestAlgorithm;
use crate::entry::{canonical_path, PackageEntry};
use crate::evaluator::RulesetEvaluator;
use crate::resolve::ResolveError;
use crate::ruleset::Ruleset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The conventional manifest filename.
pub const MANIFEST_FILE: &str = "payload.toml";

/// Errors that can occur when working with build manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid output timestamp '{0}': {1}")]
    InvalidTimestamp(String, String),

    #[error("duplicate ruleset '{0}'")]
    DuplicateRuleset(String),

    #[error("invalid intermediate directory '{0}': {1}")]
    InvalidBasePath(String, &'static str),
}

/// Fixed modification time for every entry.
///
/// Either seconds since the epoch (like `SOURCE_DATE_EPOCH`) or an RFC 3339
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputTimestamp {
    /// Seconds since the Unix epoch.
    Epoch(i64),
    /// RFC 3339 text, or epoch seconds as text.
    Formatted(String),
}

impl OutputTimestamp {
    /// Convert to a UTC time.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is out of range or not RFC 3339.
    pub fn to_datetime(&self) -> Result<DateTime<Utc>, ManifestError> {
        match self {
            Self::Epoch(secs) => from_epoch(*secs, &secs.to_string()),
            Self::Formatted(text) => {
                let text = text.trim();
                if let Ok(secs) = text.parse::<i64>() {
                    return from_epoch(secs, text);
                }
                DateTime::parse_from_rfc3339(text)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| ManifestError::InvalidTimestamp(text.to_string(), e.to_string()))
            }
        }
    }
}

fn from_epoch(secs: i64, raw: &str) -> Result<DateTime<Utc>, ManifestError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        ManifestError::InvalidTimestamp(raw.to_string(), "out of range".to_string())
    })
}

/// The complete build description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BuildManifest {
    /// Ruleset used by entries that name none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ruleset: Option<String>,

    /// Base paths below which implicit parent directories are added.
    #[serde(default)]
    pub intermediate_directories: Vec<String>,

    /// Fixed modification time for reproducible output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_timestamp: Option<OutputTimestamp>,

    /// Digest algorithm recorded for file content.
    #[serde(default)]
    pub file_digest: DigestAlgorithm,

    /// Rulesets.
    #[serde(default, rename = "ruleset")]
    pub rulesets: Vec<Ruleset>,

    /// Payload entries in declaration order.
    #[serde(default, rename = "entry")]
    pub entries: Vec<PackageEntry>,

    /// Directory relative sources are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl BuildManifest {
    /// Load a manifest from a file path.
    ///
    /// Relative source paths in the manifest are resolved against the
    /// directory containing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut manifest = Self::parse(&content)?;
        manifest.base_dir = path.parent().map(Path::to_path_buf);
        Ok(manifest)
    }

    /// Parse a manifest from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: Self = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate the manifest.
    fn validate(&self) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for ruleset in &self.rulesets {
            if !seen.insert(ruleset.name.as_str()) {
                return Err(ManifestError::DuplicateRuleset(ruleset.name.clone()));
            }
        }

        for base in &self.intermediate_directories {
            canonical_path(base).map_err(|reason| ManifestError::InvalidBasePath(base.clone(), reason))?;
        }

        self.output_time()?;
        Ok(())
    }

    /// The fixed modification time, if configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured timestamp is invalid.
    pub fn output_time(&self) -> Result<Option<DateTime<Utc>>, ManifestError> {
        self.output_timestamp
            .as_ref()
            .map(OutputTimestamp::to_datetime)
            .transpose()
    }

    /// Build the ruleset registry of this manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if two rulesets share a name.
    pub fn evaluator(&self) -> Result<RulesetEvaluator, ResolveError> {
        RulesetEvaluator::new(self.rulesets.iter().cloned(), self.default_ruleset.clone())
    }

    /// Entries that are not skipped.
    pub fn active_entries(&self) -> impl Iterator<Item = &PackageEntry> {
        self.entries.iter().filter(|e| !e.skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FileKind;
    use std::fs;
    use tempfile::TempDir;

    const FULL: &str = r#"
default-ruleset = "defaults"
intermediate-directories = ["/opt/app"]
output-timestamp = "2024-01-01T00:00:00Z"
file-digest = "SHA-512"

[[ruleset]]
id = "defaults"

[[ruleset.rule]]
when = { type = "directory" }
mode = "0755"
user = "root"

[[ruleset.rule]]
when = { prefix = "/etc/", type = "file" }
mode = "0640"
configuration = true

[[ruleset]]
id = "exec"

[[ruleset.rule]]
mode = "0755"

[[entry]]
name = "/opt/app/bin/run.sh"
file = "src/run.sh"
ruleset = "exec"

[[entry]]
name = "/opt/app/lib"
collect = { from = "target/lib", includes = ["**/*.jar"], directories = false }

[[entry]]
name = "/usr/bin/app"
link-to = "/opt/app/bin/run.sh"

[[entry]]
name = "/var/run/app.pid"
ghost = true

[[entry]]
name = "/var/log/app"
directory = true
user = "app"
skip = true
"#;

    #[test]
    fn parse_full_manifest() {
        let manifest = BuildManifest::parse(FULL).unwrap();
        assert_eq!(manifest.default_ruleset.as_deref(), Some("defaults"));
        assert_eq!(manifest.intermediate_directories, vec!["/opt/app"]);
        assert_eq!(manifest.file_digest, DigestAlgorithm::Sha512);
        assert_eq!(manifest.rulesets.len(), 2);
        assert_eq!(manifest.entries.len(), 5);
        assert_eq!(manifest.active_entries().count(), 4);

        let etc = &manifest.rulesets[0].rules[1];
        assert_eq!(etc.when.kind, Some(FileKind::File));
        assert_eq!(etc.effects.mode.map(|m| m.bits()), Some(0o640));

        let collector = manifest.entries[1].collect.as_ref().unwrap();
        assert!(!collector.directories);

        let log = &manifest.entries[4];
        assert!(log.skip);
        assert_eq!(log.info.owner.as_deref(), Some("app"));

        let stamp = manifest.output_time().unwrap().unwrap();
        assert_eq!(stamp.timestamp(), 1_704_067_200);
    }

    #[test]
    fn parse_minimal_manifest() {
        let manifest = BuildManifest::parse("").unwrap();
        assert!(manifest.entries.is_empty());
        assert_eq!(manifest.file_digest, DigestAlgorithm::Sha256);
        assert_eq!(manifest.output_time().unwrap(), None);
    }

    #[test]
    fn epoch_timestamps() {
        let manifest = BuildManifest::parse("output-timestamp = 1700000000").unwrap();
        assert_eq!(manifest.output_time().unwrap().unwrap().timestamp(), 1_700_000_000);

        let manifest = BuildManifest::parse("output-timestamp = \"1700000000\"").unwrap();
        assert_eq!(manifest.output_time().unwrap().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn invalid_timestamp() {
        let err = BuildManifest::parse("output-timestamp = \"yesterday\"").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidTimestamp(..)));
    }

    #[test]
    fn duplicate_rulesets() {
        let toml = r#"
[[ruleset]]
id = "a"

[[ruleset]]
id = "a"
"#;
        let err = BuildManifest::parse(toml).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateRuleset(name) if name == "a"));
    }

    #[test]
    fn invalid_mode_and_digest() {
        let toml = r#"
[[entry]]
name = "/x"
directory = true
mode = "0999"
"#;
        assert!(matches!(BuildManifest::parse(toml).unwrap_err(), ManifestError::Parse(..)));

        let err = BuildManifest::parse("file-digest = \"crc32\"").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(..)));
    }

    #[test]
    fn invalid_base_path() {
        let err = BuildManifest::parse("intermediate-directories = [\"opt\"]").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidBasePath(..)));
    }

    #[test]
    fn unknown_field_rejected() {
        let err = BuildManifest::parse("compression = \"xz\"").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(..)));
    }

    #[test]
    fn from_path_records_base_dir() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(MANIFEST_FILE);
        fs::write(&path, FULL).unwrap();

        let manifest = BuildManifest::from_path(&path).unwrap();
        assert_eq!(manifest.base_dir.as_deref(), Some(tmp.path()));
        assert!(manifest.evaluator().unwrap().get("exec").is_some());
    }
}

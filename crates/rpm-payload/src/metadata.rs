//! Entry kinds, classification flags and the metadata records rules produce.

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Error returned when a file mode cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid file mode '{0}': expected octal permission bits such as 0644")]
pub struct InvalidModeError(pub String);

/// The kind of filesystem object a rule can match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// A symbolic link.
    #[serde(alias = "link")]
    Symlink,
}

impl FileKind {
    /// Returns the kind as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of a materialized archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A regular file with content.
    File,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
    /// A placeholder recorded in metadata only.
    Ghost,
}

impl EntryKind {
    /// The kind rules see for this entry. Ghosts are matched as files.
    #[must_use]
    pub fn file_kind(self) -> FileKind {
        match self {
            Self::File | Self::Ghost => FileKind::File,
            Self::Directory => FileKind::Directory,
            Self::Symlink => FileKind::Symlink,
        }
    }

    /// Returns the kind as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Ghost => "ghost",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification flags attached to an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileFlag {
    /// Configuration file.
    Configuration,
    /// Documentation file.
    Documentation,
    /// README file.
    Readme,
    /// Verify the owner on installation checks.
    VerifyOwner,
    /// Verify the group on installation checks.
    VerifyGroup,
    /// Verify the link target on installation checks.
    VerifyLinkTo,
    /// Ghost entry, not shipped in the payload.
    Ghost,
}

impl FileFlag {
    /// All flags in their canonical order.
    pub const ALL: [Self; 7] = [
        Self::Configuration,
        Self::Documentation,
        Self::Readme,
        Self::VerifyOwner,
        Self::VerifyGroup,
        Self::VerifyLinkTo,
        Self::Ghost,
    ];

    /// Returns the flag as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "config",
            Self::Documentation => "doc",
            Self::Readme => "readme",
            Self::VerifyOwner => "verify-owner",
            Self::VerifyGroup => "verify-group",
            Self::VerifyLinkTo => "verify-linkto",
            Self::Ghost => "ghost",
        }
    }
}

impl fmt::Display for FileFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unix permission bits of an entry.
///
/// Configuration takes an octal string (`"0644"`). Integers are rejected:
/// TOML cannot tell `0o755` from a mistyped `755`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode(u32);

impl Mode {
    /// Default mode for regular files and ghosts.
    pub const FILE: Self = Self(0o644);

    /// Default mode for directories.
    pub const DIRECTORY: Self = Self(0o755);

    /// Default mode for symbolic links.
    pub const SYMLINK: Self = Self(0o777);

    /// Highest value accepted as permission bits.
    const MAX: u32 = 0o7777;

    /// Create a mode from raw permission bits.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has bits beyond `0o7777`.
    pub fn new(bits: u32) -> Result<Self, InvalidModeError> {
        if bits > Self::MAX {
            return Err(InvalidModeError(format!("{bits:o}")));
        }
        Ok(Self(bits))
    }

    /// The raw permission bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// The built-in default mode for a kind.
    #[must_use]
    pub fn default_for(kind: FileKind) -> Self {
        match kind {
            FileKind::File => Self::FILE,
            FileKind::Directory => Self::DIRECTORY,
            FileKind::Symlink => Self::SYMLINK,
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = InvalidModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
        if digits.is_empty() || digits.len() > 5 {
            return Err(InvalidModeError(s.to_string()));
        }
        let bits = u32::from_str_radix(digits, 8).map_err(|_| InvalidModeError(s.to_string()))?;
        Self::new(bits).map_err(|_| InvalidModeError(s.to_string()))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ModeVisitor;

        impl Visitor<'_> for ModeVisitor {
            type Value = Mode;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an octal mode string such as \"0755\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Mode, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ModeVisitor)
    }
}

/// A partial metadata record.
///
/// Every field is either unset (`None`) or set. Overlaying one fragment on
/// another replaces only the fields the upper fragment sets. Rule effects and
/// explicit entry attributes share this shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetadataFragment {
    /// Permission bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,

    /// Owning user name.
    #[serde(default, rename = "user", alias = "owner", skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Owning group name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Marks a configuration file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<bool>,

    /// Marks a documentation file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<bool>,

    /// Marks a README file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<bool>,

    /// Verify the owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_owner: Option<bool>,

    /// Verify the group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_group: Option<bool>,

    /// Verify the link target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_linkto: Option<bool>,

    /// Marks a ghost entry. Set by the `ghost` entry kind, never read from
    /// configuration, where `ghost` is the entry selector.
    #[serde(skip)]
    pub ghost: Option<bool>,
}

impl MetadataFragment {
    /// Create an empty fragment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mode.
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set the group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set a classification flag.
    #[must_use]
    pub fn with_flag(mut self, flag: FileFlag, value: bool) -> Self {
        *self.flag_slot(flag) = Some(value);
        self
    }

    /// The value of a flag, if set.
    #[must_use]
    pub fn flag(&self, flag: FileFlag) -> Option<bool> {
        match flag {
            FileFlag::Configuration => self.configuration,
            FileFlag::Documentation => self.documentation,
            FileFlag::Readme => self.readme,
            FileFlag::VerifyOwner => self.verify_owner,
            FileFlag::VerifyGroup => self.verify_group,
            FileFlag::VerifyLinkTo => self.verify_linkto,
            FileFlag::Ghost => self.ghost,
        }
    }

    fn flag_slot(&mut self, flag: FileFlag) -> &mut Option<bool> {
        match flag {
            FileFlag::Configuration => &mut self.configuration,
            FileFlag::Documentation => &mut self.documentation,
            FileFlag::Readme => &mut self.readme,
            FileFlag::VerifyOwner => &mut self.verify_owner,
            FileFlag::VerifyGroup => &mut self.verify_group,
            FileFlag::VerifyLinkTo => &mut self.verify_linkto,
            FileFlag::Ghost => &mut self.ghost,
        }
    }

    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Overlay `upper` on this fragment. Fields set in `upper` win.
    #[must_use]
    pub fn overlay(self, upper: &Self) -> Self {
        Self {
            mode: upper.mode.or(self.mode),
            owner: upper.owner.clone().or(self.owner),
            group: upper.group.clone().or(self.group),
            configuration: upper.configuration.or(self.configuration),
            documentation: upper.documentation.or(self.documentation),
            readme: upper.readme.or(self.readme),
            verify_owner: upper.verify_owner.or(self.verify_owner),
            verify_group: upper.verify_group.or(self.verify_group),
            verify_linkto: upper.verify_linkto.or(self.verify_linkto),
            ghost: upper.ghost.or(self.ghost),
        }
    }
}

/// Fully resolved metadata of one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMetadata {
    /// Permission bits.
    pub mode: Mode,

    /// Owning user, `None` leaves the archive builder's default.
    pub owner: Option<String>,

    /// Owning group, `None` leaves the archive builder's default.
    pub group: Option<String>,

    /// Classification flags that are on.
    pub flags: BTreeSet<FileFlag>,

    /// Fixed modification time for reproducible builds.
    pub modified: Option<DateTime<Utc>>,
}

impl ResolvedMetadata {
    /// Built-in defaults for a kind.
    #[must_use]
    pub fn defaults(kind: FileKind) -> Self {
        Self {
            mode: Mode::default_for(kind),
            owner: None,
            group: None,
            flags: BTreeSet::new(),
            modified: None,
        }
    }

    /// Apply a merged fragment on top of the built-in defaults for `kind`.
    #[must_use]
    pub fn from_fragment(kind: FileKind, fragment: &MetadataFragment) -> Self {
        let flags = FileFlag::ALL
            .into_iter()
            .filter(|flag| fragment.flag(*flag) == Some(true))
            .collect();

        Self {
            mode: fragment.mode.unwrap_or_else(|| Mode::default_for(kind)),
            owner: fragment.owner.clone(),
            group: fragment.group.clone(),
            flags,
            modified: None,
        }
    }

    /// Returns true if the flag is on.
    #[must_use]
    pub fn has_flag(&self, flag: FileFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Set the modification time.
    #[must_use]
    pub fn with_modified(mut self, modified: Option<DateTime<Utc>>) -> Self {
        self.modified = modified;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_octal_mode() {
        assert_eq!("0644".parse::<Mode>().unwrap().bits(), 0o644);
        assert_eq!("755".parse::<Mode>().unwrap().bits(), 0o755);
        assert_eq!("0o600".parse::<Mode>().unwrap().bits(), 0o600);
        assert_eq!("4755".parse::<Mode>().unwrap().bits(), 0o4755);
    }

    #[test]
    fn reject_invalid_mode() {
        assert!("0689".parse::<Mode>().is_err());
        assert!("".parse::<Mode>().is_err());
        assert!("rwxr-xr-x".parse::<Mode>().is_err());
        assert!("17777".parse::<Mode>().is_err());
        assert!(Mode::new(0o10000).is_err());
    }

    #[test]
    fn mode_from_toml_string_only() {
        #[derive(Deserialize)]
        struct Holder {
            mode: Mode,
        }

        let holder: Holder = toml::from_str("mode = \"0750\"").unwrap();
        assert_eq!(holder.mode.bits(), 0o750);

        assert!(toml::from_str::<Holder>("mode = 755").is_err());
        assert!(toml::from_str::<Holder>("mode = 0o755").is_err());
    }

    #[test]
    fn mode_display_is_octal() {
        assert_eq!(Mode::FILE.to_string(), "0644");
        assert_eq!(Mode::new(0o4755).unwrap().to_string(), "4755");
    }

    #[test]
    fn overlay_keeps_unset_fields() {
        let lower = MetadataFragment::new()
            .with_mode(Mode::FILE)
            .with_owner("root")
            .with_flag(FileFlag::Configuration, true);
        let upper = MetadataFragment::new().with_owner("app");

        let merged = lower.overlay(&upper);
        assert_eq!(merged.mode, Some(Mode::FILE));
        assert_eq!(merged.owner.as_deref(), Some("app"));
        assert_eq!(merged.configuration, Some(true));
    }

    #[test]
    fn overlay_can_clear_a_flag() {
        let lower = MetadataFragment::new().with_flag(FileFlag::Documentation, true);
        let upper = MetadataFragment::new().with_flag(FileFlag::Documentation, false);

        let merged = lower.overlay(&upper);
        let resolved = ResolvedMetadata::from_fragment(FileKind::File, &merged);
        assert!(!resolved.has_flag(FileFlag::Documentation));
    }

    #[test]
    fn defaults_by_kind() {
        let empty = MetadataFragment::new();
        assert_eq!(
            ResolvedMetadata::from_fragment(FileKind::File, &empty).mode,
            Mode::FILE
        );
        assert_eq!(
            ResolvedMetadata::from_fragment(FileKind::Directory, &empty).mode,
            Mode::DIRECTORY
        );
        assert_eq!(
            ResolvedMetadata::from_fragment(FileKind::Symlink, &empty),
            ResolvedMetadata::defaults(FileKind::Symlink)
        );
    }

    #[test]
    fn ghost_matches_as_file() {
        assert_eq!(EntryKind::Ghost.file_kind(), FileKind::File);
        assert_eq!(EntryKind::Symlink.file_kind(), FileKind::Symlink);
    }
}

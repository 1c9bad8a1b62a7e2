//! The payload fill loop: declared entries in, ordered descriptors out.

use crate::digest::DigestAlgorithm;
use crate::entry::PackageEntry;
use crate::evaluator::RulesetEvaluator;
use crate::intermediate::IntermediateDirectorySynthesizer;
use crate::manifest::BuildManifest;
use crate::resolve::{EntryResolver, ResolveError};
use crate::sink::{EntrySink, Payload, PayloadError};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, warn};

/// What to do when one entry fails to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first failing entry.
    #[default]
    Abort,
    /// Record the failure and go on with the next entry. Sink failures
    /// still stop the build.
    Continue,
}

/// An entry that failed under [`FailurePolicy::Continue`].
#[derive(Debug)]
pub struct EntryFailure {
    /// Declared name of the entry.
    pub entry: String,
    /// Why it failed.
    pub error: ResolveError,
}

/// Summary of one fill run.
#[derive(Debug, Default)]
pub struct FillReport {
    /// Descriptors resolved from declared entries, synthesized ones excluded.
    pub resolved: usize,
    /// Names of skipped entries.
    pub skipped: Vec<String>,
    /// Entries that failed.
    pub failed: Vec<EntryFailure>,
}

impl FillReport {
    /// Returns true if no entry failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Build-wide settings.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Base paths for intermediate directory synthesis.
    pub intermediate_directories: Vec<String>,
    /// Fixed modification time of every entry.
    pub output_time: Option<DateTime<Utc>>,
    /// Digest recorded for file content.
    pub file_digest: DigestAlgorithm,
    /// Directory relative sources are resolved against.
    pub base_dir: Option<PathBuf>,
    /// Failure handling.
    pub failure_policy: FailurePolicy,
}

/// Resolves declared entries in order and feeds them to a sink.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    evaluator: RulesetEvaluator,
    options: BuildOptions,
}

impl PayloadBuilder {
    /// Create a builder.
    #[must_use]
    pub fn new(evaluator: RulesetEvaluator, options: BuildOptions) -> Self {
        Self { evaluator, options }
    }

    /// Create a builder from a manifest's rulesets and settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the rulesets or the timestamp are invalid.
    pub fn from_manifest(manifest: &BuildManifest) -> Result<Self, PayloadError> {
        let options = BuildOptions {
            intermediate_directories: manifest.intermediate_directories.clone(),
            output_time: manifest.output_time()?,
            file_digest: manifest.file_digest,
            base_dir: manifest.base_dir.clone(),
            failure_policy: FailurePolicy::default(),
        };
        Ok(Self::new(manifest.evaluator()?, options))
    }

    /// Set the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.options.failure_policy = policy;
        self
    }

    /// The ruleset registry.
    #[must_use]
    pub fn evaluator(&self) -> &RulesetEvaluator {
        &self.evaluator
    }

    /// The build settings.
    #[must_use]
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// A resolver configured with this build's settings.
    #[must_use]
    pub fn resolver(&self) -> EntryResolver<'_> {
        let resolver = EntryResolver::new(&self.evaluator)
            .with_modified(self.options.output_time)
            .with_digest(self.options.file_digest);
        match &self.options.base_dir {
            Some(dir) => resolver.with_base_dir(dir),
            None => resolver,
        }
    }

    /// Resolve `entries` in declaration order into `sink`.
    ///
    /// The sink is wrapped in an [`IntermediateDirectorySynthesizer`] when
    /// base paths are configured.
    ///
    /// # Errors
    ///
    /// Returns the first entry failure under [`FailurePolicy::Abort`], and
    /// any sink failure.
    pub fn fill<S: EntrySink>(&self, entries: &[PackageEntry], sink: S) -> Result<FillReport, PayloadError> {
        if self.options.intermediate_directories.is_empty() {
            return self.fill_into(entries, sink);
        }

        let synthesizer = IntermediateDirectorySynthesizer::new(
            sink,
            &self.evaluator,
            &self.options.intermediate_directories,
        )?
        .with_modified(self.options.output_time);
        self.fill_into(entries, synthesizer)
    }

    /// Resolve `entries` into a fresh payload.
    ///
    /// # Errors
    ///
    /// See [`PayloadBuilder::fill`].
    pub fn build(&self, entries: &[PackageEntry]) -> Result<(Payload, FillReport), PayloadError> {
        let mut payload = Payload::new();
        let report = self.fill(entries, &mut payload)?;
        Ok((payload, report))
    }

    fn fill_into<S: EntrySink>(&self, entries: &[PackageEntry], mut sink: S) -> Result<FillReport, PayloadError> {
        let resolver = self.resolver();
        let mut report = FillReport::default();

        debug!(
            default_ruleset = ?self.evaluator.default_ruleset(),
            entries = entries.len(),
            "building payload"
        );

        for entry in entries {
            if entry.skip {
                debug!(entry = %entry.name, "skipping entry");
                report.skipped.push(entry.name.clone());
                continue;
            }

            let descriptors = match resolver.resolve(entry) {
                Ok(descriptors) => descriptors,
                Err(error) => match self.options.failure_policy {
                    FailurePolicy::Abort => return Err(error.into()),
                    FailurePolicy::Continue => {
                        warn!(entry = %entry.name, %error, "entry failed");
                        report.failed.push(EntryFailure {
                            entry: entry.name.clone(),
                            error,
                        });
                        continue;
                    }
                },
            };

            let collection_root = match entry.collect {
                Some(_) => Some(entry.target_path()?),
                None => None,
            };

            if let Some(root) = &collection_root {
                sink.enter_collection(root);
            }
            report.resolved += descriptors.len();
            for descriptor in descriptors {
                sink.add(descriptor)?;
            }
            if collection_root.is_some() {
                sink.leave_collection();
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntryKind, FileFlag, Mode};
    use crate::resolve::Content;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
default-ruleset = "defaults"
intermediate-directories = ["/opt/app"]
output-timestamp = 1700000000

[[ruleset]]
id = "defaults"

[[ruleset.rule]]
user = "root"
group = "root"

[[ruleset.rule]]
when = { type = "directory" }
mode = "0750"

[[ruleset]]
id = "exec"

[[ruleset.rule]]
mode = "0755"
user = "app"

[[entry]]
name = "/opt/app/bin/run.sh"
file = "src/run.sh"
ruleset = "exec"

[[entry]]
name = "/opt/app/lib"
collect = { from = "lib", directories = false }

[[entry]]
name = "/usr/bin/app"
link-to = "/opt/app/bin/run.sh"

[[entry]]
name = "/var/run/app.pid"
ghost = true

[[entry]]
name = "/var/log/app"
directory = true
skip = true
"#;

    fn project() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("lib/ext")).unwrap();
        fs::write(root.join("src/run.sh"), "#!/bin/sh\nexec java -jar app.jar\n").unwrap();
        fs::write(root.join("lib/b.jar"), "b").unwrap();
        fs::write(root.join("lib/a.jar"), "a").unwrap();
        fs::write(root.join("lib/ext/c.jar"), "c").unwrap();
        tmp
    }

    fn manifest(root: &Path) -> BuildManifest {
        let mut manifest = BuildManifest::parse(MANIFEST).unwrap();
        manifest.base_dir = Some(root.to_path_buf());
        manifest
    }

    #[test]
    fn full_pipeline_order() {
        let tmp = project();
        let manifest = manifest(tmp.path());
        let builder = PayloadBuilder::from_manifest(&manifest).unwrap();
        let (payload, report) = builder.build(&manifest.entries).unwrap();

        assert_eq!(
            payload.paths().collect::<Vec<_>>(),
            vec![
                "/opt/app",
                "/opt/app/bin",
                "/opt/app/bin/run.sh",
                "/opt/app/lib",
                "/opt/app/lib/a.jar",
                "/opt/app/lib/b.jar",
                "/opt/app/lib/ext/c.jar",
                "/usr/bin/app",
                "/var/run/app.pid",
            ]
        );
        assert_eq!(report.resolved, 6);
        assert_eq!(report.skipped, vec!["/var/log/app"]);
        assert!(report.is_clean());

        let run = payload.get("/opt/app/bin/run.sh").unwrap();
        assert_eq!(run.metadata.mode, Mode::new(0o755).unwrap());
        assert_eq!(run.metadata.owner.as_deref(), Some("app"));
        assert_eq!(run.metadata.group, None);
        assert_eq!(run.content, Content::Path(tmp.path().join("src/run.sh")));

        let synthesized = payload.get("/opt/app/lib").unwrap();
        assert_eq!(synthesized.kind, EntryKind::Directory);
        assert_eq!(synthesized.metadata.mode, Mode::new(0o750).unwrap());
        assert_eq!(synthesized.metadata.owner.as_deref(), Some("root"));

        let ghost = payload.get("/var/run/app.pid").unwrap();
        assert!(ghost.metadata.has_flag(FileFlag::Ghost));

        let stamp = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert!(payload.entries().iter().all(|e| e.metadata.modified == Some(stamp)));
    }

    #[test]
    fn builds_are_reproducible() {
        let tmp = project();
        let manifest = manifest(tmp.path());
        let builder = PayloadBuilder::from_manifest(&manifest).unwrap();

        let (first, _) = builder.build(&manifest.entries).unwrap();
        let (second, _) = builder.build(&manifest.entries).unwrap();
        assert_eq!(first.entries(), second.entries());
    }

    #[test]
    fn explicit_directory_replaces_synthesized() {
        let tmp = project();
        let manifest = manifest(tmp.path());
        let mut entries = manifest.entries.clone();
        entries.push(PackageEntry::directory("/opt/app/bin").with_info(
            crate::metadata::MetadataFragment::new().with_mode(Mode::new(0o700).unwrap()),
        ));

        let builder = PayloadBuilder::from_manifest(&manifest).unwrap();
        let (payload, _) = builder.build(&entries).unwrap();

        let bins: Vec<_> = payload.paths().filter(|p| *p == "/opt/app/bin").collect();
        assert_eq!(bins.len(), 1);
        assert_eq!(payload.entries()[1].target_path, "/opt/app/bin");
        assert_eq!(payload.entries()[1].metadata.mode, Mode::new(0o700).unwrap());
    }

    #[test]
    fn abort_on_first_failure() {
        let tmp = project();
        let manifest = manifest(tmp.path());
        let mut entries = vec![PackageEntry::file("/etc/missing.conf", "missing.conf")];
        entries.extend(manifest.entries.iter().cloned());

        let builder = PayloadBuilder::from_manifest(&manifest).unwrap();
        let err = builder.build(&entries).unwrap_err();
        assert!(matches!(
            err,
            PayloadError::Resolve(ResolveError::MissingSourceFile { .. })
        ));
    }

    #[test]
    fn continue_past_failures() {
        let tmp = project();
        let manifest = manifest(tmp.path());
        let entries = vec![
            PackageEntry::directory("/srv/data"),
            PackageEntry::directory("/srv/other").with_ruleset("missing"),
            PackageEntry::link("/srv/link", "/srv/data"),
        ];

        let builder = PayloadBuilder::from_manifest(&manifest)
            .unwrap()
            .with_failure_policy(FailurePolicy::Continue);
        let (payload, report) = builder.build(&entries).unwrap();

        assert_eq!(payload.paths().collect::<Vec<_>>(), vec!["/srv/data", "/srv/link"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].entry, "/srv/other");
        assert!(matches!(report.failed[0].error, ResolveError::UnknownRuleset(..)));
    }

    #[test]
    fn unknown_default_ruleset_fails_before_filling() {
        let manifest = BuildManifest::parse(
            "default-ruleset = \"missing\"\nintermediate-directories = [\"/opt\"]\n",
        )
        .unwrap();

        let err = PayloadBuilder::from_manifest(&manifest).unwrap_err();
        assert!(matches!(
            err,
            PayloadError::Resolve(ResolveError::UnknownRuleset(name)) if name == "missing"
        ));
    }

    #[test]
    fn skipped_entries_are_not_validated() {
        let builder = PayloadBuilder::new(RulesetEvaluator::default(), BuildOptions::default());
        let broken = PackageEntry {
            name: "not-absolute".to_string(),
            ..PackageEntry::default()
        }
        .skipped();

        let (payload, report) = builder.build(&[broken]).unwrap();
        assert!(payload.is_empty());
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn no_synthesis_without_base_paths() {
        let builder = PayloadBuilder::new(RulesetEvaluator::default(), BuildOptions::default());
        let (payload, _) = builder
            .build(&[PackageEntry::link("/opt/app/bin/tool", "../lib/tool")])
            .unwrap();
        assert_eq!(payload.len(), 1);
        assert_eq!(payload.entries()[0].metadata.mode, Mode::SYMLINK);
    }
}

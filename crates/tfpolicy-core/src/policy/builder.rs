//! Template tree → resolved per-environment output directory.
//!
//! `read` → `process` → `write`. Re-running with the same templates and
//! settings rewrites identical bytes. After writing, `*.xml` files left in the
//! target directory by an earlier build are removed, so the directory holds
//! exactly the current resolved set. `write` is not transactional: a failure
//! leaves whatever was already written, and the prescribed recovery is to
//! build again.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::policy::document::PolicyDocument;
use crate::policy::error::{PolicyError, PolicyResult};
use crate::policy::{is_policy_file, read_policies};
use crate::policy::settings::{Settings, SettingsSubstitution};

/// One resolved file written by [`PolicyBuilder::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPolicy {
    pub policy_id: String,
    pub path: PathBuf,
    /// SHA-256 hex of the written bytes.
    pub digest: String,
}

/// Summary of a completed write.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub target_dir: PathBuf,
    pub written: Vec<WrittenPolicy>,
    /// Stale outputs from an earlier build, deleted after writing.
    pub removed: Vec<PathBuf>,
}

impl BuildReport {
    pub fn len(&self) -> usize {
        self.written.len()
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }
}

/// Builds resolved policies for one environment.
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    templates: Vec<PolicyDocument>,
    processed: Option<Vec<PolicyDocument>>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every template under `source_dir` (recursively).
    ///
    /// Fails if the directory is missing or any file is not a parseable policy.
    /// Replaces anything loaded or processed earlier.
    pub fn read(&mut self, source_dir: impl AsRef<Path>) -> PolicyResult<usize> {
        let source_dir = source_dir.as_ref();
        self.templates = read_policies(source_dir)?;
        self.processed = None;
        info!(
            source = %source_dir.display(),
            count = self.templates.len(),
            "read policy templates"
        );
        Ok(self.templates.len())
    }

    /// Substitute `settings` into every loaded template.
    ///
    /// Stops at the first unresolved placeholder. Two templates resolving to
    /// the same id are rejected since each id maps to exactly one output file.
    pub fn process(&mut self, settings: &Settings) -> PolicyResult<()> {
        let engine = SettingsSubstitution::new(settings);
        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        let mut processed = Vec::with_capacity(self.templates.len());

        for template in &self.templates {
            let resolved = engine.apply(template)?;
            if let Some(first) = seen.insert(resolved.id().to_string(), resolved.source().into())
            {
                return Err(PolicyError::DuplicatePolicyId {
                    policy_id: resolved.id().to_string(),
                    first,
                    second: resolved.source().to_path_buf(),
                });
            }
            debug!(policy_id = %resolved.id(), template = %template.id(), "resolved policy");
            processed.push(resolved);
        }

        self.processed = Some(processed);
        Ok(())
    }

    /// Write each processed policy to `<target_dir>/<id>.xml`, creating the
    /// directory if needed, then delete any other `*.xml` file directly in
    /// `target_dir`.
    pub fn write(&self, target_dir: impl AsRef<Path>) -> PolicyResult<BuildReport> {
        let target_dir = target_dir.as_ref();
        let processed = self.processed.as_ref().ok_or(PolicyError::NotProcessed)?;

        fs::create_dir_all(target_dir).map_err(|e| PolicyError::io(target_dir, e))?;

        let mut written = Vec::with_capacity(processed.len());
        for policy in processed {
            let path = target_dir.join(policy.file_name());
            fs::write(&path, policy.content()).map_err(|e| PolicyError::io(&path, e))?;
            debug!(policy_id = %policy.id(), path = %path.display(), "wrote policy");
            written.push(WrittenPolicy {
                policy_id: policy.id().to_string(),
                path,
                digest: hex::encode(Sha256::digest(policy.content())),
            });
        }

        let removed = remove_stale_outputs(target_dir, &written)?;

        info!(
            target = %target_dir.display(),
            count = written.len(),
            removed = removed.len(),
            "wrote resolved policies"
        );

        Ok(BuildReport {
            target_dir: target_dir.to_path_buf(),
            written,
            removed,
        })
    }

    pub fn templates(&self) -> &[PolicyDocument] {
        &self.templates
    }

    /// Resolved documents, once [`process`](Self::process) has succeeded.
    pub fn processed(&self) -> Option<&[PolicyDocument]> {
        self.processed.as_deref()
    }
}

fn remove_stale_outputs(
    target_dir: &Path,
    written: &[WrittenPolicy],
) -> PolicyResult<Vec<PathBuf>> {
    let current: HashSet<&Path> = written.iter().map(|w| w.path.as_path()).collect();
    let entries = fs::read_dir(target_dir).map_err(|e| PolicyError::io(target_dir, e))?;

    let mut removed = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PolicyError::io(target_dir, e))?.path();
        if !path.is_file() || !is_policy_file(&path) || current.contains(path.as_path()) {
            continue;
        }
        fs::remove_file(&path).map_err(|e| PolicyError::io(&path, e))?;
        debug!(path = %path.display(), "removed stale policy");
        removed.push(path);
    }

    removed.sort();
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_template(dir: &Path, name: &str, id: &str, parent: Option<&str>) {
        let base = parent
            .map(|p| format!("<BasePolicy><PolicyId>{p}</PolicyId></BasePolicy>"))
            .unwrap_or_default();
        let xml = format!(
            r#"<TrustFrameworkPolicy TenantId="${{Tenant}}" PolicyId="{id}">{base}</TrustFrameworkPolicy>"#
        );
        fs::write(dir.join(name), xml).unwrap();
    }

    fn tenant_settings() -> Settings {
        Settings::from([("Tenant".to_string(), "t.onmicrosoft.com".to_string())])
    }

    #[test]
    fn write_before_process_is_rejected() {
        let out = tempfile::tempdir().unwrap();
        let err = PolicyBuilder::new().write(out.path()).unwrap_err();
        assert!(matches!(err, PolicyError::NotProcessed));
    }

    #[test]
    fn read_fails_for_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = PolicyBuilder::new()
            .read(dir.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, PolicyError::Io { .. }));
    }

    #[test]
    fn read_fails_when_any_template_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "base.xml", "Base", None);
        fs::write(dir.path().join("broken.xml"), "<TrustFrameworkPolicy PolicyId=\"x\">").unwrap();

        let mut builder = PolicyBuilder::new();
        let err = builder.read(dir.path()).unwrap_err();
        assert!(matches!(err, PolicyError::MalformedXml { .. }));
    }

    #[test]
    fn process_rejects_ids_colliding_after_substitution() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "a.xml", "B2C_1A_${Name}", None);
        write_template(dir.path(), "b.xml", "B2C_1A_Base", None);

        let mut builder = PolicyBuilder::new();
        builder.read(dir.path()).unwrap();
        let settings = Settings::from([
            ("Tenant".to_string(), "t".to_string()),
            ("Name".to_string(), "Base".to_string()),
        ]);
        let err = builder.process(&settings).unwrap_err();
        assert!(matches!(err, PolicyError::DuplicatePolicyId { .. }));
    }

    #[test]
    fn write_names_files_after_resolved_ids_and_reports_digests() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_template(src.path(), "whatever.xml", "B2C_1A_Base", None);

        let mut builder = PolicyBuilder::new();
        builder.read(src.path()).unwrap();
        builder.process(&tenant_settings()).unwrap();
        let report = builder.write(out.path().join("dev")).unwrap();

        assert_eq!(report.len(), 1);
        let written = &report.written[0];
        assert_eq!(written.policy_id, "B2C_1A_Base");
        assert_eq!(written.path, out.path().join("dev").join("B2C_1A_Base.xml"));
        assert_eq!(written.digest.len(), 64);

        let content = fs::read_to_string(&written.path).unwrap();
        assert!(content.contains("t.onmicrosoft.com"));
    }

    #[test]
    fn process_rejects_settings_that_escape_the_target() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_template(src.path(), "base.xml", "${Env}Base", None);

        let mut builder = PolicyBuilder::new();
        builder.read(src.path()).unwrap();
        let settings = Settings::from([
            ("Tenant".to_string(), "t".to_string()),
            ("Env".to_string(), "../../".to_string()),
        ]);
        let err = builder.process(&settings).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPolicyId { .. }));

        let target = out.path().join("build").join("dev");
        assert!(matches!(builder.write(&target), Err(PolicyError::NotProcessed)));
        assert!(!out.path().join("Base.xml").exists());
        assert!(!target.exists());
    }

    #[test]
    fn write_removes_outputs_of_dropped_templates() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let target = out.path().join("dev");
        write_template(src.path(), "base.xml", "Base", None);
        write_template(src.path(), "old.xml", "OldRP", Some("Base"));

        let mut builder = PolicyBuilder::new();
        builder.read(src.path()).unwrap();
        builder.process(&tenant_settings()).unwrap();
        let first = builder.write(&target).unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.removed.is_empty());

        fs::remove_file(src.path().join("old.xml")).unwrap();
        fs::write(target.join("notes.txt"), "keep me").unwrap();
        builder.read(src.path()).unwrap();
        builder.process(&tenant_settings()).unwrap();
        let second = builder.write(&target).unwrap();

        assert_eq!(second.len(), 1);
        assert_eq!(second.removed, vec![target.join("OldRP.xml")]);
        assert!(target.join("Base.xml").is_file());
        assert!(!target.join("OldRP.xml").exists());
        assert!(target.join("notes.txt").is_file());
    }
}

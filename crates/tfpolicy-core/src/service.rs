//! Build/deploy facade over a set of configured environments.
//!
//! A [`PolicyService`] owns the environment list plus absolute source and
//! target directories. Resolved output for environment `env` lives in
//! `<target>/<env>`; `batches` and `deploy_policies` read it back from there,
//! so `build_policies` must have run first.
//!
//! When a [`TenantDirectory`] is available, `build_policies_for_tenant`
//! replaces the `Tenant` setting with the tenant's default domain before
//! building. A failed lookup is logged and the configured value is kept.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use crate::deploy::{
    deploy_batches, BatchError, BatchUploader, DeployError, DeployReport, PolicyFailure,
    PolicyTransport, TenantDirectory, TransportError, UploadOptions,
};
use crate::environment::{self, ConfigError, EnvironmentConfig};
use crate::obs::{emit_build_finished, emit_deploy_finished, DeploySpan};
use crate::policy::{
    BuildReport, PolicyBuilder, PolicyDocument, PolicyError, PolicyTree, Settings,
};

/// Setting overwritten by a successful tenant lookup.
pub const TENANT_SETTING: &str = "Tenant";

/// Errors surfaced by [`PolicyService`] operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot resolve path {path}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("build of environment {environment} failed during {stage}: {source}")]
    Build {
        environment: String,
        stage: &'static str,
        #[source]
        source: PolicyError,
    },

    #[error("no resolved policies for environment {environment} at {dir}; did you run build?")]
    NotBuilt { environment: String, dir: PathBuf },

    #[error("invalid policy tree in {dir}: {source}")]
    Tree {
        dir: PathBuf,
        #[source]
        source: PolicyError,
    },

    #[error("deploy of environment {environment} failed: {source}")]
    Deploy {
        environment: String,
        #[source]
        source: DeployError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to delete policies: {0}")]
    Delete(BatchError),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Entry point for building and deploying policies per environment.
#[derive(Debug, Clone)]
pub struct PolicyService {
    environments: Vec<EnvironmentConfig>,
    source_dir: PathBuf,
    target_dir: PathBuf,
}

impl PolicyService {
    /// Relative directories are resolved against the current directory.
    pub fn new(
        environments: Vec<EnvironmentConfig>,
        source_dir: impl AsRef<Path>,
        target_dir: impl AsRef<Path>,
    ) -> ServiceResult<Self> {
        Ok(Self {
            environments,
            source_dir: absolute(source_dir.as_ref())?,
            target_dir: absolute(target_dir.as_ref())?,
        })
    }

    /// Load environments from a YAML file, then as [`new`](Self::new).
    pub fn from_config_file(
        config: impl AsRef<Path>,
        source_dir: impl AsRef<Path>,
        target_dir: impl AsRef<Path>,
    ) -> ServiceResult<Self> {
        let environments = environment::load_environments(config)?;
        Self::new(environments, source_dir, target_dir)
    }

    pub fn environments(&self) -> &[EnvironmentConfig] {
        &self.environments
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn find_config(&self, name: &str) -> ServiceResult<&EnvironmentConfig> {
        Ok(environment::find(&self.environments, name)?)
    }

    /// Directory holding the resolved policies of `environment`.
    pub fn output_dir(&self, environment: &str) -> PathBuf {
        self.target_dir.join(environment)
    }

    /// Read templates, substitute the environment's settings, and write the
    /// resolved policies to [`output_dir`](Self::output_dir).
    pub fn build_policies(&self, environment: &str) -> ServiceResult<BuildReport> {
        let config = self.find_config(environment)?;
        self.build_with_settings(environment, &config.settings)
    }

    /// As [`build_policies`](Self::build_policies), with the `Tenant` setting
    /// taken from `directory` when the lookup succeeds.
    pub async fn build_policies_for_tenant(
        &self,
        environment: &str,
        directory: &dyn TenantDirectory,
    ) -> ServiceResult<BuildReport> {
        let config = self.find_config(environment)?;
        let mut settings = config.settings.clone();

        match directory.default_domain().await {
            Ok(domain) => {
                info!(
                    environment = %environment,
                    tenant = %domain,
                    "found tenant information, updating settings"
                );
                settings.insert(TENANT_SETTING.to_string(), domain);
            }
            Err(e) => {
                debug!(
                    environment = %environment,
                    error = %e,
                    "tenant lookup failed, keeping configured settings"
                );
            }
        }

        self.build_with_settings(environment, &settings)
    }

    fn build_with_settings(
        &self,
        environment: &str,
        settings: &Settings,
    ) -> ServiceResult<BuildReport> {
        let stage = |stage: &'static str| {
            move |source: PolicyError| ServiceError::Build {
                environment: environment.to_string(),
                stage,
                source,
            }
        };

        let mut builder = PolicyBuilder::new();
        builder.read(&self.source_dir).map_err(stage("read"))?;
        builder.process(settings).map_err(stage("process"))?;
        let report = builder
            .write(self.output_dir(environment))
            .map_err(stage("write"))?;

        emit_build_finished(environment, report.len(), &report.target_dir);
        Ok(report)
    }

    /// Upload plan for `environment`, read from its resolved output.
    pub fn batches(&self, environment: &str) -> ServiceResult<Vec<Vec<PolicyDocument>>> {
        self.find_config(environment)?;
        let dir = self.output_dir(environment);
        if !dir.is_dir() {
            return Err(ServiceError::NotBuilt {
                environment: environment.to_string(),
                dir,
            });
        }

        let tree = PolicyTree::read(&dir).map_err(|source| ServiceError::Tree {
            dir: dir.clone(),
            source,
        })?;
        let batches = tree.batches();
        debug!(
            environment = %environment,
            policies = tree.len(),
            batches = batches.len(),
            "planned upload batches"
        );
        Ok(batches)
    }

    /// Upload the resolved policies of `environment` batch by batch.
    ///
    /// Halts at the first batch with any failure; later batches are skipped.
    pub async fn deploy_policies(
        &self,
        environment: &str,
        transport: Arc<dyn PolicyTransport>,
        options: UploadOptions,
    ) -> ServiceResult<DeployReport> {
        let batches = self.batches(environment)?;
        let uploader =
            BatchUploader::new(transport, DeploySpan::create(environment)).with_options(options);

        let started = Instant::now();
        let result = deploy_batches(&uploader, &batches).await;
        let uploaded = match &result {
            Ok(report) => report.uploaded_count(),
            Err(DeployError::BatchFailed { batch, succeeded, .. }) => {
                batches[..*batch].iter().map(Vec::len).sum::<usize>() + succeeded.len()
            }
        };
        emit_deploy_finished(environment, started.elapsed(), uploaded, result.is_ok());

        result.map_err(|source| ServiceError::Deploy {
            environment: environment.to_string(),
            source,
        })
    }

    /// Ids of every policy currently stored remotely, sorted.
    pub async fn list_policies(
        &self,
        transport: &dyn PolicyTransport,
    ) -> ServiceResult<Vec<String>> {
        let mut ids = transport.list_policies().await?;
        ids.sort();
        Ok(ids)
    }

    /// Delete every remote policy.
    ///
    /// Every listed policy is attempted; failures are collected into one
    /// error. Returns the deleted ids.
    pub async fn delete_policies(
        &self,
        transport: &dyn PolicyTransport,
    ) -> ServiceResult<Vec<String>> {
        let ids = self.list_policies(transport).await?;
        let mut deleted = Vec::with_capacity(ids.len());
        let mut failures = Vec::new();

        for policy_id in ids {
            match transport.delete_policy(&policy_id).await {
                Ok(()) => {
                    debug!(policy_id = %policy_id, "deleted policy");
                    deleted.push(policy_id);
                }
                Err(cause) => failures.push(PolicyFailure { policy_id, cause }),
            }
        }

        info!(
            deleted = deleted.len(),
            failed = failures.len(),
            "deleted remote policies"
        );
        match BatchError::from_failures(failures) {
            Some(err) => Err(ServiceError::Delete(err)),
            None => Ok(deleted),
        }
    }
}

fn absolute(path: &Path) -> ServiceResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|source| ServiceError::Path {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::fakes::MemoryTransport;
    use crate::policy::Settings;

    fn service(source: &Path, target: &Path) -> PolicyService {
        let envs = vec![EnvironmentConfig::new(
            "dev",
            Settings::from([("Tenant".to_string(), "dev.onmicrosoft.com".to_string())]),
        )];
        PolicyService::new(envs, source, target).unwrap()
    }

    fn write_template(dir: &Path, id: &str, parent: Option<&str>) {
        let base = parent
            .map(|p| format!("<BasePolicy><PolicyId>{p}</PolicyId></BasePolicy>"))
            .unwrap_or_default();
        let xml = format!(
            r#"<TrustFrameworkPolicy TenantId="${{Tenant}}" PolicyId="{id}">{base}</TrustFrameworkPolicy>"#
        );
        fs::write(dir.join(format!("{id}.xml")), xml).unwrap();
    }

    #[test]
    fn test_relative_dirs_are_made_absolute() {
        let svc = PolicyService::new(Vec::new(), "src", "build").unwrap();
        assert!(svc.source_dir().is_absolute());
        assert!(svc.target_dir().ends_with("build"));
        assert!(svc.output_dir("dev").ends_with("build/dev"));
    }

    #[test]
    fn test_unknown_environment_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), dir.path());
        let err = svc.build_policies("prod").unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Config(ConfigError::EnvironmentNotFound(_))
        ));
    }

    #[test]
    fn test_batches_before_build_hints_at_build() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), &dir.path().join("build"));
        let err = svc.batches("dev").unwrap_err();
        assert!(matches!(err, ServiceError::NotBuilt { .. }));
        assert!(err.to_string().contains("did you run build?"));
    }

    #[test]
    fn test_build_failure_names_environment_and_stage() {
        let src = tempfile::tempdir().unwrap();
        fs::write(
            src.path().join("a.xml"),
            r#"<TrustFrameworkPolicy PolicyId="A">${Missing}</TrustFrameworkPolicy>"#,
        )
        .unwrap();
        let out = tempfile::tempdir().unwrap();

        let err = service(src.path(), out.path())
            .build_policies("dev")
            .unwrap_err();
        match err {
            ServiceError::Build {
                environment,
                stage,
                source: PolicyError::UnresolvedPlaceholder { token, .. },
            } => {
                assert_eq!(environment, "dev");
                assert_eq!(stage, "process");
                assert_eq!(token, "Missing");
            }
            other => panic!("expected Build error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_build_then_deploy_uploads_every_policy() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_template(src.path(), "Base", None);
        write_template(src.path(), "Ext", Some("Base"));
        let svc = service(src.path(), out.path());

        svc.build_policies("dev").unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let report = svc
            .deploy_policies("dev", transport.clone(), UploadOptions::default())
            .await
            .unwrap();

        assert_eq!(report.uploaded_count(), 2);
        assert_eq!(transport.upload_log(), vec!["Base", "Ext"]);
        let stored = String::from_utf8(transport.stored("Base").unwrap()).unwrap();
        assert!(stored.contains("dev.onmicrosoft.com"));
    }

    #[tokio::test]
    async fn test_delete_attempts_every_policy_and_aggregates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), dir.path());
        let transport = MemoryTransport::new()
            .with_policy("A", b"<a/>")
            .with_policy("B", b"<b/>")
            .with_policy("C", b"<c/>")
            .failing_on(["B"]);

        let err = svc.delete_policies(&transport).await.unwrap_err();

        match err {
            ServiceError::Delete(batch) => assert_eq!(batch.policy_ids(), vec!["B"]),
            other => panic!("expected Delete error, got {other:?}"),
        }
        assert_eq!(transport.delete_log(), vec!["A", "B", "C"]);
        assert_eq!(svc.list_policies(&transport).await.unwrap(), vec!["B"]);
    }

    #[tokio::test]
    async fn test_tenant_lookup_overrides_configured_tenant() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_template(src.path(), "Base", None);
        let svc = service(src.path(), out.path());
        let directory = MemoryTransport::new().with_default_domain("contoso.onmicrosoft.com");

        let report = svc.build_policies_for_tenant("dev", &directory).await.unwrap();

        let written = fs::read_to_string(&report.written[0].path).unwrap();
        assert!(written.contains(r#"TenantId="contoso.onmicrosoft.com""#));
        assert!(!written.contains("dev.onmicrosoft.com"));
        assert_eq!(
            svc.find_config("dev").unwrap().settings[TENANT_SETTING],
            "dev.onmicrosoft.com"
        );
    }

    #[tokio::test]
    async fn test_failed_tenant_lookup_keeps_configured_tenant() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_template(src.path(), "Base", None);
        let svc = service(src.path(), out.path());

        let report = svc
            .build_policies_for_tenant("dev", &MemoryTransport::new())
            .await
            .unwrap();

        let written = fs::read_to_string(&report.written[0].path).unwrap();
        assert!(written.contains(r#"TenantId="dev.onmicrosoft.com""#));
    }

    #[tokio::test]
    async fn test_tenant_lookup_fills_a_missing_tenant_setting() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_template(src.path(), "Base", None);
        let envs = vec![EnvironmentConfig::new("test", Settings::new())];
        let svc = PolicyService::new(envs, src.path(), out.path()).unwrap();

        assert!(svc.build_policies("test").is_err());
        let directory = MemoryTransport::new().with_default_domain("test.onmicrosoft.com");
        let report = svc.build_policies_for_tenant("test", &directory).await.unwrap();
        assert_eq!(report.len(), 1);
    }
}

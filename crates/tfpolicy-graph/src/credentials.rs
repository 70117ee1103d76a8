//! Client-credential configuration for the Graph API.

use std::fmt;

use uuid::Uuid;

use crate::error::GraphError;
use crate::Result;

pub const TENANT_ID_ENV: &str = "B2C_ARM_TENANT_ID";
pub const CLIENT_ID_ENV: &str = "B2C_ARM_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "B2C_ARM_CLIENT_SECRET";

/// Application registration used for the client-credentials grant.
#[derive(Clone)]
pub struct GraphCredentials {
    tenant_id: Uuid,
    client_id: String,
    client_secret: String,
}

impl GraphCredentials {
    /// Validate the three values together.
    ///
    /// Every missing (or blank) value is reported in one error; the tenant
    /// id must be a UUID.
    pub fn new(
        tenant_id: Option<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Result<Self> {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let (tenant_id, client_id, client_secret) =
            (present(tenant_id), present(client_id), present(client_secret));

        let missing: Vec<&'static str> = [
            (tenant_id.is_none(), TENANT_ID_ENV),
            (client_id.is_none(), CLIENT_ID_ENV),
            (client_secret.is_none(), CLIENT_SECRET_ENV),
        ]
        .into_iter()
        .filter_map(|(absent, name)| absent.then_some(name))
        .collect();

        match (tenant_id, client_id, client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => {
                let parsed = Uuid::parse_str(tenant_id.trim()).map_err(|source| {
                    GraphError::InvalidTenantId {
                        value: tenant_id.clone(),
                        source,
                    }
                })?;
                Ok(Self {
                    tenant_id: parsed,
                    client_id,
                    client_secret,
                })
            }
            _ => Err(GraphError::MissingCredentials(missing)),
        }
    }

    /// Read `B2C_ARM_TENANT_ID`, `B2C_ARM_CLIENT_ID` and `B2C_ARM_CLIENT_SECRET`.
    pub fn from_env() -> Result<Self> {
        Self::new(
            std::env::var(TENANT_ID_ENV).ok(),
            std::env::var(CLIENT_ID_ENV).ok(),
            std::env::var(CLIENT_SECRET_ENV).ok(),
        )
    }

    pub fn tenant_id(&self) -> &Uuid {
        &self.tenant_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl fmt::Debug for GraphCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TENANT: &str = "8f1d7e1c-54c7-4b7a-9e43-2a1f6b0c9d11";

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_valid_credentials() {
        let creds = GraphCredentials::new(some(TENANT), some("app"), some("secret")).unwrap();
        assert_eq!(creds.tenant_id().to_string(), TENANT);
        assert_eq!(creds.client_id(), "app");
        assert_eq!(creds.client_secret(), "secret");
    }

    #[test]
    fn test_all_missing_values_are_reported_together() {
        let err = GraphCredentials::new(None, some("  "), None).unwrap_err();
        match err {
            GraphError::MissingCredentials(names) => {
                assert_eq!(names, vec![TENANT_ID_ENV, CLIENT_ID_ENV, CLIENT_SECRET_ENV]);
            }
            other => panic!("expected MissingCredentials, got {other:?}"),
        }
    }

    #[test]
    fn test_tenant_id_must_be_a_uuid() {
        let err = GraphCredentials::new(some("contoso"), some("app"), some("secret")).unwrap_err();
        assert!(matches!(err, GraphError::InvalidTenantId { .. }));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = GraphCredentials::new(some(TENANT), some("app"), some("hunter2")).unwrap();
        let shown = format!("{creds:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<redacted>"));
    }
}

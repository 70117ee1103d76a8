//! Graph API client for trust-framework policies
//!
//! Implements [`PolicyTransport`] over the `trustFramework/policies`
//! endpoints and [`TenantDirectory`] over the tenant-information lookup. A
//! bearer token is obtained once through the client-credentials grant and
//! reused for every later call made by the same client.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tfpolicy_core::{PolicyTransport, TenantDirectory, TransportError, TransportResult};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::credentials::GraphCredentials;
use crate::Result;

pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com/beta";
pub const DEFAULT_LOGIN_URL: &str = "https://login.microsoftonline.com";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const POLICY_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Graph API root, up to and including the version segment
    pub graph_url: String,
    /// Identity platform root used for token requests
    pub login_url: String,
    pub user_agent: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            user_agent: format!("tfpolicy/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl GraphConfig {
    /// Point both endpoints at one server (local test servers).
    pub fn with_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        GraphConfig {
            graph_url: format!("{base}/beta"),
            login_url: base.to_string(),
            ..Self::default()
        }
    }

    fn policies_url(&self) -> String {
        format!(
            "{}/trustFramework/policies",
            self.graph_url.trim_end_matches('/')
        )
    }

    fn policy_url(&self, policy_id: &str) -> String {
        format!("{}/{policy_id}", self.policies_url())
    }

    fn policy_value_url(&self, policy_id: &str) -> String {
        format!("{}/$value", self.policy_url(policy_id))
    }

    fn tenant_information_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/tenantRelationships/findTenantInformationByTenantId(tenantId='{tenant_id}')",
            self.graph_url.trim_end_matches('/')
        )
    }

    fn token_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/{tenant_id}/oauth2/v2.0/token",
            self.login_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct PolicyListPage {
    #[serde(default)]
    value: Vec<PolicyEntry>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PolicyEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantInformation {
    default_domain_name: String,
}

/// Graph client for policy upload, delete and listing
pub struct GraphClient {
    config: GraphConfig,
    credentials: GraphCredentials,
    http_client: Client,
    token: OnceCell<String>,
}

impl GraphClient {
    pub fn new(credentials: GraphCredentials, config: GraphConfig) -> Result<Self> {
        let http_client = Client::builder().user_agent(&config.user_agent).build()?;

        Ok(GraphClient {
            config,
            credentials,
            http_client,
            token: OnceCell::new(),
        })
    }

    /// Client against the public Graph endpoints, credentials from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(GraphCredentials::from_env()?, GraphConfig::default())
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    async fn access_token(&self) -> TransportResult<&str> {
        let token = self
            .token
            .get_or_try_init(|| self.request_token())
            .await?;
        Ok(token.as_str())
    }

    async fn request_token(&self) -> TransportResult<String> {
        let url = self.config.token_url(&self.credentials.tenant_id().to_string());
        debug!(client_id = %self.credentials.client_id(), "requesting access token");

        let response = self
            .http_client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id()),
                ("client_secret", self.credentials.client_secret()),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| TransportError::Auth(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Auth(format!(
                "token endpoint returned {}: {body}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Auth(e.to_string()))?;
        Ok(token.access_token)
    }

    /// Attach the bearer token and send.
    async fn send(&self, request: RequestBuilder) -> TransportResult<Response> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> TransportResult<Response> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

#[async_trait]
impl PolicyTransport for GraphClient {
    async fn upload_policy(&self, policy_id: &str, content: &[u8]) -> TransportResult<()> {
        let request = self
            .http_client
            .put(self.config.policy_value_url(policy_id))
            .header(CONTENT_TYPE, POLICY_CONTENT_TYPE)
            .body(content.to_vec());
        self.send(request).await?;
        debug!(policy_id = %policy_id, "uploaded policy");
        Ok(())
    }

    async fn delete_policy(&self, policy_id: &str) -> TransportResult<()> {
        let request = self.http_client.delete(self.config.policy_url(policy_id));
        self.send(request).await?;
        debug!(policy_id = %policy_id, "deleted policy");
        Ok(())
    }

    async fn list_policies(&self) -> TransportResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut next = Some(self.config.policies_url());

        while let Some(url) = next {
            let page: PolicyListPage = self
                .send(self.http_client.get(&url))
                .await?
                .json()
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?;
            ids.extend(page.value.into_iter().map(|p| p.id));
            next = page.next_link;
        }

        Ok(ids)
    }
}

#[async_trait]
impl TenantDirectory for GraphClient {
    async fn default_domain(&self) -> TransportResult<String> {
        let url = self
            .config
            .tenant_information_url(&self.credentials.tenant_id().to_string());
        let info: TenantInformation = self
            .send(self.http_client.get(&url))
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        debug!(domain = %info.default_domain_name, "resolved tenant default domain");
        Ok(info.default_domain_name)
    }
}

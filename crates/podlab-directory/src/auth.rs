use std::process::Command as StdCommand;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::DirectoryError;

// ── Token provider ────────────────────────────────────────────────────────────

/// Abstraction over bearer token acquisition, so tests can inject one.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, DirectoryError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

// ── Client credentials ────────────────────────────────────────────────────────

pub(crate) struct ServicePrincipalTokenProvider {
    pub(crate) tenant_id:     String,
    pub(crate) client_id:     String,
    pub(crate) client_secret: String,
    pub(crate) login_base:    String,
    pub(crate) scope:         String,
    pub(crate) client:        reqwest::Client,
    pub(crate) cache:         Mutex<Option<(String, Instant)>>,
}

#[async_trait]
impl TokenProvider for ServicePrincipalTokenProvider {
    async fn token(&self) -> Result<String, DirectoryError> {
        {
            let guard = self.cache.lock().await;
            if let Some((tok, expiry)) = guard.as_ref() {
                if Instant::now() < *expiry {
                    return Ok(tok.clone());
                }
            }
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.login_base, self.tenant_id);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("scope", &self.scope),
        ];
        let resp = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| DirectoryError::Auth(format!("token request: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DirectoryError::Auth(format!(
                "token endpoint returned {}: {}",
                status,
                body.trim()
            )));
        }

        let tok: TokenResponse = resp
            .json()
            .await
            .map_err(|e| DirectoryError::Auth(format!("token decode: {}", e)))?;
        let expiry = Instant::now() + Duration::from_secs(tok.expires_in.saturating_sub(60));

        *self.cache.lock().await = Some((tok.access_token.clone(), expiry));
        Ok(tok.access_token)
    }
}

// ── Azure CLI ─────────────────────────────────────────────────────────────────

pub(crate) struct AzureCliTokenProvider {
    pub(crate) tenant_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
}

#[async_trait]
impl TokenProvider for AzureCliTokenProvider {
    async fn token(&self) -> Result<String, DirectoryError> {
        let output = StdCommand::new("az")
            .args([
                "account",
                "get-access-token",
                "--resource",
                "https://graph.microsoft.com",
                "--tenant",
                &self.tenant_id,
                "--output",
                "json",
            ])
            .output()
            .map_err(|e| {
                DirectoryError::Auth(format!(
                    "az CLI not found: {}. Install Azure CLI or configure client credentials.",
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DirectoryError::Auth(format!(
                "az account get-access-token failed: {}. Run 'az login' first.",
                stderr.trim()
            )));
        }

        let tok: CliToken = serde_json::from_slice(&output.stdout)
            .map_err(|e| DirectoryError::Auth(format!("az CLI output parse: {}", e)))?;
        Ok(tok.access_token)
    }
}

// ── Static (tests) ────────────────────────────────────────────────────────────

pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, DirectoryError> {
        Ok(self.0.clone())
    }
}

// ── Provider selection ────────────────────────────────────────────────────────

/// Pick a token provider for the tenant:
/// 1. explicit `client_id` + `client_secret` → client credentials
/// 2. `AZURE_CLIENT_ID` + `AZURE_CLIENT_SECRET` env vars → client credentials
/// 3. otherwise → Azure CLI (`az account get-access-token`)
pub(crate) fn select_provider(
    tenant_id: &str,
    client_id: Option<&str>,
    client_secret: Option<&str>,
    login_base: &str,
    graph_base: &str,
    client: reqwest::Client,
) -> Box<dyn TokenProvider> {
    let scope = format!("{}/.default", graph_base);

    if let (Some(cid), Some(cs)) = (client_id, client_secret) {
        return Box::new(ServicePrincipalTokenProvider {
            tenant_id:     tenant_id.to_string(),
            client_id:     cid.to_string(),
            client_secret: cs.to_string(),
            login_base:    login_base.to_string(),
            scope,
            client,
            cache:         Mutex::new(None),
        });
    }

    if let (Ok(cid), Ok(cs)) = (
        std::env::var("AZURE_CLIENT_ID"),
        std::env::var("AZURE_CLIENT_SECRET"),
    ) {
        return Box::new(ServicePrincipalTokenProvider {
            tenant_id:     tenant_id.to_string(),
            client_id:     cid,
            client_secret: cs,
            login_base:    login_base.to_string(),
            scope,
            client,
            cache:         Mutex::new(None),
        });
    }

    Box::new(AzureCliTokenProvider {
        tenant_id: tenant_id.to_string(),
    })
}

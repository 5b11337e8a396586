//! Identity Provider
//!
//! Admin-API client for the external identity provider that owns login
//! accounts. Account deletion here is idempotent: a 404 from the provider
//! means the account is already gone, which the executor treats as success.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::StoreError;
use crate::config::Config;

/// The provider's view of one account.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityAccount {
    pub user_id: String,
    pub email: Option<String>,
}

/// Identity provider collaborator.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fetch the account, `None` when the provider does not know the id.
    async fn get_user(&self, user_id: &str) -> Result<Option<IdentityAccount>, StoreError>;

    /// Delete the account. [`StoreError::NotFound`] when already gone.
    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError>;
}

/// REST admin-API implementation.
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    base_url: String,
    admin_token: String,
}

impl HttpIdentityProvider {
    /// Build the client with a request timeout so a hung provider surfaces
    /// as that subsystem's failure instead of stalling the whole purge.
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.collaborator_timeout_secs))
            .build()
            .map_err(|e| StoreError::Backend(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.identity_api_url.clone(),
            admin_token: config.identity_admin_token.clone(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn get_user(&self, user_id: &str) -> Result<Option<IdentityAccount>, StoreError> {
        let url = format!("{}/admin/users/{user_id}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.admin_token)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("identity get: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StoreError::Backend(format!(
                "identity get: HTTP {}",
                resp.status()
            )));
        }

        let account = resp
            .json::<IdentityAccount>()
            .await
            .map_err(|e| StoreError::Backend(format!("identity get: {e}")))?;
        Ok(Some(account))
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError> {
        let url = format!("{}/admin/users/{user_id}", self.base_url);
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(&self.admin_token)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("identity delete: {e}")))?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND => {
                Err(StoreError::NotFound(format!("identity account {user_id}")))
            }
            s => Err(StoreError::Backend(format!("identity delete: HTTP {s}"))),
        }
    }
}

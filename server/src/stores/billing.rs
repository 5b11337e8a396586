//! Billing Processor
//!
//! REST client for the payment provider that owns subscription customer
//! records. Customers are looked up by our user id (stored provider-side as
//! metadata); deleting a missing customer is success, not failure.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::StoreError;
use crate::config::Config;

/// Billing processor collaborator.
#[async_trait]
pub trait BillingProcessor: Send + Sync {
    /// Resolve our user id to the provider's customer id, if one exists.
    async fn find_customer_id(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    /// Delete the customer record. [`StoreError::NotFound`] when the
    /// resource is already missing.
    async fn delete_customer(&self, customer_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Deserialize)]
struct CustomerSearchResponse {
    data: Vec<CustomerRecord>,
}

#[derive(Debug, Deserialize)]
struct CustomerRecord {
    id: String,
}

/// REST implementation authenticated with the provider secret key.
pub struct HttpBillingProcessor {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl HttpBillingProcessor {
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.collaborator_timeout_secs))
            .build()
            .map_err(|e| StoreError::Backend(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.billing_api_url.clone(),
            secret_key: config.billing_secret_key.clone(),
        })
    }
}

#[async_trait]
impl BillingProcessor for HttpBillingProcessor {
    async fn find_customer_id(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let url = format!("{}/v1/customers/search", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("query", format!("metadata['user_id']:'{user_id}'"))])
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("billing search: {e}")))?;

        if !resp.status().is_success() {
            return Err(StoreError::Backend(format!(
                "billing search: HTTP {}",
                resp.status()
            )));
        }

        let body = resp
            .json::<CustomerSearchResponse>()
            .await
            .map_err(|e| StoreError::Backend(format!("billing search: {e}")))?;

        Ok(body.data.into_iter().next().map(|c| c.id))
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<(), StoreError> {
        let url = format!("{}/v1/customers/{customer_id}", self.base_url);
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("billing delete: {e}")))?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND => {
                Err(StoreError::NotFound(format!("billing customer {customer_id}")))
            }
            s => Err(StoreError::Backend(format!("billing delete: HTTP {s}"))),
        }
    }
}

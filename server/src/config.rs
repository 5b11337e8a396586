//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// `PostgreSQL` connection URL. When absent the server runs entirely on
    /// the in-memory stores (local development).
    pub database_url: Option<String>,

    /// JWT signing secret
    pub jwt_secret: String,

    /// JWT access token expiry in seconds (default: 900 = 15 min)
    pub jwt_access_expiry: i64,

    /// S3-compatible storage endpoint
    pub s3_endpoint: Option<String>,

    /// S3 bucket name
    pub s3_bucket: String,

    /// S3 presigned URL expiry in seconds (default: 3600 = 1 hour)
    pub s3_presign_expiry: i64,

    /// Days an export archive stays downloadable (default: 7)
    pub export_retention_days: i64,

    /// Grace period before a scheduled deletion becomes irreversible (default: 30 days)
    pub deletion_grace_days: i64,

    /// Recovery code validity in minutes (default: 30)
    pub recovery_code_ttl_minutes: i64,

    /// Wrong-code attempts before a recovery code is invalidated (default: 5)
    pub recovery_code_max_attempts: u32,

    /// Shared secret the billing provider signs webhook payloads with
    pub webhook_signing_secret: String,

    /// Keyed-MAC secret for deletion certificate signatures
    pub certificate_signing_key: String,

    /// Salt for one-way user id / IP hashing in logs and certificates
    pub hash_salt: String,

    /// Identity provider admin API base URL
    pub identity_api_url: String,

    /// Identity provider admin API token
    pub identity_admin_token: String,

    /// Billing processor API base URL
    pub billing_api_url: String,

    /// Billing processor secret key
    pub billing_secret_key: String,

    /// Request timeout for identity/billing calls in seconds (default: 10)
    pub collaborator_timeout_secs: u64,

    /// SMTP relay host (optional - notifications disabled when unset)
    pub smtp_host: Option<String>,

    /// SMTP port (default: 587)
    pub smtp_port: u16,

    /// SMTP username (optional)
    pub smtp_username: Option<String>,

    /// SMTP password (optional)
    pub smtp_password: Option<String>,

    /// From address for transactional email (optional)
    pub smtp_from: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: env::var("DATABASE_URL").ok(),
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_access_expiry: env_parse("JWT_ACCESS_EXPIRY", 900),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            s3_bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "stride-privacy".into()),
            s3_presign_expiry: env_parse("S3_PRESIGN_EXPIRY", 3600),
            export_retention_days: env_parse("EXPORT_RETENTION_DAYS", 7),
            deletion_grace_days: env_parse("DELETION_GRACE_DAYS", 30),
            recovery_code_ttl_minutes: env_parse("RECOVERY_CODE_TTL_MINUTES", 30),
            recovery_code_max_attempts: env_parse("RECOVERY_CODE_MAX_ATTEMPTS", 5),
            webhook_signing_secret: env::var("WEBHOOK_SIGNING_SECRET")
                .context("WEBHOOK_SIGNING_SECRET must be set")?,
            certificate_signing_key: env::var("CERTIFICATE_SIGNING_KEY")
                .context("CERTIFICATE_SIGNING_KEY must be set")?,
            hash_salt: env::var("HASH_SALT").context("HASH_SALT must be set")?,
            identity_api_url: env::var("IDENTITY_API_URL")
                .unwrap_or_else(|_| "http://localhost:9001".into()),
            identity_admin_token: env::var("IDENTITY_ADMIN_TOKEN").unwrap_or_default(),
            billing_api_url: env::var("BILLING_API_URL")
                .unwrap_or_else(|_| "https://api.billing.example".into()),
            billing_secret_key: env::var("BILLING_SECRET_KEY").unwrap_or_default(),
            collaborator_timeout_secs: env_parse("COLLABORATOR_TIMEOUT_SECS", 10),
            smtp_host: env::var("SMTP_HOST").ok(),
            smtp_port: env_parse("SMTP_PORT", 587),
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM").ok(),
        })
    }

    /// Check if SMTP is fully configured.
    #[must_use]
    pub const fn has_smtp(&self) -> bool {
        self.smtp_host.is_some() && self.smtp_from.is_some()
    }

    /// Create a default configuration for testing. Pairs with the in-memory
    /// stores; nothing external is contacted.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            database_url: None,
            jwt_secret: "test-secret".into(),
            jwt_access_expiry: 900,
            s3_endpoint: None,
            s3_bucket: "test-bucket".into(),
            s3_presign_expiry: 3600,
            export_retention_days: 7,
            deletion_grace_days: 30,
            recovery_code_ttl_minutes: 30,
            recovery_code_max_attempts: 5,
            webhook_signing_secret: "test-webhook-secret".into(),
            certificate_signing_key: "test-certificate-key".into(),
            hash_salt: "test-salt".into(),
            identity_api_url: "http://localhost:9001".into(),
            identity_admin_token: String::new(),
            billing_api_url: "http://localhost:9002".into(),
            billing_secret_key: String::new(),
            collaborator_timeout_secs: 10,
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_from: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

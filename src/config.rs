//! Provider configuration.
//!
//! The `configure` payload is deserialized into [`ProviderConfig`]. Values left
//! unset fall back to environment variables, then to built-in defaults.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::http::DEFAULT_BASE_URL;
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};

/// Environment variable holding the API access token.
pub const ACCESS_TOKEN_ENV: &str = "ATLAS_ACCESS_TOKEN";

/// Environment variable overriding the API base URL.
pub const BASE_URL_ENV: &str = "ATLAS_BASE_URL";

/// Upper bound for both timeouts: one week.
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Settings accepted by the provider's `configure` call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Bearer token for the Atlas Admin API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// API root, including the version segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Total budget for deleting a team, in seconds.
    #[serde(default = "default_delete_timeout_secs")]
    pub delete_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_delete_timeout_secs() -> u64 {
    60 * 60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            delete_timeout_secs: default_delete_timeout_secs(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("delete_timeout_secs", &self.delete_timeout_secs)
            .finish()
    }
}

impl ProviderConfig {
    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_description("Atlas Admin API connection settings")
            .with_attribute(
                "access_token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description(format!("API access token; defaults to ${}", ACCESS_TOKEN_ENV)),
            )
            .with_attribute(
                "base_url",
                Attribute::optional_string()
                    .with_description(format!("API root; defaults to ${} or {}", BASE_URL_ENV, DEFAULT_BASE_URL)),
            )
            .with_attribute(
                "request_timeout_secs",
                Attribute::optional_int64().with_description("Per-request timeout in seconds"),
            )
            .with_attribute(
                "delete_timeout_secs",
                Attribute::optional_int64()
                    .with_description("How long a team delete may keep resolving project assignments"),
            )
    }

    /// Parse the `configure` payload, filling gaps from the process environment.
    pub fn from_value(config: Value) -> Result<Self, ProviderError> {
        Self::from_value_with_env(config, |key| std::env::var(key).ok())
    }

    /// Parse the `configure` payload, filling gaps from `env`.
    pub fn from_value_with_env(
        mut config: Value,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ProviderError> {
        // Unset attributes arrive as explicit nulls.
        if let Value::Object(map) = &mut config {
            map.retain(|_, v| !v.is_null());
        }
        let mut parsed: ProviderConfig = if config.is_null() {
            ProviderConfig::default()
        } else {
            serde_json::from_value(config)?
        };

        if parsed.access_token.as_deref().unwrap_or("").is_empty() {
            parsed.access_token = env(ACCESS_TOKEN_ENV).filter(|t| !t.is_empty());
        }
        if parsed.base_url.is_none() {
            parsed.base_url = env(BASE_URL_ENV).filter(|u| !u.is_empty());
        }
        Ok(parsed)
    }

    /// Problems that prevent the provider from talking to the API.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        if self.access_token.is_none() {
            diagnostics.push(
                Diagnostic::error("Missing Atlas access token")
                    .with_detail(format!(
                        "Set access_token in the provider configuration or export {}",
                        ACCESS_TOKEN_ENV
                    ))
                    .with_attribute("access_token"),
            );
        }
        for (name, secs) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("delete_timeout_secs", self.delete_timeout_secs),
        ] {
            if secs == 0 || secs > MAX_TIMEOUT_SECS {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "{} must be between 1 and {}",
                        name, MAX_TIMEOUT_SECS
                    ))
                    .with_detail(format!("Got {}", secs))
                    .with_attribute(name),
                );
            }
        }
        if self.base_url().starts_with("http://") {
            diagnostics.push(
                Diagnostic::warning("base_url does not use TLS")
                    .with_detail("The access token is sent in clear text")
                    .with_attribute("base_url"),
            );
        }
        diagnostics
    }

    /// The API root to use.
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Team delete budget.
    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }
}

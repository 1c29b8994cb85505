//! Connection settings for a [`Client`](crate::Client).

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Where the API lives and which credentials to exchange for a token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Scheme and host, e.g. `https://api.example`.
    pub host: String,
    /// API version without the `v` prefix, e.g. `1`.
    pub version: String,
    pub client_id: String,
    pub client_secret: String,
}

impl ClientConfig {
    pub fn new(
        host: impl Into<String>,
        version: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let config = Self {
            host: host.into().trim_end_matches('/').to_string(),
            version: version.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject empty settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [
            ("host", &self.host),
            ("version", &self.version),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::Empty(name));
            }
        }
        Ok(())
    }

    /// `{host}/v{version}`, the prefix of every endpoint.
    pub fn base_url(&self) -> String {
        format!("{}/v{}", self.host.trim_end_matches('/'), self.version)
    }
}

// The secret stays out of logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("version", &self.version)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

use crate::error::{FgaError, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

/// Environment prefix for overrides, e.g. `FGA__STORE_ID`
pub const ENV_PREFIX: &str = "FGA";

/// Connection settings for the backing engine
#[derive(Debug, Clone, Deserialize)]
pub struct FgaClientConfig {
    pub api_url: String,
    pub store_id: String,
    #[serde(default)]
    pub authorization_model_id: Option<String>,
    #[serde(default)]
    pub credentials: Credentials,
    /// Deadline for a single access check
    #[serde(default = "default_check_deadline_ms")]
    pub check_deadline_ms: u64,
    /// Transport timeout for any engine request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// How the client authenticates against the engine
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Credentials {
    #[default]
    None,
    ApiToken {
        token: SecretString,
    },
    ClientCredentials {
        api_token_issuer: String,
        api_audience: String,
        client_id: String,
        client_secret: SecretString,
    },
}

fn default_check_deadline_ms() -> u64 {
    10_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl FgaClientConfig {
    pub fn new(api_url: &str, store_id: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            store_id: store_id.to_string(),
            authorization_model_id: None,
            credentials: Credentials::None,
            check_deadline_ms: default_check_deadline_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn with_model(mut self, authorization_model_id: &str) -> Self {
        self.authorization_model_id = Some(authorization_model_id.to_string());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Load from an optional file, then `FGA__*` environment variables
    ///
    /// A `.env` file in the working directory is honored if present.
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_id.trim().is_empty() {
            return Err(FgaError::Config("store_id must not be empty".to_string()));
        }
        let url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| FgaError::Config(format!("invalid api_url '{}': {}", self.api_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FgaError::Config(format!(
                "unsupported scheme in api_url: {}",
                url.scheme()
            )));
        }
        if self.check_deadline_ms == 0 {
            return Err(FgaError::Config("check_deadline_ms must be positive".to_string()));
        }
        if let Credentials::ClientCredentials {
            api_token_issuer,
            client_id,
            ..
        } = &self.credentials
        {
            if api_token_issuer.is_empty() || client_id.is_empty() {
                return Err(FgaError::Config(
                    "client_credentials requires api_token_issuer and client_id".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn check_deadline(&self) -> Duration {
        Duration::from_millis(self.check_deadline_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

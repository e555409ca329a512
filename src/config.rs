//! Provider configuration.
//!
//! The provider block accepts `url`, `username` and `password`. The two
//! credential fields fall back to `KAPACITOR_USERNAME` and
//! `KAPACITOR_PASSWORD` when they are not set in configuration.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::{ClientConfig, Credentials};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// Environment variable consulted when `username` is not configured.
pub const USERNAME_ENV: &str = "KAPACITOR_USERNAME";

/// Environment variable consulted when `password` is not configured.
pub const PASSWORD_ENV: &str = "KAPACITOR_PASSWORD";

/// A string that is never printed.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sensitive(String);

impl Sensitive {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<sensitive>")
    }
}

/// Provider configuration as received from the caller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderConfig {
    /// Kapacitor server root.
    pub url: String,
    /// Username for basic authentication.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for basic authentication.
    #[serde(default)]
    pub password: Option<Sensitive>,
}

impl ProviderConfig {
    /// Schema of the provider block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "url",
                Attribute::required_string().with_description("Kapacitor server URL"),
            )
            .with_attribute(
                "username",
                Attribute::optional_string()
                    .with_description(format!("Username, defaults to ${}", USERNAME_ENV)),
            )
            .with_attribute(
                "password",
                Attribute::optional_string()
                    .with_description(format!("Password, defaults to ${}", PASSWORD_ENV))
                    .sensitive(),
            )
    }

    /// Parse configuration from its JSON form and apply environment defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProviderError> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| ProviderError::Configuration(format!("invalid provider config: {}", e)))?;
        Ok(config.with_env_defaults(|key| std::env::var(key).ok()))
    }

    /// Fill unset credentials from `lookup`, which maps an environment
    /// variable name to its value.
    pub fn with_env_defaults(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.username.is_none() {
            self.username = lookup(USERNAME_ENV);
        }
        if self.password.is_none() {
            self.password = lookup(PASSWORD_ENV).map(Sensitive::new);
        }
        self
    }

    /// Credentials to attach, if a username is configured. A password without
    /// a username is ignored.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = self.username.as_deref().filter(|u| !u.is_empty())?;
        let password = self
            .password
            .as_ref()
            .map(Sensitive::expose)
            .unwrap_or_default();
        Some(Credentials::user(username, password))
    }

    /// Build the HTTP client settings for this configuration.
    pub fn client_config(&self) -> Result<ClientConfig, ProviderError> {
        if self.url.is_empty() {
            return Err(ProviderError::Configuration("url must not be empty".to_string()));
        }
        let url = Url::parse(&self.url).map_err(|e| {
            ProviderError::Configuration(format!("invalid url '{}': {}", self.url, e))
        })?;

        let mut config = ClientConfig::new(url);
        if let Some(credentials) = self.credentials() {
            config = config.with_credentials(credentials);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AuthenticationMethod;
    use serde_json::json;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_schema_marks_password_sensitive() {
        let schema = ProviderConfig::schema();
        let attrs = &schema.block.attributes;
        assert!(attrs["url"].flags.required);
        assert!(attrs["username"].flags.optional);
        assert!(!attrs["username"].flags.sensitive);
        assert!(attrs["password"].flags.sensitive);
    }

    #[test]
    fn test_url_only() {
        let config: ProviderConfig =
            serde_json::from_value(json!({"url": "http://localhost:9092"})).unwrap();
        let config = config.with_env_defaults(no_env);

        assert!(config.credentials().is_none());
        let client = config.client_config().unwrap();
        assert_eq!(client.url.as_str(), "http://localhost:9092/");
        assert!(client.credentials.is_none());
    }

    #[test]
    fn test_credentials_from_config() {
        let config: ProviderConfig = serde_json::from_value(json!({
            "url": "http://localhost:9092",
            "username": "admin",
            "password": "s3cret"
        }))
        .unwrap();

        let creds = config.credentials().unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "s3cret");
        assert_eq!(creds.method, AuthenticationMethod::UserAuthentication);
    }

    #[test]
    fn test_env_fallback() {
        let config: ProviderConfig =
            serde_json::from_value(json!({"url": "http://localhost:9092"})).unwrap();
        let config = config.with_env_defaults(|key| match key {
            USERNAME_ENV => Some("env-user".to_string()),
            PASSWORD_ENV => Some("env-pass".to_string()),
            _ => None,
        });

        let creds = config.credentials().unwrap();
        assert_eq!(creds.username, "env-user");
        assert_eq!(creds.password, "env-pass");
    }

    #[test]
    fn test_config_wins_over_env() {
        let config: ProviderConfig = serde_json::from_value(json!({
            "url": "http://localhost:9092",
            "username": "from-config"
        }))
        .unwrap();
        let config = config.with_env_defaults(|_| Some("from-env".to_string()));

        let creds = config.credentials().unwrap();
        assert_eq!(creds.username, "from-config");
        assert_eq!(creds.password, "from-env");
    }

    #[test]
    fn test_password_without_username_is_unauthenticated() {
        let config: ProviderConfig = serde_json::from_value(json!({
            "url": "http://localhost:9092",
            "password": "orphan"
        }))
        .unwrap();
        assert!(config.with_env_defaults(no_env).credentials().is_none());
    }

    #[test]
    fn test_password_is_not_printed() {
        let config: ProviderConfig = serde_json::from_value(json!({
            "url": "http://localhost:9092",
            "username": "admin",
            "password": "s3cret"
        }))
        .unwrap();
        let printed = format!("{:?}", config);
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("<sensitive>"));
    }

    #[test]
    fn test_invalid_url() {
        let config = ProviderConfig {
            url: "not a url".to_string(),
            username: None,
            password: None,
        };
        let err = config.client_config().unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));

        let config = ProviderConfig {
            url: String::new(),
            username: None,
            password: None,
        };
        assert!(config.client_config().is_err());
    }

    #[test]
    fn test_missing_url() {
        let err = ProviderConfig::from_value(json!({"username": "admin"})).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }
}

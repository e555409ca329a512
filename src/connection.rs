//! The configured link to a Kapacitor server.

use std::fmt;

use tracing::{debug, info, warn};

use crate::client::{ClientConfig, HttpClient, KapacitorApi};
use crate::config::ProviderConfig;
use crate::error::{KapacitorError, ProviderError};

/// Builds the client a [`Connection`] wraps.
pub type ClientFactory =
    dyn Fn(ClientConfig) -> Result<Box<dyn KapacitorApi>, KapacitorError> + Send + Sync;

/// Factory producing [`HttpClient`]s.
pub fn http_client_factory() -> Box<ClientFactory> {
    Box::new(build_http_client)
}

fn build_http_client(config: ClientConfig) -> Result<Box<dyn KapacitorApi>, KapacitorError> {
    let client = HttpClient::new(config)?;
    debug!(
        url = %client.url(),
        authenticated = client.is_authenticated(),
        "Built Kapacitor HTTP client"
    );
    Ok(Box::new(client))
}

/// A verified Kapacitor client, created once by provider configuration and
/// shared read-only by every resource operation afterwards.
pub struct Connection {
    client: Box<dyn KapacitorApi>,
    server_version: String,
}

impl Connection {
    /// Build a client for `config` with `factory` and verify it with a ping.
    pub async fn open(
        config: &ProviderConfig,
        factory: &ClientFactory,
    ) -> Result<Self, ProviderError> {
        let client_config = config.client_config()?;
        let client = factory(client_config).map_err(|e| {
            ProviderError::Configuration(format!("failed to build Kapacitor client: {}", e))
        })?;
        Self::establish(client).await
    }

    /// Ping through `client` and wrap it on success.
    pub async fn establish(client: Box<dyn KapacitorApi>) -> Result<Self, ProviderError> {
        match client.ping().await {
            Ok(server_version) => {
                info!(version = %server_version, "Connected to Kapacitor");
                Ok(Self {
                    client,
                    server_version,
                })
            },
            Err(e) => {
                warn!(error = %e, "Kapacitor ping failed");
                Err(ProviderError::Configuration(format!(
                    "failed to reach Kapacitor: {}",
                    e
                )))
            },
        }
    }

    /// The underlying client.
    pub fn client(&self) -> &dyn KapacitorApi {
        self.client.as_ref()
    }

    /// Version string reported by the server at ping time.
    pub fn server_version(&self) -> &str {
        &self.server_version
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("server_version", &self.server_version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Sensitive;
    use crate::testing::InMemoryKapacitor;

    #[tokio::test]
    async fn test_establish_pings() {
        let kapacitor = InMemoryKapacitor::new();
        let conn = Connection::establish(Box::new(kapacitor.clone()))
            .await
            .unwrap();

        assert_eq!(conn.server_version(), InMemoryKapacitor::VERSION);
        assert_eq!(kapacitor.ping_count(), 1);
    }

    #[tokio::test]
    async fn test_establish_fails_when_ping_fails() {
        let kapacitor = InMemoryKapacitor::new();
        kapacitor.set_reachable(false);

        let err = Connection::establish(Box::new(kapacitor)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert!(err.to_string().contains("failed to reach Kapacitor"));
    }

    #[tokio::test]
    async fn test_open_passes_credentials_to_factory() {
        let kapacitor = InMemoryKapacitor::new();
        let config = ProviderConfig {
            url: "http://kapacitor.local:9092".to_string(),
            username: Some("admin".to_string()),
            password: Some(Sensitive::new("s3cret")),
        };

        let fake = kapacitor.clone();
        let factory: Box<ClientFactory> = Box::new(
            move |client_config: ClientConfig| -> Result<Box<dyn KapacitorApi>, KapacitorError> {
                assert_eq!(client_config.url.as_str(), "http://kapacitor.local:9092/");
                let creds = client_config.credentials.expect("credentials");
                assert_eq!(creds.username, "admin");
                assert_eq!(creds.password, "s3cret");
                Ok(Box::new(fake.clone()))
            },
        );

        Connection::open(&config, factory.as_ref()).await.unwrap();
        assert_eq!(kapacitor.ping_count(), 1);
    }

    #[tokio::test]
    async fn test_open_rejects_bad_url_without_network() {
        let config = ProviderConfig {
            url: "::not-a-url".to_string(),
            username: None,
            password: None,
        };
        let factory = http_client_factory();
        let err = Connection::open(&config, factory.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }
}

//! HTTP provider adapter.
//!
//! Each provider is one JSON endpoint: the request struct is POSTed as the
//! body and the response struct is decoded from the reply. 4xx answers are
//! refusals; connection errors and 5xx answers are transient.

use crate::config::ProviderConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::provider::{
    AnchorReceipt, AnchorRequest, AnchorSubmitter, ArtifactBuilder, ArtifactRef, ArtifactRequest,
    ProviderError, ProviderResult, TimestampAuthority, TimestampRequest, TimestampToken,
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const TIMESTAMP: &str = "timestamp";
const ANCHOR: &str = "anchor";
const ARTIFACT: &str = "artifact";

/// Providers reached over HTTP
pub struct HttpProviders {
    client: reqwest::Client,
    timestamp_url: Option<String>,
    anchor_url: Option<String>,
    artifact_url: Option<String>,
    token: Option<SecretString>,
}

impl std::fmt::Debug for HttpProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProviders")
            .field("timestamp_url", &self.timestamp_url)
            .field("anchor_url", &self.anchor_url)
            .field("artifact_url", &self.artifact_url)
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl HttpProviders {
    /// Build from configuration. The bearer token is read from the
    /// environment variable named by `token_env`, if set.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &ProviderConfig) -> RuntimeResult<Self> {
        let token = std::env::var(&config.token_env).ok().map(SecretString::from);
        Self::with_token(config, token)
    }

    /// Build from configuration with an explicit token
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn with_token(config: &ProviderConfig, token: Option<SecretString>) -> RuntimeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| RuntimeError::config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            timestamp_url: config.timestamp_url.clone(),
            anchor_url: config.anchor_url.clone(),
            artifact_url: config.artifact_url.clone(),
            token,
        })
    }

    async fn post<Req, Resp>(
        &self,
        provider: &str,
        url: Option<&str>,
        body: &Req,
    ) -> ProviderResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = url.ok_or_else(|| ProviderError::NotConfigured {
            provider: provider.to_string(),
        })?;

        let mut request = self.client.post(url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let unavailable = |e: reqwest::Error| ProviderError::Unavailable {
            provider: provider.to_string(),
            reason: e.to_string(),
        };

        let response = request.send().await.map_err(unavailable)?;
        let status = response.status();
        debug!(provider, %url, status = status.as_u16(), "provider responded");

        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                provider: provider.to_string(),
                reason: format!("{status}: {text}"),
            });
        }
        let response = response.error_for_status().map_err(unavailable)?;

        response
            .json::<Resp>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                provider: provider.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl TimestampAuthority for HttpProviders {
    async fn timestamp(&self, request: TimestampRequest) -> ProviderResult<TimestampToken> {
        self.post(TIMESTAMP, self.timestamp_url.as_deref(), &request)
            .await
    }
}

#[async_trait]
impl AnchorSubmitter for HttpProviders {
    async fn submit(&self, request: AnchorRequest) -> ProviderResult<AnchorReceipt> {
        let receipt: AnchorReceipt = self
            .post(ANCHOR, self.anchor_url.as_deref(), &request)
            .await?;
        if receipt.network != request.network {
            return Err(ProviderError::InvalidResponse {
                provider: ANCHOR.to_string(),
                reason: format!(
                    "asked for {}, got a receipt for {}",
                    request.network, receipt.network
                ),
            });
        }
        Ok(receipt)
    }
}

#[async_trait]
impl ArtifactBuilder for HttpProviders {
    async fn build(&self, request: ArtifactRequest) -> ProviderResult<ArtifactRef> {
        self.post(ARTIFACT, self.artifact_url.as_deref(), &request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notary_core::{EntityId, Fingerprint};

    #[tokio::test]
    async fn test_missing_endpoint_is_not_configured() {
        let providers = HttpProviders::with_token(&ProviderConfig::default(), None).unwrap();
        let result = providers
            .timestamp(TimestampRequest {
                entity_id: EntityId::new(),
                fingerprint: Fingerprint::compute(b"doc"),
            })
            .await;
        assert_eq!(
            result,
            Err(ProviderError::NotConfigured {
                provider: "timestamp".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let config = ProviderConfig {
            timestamp_url: Some("http://127.0.0.1:9/timestamp".to_string()),
            request_timeout_ms: 500,
            ..ProviderConfig::default()
        };
        let providers = HttpProviders::with_token(&config, Some(SecretString::from("t".to_string()))).unwrap();
        let result = providers
            .timestamp(TimestampRequest {
                entity_id: EntityId::new(),
                fingerprint: Fingerprint::compute(b"doc"),
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Unavailable { .. })));
    }

    #[test]
    fn test_debug_redacts_token() {
        let providers =
            HttpProviders::with_token(&ProviderConfig::default(), Some(SecretString::from("hunter2".to_string())))
                .unwrap();
        let debug = format!("{providers:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[redacted]"));
    }
}

//! Service Registry Client
//!
//! Resolves node endpoints to service provider ids through the registry
//! gateway. The registry is the authority on which endpoints participate
//! in the network; an id of 0 means an endpoint is not registered.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::network::RegistryClient;

#[derive(serde::Deserialize)]
struct ServiceProviderResponse {
    data: ServiceProviderData,
}

#[derive(serde::Deserialize)]
struct ServiceProviderData {
    service_provider_id: u64,
}

/// HTTP client for the service registry gateway
pub struct HttpRegistryClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpRegistryClient {
    pub fn new(endpoint: String, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait::async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn service_provider_id(&self, endpoint: &str) -> Result<u64> {
        let url = format!(
            "{}/service_providers/endpoint",
            self.endpoint.trim_end_matches('/')
        );
        let resp = self
            .client
            .get(&url)
            .query(&[("endpoint", endpoint)])
            .send()
            .await
            .map_err(|e| Error::Registry(format!("Registry unreachable: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Registry(format!(
                "Registry returned {}",
                resp.status()
            )));
        }

        let body: ServiceProviderResponse =
            resp.json().await.map_err(|e| Error::MalformedResponse {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;
        Ok(body.data.service_provider_id)
    }
}

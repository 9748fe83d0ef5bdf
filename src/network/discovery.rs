//! Discovery Provider Client
//!
//! Selects a healthy discovery provider from the configured list and
//! queries it for the users this node serves as primary. A failed query
//! clears the selection so the next cycle re-probes the provider list.

use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::network::DiscoveryClient;
use crate::replication::RegisteredUser;

#[derive(serde::Deserialize)]
struct UserListResponse {
    data: Vec<RegisteredUser>,
}

/// HTTP client for discovery providers
pub struct HttpDiscoveryClient {
    /// Candidate provider endpoints, probed in order
    providers: Vec<String>,
    /// The provider currently selected, if any
    selected: RwLock<Option<String>>,
    client: reqwest::Client,
}

impl HttpDiscoveryClient {
    pub fn new(providers: Vec<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            providers,
            selected: RwLock::new(None),
            client,
        })
    }

    /// Probe providers in order and return the first healthy one
    async fn select_provider(&self) -> Option<String> {
        for provider in &self.providers {
            let url = format!("{}/health_check", provider.trim_end_matches('/'));
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Selected discovery provider {}", provider);
                    return Some(provider.clone());
                }
                Ok(resp) => {
                    warn!(
                        "Discovery provider {} unhealthy: {}",
                        provider,
                        resp.status()
                    );
                }
                Err(e) => {
                    warn!("Discovery provider {} unreachable: {}", provider, e);
                }
            }
        }
        None
    }

    async fn clear_selection(&self) {
        *self.selected.write().await = None;
    }
}

#[async_trait::async_trait]
impl DiscoveryClient for HttpDiscoveryClient {
    async fn current_endpoint(&self) -> Option<String> {
        if let Some(selected) = self.selected.read().await.clone() {
            return Some(selected);
        }

        let picked = self.select_provider().await?;
        *self.selected.write().await = Some(picked.clone());
        Some(picked)
    }

    async fn primary_users(&self, node_endpoint: &str) -> Result<Vec<RegisteredUser>> {
        let provider = self
            .current_endpoint()
            .await
            .ok_or(Error::DiscoveryUnavailable)?;

        let url = format!("{}/users/creator_node", provider.trim_end_matches('/'));
        let resp = match self
            .client
            .get(&url)
            .query(&[("creator_node_endpoint", node_endpoint)])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                // Re-probe the provider list on the next cycle
                self.clear_selection().await;
                return Err(Error::Discovery(format!(
                    "Provider {} unreachable: {}",
                    provider, e
                )));
            }
        };

        if !resp.status().is_success() {
            self.clear_selection().await;
            return Err(Error::Discovery(format!(
                "Provider {} returned {}",
                provider,
                resp.status()
            )));
        }

        let body: UserListResponse =
            resp.json().await.map_err(|e| Error::MalformedResponse {
                endpoint: provider.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            "Discovery provider {} listed {} users for {}",
            provider,
            body.data.len(),
            node_endpoint
        );
        Ok(body.data)
    }
}

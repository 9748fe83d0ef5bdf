//! Peer Node Client
//!
//! HTTP client for the endpoints peer storage nodes expose to each other:
//! batched clock lookups, sync issuance, and sync progress polling.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::network::PeerClient;
use crate::replication::SyncType;

#[derive(serde::Serialize)]
struct BatchClockRequest<'a> {
    #[serde(rename = "walletPublicKeys")]
    wallet_public_keys: &'a [String],
}

#[derive(serde::Deserialize)]
struct BatchClockResponse {
    users: Vec<WalletClock>,
}

#[derive(serde::Deserialize)]
struct WalletClock {
    #[serde(rename = "walletPublicKey")]
    wallet_public_key: String,
    clock: i64,
}

#[derive(serde::Serialize)]
struct SyncRequest<'a> {
    wallet: Vec<&'a str>,
    creator_node_endpoint: &'a str,
    sync_type: &'a str,
}

#[derive(serde::Deserialize)]
struct SyncStatusResponse {
    data: SyncStatusData,
}

#[derive(serde::Deserialize)]
struct SyncStatusData {
    #[serde(rename = "clockValue")]
    clock_value: u64,
}

/// HTTP client for peer storage nodes
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl PeerClient for HttpPeerClient {
    async fn batch_clock_status(
        &self,
        endpoint: &str,
        wallets: &[String],
    ) -> Result<HashMap<String, u64>> {
        let url = format!("{}/users/batch_clock_status", endpoint.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&BatchClockRequest {
                wallet_public_keys: wallets,
            })
            .send()
            .await?
            .error_for_status()?;

        let body: BatchClockResponse =
            resp.json().await.map_err(|e| Error::MalformedResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let mut clocks = HashMap::with_capacity(body.users.len());
        for entry in body.users {
            // A negative clock means the peer has no record for this wallet
            if entry.clock >= 0 {
                clocks.insert(entry.wallet_public_key, entry.clock as u64);
            }
        }
        Ok(clocks)
    }

    async fn request_sync(
        &self,
        secondary: &str,
        wallet: &str,
        primary: &str,
        sync_type: SyncType,
    ) -> Result<()> {
        let url = format!("{}/sync", secondary.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&SyncRequest {
                wallet: vec![wallet],
                creator_node_endpoint: primary,
                sync_type: sync_type.as_str(),
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::SyncRejected {
                endpoint: secondary.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn sync_status(&self, secondary: &str, wallet: &str) -> Result<u64> {
        let url = format!("{}/sync_status/{}", secondary.trim_end_matches('/'), wallet);
        let resp = self.client.get(&url).send().await?.error_for_status()?;

        let body: SyncStatusResponse =
            resp.json().await.map_err(|e| Error::MalformedResponse {
                endpoint: secondary.to_string(),
                reason: e.to_string(),
            })?;
        Ok(body.data.clock_value)
    }
}

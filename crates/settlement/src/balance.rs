//! Balance query boundary.

use std::time::Duration;

use async_trait::async_trait;
use dropwell_core::Lovelace;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("balance query failed: {0}")]
    Unavailable(String),
    #[error("unexpected balance response: {0}")]
    InvalidResponse(String),
}

/// Side-effect-free lookup of an address's spendable balance.
#[async_trait]
pub trait BalanceQuery: Send + Sync {
    async fn balance(&self, address: &str) -> Result<Lovelace, BalanceError>;
}

pub const BLOCKFROST_MAINNET: &str = "https://cardano-mainnet.blockfrost.io/api/v0";

#[derive(Debug, Deserialize)]
struct AddressInfo {
    #[serde(default)]
    amount: Vec<AddressAmount>,
}

#[derive(Debug, Deserialize)]
struct AddressAmount {
    unit: String,
    quantity: String,
}

/// Balance lookups against the Blockfrost HTTP API.
pub struct BlockfrostBalance {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
}

impl BlockfrostBalance {
    pub fn new(base_url: &str, project_id: &str) -> Result<Self, BalanceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BalanceError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
        })
    }
}

#[async_trait]
impl BalanceQuery for BlockfrostBalance {
    async fn balance(&self, address: &str) -> Result<Lovelace, BalanceError> {
        let url = format!("{}/addresses/{}", self.base_url, address);
        let rsp = self
            .client
            .get(&url)
            .header("project_id", &self.project_id)
            .send()
            .await
            .map_err(|e| BalanceError::Unavailable(e.to_string()))?;

        // Blockfrost answers 404 for addresses that never appeared on chain.
        if rsp.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(address, "address unknown to blockfrost, balance 0");
            return Ok(0);
        }
        let status = rsp.status();
        let body = rsp
            .text()
            .await
            .map_err(|e| BalanceError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(BalanceError::Unavailable(format!("{}: {}", status, body)));
        }
        parse_address_lovelace(&body)
    }
}

/// Extract the lovelace quantity from a `/addresses/{address}` response body.
pub fn parse_address_lovelace(body: &str) -> Result<Lovelace, BalanceError> {
    let info: AddressInfo =
        serde_json::from_str(body).map_err(|e| BalanceError::InvalidResponse(e.to_string()))?;
    match info.amount.iter().find(|a| a.unit == "lovelace") {
        Some(amount) => amount
            .quantity
            .parse()
            .map_err(|_| BalanceError::InvalidResponse(format!("bad quantity {:?}", amount.quantity))),
        None => Ok(0),
    }
}

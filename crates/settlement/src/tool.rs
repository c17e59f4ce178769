//! The settlement tool boundary.
//!
//! A [`SettlementTool`] turns a list of payment outputs into a broadcast
//! transaction in four separately-failing steps. Implementations may shell
//! out to a CLI ([`crate::CardanoCli`]), call a linked library, or just record
//! calls ([`crate::DryRunTool`]).

use std::fmt;

use async_trait::async_trait;
use dropwell_core::Lovelace;
use serde::{Deserialize, Serialize};

use crate::SettlementError;

/// One payment output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub amount: Lovelace,
}

impl TxOutput {
    pub fn new(address: impl Into<String>, amount: Lovelace) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

impl fmt::Display for TxOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.address, self.amount)
    }
}

/// Opaque handle to a built or signed transaction. The `handle` is only
/// meaningful to the tool that produced it (a file path for the CLI tool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxArtifact {
    pub handle: String,
    pub description: String,
    pub signed: bool,
}

/// Whatever the tool reported when accepting a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub output: String,
}

#[async_trait]
pub trait SettlementTool: Send + Sync {
    /// Build a transaction spending from `source`, paying `outputs`, with all
    /// remaining value returned to `change_address`.
    async fn build(
        &self,
        source: &str,
        outputs: &[TxOutput],
        change_address: &str,
    ) -> Result<TxArtifact, SettlementError>;

    /// Sign a built transaction with the referenced key.
    async fn sign(&self, artifact: &TxArtifact, signing_key: &str)
        -> Result<TxArtifact, SettlementError>;

    /// Broadcast a signed transaction.
    async fn submit(&self, signed: &TxArtifact) -> Result<SubmitReceipt, SettlementError>;

    /// Transaction id of a signed transaction.
    async fn fetch_id(&self, signed: &TxArtifact) -> Result<String, SettlementError>;
}

/// Run build → sign → submit → fetch id, stopping at the first failure.
pub async fn settle(
    tool: &dyn SettlementTool,
    source: &str,
    outputs: &[TxOutput],
    change_address: &str,
    signing_key: &str,
) -> Result<String, SettlementError> {
    let body = tool.build(source, outputs, change_address).await?;
    let signed = tool.sign(&body, signing_key).await?;
    tool.submit(&signed).await?;
    tool.fetch_id(&signed).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_cli_format() {
        let out = TxOutput::new("addr1qxyz", 2_500_000);
        assert_eq!(out.to_string(), "addr1qxyz+2500000");
    }
}

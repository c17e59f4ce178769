//! `cardano-cli` subprocess settlement tool.
//!
//! Every step writes its artifact into `work_dir` and passes file paths between
//! calls, so a crashed run leaves the exact bodies it built behind for
//! diagnosis. Tool failures are surfaced with stdout and stderr verbatim.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dropwell_core::{unix_now, Lovelace};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::balance::{BalanceError, BalanceQuery};
use crate::tool::{SettlementTool, SubmitReceipt, TxArtifact, TxOutput};
use crate::{SettlementError, SettlementStep};

/// Which network the CLI talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Network {
    Mainnet,
    Testnet { magic: u32 },
}

impl Network {
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Mainnet => vec!["--mainnet".to_string()],
            Self::Testnet { magic } => vec!["--testnet-magic".to_string(), magic.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardanoCliConfig {
    /// Binary to invoke.
    pub binary: String,
    /// Era subcommand for transaction commands.
    pub era: String,
    pub network: Network,
    /// Node socket; falls back to the CLI's own `CARDANO_NODE_SOCKET_PATH` handling.
    pub socket_path: Option<String>,
    /// Where transaction bodies and signed files are written.
    pub work_dir: PathBuf,
}

impl Default for CardanoCliConfig {
    fn default() -> Self {
        Self {
            binary: "cardano-cli".to_string(),
            era: "conway".to_string(),
            network: Network::Mainnet,
            socket_path: None,
            work_dir: std::env::temp_dir().join("dropwell-tx"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct UtxoEntry {
    #[serde(default)]
    value: UtxoValue,
}

#[derive(Debug, Default, Deserialize)]
struct UtxoValue {
    #[serde(default)]
    lovelace: u64,
}

/// Settlement tool that drives `cardano-cli` as a subprocess.
pub struct CardanoCli {
    config: CardanoCliConfig,
    counter: AtomicU64,
}

impl CardanoCli {
    pub fn new(config: CardanoCliConfig) -> Self {
        Self {
            config,
            counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CardanoCliConfig {
        &self.config
    }

    /// UTxOs at `address`, keyed by `txhash#ix`, with their lovelace value.
    pub async fn query_utxos(
        &self,
        address: &str,
    ) -> Result<BTreeMap<String, Lovelace>, SettlementError> {
        let mut args = vec![
            "query".to_string(),
            "utxo".to_string(),
            "--address".to_string(),
            address.to_string(),
        ];
        args.extend(self.config.network.args());
        args.extend(self.socket_args());
        args.extend(["--output-json".to_string()]);

        let stdout = self.run(SettlementStep::Query, &args).await?;
        parse_utxos(&stdout)
    }

    fn socket_args(&self) -> Vec<String> {
        match &self.config.socket_path {
            Some(path) => vec!["--socket-path".to_string(), path.clone()],
            None => vec![],
        }
    }

    fn tx_args(&self, verb: &str) -> Vec<String> {
        vec![
            self.config.era.clone(),
            "transaction".to_string(),
            verb.to_string(),
        ]
    }

    fn next_path(&self, kind: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.config
            .work_dir
            .join(format!("{}_{}_{}", kind, unix_now(), n))
    }

    async fn run(&self, step: SettlementStep, args: &[String]) -> Result<String, SettlementError> {
        debug!(%step, binary = %self.config.binary, ?args, "running settlement command");
        let output = Command::new(&self.config.binary)
            .args(args)
            .output()
            .await
            .map_err(|source| SettlementError::Spawn {
                step,
                program: self.config.binary.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(SettlementError::Command {
                step,
                program: self.config.binary.clone(),
                status: output.status.to_string(),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(stdout)
    }
}

#[async_trait]
impl SettlementTool for CardanoCli {
    async fn build(
        &self,
        source: &str,
        outputs: &[TxOutput],
        change_address: &str,
    ) -> Result<TxArtifact, SettlementError> {
        let utxos = self.query_utxos(source).await?;
        if utxos.is_empty() {
            return Err(SettlementError::NoFunds(source.to_string()));
        }

        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .map_err(|source| SettlementError::Io {
                step: SettlementStep::Build,
                source,
            })?;
        let body = self.next_path("txbody");

        let mut args = self.tx_args("build");
        args.extend(self.config.network.args());
        args.extend(self.socket_args());
        args.extend(["--change-address".to_string(), change_address.to_string()]);
        for input in utxos.keys() {
            args.extend(["--tx-in".to_string(), input.clone()]);
        }
        for output in outputs {
            args.extend(["--tx-out".to_string(), output.to_string()]);
        }
        args.extend(["--out-file".to_string(), body.display().to_string()]);

        self.run(SettlementStep::Build, &args).await?;
        info!(
            inputs = utxos.len(),
            outputs = outputs.len(),
            body = %body.display(),
            "transaction built"
        );

        Ok(TxArtifact {
            handle: body.display().to_string(),
            description: format!("{} outputs, change to {}", outputs.len(), change_address),
            signed: false,
        })
    }

    async fn sign(
        &self,
        artifact: &TxArtifact,
        signing_key: &str,
    ) -> Result<TxArtifact, SettlementError> {
        let signed = self.next_path("txsigned");

        let mut args = self.tx_args("sign");
        args.extend([
            "--tx-body-file".to_string(),
            artifact.handle.clone(),
            "--signing-key-file".to_string(),
            signing_key.to_string(),
        ]);
        args.extend(self.config.network.args());
        args.extend(["--out-file".to_string(), signed.display().to_string()]);

        self.run(SettlementStep::Sign, &args).await?;

        Ok(TxArtifact {
            handle: signed.display().to_string(),
            description: artifact.description.clone(),
            signed: true,
        })
    }

    async fn submit(&self, signed: &TxArtifact) -> Result<SubmitReceipt, SettlementError> {
        let mut args = self.tx_args("submit");
        args.extend(self.config.network.args());
        args.extend(self.socket_args());
        args.extend(["--tx-file".to_string(), signed.handle.clone()]);

        let output = self.run(SettlementStep::Submit, &args).await?;
        info!(tx = %signed.handle, "transaction submitted");
        Ok(SubmitReceipt {
            output: output.trim().to_string(),
        })
    }

    async fn fetch_id(&self, signed: &TxArtifact) -> Result<String, SettlementError> {
        let mut args = self.tx_args("txid");
        args.extend(["--tx-file".to_string(), signed.handle.clone()]);

        let output = self.run(SettlementStep::TxId, &args).await?;
        parse_txid(&output)
    }
}

#[async_trait]
impl BalanceQuery for CardanoCli {
    async fn balance(&self, address: &str) -> Result<Lovelace, BalanceError> {
        let utxos = self
            .query_utxos(address)
            .await
            .map_err(|e| BalanceError::Unavailable(e.to_string()))?;
        Ok(utxos.values().fold(0u64, |acc, v| acc.saturating_add(*v)))
    }
}

/// Parse `query utxo --output-json` output.
pub(crate) fn parse_utxos(json: &str) -> Result<BTreeMap<String, Lovelace>, SettlementError> {
    let entries: BTreeMap<String, UtxoEntry> =
        serde_json::from_str(json).map_err(|e| SettlementError::InvalidOutput {
            step: SettlementStep::Query,
            detail: e.to_string(),
        })?;
    Ok(entries
        .into_iter()
        .map(|(input, entry)| (input, entry.value.lovelace))
        .collect())
}

/// Newer CLIs print `{"txhash": "..."}`; older ones print the bare hash.
pub(crate) fn parse_txid(output: &str) -> Result<String, SettlementError> {
    let trimmed = output.trim();
    let id = if trimmed.starts_with('{') {
        let value: serde_json::Value =
            serde_json::from_str(trimmed).map_err(|e| SettlementError::InvalidOutput {
                step: SettlementStep::TxId,
                detail: e.to_string(),
            })?;
        value
            .get("txhash")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    } else {
        trimmed.to_string()
    };

    if id.is_empty() {
        return Err(SettlementError::InvalidOutput {
            step: SettlementStep::TxId,
            detail: format!("no transaction id in {:?}", output),
        });
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_txid_plain() {
        assert_eq!(parse_txid("abc123\n").unwrap(), "abc123");
    }

    #[test]
    fn test_parse_txid_json() {
        assert_eq!(parse_txid(r#"{"txhash": "deadbeef"}"#).unwrap(), "deadbeef");
    }

    #[test]
    fn test_parse_txid_empty() {
        assert!(parse_txid("  \n").is_err());
        assert!(parse_txid(r#"{"other": 1}"#).is_err());
    }

    #[test]
    fn test_parse_utxos() {
        let json = r#"{
            "aa#0": {"address": "addr1x", "value": {"lovelace": 5000000}},
            "bb#1": {"address": "addr1x", "value": {"lovelace": 2000000, "policy": {"tok": 1}}}
        }"#;
        let utxos = parse_utxos(json).unwrap();
        assert_eq!(utxos.len(), 2);
        assert_eq!(utxos["aa#0"], 5_000_000);
        assert_eq!(utxos["bb#1"], 2_000_000);
    }

    #[test]
    fn test_parse_utxos_rejects_garbage() {
        assert!(parse_utxos("not json").is_err());
    }

    #[test]
    fn test_network_args() {
        assert_eq!(Network::Mainnet.args(), vec!["--mainnet"]);
        assert_eq!(
            Network::Testnet { magic: 1 }.args(),
            vec!["--testnet-magic", "1"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_surfaces_spawn_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cli = CardanoCli::new(CardanoCliConfig {
            binary: tmp.path().join("no-such-cli").display().to_string(),
            work_dir: tmp.path().to_path_buf(),
            ..CardanoCliConfig::default()
        });
        let err = cli.query_utxos("addr1x").await.unwrap_err();
        assert!(matches!(err, SettlementError::Spawn { step: SettlementStep::Query, .. }));
    }
}

//! Daemon configuration: persisted as JSON through `Settings<DaemonConfig>`,
//! then overridden from the environment.

use std::path::{Path, PathBuf};

use dropwell_engine::EngineConfig;
use dropwell_settlement::{CardanoCliConfig, BLOCKFROST_MAINNET};
use serde::{Deserialize, Serialize};

pub const ENV_TREASURY: &str = "DROPWELL_TREASURY_ADDRESS";
pub const ENV_BLOCKFROST: &str = "BLOCKFROST_PROJECT_ID";
pub const ENV_NODE_SOCKET: &str = "CARDANO_NODE_SOCKET_PATH";
pub const ENV_PUBLIC_CHANNEL: &str = "DROPWELL_PUBLIC_CHANNEL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockfrostConfig {
    #[serde(default = "default_blockfrost_url")]
    pub base_url: String,
    pub project_id: String,
}

fn default_blockfrost_url() -> String {
    BLOCKFROST_MAINNET.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub engine: EngineConfig,
    /// Defaults to `<data dir>/sessions`.
    pub sessions_dir: Option<PathBuf>,
    pub cardano: CardanoCliConfig,
    /// Balance lookups go through Blockfrost when set, `cardano-cli` otherwise.
    pub blockfrost: Option<BlockfrostConfig>,
    /// Record transactions instead of submitting them.
    pub dry_run: bool,
}

impl DaemonConfig {
    pub fn sessions_dir(&self, data_dir: &Path) -> PathBuf {
        self.sessions_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("sessions"))
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(treasury) = get(ENV_TREASURY) {
            self.engine.treasury_address = treasury;
        }
        if let Some(project_id) = get(ENV_BLOCKFROST) {
            match &mut self.blockfrost {
                Some(bf) => bf.project_id = project_id,
                None => {
                    self.blockfrost = Some(BlockfrostConfig {
                        base_url: default_blockfrost_url(),
                        project_id,
                    })
                }
            }
        }
        if let Some(socket) = get(ENV_NODE_SOCKET) {
            self.cardano.socket_path = Some(socket);
        }
        if let Some(channel) = get(ENV_PUBLIC_CHANNEL) {
            self.engine.public_channel = Some(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            (ENV_TREASURY, "addr1treasury"),
            (ENV_BLOCKFROST, "mainnetXYZ"),
            (ENV_NODE_SOCKET, "/run/node.socket"),
            (ENV_PUBLIC_CHANNEL, "#airdrops"),
        ]);
        let mut config = DaemonConfig::default();
        config.apply_env_with(|k| vars.get(k).cloned());

        assert_eq!(config.engine.treasury_address, "addr1treasury");
        assert_eq!(config.engine.public_channel.as_deref(), Some("#airdrops"));
        assert_eq!(config.cardano.socket_path.as_deref(), Some("/run/node.socket"));
        let bf = config.blockfrost.unwrap();
        assert_eq!(bf.project_id, "mainnetXYZ");
        assert_eq!(bf.base_url, BLOCKFROST_MAINNET);
    }

    #[test]
    fn test_empty_env_ignored() {
        let vars = env(&[(ENV_TREASURY, "  ")]);
        let mut config = DaemonConfig::default();
        config.engine.treasury_address = "addr1kept".to_string();
        config.apply_env_with(|k| vars.get(k).cloned());
        assert_eq!(config.engine.treasury_address, "addr1kept");
        assert!(config.blockfrost.is_none());
    }

    #[test]
    fn test_partial_json() {
        let config: DaemonConfig = serde_json::from_str(
            r#"{"engine":{"treasury_address":"addr1t"},"dry_run":true,"blockfrost":{"project_id":"p"}}"#,
        )
        .unwrap();
        assert!(config.dry_run);
        assert_eq!(config.engine.treasury_address, "addr1t");
        assert_eq!(config.engine.max_outputs_per_tx, 120);
        assert_eq!(config.cardano.era, "conway");
        assert_eq!(config.blockfrost.as_ref().unwrap().base_url, BLOCKFROST_MAINNET);
        assert_eq!(
            config.sessions_dir(Path::new("/var/lib/dropwell")),
            PathBuf::from("/var/lib/dropwell/sessions")
        );
    }
}

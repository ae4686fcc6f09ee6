//! Coordinator configuration
//!
//! Loaded from a JSON file at startup; every field has a default so a bare
//! `{}` is a valid configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use txngate_transport::DEFAULT_RPC_PATH;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the RPC listener binds.
    pub listen: String,
    /// Address other services reach this instance at; falls back to
    /// `listen`. Minted transaction tokens carry this as the processor.
    pub advertise: Option<String>,
    /// Handshake path the listener accepts.
    pub rpc_path: String,
    /// When false the coordinator runs in pass-through mode: transaction
    /// control becomes a no-op and every operation executes ambiently.
    pub enable: bool,
    /// How long a transaction may sit idle before reconciliation reclaims
    /// it.
    pub transaction_life_limit_secs: u64,
    /// How long finalized transaction records are retained before the
    /// retention sweep deletes them.
    pub retention_hours: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:50010".to_string(),
            advertise: None,
            rpc_path: DEFAULT_RPC_PATH.to_string(),
            enable: true,
            transaction_life_limit_secs: 60,
            retention_hours: 48,
        }
    }
}

impl Config {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn life_limit(&self) -> Duration {
        Duration::from_secs(self.transaction_life_limit_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }

    /// The address minted tokens point other services at.
    pub fn processor(&self) -> String {
        self.advertise.clone().unwrap_or_else(|| self.listen.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_fill_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"listen": "0.0.0.0:9999", "enable": false}}"#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9999");
        assert!(!config.enable);
        assert_eq!(config.rpc_path, DEFAULT_RPC_PATH);
        assert_eq!(config.life_limit(), Duration::from_secs(60));
        assert_eq!(config.processor(), "0.0.0.0:9999");
    }

    #[test]
    fn advertise_overrides_processor() {
        let config = Config {
            advertise: Some("10.0.0.8:50010".into()),
            ..Config::default()
        };
        assert_eq!(config.processor(), "10.0.0.8:50010");
    }
}

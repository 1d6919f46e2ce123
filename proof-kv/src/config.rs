//! 节点配置
//!
//! JSON 配置文件，所有字段都有默认值；命令行参数可以覆盖其中的存储位置。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 存储位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 数据目录
    pub data_dir: PathBuf,

    /// redb 文件名
    pub db_file: String,

    /// 字典名
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            db_file: "proof-kv.redb".to_string(),
            collection: "default".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }
}

/// 本地节点配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub store: StoreConfig,

    /// 本地日志的签名者数量
    pub signers: usize,

    /// 签名阈值，缺省为全体
    pub threshold: Option<usize>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { store: StoreConfig::default(), signers: 4, threshold: None }
    }
}

impl NodeConfig {
    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn threshold(&self) -> usize {
        self.threshold.unwrap_or(self.signers)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signers == 0 {
            return Err(ConfigError::Invalid("signers must be at least 1".to_string()));
        }
        let threshold = self.threshold();
        if threshold == 0 || threshold > self.signers {
            return Err(ConfigError::Invalid(format!(
                "threshold {} out of range for {} signers",
                threshold, self.signers
            )));
        }
        if self.store.collection.is_empty() {
            return Err(ConfigError::Invalid("collection name is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.threshold(), 4);
        assert_eq!(config.store.db_path(), PathBuf::from("./data/proof-kv.redb"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, r#"{ "store": { "collection": "ledger" }, "threshold": 3 }"#).unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.store.collection, "ledger");
        assert_eq!(config.store.db_file, "proof-kv.redb");
        assert_eq!(config.signers, 4);
        assert_eq!(config.threshold(), 3);
    }

    #[test]
    fn test_invalid_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, r#"{ "signers": 2, "threshold": 5 }"#).unwrap();

        assert!(matches!(NodeConfig::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(NodeConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}

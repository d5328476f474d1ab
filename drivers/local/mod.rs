//! Local filesystem backend / 本地存储驱动

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};
use crate::storage::DEFAULT_SPOOL_THRESHOLD;

mod driver;

pub use driver::{LocalStorage, META_DIR};

/// 本地存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    /// 根目录（必填，不存在时自动创建）
    #[serde(default)]
    pub root: String,
    /// 写缓冲内存上限（字节）
    #[serde(default = "default_spool_threshold")]
    pub spool_threshold: usize,
}

fn default_spool_threshold() -> usize {
    DEFAULT_SPOOL_THRESHOLD
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            spool_threshold: default_spool_threshold(),
        }
    }
}

impl LocalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.root.trim().is_empty() {
            return Err(StorageError::InvalidConfig("root is required".to_string()));
        }
        Ok(())
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::Storage;
use crate::config::{overrides_from, Config};
use crate::error::{Result, StorageError};

pub type StorageBox = Arc<dyn Storage>;

/// Backend factory trait / 存储后端工厂
pub trait BackendFactory: Send + Sync {
    /// Backend type name / 后端类型名称
    fn backend_type(&self) -> &'static str;

    /// Recognized options and their defaults / 支持的配置项及默认值
    fn default_options(&self) -> Map<String, Value>;

    /// Create a backend from merged options / 根据合并后的配置创建后端
    fn create(&self, config: Config) -> Result<Box<dyn Storage>>;

    /// Merge caller options over the defaults, then create / 合并配置并创建后端
    fn create_from(&self, options: Value) -> Result<Box<dyn Storage>> {
        let config = Config::new(self.default_options(), overrides_from(options)?)?;
        self.create(config)
    }
}

/// Storage manager (holds named backend instances) / 存储管理器
#[derive(Clone, Default)]
pub struct StorageManager {
    backends: Arc<RwLock<HashMap<String, StorageBox>>>,
    factories: Arc<RwLock<HashMap<String, Arc<dyn BackendFactory>>>>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register backend factory / 注册后端工厂
    pub async fn register_factory(&self, factory: Box<dyn BackendFactory>) -> Result<()> {
        let backend_type = factory.backend_type().to_string();
        let mut factories = self.factories.write().await;
        factories.insert(backend_type.clone(), Arc::from(factory));

        tracing::info!("Backend factory registered: {}", backend_type);
        Ok(())
    }

    /// Create and mount a backend under `id` / 创建后端实例
    pub async fn create_backend(&self, id: &str, backend_type: &str, options: Value) -> Result<StorageBox> {
        let factory = {
            let factories = self.factories.read().await;
            factories
                .get(backend_type)
                .cloned()
                .ok_or_else(|| StorageError::UnknownBackend(backend_type.to_string()))?
        };

        match factory.create_from(options) {
            Ok(backend) => {
                let backend: StorageBox = Arc::from(backend);
                let mut backends = self.backends.write().await;
                backends.insert(id.to_string(), backend.clone());
                tracing::info!("Backend created: {} ({})", id, backend_type);
                Ok(backend)
            }
            Err(e) => {
                tracing::error!("Backend creation failed: {} ({}) - {}", id, backend_type, e);
                Err(e)
            }
        }
    }

    /// Get backend instance / 获取后端实例
    pub async fn get(&self, id: &str) -> Option<StorageBox> {
        let backends = self.backends.read().await;
        backends.get(id).cloned()
    }

    /// Remove backend instance / 移除后端实例
    pub async fn remove(&self, id: &str) -> Result<StorageBox> {
        let mut backends = self.backends.write().await;
        let removed = backends
            .remove(id)
            .ok_or_else(|| StorageError::BackendNotMounted(id.to_string()))?;

        tracing::info!("Backend removed: {}", id);
        Ok(removed)
    }

    /// List mounted backend ids (sorted) / 列出所有后端实例
    pub async fn list_backends(&self) -> Vec<String> {
        let backends = self.backends.read().await;
        let mut ids: Vec<String> = backends.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// List registered backend types (sorted) / 列出所有可用的后端类型
    pub async fn backend_types(&self) -> Vec<String> {
        let factories = self.factories.read().await;
        let mut types: Vec<String> = factories.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers;
    use crate::storage::StorageExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_create() {
        let manager = StorageManager::new();
        drivers::register_all(&manager).await.unwrap();
        assert_eq!(manager.backend_types().await, vec!["local", "memory", "s3"]);

        let backend = manager.create_backend("scratch", "memory", Value::Null).await.unwrap();
        backend.save("hi".into(), "a.txt", false).await.unwrap();

        let again = manager.get("scratch").await.unwrap();
        assert_eq!(&again.read("a.txt").await.unwrap()[..], b"hi");
        assert_eq!(manager.list_backends().await, vec!["scratch"]);

        manager.remove("scratch").await.unwrap();
        assert!(manager.get("scratch").await.is_none());
        assert!(matches!(
            manager.remove("scratch").await,
            Err(StorageError::BackendNotMounted(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_and_option() {
        let manager = StorageManager::new();
        drivers::register_all(&manager).await.unwrap();

        assert!(matches!(
            manager.create_backend("x", "ftp", Value::Null).await,
            Err(StorageError::UnknownBackend(_))
        ));
        assert!(matches!(
            manager
                .create_backend("x", "memory", json!({"spool_treshold": 1}))
                .await,
            Err(StorageError::UnknownAttribute(_))
        ));
        assert!(manager.list_backends().await.is_empty());
    }
}

use serde_json::{Map, Value};

use super::{BackendFactory, Storage};
use crate::config::{defaults_of, Config};
use crate::drivers::local::{LocalConfig, LocalStorage};
use crate::error::Result;

pub struct LocalStorageFactory;

impl BackendFactory for LocalStorageFactory {
    fn backend_type(&self) -> &'static str {
        "local"
    }

    fn default_options(&self) -> Map<String, Value> {
        defaults_of(&LocalConfig::default())
    }

    fn create(&self, config: Config) -> Result<Box<dyn Storage>> {
        let config: LocalConfig = config.into_typed()?;
        // 同步初始化（工厂方法是同步的）
        Ok(Box::new(LocalStorage::new(config)?))
    }
}

//! S3后端工厂

use serde_json::{Map, Value};

use super::config::S3Config;
use super::driver::S3Storage;
use crate::config::{defaults_of, Config};
use crate::error::Result;
use crate::storage::{BackendFactory, Storage};

/// S3后端工厂
pub struct S3StorageFactory;

impl BackendFactory for S3StorageFactory {
    fn backend_type(&self) -> &'static str {
        "s3"
    }

    fn default_options(&self) -> Map<String, Value> {
        defaults_of(&S3Config::default())
    }

    fn create(&self, config: Config) -> Result<Box<dyn Storage>> {
        let config: S3Config = config.into_typed()?;
        Ok(Box::new(S3Storage::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_cover_recognized_keys() {
        let options = S3StorageFactory.default_options();
        for key in ["endpoint", "region", "access_key", "secret_key", "bucket", "delete_mode"] {
            assert!(options.contains_key(key), "missing {}", key);
        }
        assert_eq!(options["endpoint"], Value::Null);
    }
}

//! In-memory backend / 内存存储后端
//!
//! Objects live in a `BTreeMap` behind a `RwLock`; nothing survives the
//! process. Handy for tests and for scratch storage.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{defaults_of, Config};
use crate::error::{ensure_name, Result, StorageError};
use crate::storage::{
    as_binary, BackendFactory, Capability, Content, FileReader, FileStream, Metadata, Storage,
    UrlParams, UserMetadata, WriteOutcome, DEFAULT_ENCODING, DEFAULT_SPOOL_THRESHOLD,
    DEFAULT_URL_EXPIRE,
};
use crate::utils::resolve_metadata;

/// Memory backend options / 内存后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    #[serde(default = "default_spool_threshold")]
    pub spool_threshold: usize,
}

fn default_spool_threshold() -> usize {
    DEFAULT_SPOOL_THRESHOLD
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            spool_threshold: default_spool_threshold(),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    custom: BTreeMap<String, String>,
    modified: DateTime<Utc>,
}

pub struct MemoryStorage {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    spool_threshold: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            spool_threshold: config.spool_threshold,
        }
    }

    /// Number of objects currently stored / 当前对象数量
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn get(&self, name: &str) -> Result<StoredObject> {
        self.objects
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> Capability {
        Capability {
            server_side_copy: true,
            presigned_urls: false,
            atomic_rename: true,
            prefix_delete: false,
        }
    }

    fn spool_threshold(&self) -> usize {
        self.spool_threshold
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(name))
    }

    async fn open_reader(&self, name: &str) -> Result<FileReader> {
        Ok(FileReader::from_bytes(self.get(name)?.data))
    }

    async fn read(&self, name: &str) -> Result<Bytes> {
        Ok(self.get(name)?.data)
    }

    async fn write(
        &self,
        name: &str,
        content: Content,
        metadata: Option<UserMetadata>,
    ) -> Result<WriteOutcome> {
        ensure_name(name)?;
        let data = as_binary(content, DEFAULT_ENCODING).await?;
        let resolved = resolve_metadata(name, metadata.as_ref());
        let outcome = WriteOutcome {
            name: name.to_string(),
            size: data.len() as u64,
            content_type: resolved.content_type.clone(),
            etag: Some(format!("{:x}", md5::compute(&data))),
        };

        self.objects.write().insert(
            name.to_string(),
            StoredObject {
                data,
                content_type: resolved.content_type,
                custom: resolved.custom,
                modified: Utc::now(),
            },
        );
        Ok(outcome)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        ensure_name(name)?;
        self.objects.write().remove(name);
        Ok(())
    }

    async fn copy_item(&self, name: &str, target: &str) -> Result<()> {
        ensure_name(target)?;
        let mut object = self.get(name)?;
        object.modified = Utc::now();
        self.objects.write().insert(target.to_string(), object);
        Ok(())
    }

    async fn move_item(&self, name: &str, target: &str) -> Result<()> {
        ensure_name(name)?;
        ensure_name(target)?;
        let mut objects = self.objects.write();
        let object = objects
            .remove(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;
        objects.insert(target.to_string(), object);
        Ok(())
    }

    async fn get_metadata(&self, name: &str) -> Result<Metadata> {
        let object = self.get(name)?;
        Ok(Metadata {
            checksum: Some(format!("md5:{:x}", md5::compute(&object.data))),
            size: object.data.len() as u64,
            mime: Some(object.content_type),
            modified: Some(object.modified),
            custom: object.custom,
        })
    }

    fn list_files<'a>(&'a self, prefix: &'a str) -> FileStream<'a> {
        let names: Vec<Result<String>> = self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| Ok(k.clone()))
            .collect();
        stream::iter(names).boxed()
    }

    async fn get_url(
        &self,
        name: &str,
        parameters: Option<UrlParams>,
        expire_secs: u32,
    ) -> Result<String> {
        let expire = if expire_secs == 0 { DEFAULT_URL_EXPIRE } else { expire_secs };
        let expires = Utc::now().timestamp() + i64::from(expire);

        let mut url = url::Url::parse("memory://localhost/")
            .map_err(|e| StorageError::backend("invalid base url", e))?;
        url.set_path(name);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("expires", &expires.to_string());
            let params: BTreeMap<String, String> = parameters.unwrap_or_default().into_iter().collect();
            for (k, v) in &params {
                query.append_pair(k, v);
            }
        }
        Ok(url.to_string())
    }
}

/// 内存后端工厂
pub struct MemoryStorageFactory;

impl BackendFactory for MemoryStorageFactory {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    fn default_options(&self) -> Map<String, Value> {
        defaults_of(&MemoryConfig::default())
    }

    fn create(&self, config: Config) -> Result<Box<dyn Storage>> {
        let config: MemoryConfig = config.into_typed()?;
        Ok(Box::new(MemoryStorage::with_config(config)))
    }
}

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{ensure_name, Result};
use crate::utils::{self, DEFAULT_MIME};

pub mod content;
pub mod ext;
pub mod handle;
pub mod manager;
pub mod local_factory;

pub use content::{as_binary, lookup_encoding, Content, DEFAULT_ENCODING};
pub use ext::{StorageExt, MAX_NAME_ATTEMPTS};
pub use handle::{FileReader, OpenFile, OpenMode, WriteHandle};
pub use local_factory::LocalStorageFactory;
pub use manager::{BackendFactory, StorageBox, StorageManager};
pub use utils::UserMetadata;

/// Spooled writes stay in memory up to this size / 写缓冲内存上限（超出后落盘）
pub const DEFAULT_SPOOL_THRESHOLD: usize = 5 * 1024 * 1024;

/// Default lifetime of generated URLs in seconds / 默认URL有效期（秒）
pub const DEFAULT_URL_EXPIRE: u32 = 3600;

/// Lazy listing of object names / 惰性文件名列表
pub type FileStream<'a> = BoxStream<'a, Result<String>>;

/// Extra query parameters for generated URLs / URL附加参数
pub type UrlParams = HashMap<String, String>;

/// Metadata record, recomputed on every call / 文件元数据（每次调用实时获取）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// `<algorithm>:<hex-digest>` / 校验值
    pub checksum: Option<String>,
    pub size: u64,
    pub mime: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    /// User-defined metadata / 用户自定义元数据
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

impl Metadata {
    pub const RESERVED_KEYS: [&'static str; 4] = ["checksum", "size", "mime", "modified"];

    /// Look up a key; reserved keys always resolve to the record fields / 按键查询元数据
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "checksum" => self.checksum.clone(),
            "size" => Some(self.size.to_string()),
            "mime" => self.mime.clone(),
            "modified" => self.modified.map(|m| m.to_rfc3339()),
            other => self.custom.get(other).cloned(),
        }
    }
}

/// Result of a committed write / 写入结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    /// Backend entity tag when the backend reports one / 后端返回的ETag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Backend capability declaration / 后端能力声明
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Copy without downloading / 支持服务端复制
    pub server_side_copy: bool,
    /// Time-limited signed URLs / 支持预签名URL
    pub presigned_urls: bool,
    /// `move_item` is a single atomic rename / 支持原子重命名
    pub atomic_rename: bool,
    /// `delete` removes every name under the given prefix / 按前缀删除
    pub prefix_delete: bool,
}

/// Storage contract implemented by every backend / 存储后端接口
///
/// Everything is async so each backend round-trip is a yield point. Calls on
/// independent names may run concurrently on a shared backend; ordering
/// between concurrent writers of the same name is left to the backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name / 后端名称
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capability {
        Capability::default()
    }

    /// Memory limit of a write handle before it spills to disk / 写缓冲阈值
    fn spool_threshold(&self) -> usize {
        DEFAULT_SPOOL_THRESHOLD
    }

    /// Whether an object exists; never fails for absence / 判断文件是否存在
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Open a reader over the object's content / 打开文件读取器
    async fn open_reader(&self, name: &str) -> Result<FileReader>;

    /// Read the whole object / 读取完整文件
    async fn read(&self, name: &str) -> Result<Bytes> {
        self.open_reader(name).await?.read_bytes().await
    }

    /// Write content, replacing any previous object / 写入文件
    ///
    /// Content goes through [`as_binary`]. The content type comes from a
    /// `content-type` metadata key (any casing) or is sniffed from the name.
    async fn write(
        &self,
        name: &str,
        content: Content,
        metadata: Option<UserMetadata>,
    ) -> Result<WriteOutcome>;

    /// Delete an object; absence is not an error / 删除文件
    async fn delete(&self, name: &str) -> Result<()>;

    /// Copy an object (default implementation: read then write) / 复制文件
    async fn copy_item(&self, name: &str, target: &str) -> Result<()> {
        ensure_name(target)?;
        let meta = self.get_metadata(name).await?;
        let data = self.read(name).await?;

        let mut user: UserMetadata = meta
            .custom
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        if let Some(mime) = meta.mime {
            user.insert("content-type".to_string(), serde_json::Value::String(mime));
        }

        self.write(target, Content::Bytes(data), Some(user)).await?;
        Ok(())
    }

    /// Move an object (default implementation: copy then delete) / 移动文件
    ///
    /// Not atomic: a failure after the copy leaves both names present.
    /// Backends with a native rename should override this.
    async fn move_item(&self, name: &str, target: &str) -> Result<()> {
        ensure_name(name)?;
        ensure_name(target)?;
        if name == target {
            return Ok(());
        }
        self.copy_item(name, target).await?;
        self.delete(name).await
    }

    /// Backend specific metadata extraction / 后端元数据获取
    async fn get_metadata(&self, name: &str) -> Result<Metadata>;

    /// Metadata with the MIME type filled from the name when the backend has none / 获取完整元数据
    async fn metadata(&self, name: &str) -> Result<Metadata> {
        let mut meta = self.get_metadata(name).await?;
        if meta.mime.as_deref().map_or(true, str::is_empty) {
            meta.mime = Some(utils::mime(name, DEFAULT_MIME));
        }
        Ok(meta)
    }

    /// Enumerate names starting with `prefix` / 列出前缀下的所有文件
    ///
    /// The stream reflects backend state while it is consumed; call again to
    /// enumerate again.
    fn list_files<'a>(&'a self, prefix: &'a str) -> FileStream<'a>;

    /// Time-limited access URL; the object is not checked / 生成访问URL
    async fn get_url(
        &self,
        name: &str,
        parameters: Option<UrlParams>,
        expire_secs: u32,
    ) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryStorage;
    use serde_json::json;

    /// Forwards only the required primitives and hides the stored content
    /// type, so the trait's default bodies run.
    struct Bare(MemoryStorage);

    #[async_trait]
    impl Storage for Bare {
        fn name(&self) -> &str {
            "bare"
        }

        async fn exists(&self, name: &str) -> Result<bool> {
            self.0.exists(name).await
        }

        async fn open_reader(&self, name: &str) -> Result<FileReader> {
            self.0.open_reader(name).await
        }

        async fn write(
            &self,
            name: &str,
            content: Content,
            metadata: Option<UserMetadata>,
        ) -> Result<WriteOutcome> {
            self.0.write(name, content, metadata).await
        }

        async fn delete(&self, name: &str) -> Result<()> {
            self.0.delete(name).await
        }

        async fn get_metadata(&self, name: &str) -> Result<Metadata> {
            let mut meta = self.0.get_metadata(name).await?;
            meta.mime = None;
            Ok(meta)
        }

        fn list_files<'a>(&'a self, prefix: &'a str) -> FileStream<'a> {
            self.0.list_files(prefix)
        }

        async fn get_url(
            &self,
            name: &str,
            parameters: Option<UrlParams>,
            expire_secs: u32,
        ) -> Result<String> {
            self.0.get_url(name, parameters, expire_secs).await
        }
    }

    #[tokio::test]
    async fn test_default_read_and_mime_fallback() {
        let storage = Bare(MemoryStorage::new());
        storage.write("report.json", "{}".into(), None).await.unwrap();

        assert_eq!(&storage.read("report.json").await.unwrap()[..], b"{}");
        assert!(storage.read("missing").await.unwrap_err().is_not_found());

        assert_eq!(storage.get_metadata("report.json").await.unwrap().mime, None);
        let meta = storage.metadata("report.json").await.unwrap();
        assert_eq!(meta.mime.as_deref(), Some("application/json"));
        assert_eq!(meta.size, 2);
    }

    #[tokio::test]
    async fn test_default_copy_keeps_custom_metadata() {
        let storage = Bare(MemoryStorage::new());
        let mut user = UserMetadata::new();
        user.insert("owner".into(), json!("alice"));
        storage.write("src.txt", "data".into(), Some(user)).await.unwrap();

        storage.copy_item("src.txt", "dst.txt").await.unwrap();
        assert_eq!(&storage.read("dst.txt").await.unwrap()[..], b"data");
        assert!(storage.exists("src.txt").await.unwrap());
        let meta = storage.metadata("dst.txt").await.unwrap();
        assert_eq!(meta.get("owner").as_deref(), Some("alice"));
        assert_eq!(meta.mime.as_deref(), Some("text/plain"));

        assert!(storage.copy_item("nope", "x").await.unwrap_err().is_not_found());
        assert!(matches!(
            storage.copy_item("src.txt", "").await,
            Err(crate::error::StorageError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_default_move_is_copy_then_delete() {
        let storage = Bare(MemoryStorage::new());
        storage.write("a.bin", vec![1u8, 2, 3].into(), None).await.unwrap();

        storage.move_item("a.bin", "b.bin").await.unwrap();
        assert!(!storage.exists("a.bin").await.unwrap());
        assert_eq!(&storage.read("b.bin").await.unwrap()[..], &[1, 2, 3]);

        // same name is a no-op
        storage.move_item("b.bin", "b.bin").await.unwrap();
        assert!(storage.exists("b.bin").await.unwrap());

        assert!(storage.move_item("a.bin", "c.bin").await.unwrap_err().is_not_found());
        assert!(!storage.exists("c.bin").await.unwrap());
        assert!(matches!(
            storage.move_item("", "c.bin").await,
            Err(crate::error::StorageError::InvalidName(_))
        ));
    }

    #[test]
    fn test_metadata_reserved_keys_win() {
        let mut meta = Metadata {
            checksum: Some("md5:abc".into()),
            size: 12,
            mime: Some("text/plain".into()),
            modified: None,
            custom: BTreeMap::new(),
        };
        meta.custom.insert("size".into(), "999".into());
        meta.custom.insert("owner".into(), "bob".into());

        assert_eq!(meta.get("size").as_deref(), Some("12"));
        assert_eq!(meta.get("checksum").as_deref(), Some("md5:abc"));
        assert_eq!(meta.get("owner").as_deref(), Some("bob"));
        assert_eq!(meta.get("modified"), None);
        assert_eq!(meta.get("missing"), None);
    }

    #[test]
    fn test_metadata_serializes_without_empty_custom() {
        let meta = Metadata::default();
        let value = serde_json::to_value(&meta).unwrap();
        assert!(value.get("custom").is_none());
        assert_eq!(value["size"], 0);
    }
}

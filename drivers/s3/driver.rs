//! S3后端核心实现
//!
//! 设计原则：
//! - 所有"对象不存在"信号统一经过 `S3Failure::is_not_found`
//! - 写入为单次PUT；`open` 写模式在提交前只写本地缓冲
//! - 校验值取自ETag（`md5:<etag>`）。分片上传的ETag不是真实MD5，这里不做修正

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::serde_types::HeadObjectResult;
use s3::{BucketConfiguration, Region};

use super::config::{DeleteMode, S3Config};
use super::error::{check_status, client_error, S3Failure};
use crate::config::{defaults_of, overrides_from, Config};
use crate::error::{ensure_name, Result, StorageError};
use crate::storage::{
    as_binary, Capability, Content, FileReader, FileStream, Metadata, Storage, UrlParams,
    UserMetadata, WriteOutcome, DEFAULT_ENCODING,
};
use crate::utils::{resolve_metadata, strip_mime_params};

/// User metadata header prefix / 用户元数据请求头前缀
const META_HEADER_PREFIX: &str = "x-amz-meta-";

/// S3后端
pub struct S3Storage {
    config: S3Config,
    bucket: Box<Bucket>,
    region: Region,
    credentials: Credentials,
}

impl S3Storage {
    /// 创建新的S3后端实例
    pub fn new(config: S3Config) -> Result<Self> {
        config.validate()?;
        let region = config.region()?;
        let credentials = config.credentials()?;
        let bucket = Self::build_bucket(&config, region.clone(), credentials.clone())?;

        tracing::info!("S3 backend ready: bucket={}, region={}", config.bucket, region);
        Ok(Self {
            config,
            bucket,
            region,
            credentials,
        })
    }

    /// 由默认配置与用户配置合并创建
    pub fn from_options(options: serde_json::Value) -> Result<Self> {
        let config = Config::new(defaults_of(&S3Config::default()), overrides_from(options)?)?;
        Self::new(config.into_typed()?)
    }

    /// 创建S3 Bucket客户端
    fn build_bucket(config: &S3Config, region: Region, credentials: Credentials) -> Result<Box<Bucket>> {
        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| StorageError::backend("创建S3 Bucket失败", e))?;

        let bucket = if config.path_style {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(bucket)
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    /// 创建存储桶；已归属当前用户时视为成功
    pub async fn create_bucket(&self) -> Result<()> {
        let name = self.config.bucket.as_str();
        let response = if self.config.path_style {
            Bucket::create_with_path_style(
                name,
                self.region.clone(),
                self.credentials.clone(),
                BucketConfiguration::default(),
            )
            .await
        } else {
            Bucket::create(
                name,
                self.region.clone(),
                self.credentials.clone(),
                BucketConfiguration::default(),
            )
            .await
        };

        let failure = match response {
            Ok(resp) if resp.success() => {
                tracing::info!("S3 bucket created: {}", name);
                return Ok(());
            }
            Ok(resp) => S3Failure::status(resp.response_code, resp.response_text.as_bytes()),
            Err(e) => S3Failure::Client(e),
        };

        if failure.is_already_owned() {
            tracing::debug!("S3 bucket already owned: {}", name);
            return Ok(());
        }
        Err(failure.into_error("CreateBucket", name))
    }

    /// HEAD对象，不存在时返回 FileNotFound
    async fn head(&self, name: &str) -> Result<HeadObjectResult> {
        let (head, code) = self
            .bucket
            .head_object(name)
            .await
            .map_err(|e| client_error("HEAD", name, e))?;
        check_status("HEAD", name, code, b"")?;
        Ok(head)
    }

    /// 带用户元数据请求头的Bucket副本
    fn bucket_with_metadata(&self, custom: &BTreeMap<String, String>) -> Result<Box<Bucket>> {
        let mut bucket = self.bucket.clone();
        for (key, value) in custom {
            let (header, value) = meta_header(key, value)?;
            bucket.add_header(&header, value);
        }
        Ok(bucket)
    }

    /// 删除单个对象，不存在视为成功
    async fn delete_key(&self, key: &str) -> Result<()> {
        let result = match self.bucket.delete_object(key).await {
            Ok(resp) => check_status("DELETE", key, resp.status_code(), resp.bytes()),
            Err(e) => Err(client_error("DELETE", key, e)),
        };
        match result {
            Err(StorageError::FileNotFound(_)) | Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// 拉取下一页列表
    async fn next_key(&self, prefix: &str, state: &mut ListState) -> Result<Option<String>> {
        loop {
            if let Some(key) = state.ready.pop_front() {
                return Ok(Some(key));
            }
            if state.done {
                return Ok(None);
            }

            let (page, code) = self
                .bucket
                .list_page(prefix.to_string(), None, state.token.take(), None, None)
                .await
                .map_err(|e| StorageError::backend(format!("列出S3对象失败: prefix={}", prefix), e))?;
            if !(200..300).contains(&code) {
                return Err(StorageError::backend_msg(format!(
                    "列出S3对象失败: prefix={}, HTTP {}",
                    prefix, code
                )));
            }

            state.ready.extend(page.contents.into_iter().map(|obj| obj.key));
            match page.next_continuation_token {
                Some(token) if page.is_truncated => state.token = Some(token),
                _ => state.done = true,
            }
        }
    }
}

/// 分页列表状态
#[derive(Default)]
struct ListState {
    token: Option<String>,
    ready: VecDeque<String>,
    done: bool,
}

/// Validate a user metadata pair and build its header / 校验并构造元数据请求头
fn meta_header<'v>(key: &str, value: &'v str) -> Result<(String, &'v str)> {
    let key_ok = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !key_ok {
        return Err(StorageError::InvalidMetadata(format!("invalid key {:?}", key)));
    }
    if !value.bytes().all(|b| b == b'\t' || (0x20..0x7f).contains(&b)) {
        return Err(StorageError::InvalidMetadata(format!(
            "value of {} must be printable ASCII",
            key
        )));
    }
    Ok((format!("{}{}", META_HEADER_PREFIX, key.to_ascii_lowercase()), value))
}

/// `"<etag>"` -> `md5:<etag>`
fn etag_checksum(etag: &str) -> String {
    format!("md5:{}", etag.trim_matches('"'))
}

/// HTTP date (RFC 2822) or RFC 3339 / 解析修改时间
fn parse_modified(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

/// Build the metadata record from HEAD fields / 由HEAD结果构造元数据
fn build_metadata(
    e_tag: Option<&str>,
    content_type: Option<&str>,
    content_length: Option<i64>,
    last_modified: Option<&str>,
    custom: Option<&HashMap<String, String>>,
) -> Metadata {
    Metadata {
        checksum: e_tag.map(etag_checksum),
        size: content_length.unwrap_or(0).max(0) as u64,
        mime: content_type.and_then(strip_mime_params),
        modified: last_modified.and_then(parse_modified),
        custom: custom
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn name(&self) -> &str {
        "S3"
    }

    fn capabilities(&self) -> Capability {
        Capability {
            server_side_copy: true,
            presigned_urls: true,
            atomic_rename: false,
            prefix_delete: self.config.delete_mode == DeleteMode::Prefix,
        }
    }

    fn spool_threshold(&self) -> usize {
        self.config.spool_threshold
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        match self.head(name).await {
            Ok(_) => Ok(true),
            Err(StorageError::FileNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn open_reader(&self, name: &str) -> Result<FileReader> {
        // rust-s3返回完整响应，封装为AsyncRead
        let data = self.read(name).await?;
        Ok(FileReader::from_bytes(data))
    }

    async fn read(&self, name: &str) -> Result<Bytes> {
        let response = self
            .bucket
            .get_object(name)
            .await
            .map_err(|e| client_error("GET", name, e))?;
        check_status("GET", name, response.status_code(), response.bytes())?;
        Ok(Bytes::from(response.bytes().to_vec()))
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
        let bucket = self.bucket_with_metadata(&resolved.custom)?;

        tracing::debug!(
            "S3 PUT: key={}, size={}, content_type={}",
            name,
            data.len(),
            resolved.content_type
        );

        let response = bucket
            .put_object_with_content_type(name, &data, &resolved.content_type)
            .await
            .map_err(|e| client_error("PUT", name, e))?;
        check_status("PUT", name, response.status_code(), response.bytes())?;

        let etag = response
            .headers()
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("etag"))
            .map(|(_, v)| v.trim_matches('"').to_string());

        Ok(WriteOutcome {
            name: name.to_string(),
            size: data.len() as u64,
            content_type: resolved.content_type,
            etag,
        })
    }

    async fn delete(&self, name: &str) -> Result<()> {
        ensure_name(name)?;
        match self.config.delete_mode {
            DeleteMode::Exact => self.delete_key(name).await,
            DeleteMode::Prefix => {
                let keys: Vec<String> = self.list_files(name).try_collect().await?;
                tracing::debug!("S3 prefix delete: prefix={}, keys={}", name, keys.len());
                for key in keys {
                    self.delete_key(&key).await?;
                }
                Ok(())
            }
        }
    }

    /// S3 CopyObject - 服务端复制，并验证复制结果
    async fn copy_item(&self, name: &str, target: &str) -> Result<()> {
        ensure_name(name)?;
        ensure_name(target)?;

        // copy_object_internal的from参数需要URL编码（中文等非ASCII字符）
        let encoded_src = urlencoding::encode(name);
        tracing::debug!("S3 CopyObject: src_key={}, encoded={}, dst_key={}", name, encoded_src, target);

        let code = self
            .bucket
            .copy_object_internal(&*encoded_src, target)
            .await
            .map_err(|e| client_error("COPY", name, e))?;
        check_status("COPY", name, code, b"")?;

        // 验证新文件是否存在
        if !self.exists(target).await? {
            return Err(StorageError::backend_msg(format!(
                "S3 CopyObject后新文件不存在: {}",
                target
            )));
        }
        Ok(())
    }

    /// 复制后只删除源对象本身，避免前缀删除误删目标
    async fn move_item(&self, name: &str, target: &str) -> Result<()> {
        if name == target {
            ensure_name(name)?;
            return Ok(());
        }
        self.copy_item(name, target).await?;
        tracing::debug!("S3复制成功，删除原对象: {}", name);
        self.delete_key(name).await
    }

    async fn get_metadata(&self, name: &str) -> Result<Metadata> {
        let head = self.head(name).await?;
        Ok(build_metadata(
            head.e_tag.as_deref(),
            head.content_type.as_deref(),
            head.content_length,
            head.last_modified.as_deref(),
            head.metadata.as_ref(),
        ))
    }

    fn list_files<'a>(&'a self, prefix: &'a str) -> FileStream<'a> {
        stream::try_unfold(ListState::default(), move |mut state| async move {
            self.next_key(prefix, &mut state)
                .await
                .map(|key| key.map(|key| (key, state)))
        })
        .boxed()
    }

    async fn get_url(
        &self,
        name: &str,
        parameters: Option<UrlParams>,
        expire_secs: u32,
    ) -> Result<String> {
        let expire = if expire_secs == 0 {
            self.config.url_expire
        } else {
            expire_secs
        };
        self.bucket
            .presign_get(name, expire, parameters)
            .await
            .map_err(|e| StorageError::backend(format!("生成预签名URL失败: {}", name), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_etag_checksum_strips_quotes() {
        assert_eq!(
            etag_checksum("\"9e107d9d372bb6826bd81d3542a419d6\""),
            "md5:9e107d9d372bb6826bd81d3542a419d6"
        );
        // multipart etags pass through unchanged, they are not real MD5s
        assert_eq!(etag_checksum("\"abc-3\""), "md5:abc-3");
    }

    #[test]
    fn test_build_metadata() {
        let mut custom = HashMap::new();
        custom.insert("owner".to_string(), "alice".to_string());
        let meta = build_metadata(
            Some("\"d41d8cd98f00b204e9800998ecf8427e\""),
            Some("text/plain; charset=utf-8"),
            Some(42),
            Some("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(&custom),
        );
        assert_eq!(meta.checksum.as_deref(), Some("md5:d41d8cd98f00b204e9800998ecf8427e"));
        assert_eq!(meta.mime.as_deref(), Some("text/plain"));
        assert_eq!(meta.size, 42);
        assert_eq!(
            meta.modified.map(|m| m.to_rfc3339()).as_deref(),
            Some("2015-10-21T07:28:00+00:00")
        );
        assert_eq!(meta.get("owner").as_deref(), Some("alice"));
    }

    #[test]
    fn test_build_metadata_without_content_type() {
        let meta = build_metadata(None, None, None, Some("not a date"), None);
        assert_eq!(meta.checksum, None);
        assert_eq!(meta.mime, None);
        assert_eq!(meta.size, 0);
        assert_eq!(meta.modified, None);
        assert!(meta.custom.is_empty());
    }

    #[test]
    fn test_meta_header_validation() {
        let (header, value) = meta_header("Owner", "alice").unwrap();
        assert_eq!(header, "x-amz-meta-owner");
        assert_eq!(value, "alice");
        assert!(matches!(meta_header("bad key", "v"), Err(StorageError::InvalidMetadata(_))));
        assert!(matches!(meta_header("k", "line\nbreak"), Err(StorageError::InvalidMetadata(_))));
        assert!(matches!(meta_header("k", "café"), Err(StorageError::InvalidMetadata(_))));
    }

    #[test]
    fn test_construction_offline() {
        let storage = S3Storage::from_options(json!({
            "bucket": "media",
            "endpoint": "http://127.0.0.1:9000",
            "region": "local",
            "access_key": "minio",
            "secret_key": "minio123",
            "delete_mode": "exact",
        }))
        .unwrap();
        assert_eq!(storage.name(), "S3");
        assert_eq!(storage.config().bucket, "media");
        let caps = storage.capabilities();
        assert!(caps.server_side_copy && caps.presigned_urls);
        assert!(!caps.prefix_delete);

        assert!(matches!(
            S3Storage::from_options(json!({"endpoint": "http://127.0.0.1:9000"})),
            Err(StorageError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_presigned_url_offline() {
        let storage = S3Storage::from_options(json!({
            "bucket": "media",
            "endpoint": "http://127.0.0.1:9000",
            "access_key": "minio",
            "secret_key": "minio123",
        }))
        .unwrap();
        let url = storage.get_url("reports/q1.pdf", None, 600).await.unwrap();
        assert!(url.contains("/media/reports/q1.pdf?"));
        assert!(url.contains("X-Amz-Expires=600"));
    }
}

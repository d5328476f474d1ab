use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use super::LocalConfig;
use crate::error::{ensure_name, Result, StorageError};
use crate::storage::{
    as_binary, Capability, Content, FileReader, FileStream, Metadata, Storage, UrlParams,
    UserMetadata, WriteOutcome, DEFAULT_ENCODING,
};
use crate::utils::{resolve_metadata, strip_mime_params};

/// Directory under the root holding metadata sidecars / 元数据旁路文件目录
pub const META_DIR: &str = ".polystore-meta";

/// Suffix of a mirrored directory inside [`META_DIR`] / 元数据目录后缀
const SIDECAR_DIR_SUFFIX: &str = ".d";

/// Suffix of a sidecar file; never equal to a mirrored directory name / 元数据文件后缀
const SIDECAR_SUFFIX: &str = ".meta.json";

/// Sidecar record stored next to each object / 旁路元数据
#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default)]
    custom: BTreeMap<String, String>,
}

pub struct LocalStorage {
    root: PathBuf,
    spool_threshold: usize,
}

/// Map an io error for `name`; the only place local absence is recognized / IO错误归一化
fn io_error(action: &str, name: &str, err: io::Error) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::FileNotFound(name.to_string())
    } else {
        StorageError::backend(format!("local {} {} failed", action, name), err)
    }
}

fn join_error(err: tokio::task::JoinError) -> StorageError {
    StorageError::backend("blocking task failed", err)
}

impl LocalStorage {
    /// Create the root if needed and canonicalize it / 初始化根目录
    pub fn new(config: LocalConfig) -> Result<Self> {
        config.validate()?;
        let root = PathBuf::from(&config.root);
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        let root = root.canonicalize()?;
        tracing::info!("Local storage initialized, root: {:?}", root);
        Ok(Self {
            root,
            spool_threshold: config.spool_threshold,
        })
    }

    /// Get root directory / 获取根目录
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Split a name into clean components, refusing to leave the root / 规范化路径
    fn components(name: &str) -> Result<Vec<&str>> {
        ensure_name(name)?;
        let parts: Vec<&str> = name
            .split(|c| c == '/' || c == '\\')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        if parts.is_empty() || parts.iter().any(|p| *p == "..") || parts[0] == META_DIR {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(parts)
    }

    fn normalize_path(&self, name: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        path.extend(Self::components(name)?);
        Ok(path)
    }

    /// Mirrored directory for `dirs` under [`META_DIR`] / 元数据镜像目录
    fn sidecar_dir(&self, dirs: &[&str]) -> PathBuf {
        let mut path = self.root.join(META_DIR);
        for dir in dirs {
            path.push(format!("{}{}", dir, SIDECAR_DIR_SUFFIX));
        }
        path
    }

    /// `a/b/c` -> `<META>/a.d/b.d/c.meta.json`
    fn sidecar_path(&self, name: &str) -> Result<PathBuf> {
        let parts = Self::components(name)?;
        let (leaf, dirs) = parts
            .split_last()
            .ok_or_else(|| StorageError::InvalidName(name.to_string()))?;
        let mut path = self.sidecar_dir(dirs);
        path.push(format!("{}{}", leaf, SIDECAR_SUFFIX));
        Ok(path)
    }

    fn read_sidecar(&self, name: &str) -> Result<Sidecar> {
        let path = self.sidecar_path(name)?;
        match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| StorageError::backend(format!("corrupt metadata for {}", name), e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Sidecar::default()),
            Err(e) => Err(io_error("read metadata", name, e)),
        }
    }

    async fn remove_sidecar(&self, name: &str, dir: bool) -> Result<()> {
        let path = if dir {
            self.sidecar_dir(&Self::components(name)?)
        } else {
            self.sidecar_path(name)?
        };
        let result = if dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(io_error("delete metadata", name, e)),
            _ => Ok(()),
        }
    }

    /// Path relative to the root as a `/`-joined name / 相对路径转文件名
    fn name_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Deepest directory that can hold names with `prefix` / 列表起始目录
    fn walk_start(&self, prefix: &str) -> PathBuf {
        let dir = match prefix.rfind('/') {
            Some(i) => &prefix[..i],
            None => return self.root.clone(),
        };
        match Self::components(dir) {
            Ok(parts) => {
                let mut path = self.root.clone();
                path.extend(parts);
                path
            }
            Err(_) => self.root.clone(),
        }
    }
}

/// Lazy depth-first walk state / 目录遍历状态
struct Walk {
    pending: Vec<PathBuf>,
    current: Option<tokio::fs::ReadDir>,
}

fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &str {
        "local"
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
        let path = self.normalize_path(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) => match io_error("stat", name, e) {
                StorageError::FileNotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn open_reader(&self, name: &str) -> Result<FileReader> {
        let path = self.normalize_path(name)?;
        let meta = tokio::fs::metadata(&path).await.map_err(|e| io_error("open", name, e))?;
        if !meta.is_file() {
            return Err(StorageError::FileNotFound(name.to_string()));
        }
        let file = tokio::fs::File::open(&path).await.map_err(|e| io_error("open", name, e))?;
        Ok(FileReader::new(file))
    }

    async fn read(&self, name: &str) -> Result<Bytes> {
        let path = self.normalize_path(name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            // 目录不算文件
            Err(_) if path.is_dir() => Err(StorageError::FileNotFound(name.to_string())),
            Err(e) => Err(io_error("read", name, e)),
        }
    }

    async fn write(
        &self,
        name: &str,
        content: Content,
        metadata: Option<UserMetadata>,
    ) -> Result<WriteOutcome> {
        let path = self.normalize_path(name)?;
        let sidecar_path = self.sidecar_path(name)?;
        let data = as_binary(content, DEFAULT_ENCODING).await?;
        let resolved = resolve_metadata(name, metadata.as_ref());
        let sidecar = Sidecar {
            content_type: Some(resolved.content_type.clone()),
            custom: resolved.custom,
        };
        let sidecar_raw = serde_json::to_vec(&sidecar)
            .map_err(|e| StorageError::InvalidMetadata(e.to_string()))?;

        tracing::debug!("local write {} ({} bytes)", name, data.len());
        let size = data.len() as u64;
        let etag = hex::encode(Sha256::digest(&data));

        // 先写临时文件再原子替换，避免读到半截内容
        let target = name.to_string();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut tmp = temp_beside(&path)?;
            tmp.write_all(&data)?;
            replace_with_sidecar(&sidecar_path, Some(sidecar_raw.as_slice()), || {
                tmp.persist(&path).map(drop).map_err(|e| e.error)
            })
        })
        .await
        .map_err(join_error)?
        .map_err(|e| io_error("write", &target, e))?;

        Ok(WriteOutcome {
            name: name.to_string(),
            size,
            content_type: resolved.content_type,
            etag: Some(etag),
        })
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.normalize_path(name)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("local delete {}: already absent", name);
                return Ok(());
            }
            Err(e) => return Err(io_error("delete", name, e)),
        };

        tracing::debug!("local delete {}", name);
        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(io_error("delete", name, e)),
            _ => {}
        }
        self.remove_sidecar(name, meta.is_dir()).await
    }

    /// Server-side copy / 服务端复制
    async fn copy_item(&self, name: &str, target: &str) -> Result<()> {
        let src = self.normalize_path(name)?;
        let dst = self.normalize_path(target)?;
        if !tokio::fs::metadata(&src).await.map_err(|e| io_error("copy", name, e))?.is_file() {
            return Err(StorageError::FileNotFound(name.to_string()));
        }
        let src_meta = self.sidecar_path(name)?;
        let dst_meta = self.sidecar_path(target)?;

        tracing::debug!("local copy {} -> {}", name, target);
        let source = name.to_string();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut tmp = temp_beside(&dst)?;
            io::copy(&mut std::fs::File::open(&src)?, &mut tmp)?;
            let sidecar = read_optional(&src_meta)?;
            replace_with_sidecar(&dst_meta, sidecar.as_deref(), || {
                tmp.persist(&dst).map(drop).map_err(|e| e.error)
            })
        })
        .await
        .map_err(join_error)?
        .map_err(|e| io_error("copy", &source, e))
    }

    /// Atomic rename / 原子重命名
    async fn move_item(&self, name: &str, target: &str) -> Result<()> {
        let src = self.normalize_path(name)?;
        let dst = self.normalize_path(target)?;
        if src == dst {
            return Ok(());
        }
        let src_meta = self.sidecar_path(name)?;
        let dst_meta = self.sidecar_path(target)?;

        tracing::debug!("local move {} -> {}", name, target);
        let source = name.to_string();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            if !std::fs::metadata(&src)?.is_file() {
                return Err(io::Error::from(io::ErrorKind::NotFound));
            }
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let sidecar = read_optional(&src_meta)?;
            replace_with_sidecar(&dst_meta, sidecar.as_deref(), || std::fs::rename(&src, &dst))?;
            match std::fs::remove_file(&src_meta) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            }
        })
        .await
        .map_err(join_error)?
        .map_err(|e| io_error("move", &source, e))
    }

    async fn get_metadata(&self, name: &str) -> Result<Metadata> {
        let path = self.normalize_path(name)?;
        let meta = tokio::fs::metadata(&path).await.map_err(|e| io_error("stat", name, e))?;
        if !meta.is_file() {
            return Err(StorageError::FileNotFound(name.to_string()));
        }

        let checksum = tokio::task::spawn_blocking(move || file_checksum(&path))
            .await
            .map_err(join_error)?
            .map_err(|e| io_error("checksum", name, e))?;
        let sidecar = self.read_sidecar(name)?;

        Ok(Metadata {
            checksum: Some(checksum),
            size: meta.len(),
            mime: sidecar.content_type.as_deref().and_then(strip_mime_params),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            custom: sidecar.custom,
        })
    }

    fn list_files<'a>(&'a self, prefix: &'a str) -> FileStream<'a> {
        let walk = Walk {
            pending: vec![self.walk_start(prefix)],
            current: None,
        };
        let meta_root = self.root.join(META_DIR);

        stream::try_unfold(walk, move |mut walk| {
            let meta_root = meta_root.clone();
            async move {
                loop {
                    if let Some(dir) = walk.current.as_mut() {
                        match dir.next_entry().await? {
                            Some(entry) => {
                                let path = entry.path();
                                let kind = entry.file_type().await?;
                                if kind.is_dir() {
                                    if path != meta_root {
                                        walk.pending.push(path);
                                    }
                                    continue;
                                }
                                if !kind.is_file() {
                                    continue;
                                }
                                match self.name_of(&path) {
                                    Some(name) if name.starts_with(prefix) => {
                                        return Ok(Some((name, walk)))
                                    }
                                    _ => continue,
                                }
                            }
                            None => walk.current = None,
                        }
                    } else if let Some(dir) = walk.pending.pop() {
                        match tokio::fs::read_dir(&dir).await {
                            Ok(read_dir) => walk.current = Some(read_dir),
                            // 前缀目录不存在时列表为空
                            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                            Err(e) => return Err(io_error("list", prefix, e)),
                        }
                    } else {
                        return Ok(None);
                    }
                }
            }
        })
        .boxed()
    }

    /// `file://` URL; local files have no expiry / 本地文件URL（忽略有效期）
    async fn get_url(
        &self,
        name: &str,
        parameters: Option<UrlParams>,
        _expire_secs: u32,
    ) -> Result<String> {
        let path = self.normalize_path(name)?;
        let mut url = url::Url::from_file_path(&path)
            .map_err(|_| StorageError::InvalidName(name.to_string()))?;
        let params: BTreeMap<String, String> = parameters.unwrap_or_default().into_iter().collect();
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (k, v) in &params {
                query.append_pair(k, v);
            }
        }
        Ok(url.to_string())
    }
}

/// Named temp file in the target's directory, creating it if needed / 在目标目录创建临时文件
fn temp_beside(path: &Path) -> io::Result<tempfile::NamedTempFile> {
    let parent = path.parent().ok_or_else(|| io::Error::other("no parent directory"))?;
    std::fs::create_dir_all(parent)?;
    tempfile::NamedTempFile::new_in(parent)
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Replace or remove a sidecar atomically / 原子替换或删除元数据文件
fn put_sidecar(path: &Path, raw: Option<&[u8]>) -> io::Result<()> {
    match raw {
        Some(raw) => {
            let mut tmp = temp_beside(path)?;
            tmp.write_all(raw)?;
            tmp.persist(path).map(drop).map_err(|e| e.error)
        }
        None => match std::fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
    }
}

/// Swap in the new sidecar, run `commit`, and put the old sidecar back if
/// `commit` fails / 先替换元数据，数据提交失败时回滚
///
/// `None` means the object has no sidecar. Either both files change or
/// neither does.
fn replace_with_sidecar<F>(sidecar_path: &Path, sidecar: Option<&[u8]>, commit: F) -> io::Result<()>
where
    F: FnOnce() -> io::Result<()>,
{
    let previous = read_optional(sidecar_path)?;
    put_sidecar(sidecar_path, sidecar)?;
    if let Err(e) = commit() {
        if let Err(restore) = put_sidecar(sidecar_path, previous.as_deref()) {
            tracing::warn!("failed to restore metadata {:?}: {}", sidecar_path, restore);
        }
        return Err(e);
    }
    Ok(())
}

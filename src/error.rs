//! Error taxonomy shared by every backend / 所有存储后端共用的错误类型
//!
//! Backends translate their native "no such object" signal into
//! [`StorageError::FileNotFound`] in exactly one place each; every other
//! backend failure travels as [`StorageError::Backend`] with the original
//! error kept as its source.

use std::error::Error as StdError;

/// Boxed backend error kept for diagnostics / 保留的原始后端错误
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Storage error / 存储错误
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The addressed object does not exist / 文件不存在
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Destination already exists and overwrite was refused / 文件已存在
    #[error("file already exists: {0}")]
    FileExists(String),

    /// Any other failure reported by the backend / 后端错误
    #[error("{message}")]
    Backend {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Lookup of a configuration key that is not set / 未知配置项
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Empty or otherwise unusable object name / 非法文件名
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("invalid open mode: {0:?}")]
    InvalidMode(String),

    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    /// Text contains characters the encoding cannot represent / 文本无法按指定编码转换
    #[error("text cannot be encoded as {0}")]
    Unencodable(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Collision avoidance gave up / 无法生成可用文件名
    #[error("no available name for {name} after {attempts} attempts")]
    NameExhausted { name: String, attempts: usize },

    #[error("backend type not registered: {0}")]
    UnknownBackend(String),

    #[error("backend not mounted: {0}")]
    BackendNotMounted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate / 统一的结果类型
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Wrap a backend error, keeping it as the cause / 包装后端错误
    pub fn backend<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Backend {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Backend failure with no underlying error value / 无原始错误的后端错误
    pub fn backend_msg(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound(_))
    }

    pub fn is_exists(&self) -> bool {
        matches!(self, Self::FileExists(_))
    }
}

/// Reject empty names before any backend call / 拒绝空文件名
pub fn ensure_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StorageError::backend("put failed", io);
        assert_eq!(err.to_string(), "put failed");
        let source = err.source().expect("source kept");
        assert_eq!(source.to_string(), "denied");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_ensure_name() {
        assert!(matches!(ensure_name(""), Err(StorageError::InvalidName(_))));
        assert!(ensure_name("a/b.txt").is_ok());
    }
}

//! S3错误归一化
//!
//! rust-s3 is built without `fail-on-err`, so a failed request may come back
//! either as a non-2xx status or as an `S3Error`. Both shapes go through
//! [`S3Failure::is_not_found`], the only place that decides what "no such
//! object" looks like for this backend.

use s3::error::S3Error;

use crate::error::StorageError;

/// Backend failure before normalization / 归一化前的S3失败
#[derive(Debug)]
pub(crate) enum S3Failure {
    /// Non-2xx response / 非2xx响应
    Status { code: u16, body: String },
    /// Client-side or transport error / 客户端或网络错误
    Client(S3Error),
}

impl S3Failure {
    pub fn status(code: u16, body: &[u8]) -> Self {
        Self::Status {
            code,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    /// Not-found predicate / 判断是否为"对象不存在"
    ///
    /// A 404 or a `NoSuchKey` body means the object is missing. A missing
    /// bucket also answers 404 but is a different failure.
    pub fn is_not_found(&self) -> bool {
        let (code, body) = match self {
            Self::Status { code, body } => (Some(*code), body.as_str()),
            Self::Client(S3Error::HttpFailWithBody(code, body)) => (Some(*code), body.as_str()),
            Self::Client(_) => (None, ""),
        };

        if body.contains("NoSuchBucket") {
            return false;
        }
        if code == Some(404) || body.contains("NoSuchKey") {
            return true;
        }
        match self {
            Self::Client(e) if code.is_none() => e.to_string().contains("NoSuchKey"),
            _ => false,
        }
    }

    /// `CreateBucket` answered that the caller already owns the bucket / 存储桶已归属当前用户
    pub fn is_already_owned(&self) -> bool {
        match self {
            Self::Status { body, .. } => body.contains("BucketAlreadyOwnedByYou"),
            Self::Client(S3Error::HttpFailWithBody(_, body)) => body.contains("BucketAlreadyOwnedByYou"),
            Self::Client(e) => e.to_string().contains("BucketAlreadyOwnedByYou"),
        }
    }

    /// Map onto the shared taxonomy / 转换为统一错误
    pub fn into_error(self, action: &str, name: &str) -> StorageError {
        if self.is_not_found() {
            return StorageError::FileNotFound(name.to_string());
        }
        match self {
            Self::Status { code, body } => StorageError::backend_msg(format!(
                "S3 {} {} failed: HTTP {} {}",
                action,
                name,
                code,
                body.trim()
            )),
            Self::Client(e) => StorageError::backend(format!("S3 {} {} failed", action, name), e),
        }
    }
}

/// Fail on a non-2xx status, classifying not-found / 检查响应状态
pub(crate) fn check_status(action: &str, name: &str, code: u16, body: &[u8]) -> Result<(), StorageError> {
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(S3Failure::status(code, body).into_error(action, name))
    }
}

pub(crate) fn client_error(action: &str, name: &str, err: S3Error) -> StorageError {
    S3Failure::Client(err).into_error(action, name)
}

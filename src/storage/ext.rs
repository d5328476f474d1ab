//! Behaviours built only from the [`Storage`] contract / 基于存储接口的通用操作
//!
//! Implemented once for every backend, `dyn Storage` included.

use async_trait::async_trait;

use super::content::{as_binary, lookup_encoding, Content, DEFAULT_ENCODING};
use super::handle::{FileReader, OpenFile, OpenMode, WriteHandle};
use super::Storage;
use crate::error::{ensure_name, Result, StorageError};
use crate::utils::{random_string, suffixed_name};

/// Upper bound of collision-avoidance retries / 生成可用文件名的最大尝试次数
pub const MAX_NAME_ATTEMPTS: usize = 100;

/// Length of the random collision suffix / 随机后缀长度
const SUFFIX_LEN: usize = 7;

#[async_trait]
pub trait StorageExt: Storage {
    /// Open an object for reading or buffered writing / 打开文件
    ///
    /// `mode` is one of `r`, `rb`, `rt`, `w`, `wb`, `wt`. Binary modes ignore
    /// `encoding` and refuse text calls on the handle. Reading fails with
    /// `FileNotFound` when the object is absent. Writing returns a handle
    /// that reaches the backend only through `commit()`.
    async fn open<'a>(&'a self, name: &str, mode: &str, encoding: &str) -> Result<OpenFile<'a, Self>> {
        ensure_name(name)?;
        let mode: OpenMode = mode.parse()?;
        let text_encoding = if mode.binary {
            None
        } else {
            Some(lookup_encoding(encoding)?)
        };

        if mode.write {
            Ok(OpenFile::Writer(WriteHandle::new(self, name, text_encoding)))
        } else {
            let reader: FileReader = self.open_reader(name).await?;
            Ok(OpenFile::Reader(match text_encoding {
                Some(encoding) => reader.with_encoding(encoding),
                None => reader.into_binary(),
            }))
        }
    }

    /// Store a source under `name` / 保存内容到指定文件名
    ///
    /// With `overwrite == false` an existing destination fails with
    /// `FileExists` before anything is read or written. The check and the
    /// write are separate backend calls, so concurrent savers can still race.
    async fn save(&self, source: Content, name: &str, overwrite: bool) -> Result<String> {
        ensure_name(name)?;
        if !overwrite && self.exists(name).await? {
            return Err(StorageError::FileExists(name.to_string()));
        }
        let data = as_binary(source, DEFAULT_ENCODING).await?;
        self.write(name, Content::Bytes(data), None).await?;
        Ok(name.to_string())
    }

    /// First name not currently taken, derived from `name` / 获取可用文件名
    ///
    /// Inserts `_<7 random chars>` before the extension until the candidate
    /// does not exist. Advisory only: another writer may take the name before
    /// the caller uses it.
    async fn get_available_name(&self, name: &str) -> Result<String> {
        ensure_name(name)?;
        let mut candidate = name.to_string();
        for _ in 0..MAX_NAME_ATTEMPTS {
            if !self.exists(&candidate).await? {
                return Ok(candidate);
            }
            candidate = suffixed_name(name, &random_string(SUFFIX_LEN));
        }
        Err(StorageError::NameExhausted {
            name: name.to_string(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }
}

impl<S: Storage + ?Sized> StorageExt for S {}

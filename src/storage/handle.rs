//! Scoped file handles returned by `open` / `open` 返回的文件句柄
//!
//! A [`WriteHandle`] buffers into a spooled temp file (memory first, disk
//! beyond the backend's threshold). `commit()` performs exactly one backend
//! write; dropping the handle without committing discards the buffer.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use tempfile::SpooledTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use super::content::{encode_text, Content};
use super::{Storage, UserMetadata, WriteOutcome};
use crate::error::{Result, StorageError};

/// Open mode parsed from `r`, `rb`, `rt`, `w`, `wb`, `wt` / 打开模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub write: bool,
    pub binary: bool,
}

impl OpenMode {
    pub const READ: Self = Self { write: false, binary: false };
    pub const READ_BINARY: Self = Self { write: false, binary: true };
    pub const WRITE: Self = Self { write: true, binary: false };
    pub const WRITE_BINARY: Self = Self { write: true, binary: true };
}

impl FromStr for OpenMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" | "rt" => Ok(Self::READ),
            "rb" => Ok(Self::READ_BINARY),
            "w" | "wt" => Ok(Self::WRITE),
            "wb" => Ok(Self::WRITE_BINARY),
            other => Err(StorageError::InvalidMode(other.to_string())),
        }
    }
}

/// Readable side of an opened object / 文件读取器
///
/// A reader opened in binary mode has no encoding and refuses `read_text`.
pub struct FileReader {
    inner: Box<dyn AsyncRead + Unpin + Send>,
    encoding: Option<&'static Encoding>,
}

impl FileReader {
    pub fn new<R>(inner: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            inner: Box::new(inner),
            encoding: Some(UTF_8),
        }
    }

    pub fn from_bytes(data: Bytes) -> Self {
        Self::new(io::Cursor::new(data))
    }

    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Bytes only; `read_text` fails / 二进制模式
    pub fn into_binary(mut self) -> Self {
        self.encoding = None;
        self
    }

    pub fn is_binary(&self) -> bool {
        self.encoding.is_none()
    }

    /// Read everything that is left / 读取剩余全部内容
    pub async fn read_bytes(mut self) -> Result<Bytes> {
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Read everything left and decode it with the reader's encoding / 读取并解码为文本
    pub async fn read_text(self) -> Result<String> {
        let encoding = self
            .encoding
            .ok_or_else(|| StorageError::InvalidMode("text read on a binary reader".to_string()))?;
        let bytes = self.read_bytes().await?;
        let (text, _, _) = encoding.decode(&bytes);
        Ok(text.into_owned())
    }
}

impl AsyncRead for FileReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Buffered writer committed with a single backend write / 缓冲写入句柄
///
/// `encoding` is `None` for binary handles, which refuse `write_str`.
///
/// `commit` loads the whole spooled buffer into memory for the backend
/// `write`, so the spool bounds memory only while the handle is being
/// filled, not during the upload itself.
pub struct WriteHandle<'a, S: Storage + ?Sized> {
    storage: &'a S,
    name: String,
    encoding: Option<&'static Encoding>,
    metadata: Option<UserMetadata>,
    buffer: Option<SpooledTempFile>,
    written: u64,
}

impl<'a, S: Storage + ?Sized> WriteHandle<'a, S> {
    pub fn new(storage: &'a S, name: &str, encoding: Option<&'static Encoding>) -> Self {
        Self {
            storage,
            name: name.to_string(),
            encoding,
            metadata: None,
            buffer: Some(SpooledTempFile::new(storage.spool_threshold())),
            written: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes buffered so far / 已缓冲字节数
    pub fn len(&self) -> u64 {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    pub fn is_binary(&self) -> bool {
        self.encoding.is_none()
    }

    /// Whether the buffer moved from memory to a temp file / 缓冲是否已落盘
    pub fn is_spilled(&self) -> bool {
        self.buffer.as_ref().map_or(false, SpooledTempFile::is_rolled)
    }

    /// Attach user metadata sent along with the commit / 设置提交时附带的元数据
    pub fn set_metadata(&mut self, metadata: UserMetadata) {
        self.metadata = Some(metadata);
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.write_all(data)?;
        Ok(())
    }

    /// Encode text with the handle's encoding and buffer it / 编码文本并写入缓冲
    pub fn write_str(&mut self, text: &str) -> Result<()> {
        let encoding = self.encoding.ok_or_else(|| {
            StorageError::InvalidMode(format!("{} was opened in binary mode", self.name))
        })?;
        let encoded = encode_text(text, encoding)?;
        self.write_bytes(&encoded)
    }

    /// Upload the buffered content in one backend write / 提交缓冲内容
    pub async fn commit(mut self) -> Result<WriteOutcome> {
        let mut buffer = self
            .buffer
            .take()
            .ok_or_else(|| StorageError::backend_msg("write handle already finished"))?;

        let data = tokio::task::spawn_blocking(move || {
            buffer.seek(SeekFrom::Start(0))?;
            let mut data = Vec::new();
            buffer.read_to_end(&mut data)?;
            Ok::<Vec<u8>, io::Error>(data)
        })
        .await
        .map_err(|e| StorageError::backend("spool task failed", e))??;

        tracing::debug!("committing {} buffered bytes to {}", data.len(), self.name);
        self.storage
            .write(&self.name, Content::Bytes(Bytes::from(data)), self.metadata.take())
            .await
    }

    /// Drop the buffered content without writing / 放弃写入
    pub fn discard(mut self) {
        self.buffer = None;
    }
}

impl<S: Storage + ?Sized> Write for WriteHandle<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "write handle finished"))?;
        let n = buffer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.buffer.as_mut() {
            Some(buffer) => buffer.flush(),
            None => Ok(()),
        }
    }
}

impl<S: Storage + ?Sized> Drop for WriteHandle<'_, S> {
    fn drop(&mut self) {
        if self.buffer.is_some() {
            tracing::warn!(
                "discarding {} uncommitted bytes for {}",
                self.written,
                self.name
            );
        }
    }
}

/// Result of `open`: a reader or a write handle / 打开结果
pub enum OpenFile<'a, S: Storage + ?Sized> {
    Reader(FileReader),
    Writer(WriteHandle<'a, S>),
}

impl<'a, S: Storage + ?Sized> OpenFile<'a, S> {
    pub fn into_reader(self) -> Result<FileReader> {
        match self {
            Self::Reader(r) => Ok(r),
            Self::Writer(w) => Err(StorageError::InvalidMode(format!(
                "{} was opened for writing",
                w.name()
            ))),
        }
    }

    pub fn into_writer(self) -> Result<WriteHandle<'a, S>> {
        match self {
            Self::Writer(w) => Ok(w),
            Self::Reader(_) => Err(StorageError::InvalidMode(
                "object was opened for reading".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;

    #[test]
    fn test_open_mode_parse() {
        assert_eq!("r".parse::<OpenMode>().unwrap(), OpenMode::READ);
        assert_eq!("rt".parse::<OpenMode>().unwrap(), OpenMode::READ);
        assert_eq!("rb".parse::<OpenMode>().unwrap(), OpenMode::READ_BINARY);
        assert_eq!("w".parse::<OpenMode>().unwrap(), OpenMode::WRITE);
        assert_eq!("wb".parse::<OpenMode>().unwrap(), OpenMode::WRITE_BINARY);
        assert!(matches!("a+".parse::<OpenMode>(), Err(StorageError::InvalidMode(_))));
    }

    #[tokio::test]
    async fn test_reader_decodes_text() {
        let reader = FileReader::from_bytes(Bytes::from_static(&[b'c', b'a', b'f', 0xE9]))
            .with_encoding(WINDOWS_1252);
        assert_eq!(reader.read_text().await.unwrap(), "café");
    }

    #[tokio::test]
    async fn test_reader_is_async_read() {
        let mut reader = FileReader::from_bytes(Bytes::from_static(b"hello"));
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"he");
        assert_eq!(&reader.read_bytes().await.unwrap()[..], b"llo");
    }

    #[tokio::test]
    async fn test_binary_reader_refuses_text() {
        let reader = FileReader::from_bytes(Bytes::from_static(b"abc")).into_binary();
        assert!(reader.is_binary());
        assert!(matches!(reader.read_text().await, Err(StorageError::InvalidMode(_))));
    }
}

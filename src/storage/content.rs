//! Write payloads and the single binary coercion point / 写入内容与统一的二进制转换

use std::fmt;

use bytes::Bytes;
use encoding_rs::Encoding;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, StorageError};

pub const DEFAULT_ENCODING: &str = "utf8";

/// Content accepted by `write` / 写入内容
pub enum Content {
    /// Raw bytes / 二进制数据
    Bytes(Bytes),
    /// Text, encoded with `encoding` or the caller's default / 文本
    Text {
        text: String,
        encoding: Option<String>,
    },
    /// Any readable stream, read to its end / 可读流
    Reader(Box<dyn AsyncRead + Unpin + Send>),
}

impl Content {
    pub fn text_with_encoding(text: impl Into<String>, encoding: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            encoding: Some(encoding.into()),
        }
    }

    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::Reader(Box::new(reader))
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Text { text, encoding } => f
                .debug_struct("Text")
                .field("len", &text.len())
                .field("encoding", encoding)
                .finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl From<Bytes> for Content {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Content {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<&'static [u8]> for Content {
    fn from(value: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(value))
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Self::Text {
            text: value,
            encoding: None,
        }
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

/// Resolve an encoding label such as `utf8` or `latin1` / 解析编码名称
pub fn lookup_encoding(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| StorageError::UnknownEncoding(label.to_string()))
}

/// Encode text, refusing characters the encoding cannot hold / 按编码转换文本
pub fn encode_text(text: &str, encoding: &'static Encoding) -> Result<Bytes> {
    let (encoded, _, had_errors) = encoding.encode(text);
    if had_errors {
        return Err(StorageError::Unencodable(encoding.name().to_string()));
    }
    Ok(Bytes::from(encoded.into_owned()))
}

/// Normalize any supported content into bytes / 将内容统一转换为二进制
///
/// Every backend `write` goes through here. `encoding` applies to text that
/// does not carry its own encoding.
pub async fn as_binary(content: Content, encoding: &str) -> Result<Bytes> {
    match content {
        Content::Bytes(bytes) => Ok(bytes),
        Content::Text { text, encoding: own } => {
            let label = own.as_deref().unwrap_or(encoding);
            encode_text(&text, lookup_encoding(label)?)
        }
        Content::Reader(mut reader) => {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await?;
            Ok(Bytes::from(buf))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_as_binary_bytes_passthrough() {
        let out = as_binary(Content::from(vec![0u8, 159, 146, 150]), DEFAULT_ENCODING)
            .await
            .unwrap();
        assert_eq!(&out[..], &[0u8, 159, 146, 150]);
    }

    #[tokio::test]
    async fn test_as_binary_text_default_and_explicit_encoding() {
        let utf8 = as_binary(Content::from("café"), DEFAULT_ENCODING).await.unwrap();
        assert_eq!(&utf8[..], "café".as_bytes());

        let latin1 = as_binary(Content::text_with_encoding("café", "latin1"), DEFAULT_ENCODING)
            .await
            .unwrap();
        assert_eq!(&latin1[..], &[b'c', b'a', b'f', 0xE9]);

        // the caller default applies when the text has none of its own
        let latin1 = as_binary(Content::from("é"), "iso-8859-1").await.unwrap();
        assert_eq!(&latin1[..], &[0xE9]);
    }

    #[tokio::test]
    async fn test_as_binary_reader() {
        let reader = std::io::Cursor::new(b"streamed".to_vec());
        let out = as_binary(Content::reader(reader), DEFAULT_ENCODING).await.unwrap();
        assert_eq!(&out[..], b"streamed");
    }

    #[tokio::test]
    async fn test_as_binary_encoding_errors() {
        let err = as_binary(Content::text_with_encoding("x", "no-such-charset"), DEFAULT_ENCODING)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownEncoding(_)));

        let err = as_binary(Content::text_with_encoding("日本", "latin1"), DEFAULT_ENCODING)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unencodable(_)));
    }
}

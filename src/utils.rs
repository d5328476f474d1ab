/// Name and metadata helpers shared by all backends / 文件名与元数据工具函数

use std::collections::BTreeMap;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

/// Default content type when nothing better is known / 默认MIME类型
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Guess a content type from the name's extension / 根据扩展名猜测MIME类型
pub fn mime(name: &str, default: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(default)
        .to_string()
}

/// Random string of letters and digits (not cryptographically strong) / 生成随机字母数字串
pub fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Split a name into (directory, stem, extension) / 拆分为目录、主名、扩展名
///
/// The directory keeps no trailing slash and the extension keeps its dot.
/// Leading dots of the file part never start an extension: `.env` has none.
pub fn split_name(name: &str) -> (&str, &str, &str) {
    let (dir, file) = match name.rfind('/') {
        Some(pos) => (&name[..pos], &name[pos + 1..]),
        None => ("", name),
    };

    let leading_dots = file.len() - file.trim_start_matches('.').len();
    match file[leading_dots..].rfind('.') {
        Some(pos) => {
            let pos = leading_dots + pos;
            (dir, &file[..pos], &file[pos..])
        }
        None => (dir, file, ""),
    }
}

/// Insert `_<suffix>` before the extension / 在扩展名前插入后缀
///
/// `photo.jpg` + `AB12xyz` -> `photo_AB12xyz.jpg`
pub fn suffixed_name(name: &str, suffix: &str) -> String {
    let (dir, stem, ext) = split_name(name);
    if dir.is_empty() && !name.starts_with('/') {
        format!("{}_{}{}", stem, suffix, ext)
    } else {
        format!("{}/{}_{}{}", dir, stem, suffix, ext)
    }
}

/// User metadata as supplied on write / 写入时的用户元数据
pub type UserMetadata = BTreeMap<String, Value>;

/// Content type plus string-coerced metadata ready for a backend / 解析后的写入元数据
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetadata {
    pub content_type: String,
    pub custom: BTreeMap<String, String>,
}

/// Resolve the content type and coerce user metadata to strings / 解析内容类型并转换元数据
///
/// A `content-type` key in any casing is taken as the explicit content type
/// and suppresses sniffing. Null values are dropped; non-string values use
/// their JSON text.
pub fn resolve_metadata(name: &str, metadata: Option<&UserMetadata>) -> ResolvedMetadata {
    let mut content_type = None;
    let mut custom = BTreeMap::new();

    for (key, value) in metadata.into_iter().flatten() {
        let value = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value);
        } else {
            custom.insert(key.clone(), value);
        }
    }

    ResolvedMetadata {
        content_type: content_type.unwrap_or_else(|| mime(name, DEFAULT_MIME)),
        custom,
    }
}

/// Strip MIME parameters such as charset / 去掉MIME参数部分
pub fn strip_mime_params(content_type: &str) -> Option<String> {
    let base = content_type.split(';').next().unwrap_or("").trim();
    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mime() {
        assert_eq!(mime("report.json", DEFAULT_MIME), "application/json");
        assert_eq!(mime("a/b/photo.JPG", DEFAULT_MIME), "image/jpeg");
        assert_eq!(mime("noext", DEFAULT_MIME), DEFAULT_MIME);
        assert_eq!(mime("x.unknownext", "text/plain"), "text/plain");
    }

    #[test]
    fn test_random_string() {
        let s = random_string(7);
        assert_eq!(s.len(), 7);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("photo.jpg"), ("", "photo", ".jpg"));
        assert_eq!(split_name("a/b/archive.tar.gz"), ("a/b", "archive.tar", ".gz"));
        assert_eq!(split_name("dir/.env"), ("dir", ".env", ""));
        assert_eq!(split_name("README"), ("", "README", ""));
    }

    #[test]
    fn test_suffixed_name() {
        assert_eq!(suffixed_name("photo.jpg", "AB12xyz"), "photo_AB12xyz.jpg");
        assert_eq!(suffixed_name("img/photo.jpg", "AB12xyz"), "img/photo_AB12xyz.jpg");
        assert_eq!(suffixed_name("/photo", "q"), "/photo_q");
        assert_eq!(suffixed_name("Makefile", "q"), "Makefile_q");
    }

    #[test]
    fn test_resolve_metadata_sniffs_when_absent() {
        let resolved = resolve_metadata("report.json", None);
        assert_eq!(resolved.content_type, "application/json");
        assert!(resolved.custom.is_empty());
    }

    #[test]
    fn test_resolve_metadata_explicit_content_type_any_case() {
        let mut meta = UserMetadata::new();
        meta.insert("Content-TYPE".into(), json!("text/csv"));
        meta.insert("owner".into(), json!("alice"));
        meta.insert("revision".into(), json!(3));
        meta.insert("dropped".into(), Value::Null);
        let resolved = resolve_metadata("report.json", Some(&meta));
        assert_eq!(resolved.content_type, "text/csv");
        assert_eq!(resolved.custom.get("owner").map(String::as_str), Some("alice"));
        assert_eq!(resolved.custom.get("revision").map(String::as_str), Some("3"));
        assert!(!resolved.custom.contains_key("dropped"));
    }

    #[test]
    fn test_strip_mime_params() {
        assert_eq!(strip_mime_params("text/plain; charset=utf-8").as_deref(), Some("text/plain"));
        assert_eq!(strip_mime_params("image/png").as_deref(), Some("image/png"));
        assert_eq!(strip_mime_params(""), None);
    }
}

//! S3后端配置

use s3::creds::Credentials;
use s3::Region;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};
use crate::storage::{DEFAULT_SPOOL_THRESHOLD, DEFAULT_URL_EXPIRE};

/// How `delete` matches keys / 删除匹配方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Every key starting with the name (`a` also removes `abc`) / 按前缀删除
    #[default]
    Prefix,
    /// Only the key equal to the name / 精确删除
    Exact,
}

/// S3配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Config {
    /// S3端点地址
    /// AWS: 留空（按region推导）
    /// MinIO: http://localhost:9000
    #[serde(default)]
    pub endpoint: Option<String>,
    /// 区域
    #[serde(default)]
    pub region: Option<String>,
    /// Access Key ID
    #[serde(default)]
    pub access_key: Option<String>,
    /// Secret Access Key
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Session Token（用于临时凭证）
    #[serde(default)]
    pub session_token: Option<String>,
    /// 存储桶名称（必填）
    #[serde(default)]
    pub bucket: String,
    /// 强制使用路径风格（而非虚拟主机风格），MinIO等需要设置为true
    #[serde(default = "default_path_style")]
    pub path_style: bool,
    #[serde(default)]
    pub delete_mode: DeleteMode,
    /// 写缓冲内存上限（字节）
    #[serde(default = "default_spool_threshold")]
    pub spool_threshold: usize,
    /// 预签名URL默认过期时间（秒）
    #[serde(default = "default_url_expire")]
    pub url_expire: u32,
}

fn default_path_style() -> bool {
    true
}

fn default_spool_threshold() -> usize {
    DEFAULT_SPOOL_THRESHOLD
}

fn default_url_expire() -> u32 {
    DEFAULT_URL_EXPIRE
}

const DEFAULT_REGION: &str = "us-east-1";

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            bucket: String::new(),
            path_style: default_path_style(),
            delete_mode: DeleteMode::default(),
            spool_threshold: default_spool_threshold(),
            url_expire: default_url_expire(),
        }
    }
}

impl S3Config {
    /// 校验必填项
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(StorageError::InvalidConfig("bucket is required".to_string()));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(StorageError::InvalidConfig(
                "access_key and secret_key must be set together".to_string(),
            ));
        }
        if self.url_expire == 0 {
            return Err(StorageError::InvalidConfig("url_expire must be positive".to_string()));
        }
        Ok(())
    }

    /// 根据endpoint/region构造Region
    pub fn region(&self) -> Result<Region> {
        let region_name = self.region.clone().unwrap_or_else(|| DEFAULT_REGION.to_string());
        match &self.endpoint {
            Some(endpoint) if !endpoint.is_empty() => Ok(Region::Custom {
                region: region_name,
                endpoint: endpoint.clone(),
            }),
            _ => region_name.parse::<Region>().map_err(|e| {
                StorageError::InvalidConfig(format!("invalid region {}: {}", region_name, e))
            }),
        }
    }

    /// 创建S3凭证；未配置密钥时依次尝试环境变量与匿名访问
    pub fn credentials(&self) -> Result<Credentials> {
        let result = match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Credentials::new(
                Some(access.as_str()),
                Some(secret.as_str()),
                self.session_token.as_deref(),
                None,
                None,
            ),
            _ => Credentials::from_env().or_else(|_| Credentials::anonymous()),
        };
        result.map_err(|e| StorageError::backend("创建S3凭证失败", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{defaults_of, overrides_from, Config};
    use serde_json::json;

    fn build(overrides: serde_json::Value) -> Result<S3Config> {
        let config = Config::new(defaults_of(&S3Config::default()), overrides_from(overrides)?)?;
        config.into_typed::<S3Config>()
    }

    #[test]
    fn test_defaults_merge() {
        let config = build(json!({
            "bucket": "media",
            "endpoint": "http://localhost:9000",
            "access_key": "minio",
            "secret_key": "minio123",
        }))
        .unwrap();
        assert_eq!(config.bucket, "media");
        assert!(config.path_style);
        assert_eq!(config.delete_mode, DeleteMode::Prefix);
        assert_eq!(config.url_expire, 3600);
        assert!(config.validate().is_ok());
        assert!(matches!(config.region().unwrap(), Region::Custom { .. }));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = build(json!({"bucket": "b", "acces_key": "x"})).unwrap_err();
        assert!(matches!(err, StorageError::UnknownAttribute(k) if k == "acces_key"));
    }

    #[test]
    fn test_delete_mode_option() {
        let config = build(json!({"bucket": "b", "delete_mode": "exact"})).unwrap();
        assert_eq!(config.delete_mode, DeleteMode::Exact);
    }

    #[test]
    fn test_validate() {
        let missing_bucket = build(json!({})).unwrap();
        assert!(matches!(missing_bucket.validate(), Err(StorageError::InvalidConfig(_))));

        let half_keys = build(json!({"bucket": "b", "access_key": "only"})).unwrap();
        assert!(matches!(half_keys.validate(), Err(StorageError::InvalidConfig(_))));
    }
}

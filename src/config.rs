//! Backend configuration container / 后端配置容器
//!
//! Every backend publishes a default option map. The caller's overrides are
//! merged over it once at construction; keys the backend does not recognize
//! are rejected right there instead of surfacing on first access.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Result, StorageError};

/// Ordered option container / 有序配置容器
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    values: BTreeMap<String, Value>,
}

impl Config {
    /// Merge backend defaults with caller overrides (override wins) / 合并默认配置与用户配置
    ///
    /// When `defaults` is non-empty its keys are the full set of recognized
    /// options and any other override key fails with `UnknownAttribute`.
    pub fn new(defaults: Map<String, Value>, overrides: Map<String, Value>) -> Result<Self> {
        let strict = !defaults.is_empty();
        let mut values: BTreeMap<String, Value> = defaults.into_iter().collect();

        for (key, value) in overrides {
            if strict && !values.contains_key(&key) {
                return Err(StorageError::UnknownAttribute(key));
            }
            values.insert(key, value);
        }

        Ok(Self { values })
    }

    /// Free-form container with no recognized-key check / 不校验键名的配置
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Result<&Value> {
        self.values
            .get(key)
            .ok_or_else(|| StorageError::UnknownAttribute(key.to_string()))
    }

    /// Insert or replace a key / 设置配置项
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Result<Value> {
        self.values
            .remove(key)
            .ok_or_else(|| StorageError::UnknownAttribute(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Deserialize into a backend's typed record / 转换为强类型配置
    ///
    /// Null values are dropped first so the record's serde defaults apply.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        let map: Map<String, Value> = self
            .values
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .collect();
        serde_json::from_value(Value::Object(map))
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))
    }
}

/// Turn a serializable defaults record into an option map / 将默认配置转换为键值表
pub fn defaults_of<T: serde::Serialize>(record: &T) -> Map<String, Value> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Accept either an object or null as caller overrides / 解析用户配置
pub fn overrides_from(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(StorageError::InvalidConfig(format!(
            "options must be an object, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        overrides_from(v).unwrap()
    }

    #[test]
    fn test_override_wins() {
        let config = Config::new(
            obj(json!({"region": "us-east-1", "endpoint": null})),
            obj(json!({"region": "eu-west-3"})),
        )
        .unwrap();
        assert_eq!(config.get("region").unwrap(), &json!("eu-west-3"));
        assert_eq!(config.get("endpoint").unwrap(), &Value::Null);
    }

    #[test]
    fn test_unknown_override_rejected_at_construction() {
        let err = Config::new(obj(json!({"region": null})), obj(json!({"regoin": "x"}))).unwrap_err();
        assert!(matches!(err, StorageError::UnknownAttribute(k) if k == "regoin"));
    }

    #[test]
    fn test_get_and_remove_missing_key() {
        let mut config = Config::from_map(obj(json!({"a": 1})));
        assert!(matches!(config.get("b"), Err(StorageError::UnknownAttribute(_))));
        assert!(matches!(config.remove("b"), Err(StorageError::UnknownAttribute(_))));
        assert_eq!(config.remove("a").unwrap(), json!(1));
        assert!(!config.contains("a"));
    }

    #[test]
    fn test_set_inserts_or_replaces() {
        let mut config = Config::default();
        config.set("bucket", json!("one"));
        config.set("bucket", json!("two"));
        assert_eq!(config.get("bucket").unwrap(), &json!("two"));
        assert_eq!(config.keys().collect::<Vec<_>>(), vec!["bucket"]);
    }

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Sample {
        name: String,
        #[serde(default = "default_size")]
        size: u32,
    }

    fn default_size() -> u32 {
        7
    }

    #[test]
    fn test_into_typed_applies_defaults_for_nulls() {
        let config = Config::new(
            obj(json!({"name": null, "size": null})),
            obj(json!({"name": "x"})),
        )
        .unwrap();
        let sample: Sample = config.into_typed().unwrap();
        assert_eq!(sample.name, "x");
        assert_eq!(sample.size, 7);
    }

    #[test]
    fn test_non_object_overrides() {
        assert!(overrides_from(Value::Null).unwrap().is_empty());
        assert!(matches!(
            overrides_from(json!([1, 2])),
            Err(StorageError::InvalidConfig(_))
        ));
    }
}

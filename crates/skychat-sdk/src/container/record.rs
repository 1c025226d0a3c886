//! 记录模型 - 后端容器的通用数据单元
//!
//! 记录在线上使用 Skygear 风格的 JSON：元数据字段以下划线开头，
//! 日期、引用、资源等类型化的值使用 `{"$type": ...}` 对象表示。

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{ChatSDKError, Result};

/// 记录 ID，线上格式为 `type/key`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub record_type: String,
    pub key: String,
}

impl RecordId {
    pub fn new(record_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            key: key.into(),
        }
    }

    /// 生成随机 key 的记录 ID
    pub fn generate(record_type: impl Into<String>) -> Self {
        Self::new(record_type, uuid::Uuid::new_v4().to_string())
    }

    /// 解析 `type/key`；没有类型前缀时使用 `default_type`
    pub fn parse_or(raw: &str, default_type: &str) -> Result<Self> {
        match raw.split_once('/') {
            Some(_) => raw.parse(),
            None if raw.is_empty() => Err(ChatSDKError::InvalidArgument("记录 ID 不能为空".to_string())),
            None => Ok(Self::new(default_type, raw)),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.key)
    }
}

impl FromStr for RecordId {
    type Err = ChatSDKError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((record_type, key)) if !record_type.is_empty() && !key.is_empty() => {
                Ok(Self::new(record_type, key))
            }
            _ => Err(ChatSDKError::InvalidArgument(format!("无效的记录 ID: {}", s))),
        }
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 二进制附件（图片、语音等）
///
/// 上传前 `data` 持有本地字节、`url` 为空；上传后由后端填充 `url`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub url: Option<String>,
    #[serde(skip)]
    pub data: Option<Bytes>,
}

impl Asset {
    /// 用本地字节创建待上传的资源，名称为 `{prefix}-{uuid}`
    pub fn from_bytes(prefix: &str, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: format!("{}-{}", prefix, uuid::Uuid::new_v4()),
            mime_type: mime_type.into(),
            size: data.len() as u64,
            url: None,
            data: Some(data),
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.url.is_some()
    }

    pub fn to_value(&self) -> Value {
        json!({
            "$type": "asset",
            "$name": self.name,
            "$content_type": self.mime_type,
            "$size": self.size,
            "$url": self.url,
        })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get("$type")?.as_str()? != "asset" {
            return None;
        }
        Some(Self {
            name: value.get("$name")?.as_str()?.to_string(),
            mime_type: value
                .get("$content_type")
                .and_then(Value::as_str)
                .unwrap_or("application/octet-stream")
                .to_string(),
            size: value.get("$size").and_then(Value::as_u64).unwrap_or(0),
            url: value.get("$url").and_then(Value::as_str).map(str::to_string),
            data: None,
        })
    }
}

pub fn date_value(at: &DateTime<Utc>) -> Value {
    json!({ "$type": "date", "$date": format_date(at) })
}

pub fn reference_value(id: &RecordId) -> Value {
    json!({ "$type": "ref", "$id": id.to_string() })
}

pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Object(obj) if obj.get("$type").and_then(Value::as_str) == Some("date") => {
            obj.get("$date")?.as_str()?
        }
        _ => return None,
    };
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

pub fn parse_reference(value: &Value) -> Option<RecordId> {
    match value {
        Value::Object(obj) if obj.get("$type").and_then(Value::as_str) == Some("ref") => {
            obj.get("$id")?.as_str()?.parse().ok()
        }
        _ => None,
    }
}

fn format_date(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// 通用记录
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub owner_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub fields: Map<String, Value>,
    /// 查询时 include 进来的关联记录，只读
    pub transient: Map<String, Value>,
}

impl Record {
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            owner_id: None,
            created_at: None,
            updated_at: None,
            fields: Map::new(),
            transient: Map::new(),
        }
    }

    pub fn record_type(&self) -> &str {
        &self.id.record_type
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.get(field).and_then(Value::as_u64)
    }

    pub fn get_string_list(&self, field: &str) -> Vec<String> {
        self.get(field)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn set_string_list<'a, I>(&mut self, field: &str, items: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let values: Vec<Value> = items.into_iter().cloned().map(Value::String).collect();
        self.set(field, Value::Array(values));
    }

    pub fn set_date(&mut self, field: &str, at: &DateTime<Utc>) {
        self.set(field, date_value(at));
    }

    pub fn get_date(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get(field).and_then(parse_date)
    }

    pub fn set_reference(&mut self, field: &str, id: &RecordId) {
        self.set(field, reference_value(id));
    }

    pub fn get_reference(&self, field: &str) -> Option<RecordId> {
        self.get(field).and_then(parse_reference)
    }

    pub fn set_asset(&mut self, field: &str, asset: &Asset) {
        self.set(field, asset.to_value());
    }

    pub fn get_asset(&self, field: &str) -> Option<Asset> {
        self.get(field).and_then(Asset::from_value)
    }

    /// 记录上所有资源类型的字段
    pub fn assets(&self) -> Vec<Asset> {
        self.fields.values().filter_map(Asset::from_value).collect()
    }

    /// 查询谓词使用的字段值，包含 `_id`、`_owner_id`、`_created_at` 等元数据
    pub fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "_id" => Some(Value::String(self.id.key.clone())),
            "_owner_id" | "_ownerID" => self.owner_id.clone().map(Value::String),
            "_created_at" => self.created_at.as_ref().map(date_value),
            "_updated_at" => self.updated_at.as_ref().map(date_value),
            _ => self.fields.get(field).cloned(),
        }
    }

    pub fn transient_record(&self, field: &str) -> Option<Record> {
        self.transient.get(field).and_then(|value| Record::from_json(value).ok())
    }

    pub fn to_json(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert("_id".to_string(), Value::String(self.id.to_string()));
        obj.insert("_type".to_string(), Value::String("record".to_string()));
        if let Some(owner) = &self.owner_id {
            obj.insert("_ownerID".to_string(), Value::String(owner.clone()));
        }
        if let Some(at) = &self.created_at {
            obj.insert("_created_at".to_string(), Value::String(format_date(at)));
        }
        if let Some(at) = &self.updated_at {
            obj.insert("_updated_at".to_string(), Value::String(format_date(at)));
        }
        if !self.transient.is_empty() {
            obj.insert("_transient".to_string(), Value::Object(self.transient.clone()));
        }
        Value::Object(obj)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| ChatSDKError::InvalidData(format!("记录必须是对象: {}", value)))?;
        let id: RecordId = obj
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ChatSDKError::InvalidData("记录缺少 _id".to_string()))?
            .parse()
            .map_err(|e: ChatSDKError| ChatSDKError::InvalidData(e.to_string()))?;

        let mut record = Record::new(id);
        for (key, value) in obj {
            match key.as_str() {
                "_id" | "_type" | "_access" => {}
                "_ownerID" | "_owner_id" => {
                    record.owner_id = value.as_str().map(str::to_string);
                }
                "_created_at" => record.created_at = parse_date(value),
                "_updated_at" => record.updated_at = parse_date(value),
                "_transient" => {
                    if let Some(transient) = value.as_object() {
                        record.transient = transient.clone();
                    }
                }
                // 其余下划线字段（_created_by 等）不属于用户数据
                k if k.starts_with('_') => {}
                _ => {
                    record.fields.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(record)
    }
}

//! 消息模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::{expect_type, record_types};
use crate::container::{Asset, Record, RecordId};
use crate::error::{ChatSDKError, Result};

/// 元数据中标记消息种类的键
pub const METADATA_TYPE_KEY: &str = "type";

/// 消息元数据种类，同一条消息只能属于其中一种
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMetadataType {
    Image,
    Voice,
    Text,
}

impl ChatMetadataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMetadataType::Image => "image",
            ChatMetadataType::Voice => "voice",
            ChatMetadataType::Text => "text",
        }
    }

    /// 上传资源时使用的名称前缀
    pub fn asset_prefix(&self) -> &'static str {
        match self {
            ChatMetadataType::Image => "message-image",
            ChatMetadataType::Voice => "message-voice",
            ChatMetadataType::Text => "message-text",
        }
    }
}

impl fmt::Display for ChatMetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMetadataType {
    type Err = ChatSDKError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "image" => Ok(ChatMetadataType::Image),
            "voice" => Ok(ChatMetadataType::Voice),
            "text" => Ok(ChatMetadataType::Text),
            other => Err(ChatSDKError::InvalidArgument(format!("未知的消息元数据类型: {}", other))),
        }
    }
}

/// 消息投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Delivering,
    Delivered,
    SomeRead,
    AllRead,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Delivering => "delivering",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::SomeRead => "some_read",
            DeliveryStatus::AllRead => "all_read",
        }
    }

    /// 未知值按 `Delivering` 处理
    pub fn parse(raw: &str) -> Self {
        match raw {
            "delivered" => DeliveryStatus::Delivered,
            "some_read" => DeliveryStatus::SomeRead,
            "all_read" => DeliveryStatus::AllRead,
            _ => DeliveryStatus::Delivering,
        }
    }
}

/// 消息
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub body: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub attachment: Option<Asset>,
    pub status: DeliveryStatus,
    /// 发送者（记录所有者）
    pub sender_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Message {
    /// 新建尚未发送的消息，会话在发送时指定
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: String::new(),
            body: None,
            metadata: None,
            attachment: None,
            status: DeliveryStatus::Delivering,
            sender_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::new()
        }
    }

    pub fn record_id(&self) -> RecordId {
        RecordId::new(record_types::MESSAGE, self.id.clone())
    }

    /// 元数据中声明的种类
    pub fn metadata_type(&self) -> Option<ChatMetadataType> {
        self.metadata
            .as_ref()?
            .get(METADATA_TYPE_KEY)?
            .as_str()?
            .parse()
            .ok()
    }

    /// 发送前校验
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ChatSDKError::InvalidArgument("消息 ID 不能为空".to_string()));
        }
        if self.conversation_id.is_empty() {
            return Err(ChatSDKError::InvalidArgument("消息必须属于一个会话".to_string()));
        }
        let has_body = self.body.as_deref().is_some_and(|body| !body.is_empty());
        let has_metadata = self.metadata.as_ref().is_some_and(|m| !m.is_empty());
        if !has_body && !has_metadata && self.attachment.is_none() {
            return Err(ChatSDKError::InvalidArgument("消息内容不能为空".to_string()));
        }
        if let Some(kind) = self.metadata.as_ref().and_then(|m| m.get(METADATA_TYPE_KEY)) {
            match kind.as_str() {
                Some(raw) => {
                    raw.parse::<ChatMetadataType>()?;
                }
                None => {
                    return Err(ChatSDKError::InvalidArgument(format!("元数据 type 必须是字符串: {}", kind)));
                }
            }
        }
        Ok(())
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        expect_type(&record.id, record_types::MESSAGE)?;
        let conversation_id = record
            .get_reference("conversation_id")
            .map(|id| id.key)
            .ok_or_else(|| ChatSDKError::InvalidData(format!("{} 缺少 conversation_id", record.id)))?;

        Ok(Self {
            id: record.id.key.clone(),
            conversation_id,
            body: record.get_str("body").map(str::to_string),
            metadata: record.get("metadata").and_then(Value::as_object).cloned(),
            attachment: record.get_asset("attachment"),
            status: record
                .get_str("message_status")
                .map(DeliveryStatus::parse)
                .unwrap_or_default(),
            sender_id: record.owner_id.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new(self.record_id());
        record.owner_id = self.sender_id.clone();
        record.set_reference(
            "conversation_id",
            &RecordId::new(record_types::CONVERSATION, self.conversation_id.clone()),
        );
        if let Some(body) = &self.body {
            record.set("body", body.as_str());
        }
        if let Some(metadata) = &self.metadata {
            record.set("metadata", Value::Object(metadata.clone()));
        }
        if let Some(asset) = &self.attachment {
            record.set_asset("attachment", asset);
        }
        record.set("message_status", self.status.as_str());
        record
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

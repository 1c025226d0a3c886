//! 已读标记、用户频道与未读统计

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{compound_key, expect_type, record_types};
use crate::container::{Record, RecordId};
use crate::error::{ChatSDKError, Result};

/// 用户在某个会话中最后读到的消息
#[derive(Debug, Clone, PartialEq)]
pub struct LastMessageRead {
    pub id: String,
    pub conversation_id: String,
    pub message_id: Option<String>,
}

impl LastMessageRead {
    /// 同一用户同一会话只有一条，ID 由两者确定
    pub fn key_for(user_id: &str, conversation_id: &str) -> String {
        compound_key(&[user_id, conversation_id])
    }

    pub fn new(user_id: &str, conversation_id: &str) -> Self {
        Self {
            id: Self::key_for(user_id, conversation_id),
            conversation_id: conversation_id.to_string(),
            message_id: None,
        }
    }

    pub fn record_id(&self) -> RecordId {
        RecordId::new(record_types::LAST_MESSAGE_READ, self.id.clone())
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        expect_type(&record.id, record_types::LAST_MESSAGE_READ)?;
        let conversation_id = record
            .get_reference("conversation_id")
            .map(|id| id.key)
            .ok_or_else(|| ChatSDKError::InvalidData(format!("{} 缺少 conversation_id", record.id)))?;
        Ok(Self {
            id: record.id.key.clone(),
            conversation_id,
            message_id: record.get_reference("message_id").map(|id| id.key),
        })
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new(self.record_id());
        record.set_reference(
            "conversation_id",
            &RecordId::new(record_types::CONVERSATION, self.conversation_id.clone()),
        );
        if let Some(message_id) = &self.message_id {
            record.set_reference("message_id", &RecordId::new(record_types::MESSAGE, message_id.clone()));
        }
        record
    }
}

/// 用户的推送频道，记录 key 即用户 ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserChannel {
    pub user_id: String,
    pub name: String,
}

impl UserChannel {
    /// 新频道名称随机生成
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn record_id(&self) -> RecordId {
        RecordId::new(record_types::USER_CHANNEL, self.user_id.clone())
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        expect_type(&record.id, record_types::USER_CHANNEL)?;
        let name = record
            .get_str("name")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ChatSDKError::InvalidData(format!("{} 缺少频道名", record.id)))?;
        Ok(Self {
            user_id: record.id.key.clone(),
            name: name.to_string(),
        })
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new(self.record_id());
        record.set("name", self.name.as_str());
        record
    }
}

/// 全部会话的未读统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalUnreadCount {
    /// 会话 ID → 未读消息数（只包含有未读的会话）
    #[serde(default)]
    pub conversations: HashMap<String, u64>,
    /// 未读消息总数
    #[serde(default, alias = "message")]
    pub messages: u64,
}

//! 会话与用户会话

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use super::{expect_type, record_types};
use crate::container::{Record, RecordId};
use crate::error::{ChatSDKError, Result};

/// 会话
///
/// 管理员始终是参与者的子集。
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub participant_ids: BTreeSet<String>,
    pub admin_ids: BTreeSet<String>,
    pub title: Option<String>,
    /// 同一组参与者只允许存在一个会话（单聊）
    pub distinct_by_participants: bool,
    /// 记录所有者（创建者）
    pub owner_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// 新建尚未保存的会话，ID 随机生成
    pub fn new<I, J>(participant_ids: I, admin_ids: J, title: Option<String>) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            participant_ids: participant_ids.into_iter().collect(),
            admin_ids: admin_ids.into_iter().collect(),
            title,
            distinct_by_participants: false,
            owner_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn record_id(&self) -> RecordId {
        RecordId::new(record_types::CONVERSATION, self.id.clone())
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participant_ids.contains(user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_ids.contains(user_id)
    }

    /// 校验成员关系，在任何后端调用之前执行
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ChatSDKError::InvalidArgument("会话 ID 不能为空".to_string()));
        }
        if self.participant_ids.is_empty() {
            return Err(ChatSDKError::InvalidArgument("参与者列表不能为空".to_string()));
        }
        if self.participant_ids.iter().chain(&self.admin_ids).any(|id| id.trim().is_empty()) {
            return Err(ChatSDKError::InvalidArgument("用户 ID 不能为空".to_string()));
        }
        if let Some(outsider) = self.admin_ids.iter().find(|id| !self.participant_ids.contains(*id)) {
            return Err(ChatSDKError::InvalidArgument(format!(
                "管理员 {} 不是会话参与者",
                outsider
            )));
        }
        Ok(())
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        expect_type(&record.id, record_types::CONVERSATION)?;
        Ok(Self {
            id: record.id.key.clone(),
            participant_ids: record.get_string_list("participant_ids").into_iter().collect(),
            admin_ids: record.get_string_list("admin_ids").into_iter().collect(),
            title: record.get_str("title").map(str::to_string),
            distinct_by_participants: record.get_bool("distinct_by_participants").unwrap_or(false),
            owner_id: record.owner_id.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new(self.record_id());
        record.owner_id = self.owner_id.clone();
        record.set_string_list("participant_ids", &self.participant_ids);
        record.set_string_list("admin_ids", &self.admin_ids);
        if let Some(title) = &self.title {
            record.set("title", title.as_str());
        }
        record.set("distinct_by_participants", self.distinct_by_participants);
        record
    }
}

/// 用户在某个会话中的状态（未读数、已读位置）
#[derive(Debug, Clone, PartialEq)]
pub struct UserConversation {
    pub id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub unread_count: u64,
    pub last_read_message_id: Option<String>,
    /// 查询时 include 的会话
    pub conversation: Option<Conversation>,
}

impl UserConversation {
    pub fn record_id(&self) -> RecordId {
        RecordId::new(record_types::USER_CONVERSATION, self.id.clone())
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        expect_type(&record.id, record_types::USER_CONVERSATION)?;
        let user_id = record
            .get_reference("user")
            .map(|id| id.key)
            .ok_or_else(|| ChatSDKError::InvalidData(format!("{} 缺少 user", record.id)))?;
        let conversation_id = record
            .get_reference("conversation")
            .map(|id| id.key)
            .ok_or_else(|| ChatSDKError::InvalidData(format!("{} 缺少 conversation", record.id)))?;
        let conversation = record
            .transient_record("conversation")
            .map(|r| Conversation::from_record(&r))
            .transpose()?;

        Ok(Self {
            id: record.id.key.clone(),
            user_id,
            conversation_id,
            unread_count: record.get_u64("unread_count").unwrap_or(0),
            last_read_message_id: record.get_reference("last_read_message").map(|id| id.key),
            conversation,
        })
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new(self.record_id());
        record.set_reference("user", &RecordId::new(record_types::USER, self.user_id.clone()));
        record.set_reference(
            "conversation",
            &RecordId::new(record_types::CONVERSATION, self.conversation_id.clone()),
        );
        record.set("unread_count", self.unread_count);
        if let Some(message_id) = &self.last_read_message_id {
            record.set_reference("last_read_message", &RecordId::new(record_types::MESSAGE, message_id.clone()));
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_conversation_record_round_trip() {
        let conversation = Conversation::new(ids(&["u2", "u1", "u2"]), ids(&["u1"]), Some("Trip".to_string()));
        let record = conversation.to_record();
        assert_eq!(record.get_string_list("participant_ids"), ids(&["u1", "u2"]));

        let parsed = Conversation::from_record(&record).unwrap();
        assert_eq!(parsed, conversation);
    }

    #[test]
    fn test_validation() {
        let ok = Conversation::new(ids(&["u1", "u2"]), ids(&["u1"]), None);
        assert!(ok.validate().is_ok());

        let empty = Conversation::new(ids(&[]), ids(&[]), None);
        assert!(empty.validate().is_err());

        let outsider = Conversation::new(ids(&["u1"]), ids(&["u9"]), None);
        assert!(outsider.validate().is_err());

        let blank = Conversation::new(ids(&["u1", " "]), ids(&[]), None);
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_user_conversation_reads_included_conversation() {
        let conversation = Conversation::new(ids(&["u1", "u2"]), ids(&[]), None);
        let mut record = UserConversation {
            id: "uc1".to_string(),
            user_id: "u1".to_string(),
            conversation_id: conversation.id.clone(),
            unread_count: 4,
            last_read_message_id: Some("m9".to_string()),
            conversation: None,
        }
        .to_record();
        record
            .transient
            .insert("conversation".to_string(), conversation.to_record().to_json());

        let parsed = UserConversation::from_record(&record).unwrap();
        assert_eq!(parsed.unread_count, 4);
        assert_eq!(parsed.last_read_message_id.as_deref(), Some("m9"));
        assert_eq!(parsed.conversation.unwrap().id, conversation.id);
    }

    #[test]
    fn test_wrong_record_type_is_rejected() {
        let record = Record::new(RecordId::new("message", "m1"));
        assert!(Conversation::from_record(&record).is_err());
    }
}

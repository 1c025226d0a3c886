//! 聊天领域模型
//!
//! 每个模型都对应后端的一种记录类型，通过 `from_record` / `to_record` 与通用记录互转。

pub mod conversation;
pub mod marker;
pub mod message;

pub use conversation::{Conversation, UserConversation};
pub use marker::{LastMessageRead, TotalUnreadCount, UserChannel};
pub use message::{ChatMetadataType, DeliveryStatus, Message};

/// 记录类型名称
pub mod record_types {
    pub const CONVERSATION: &str = "conversation";
    pub const USER_CONVERSATION: &str = "user_conversation";
    pub const MESSAGE: &str = "message";
    pub const LAST_MESSAGE_READ: &str = "last_message_read";
    pub const USER_CHANNEL: &str = "user_channel";
    pub const USER: &str = "user";
}

use crate::container::RecordId;
use crate::error::{ChatSDKError, Result};

/// 检查记录类型是否符合预期
pub(crate) fn expect_type(id: &RecordId, expected: &str) -> Result<()> {
    if id.record_type != expected {
        return Err(ChatSDKError::InvalidData(format!(
            "记录类型不匹配: 期望 {}，实际 {}",
            expected, id
        )));
    }
    Ok(())
}

/// 由多个 ID 确定的记录 key
///
/// 各部分以换行拼接后取 UUIDv5，ID 本身带 `-` 也不会产生歧义。
pub(crate) fn compound_key(parts: &[&str]) -> String {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, parts.join("\n").as_bytes()).to_string()
}

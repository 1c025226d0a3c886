//! SkyChat SDK - 基于后端容器的聊天扩展
//!
//! 本 SDK 在通用的后端容器（记录存储 + Lambda + Pub/Sub）之上提供聊天功能：
//! - 💬 会话：创建、单聊、删除、成员与管理员管理
//! - 📨 消息：文本、图片（含缩略图）、语音、附件，按时间倒序分页
//! - ✅ 已读/送达回执、最后已读位置、未读统计
//! - 📡 用户频道推送订阅（可取消的事件流）
//!
//! 所有操作都是 `async fn`，每次调用只产生一个 `Result`。
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use skychat_sdk::{ChatClient, ChatConfig, ChatEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ChatConfig::builder()
//!         .endpoint("https://chat.example.com/")
//!         .api_key("my-api-key")
//!         .access_token("token")
//!         .user_id("u1")
//!         .build()?;
//!     skychat_sdk::logging::init_logging(config.debug_mode)?;
//!
//!     let client = ChatClient::from_config(config)?;
//!     let conversation = client
//!         .create_conversation(["u1", "u2"], ["u1"], Some("Trip"))
//!         .await?;
//!     client.create_message(&conversation, "Hello", None).await?;
//!
//!     let mut events = client.subscribe().await?;
//!     while let Some(event) = events.next().await {
//!         if let ChatEvent::Message { message, .. } = event {
//!             println!("收到消息: {:?}", message.body);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod container;
pub mod error;
pub mod logging;
pub mod media;
pub mod models;
pub mod subscription;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

// 重新导出核心类型，方便使用
pub use client::ChatClient;
pub use config::{ChatConfig, ChatConfigBuilder, HttpClientConfig, PubsubConfig};
pub use container::{
    Asset, BackendContainer, HttpContainer, MemoryContainer, Predicate, Query, Record, RecordId,
    ReconnectPolicy, Sort, WriteMode,
};
pub use error::{BackendErrorCode, ChatSDKError, ErrorKind, Result};
pub use media::ImageAttachment;
pub use models::{
    ChatMetadataType, Conversation, DeliveryStatus, LastMessageRead, Message, TotalUnreadCount,
    UserChannel, UserConversation,
};
pub use subscription::{ChatEvent, ChatSubscription, RecordEvent, SubscriptionHandle, TypingState};
pub use version::SDK_VERSION;

//! SkyChat SDK 基础示例
//!
//! 演示流程：
//! 1. 从环境变量读取配置（SKYCHAT_ENDPOINT / SKYCHAT_API_KEY / SKYCHAT_ACCESS_TOKEN / SKYCHAT_USER_ID）
//! 2. 与另一个用户建立单聊并发送消息
//! 3. 分页拉取历史消息、标记已读
//! 4. 订阅用户频道，打印 10 秒内收到的推送
//!
//! 运行：`cargo run --example demo -- <对方用户 ID>`

use futures::StreamExt;
use skychat_sdk::{ChatClient, ChatConfig, ChatEvent, Result};
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ChatConfig::from_env()?;
    skychat_sdk::logging::init_logging(config.debug_mode)?;

    let peer = std::env::args().nth(1).unwrap_or_else(|| "demo-peer".to_string());
    info!("🚀 SkyChat SDK 示例 (v{})", skychat_sdk::SDK_VERSION);

    let client = ChatClient::from_config(config)?;

    info!("📝 步骤 1: 获取或创建单聊");
    let conversation = client.fetch_or_create_direct_conversation(&peer).await?;
    info!("✅ 会话: {} ({:?})", conversation.id, conversation.participant_ids);

    info!("📝 步骤 2: 发送消息");
    let message = client.create_message(&conversation, "你好 👋", None).await?;
    info!("✅ 消息已发送: {}", message.id);

    info!("📝 步骤 3: 拉取历史消息");
    let mut before = None;
    for page in 1..=3 {
        let messages = client.fetch_messages(&conversation, 20, before).await?;
        info!("第 {} 页: {} 条消息", page, messages.len());
        match messages.last() {
            Some(oldest) => before = oldest.created_at,
            None => break,
        }
    }
    let user_conversation = client
        .mark_as_last_message_read(&conversation.id, &message.id)
        .await?;
    info!("✅ 已读，未读数: {}", user_conversation.unread_count);

    info!("📝 步骤 4: 订阅推送");
    let mut events = client.subscribe().await?;
    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.next() => match event {
                Some(ChatEvent::Message { event, message }) => {
                    info!("📨 {:?} 消息: {:?}", event, message.body);
                }
                Some(ChatEvent::Typing { user_id, state, .. }) => {
                    info!("⌨️ {} {:?}", user_id, state);
                }
                Some(other) => info!("📡 推送: {:?}", other),
                None => {
                    warn!("⚠️ 订阅已结束");
                    break;
                }
            },
        }
    }
    events.cancel();

    info!("✅ 示例结束");
    Ok(())
}

//! 聊天客户端
//!
//! `ChatClient` 把聊天领域的操作翻译成后端容器的通用调用
//! （记录保存/获取/删除/查询、Lambda、资源上传、频道订阅），
//! 并把结果转换为领域模型。所有参数校验都在调用后端之前完成，
//! 非法输入不会造成任何后端写入。

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ChatConfig;
use crate::container::record::{date_value, reference_value};
use crate::container::{Asset, BackendContainer, HttpContainer, Predicate, Query, RecordId, Sort, WriteMode};
use crate::error::{ChatSDKError, Result};
use crate::media::{self, ImageAttachment};
use crate::models::{
    record_types, ChatMetadataType, Conversation, LastMessageRead, Message, TotalUnreadCount, UserChannel,
    UserConversation,
};
use crate::subscription::{ChatEvent, ChatSubscription, SubscriptionHandle, TypingState};

pub const LAMBDA_MARK_AS_READ: &str = "chat:mark_as_read";
pub const LAMBDA_MARK_AS_DELIVERED: &str = "chat:mark_as_delivered";
pub const LAMBDA_TOTAL_UNREAD: &str = "chat:total_unread";
pub const LAMBDA_UNREAD_MESSAGE_COUNT: &str = "chat:get_unread_message_count";
pub const LAMBDA_TYPING: &str = "chat:typing";

/// 单聊会话 ID 的 UUIDv5 命名空间
const DIRECT_CONVERSATION_NAMESPACE: uuid::Uuid = uuid::Uuid::NAMESPACE_OID;

/// 聊天客户端
///
/// 可以廉价克隆，多个任务可以并发调用；并发调用之间没有顺序保证。
#[derive(Clone)]
pub struct ChatClient {
    container: Arc<dyn BackendContainer>,
}

impl ChatClient {
    pub fn new(container: Arc<dyn BackendContainer>) -> Self {
        Self { container }
    }

    /// 使用 HTTP 容器连接远端后端
    pub fn from_config(config: ChatConfig) -> Result<Self> {
        let container = HttpContainer::new(config)?;
        Ok(Self::new(Arc::new(container)))
    }

    pub fn container(&self) -> &Arc<dyn BackendContainer> {
        &self.container
    }

    fn current_user(&self) -> Result<String> {
        self.container
            .current_user_id()
            .ok_or_else(|| ChatSDKError::Auth("未登录".to_string()))
    }

    // ========== 会话 ==========

    /// 创建会话，成员关系与输入完全一致（不会自动加入当前用户）
    pub async fn create_conversation<I, J, S, T>(
        &self,
        participant_ids: I,
        admin_ids: J,
        title: Option<&str>,
    ) -> Result<Conversation>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        let conversation = Conversation::new(
            participant_ids.into_iter().map(Into::into),
            admin_ids.into_iter().map(Into::into),
            title.map(str::to_string),
        );
        conversation.validate()?;

        let saved = self
            .container
            .save_record(conversation.to_record(), WriteMode::Upsert)
            .await?;
        let created = Conversation::from_record(&saved)?;
        info!(
            "✅ 会话已创建: {} ({} 位参与者)",
            created.id,
            created.participant_ids.len()
        );
        Ok(created)
    }

    /// 获取或创建与某个用户的单聊会话
    ///
    /// 会话 ID 由两个用户 ID 确定，重复调用返回同一个会话。
    pub async fn fetch_or_create_direct_conversation(&self, user_id: &str) -> Result<Conversation> {
        let me = self.current_user()?;
        if user_id.trim().is_empty() {
            return Err(ChatSDKError::InvalidArgument("用户 ID 不能为空".to_string()));
        }
        if user_id == me {
            return Err(ChatSDKError::InvalidArgument("不能与自己创建单聊".to_string()));
        }

        let members: BTreeSet<String> = [me, user_id.to_string()].into_iter().collect();
        let mut conversation = Conversation::new(members.iter().cloned(), members.iter().cloned(), None);
        conversation.id = direct_conversation_id(&members);
        conversation.distinct_by_participants = true;

        let saved = self
            .container
            .save_record(conversation.to_record(), WriteMode::CreateIfAbsent)
            .await?;
        debug!("单聊会话: {}", saved.id);
        Conversation::from_record(&saved)
    }

    pub async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        let id = conversation_record_id(conversation_id)?;
        let record = self.container.fetch_record(&id).await?;
        Conversation::from_record(&record)
    }

    pub async fn delete_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.delete_conversation_with_id(&conversation.id).await
    }

    pub async fn delete_conversation_with_id(&self, conversation_id: &str) -> Result<()> {
        let id = conversation_record_id(conversation_id)?;
        self.container.delete_record(&id).await?;
        info!("🗑️ 会话已删除: {}", conversation_id);
        Ok(())
    }

    /// 保存会话（存在则覆盖）
    pub async fn save_conversation(&self, conversation: &Conversation) -> Result<Conversation> {
        conversation.validate()?;
        let saved = self
            .container
            .save_record(conversation.to_record(), WriteMode::Upsert)
            .await?;
        Conversation::from_record(&saved)
    }

    // ========== 用户会话 ==========

    fn user_conversation_query(&self, me: &str) -> Query {
        Query::new(record_types::USER_CONVERSATION)
            .filter(Predicate::eq(
                "user",
                reference_value(&RecordId::new(record_types::USER, me)),
            ))
            .include("conversation")
    }

    /// 当前用户的所有会话（顺序不保证）
    pub async fn fetch_user_conversations(&self) -> Result<Vec<UserConversation>> {
        let me = self.current_user()?;
        let records = self
            .container
            .query_records(&self.user_conversation_query(&me))
            .await?;
        debug!("获取到 {} 个用户会话", records.len());
        records.iter().map(UserConversation::from_record).collect()
    }

    pub async fn fetch_user_conversation(&self, conversation_id: &str) -> Result<UserConversation> {
        let me = self.current_user()?;
        let conversation = conversation_record_id(conversation_id)?;
        let query = self
            .user_conversation_query(&me)
            .filter(Predicate::eq("conversation", reference_value(&conversation)))
            .limit(1);

        let record = self
            .container
            .query_records(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ChatSDKError::NotFound(format!("用户会话不存在: {}", conversation_id)))?;
        UserConversation::from_record(&record)
    }

    // ========== 成员管理 ==========

    async fn update_membership<F>(&self, conversation: &Conversation, ids: Vec<String>, apply: F) -> Result<Conversation>
    where
        F: FnOnce(&mut Conversation, &[String]),
    {
        if ids.is_empty() {
            return Err(ChatSDKError::InvalidArgument("用户列表不能为空".to_string()));
        }
        if ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ChatSDKError::InvalidArgument("用户 ID 不能为空".to_string()));
        }

        let mut updated = conversation.clone();
        apply(&mut updated, &ids);
        updated.validate()?;

        let saved = self
            .container
            .save_record(updated.to_record(), WriteMode::UpdateOnly)
            .await?;
        Conversation::from_record(&saved)
    }

    pub async fn add_participants<I, S>(&self, conversation: &Conversation, participant_ids: I) -> Result<Conversation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = collect_ids(participant_ids);
        self.update_membership(conversation, ids, |c, ids| {
            c.participant_ids.extend(ids.iter().cloned());
        })
        .await
    }

    /// 移除参与者，同时撤销其管理员身份
    pub async fn remove_participants<I, S>(&self, conversation: &Conversation, participant_ids: I) -> Result<Conversation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = collect_ids(participant_ids);
        self.update_membership(conversation, ids, |c, ids| {
            for id in ids {
                c.participant_ids.remove(id);
                c.admin_ids.remove(id);
            }
        })
        .await
    }

    /// 添加管理员，不是参与者的同时加入会话
    pub async fn add_admins<I, S>(&self, conversation: &Conversation, admin_ids: I) -> Result<Conversation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = collect_ids(admin_ids);
        self.update_membership(conversation, ids, |c, ids| {
            c.admin_ids.extend(ids.iter().cloned());
            c.participant_ids.extend(ids.iter().cloned());
        })
        .await
    }

    pub async fn remove_admins<I, S>(&self, conversation: &Conversation, admin_ids: I) -> Result<Conversation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = collect_ids(admin_ids);
        self.update_membership(conversation, ids, |c, ids| {
            for id in ids {
                c.admin_ids.remove(id);
            }
        })
        .await
    }

    // ========== 消息 ==========

    pub async fn create_message(
        &self,
        conversation: &Conversation,
        body: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Message> {
        let mut message = Message::with_body(body);
        message.metadata = metadata;
        self.add_message(message, conversation).await
    }

    /// 图片消息：元数据携带尺寸和缩略图，原图作为附件上传
    pub async fn create_image_message(
        &self,
        conversation: &Conversation,
        body: &str,
        image: ImageAttachment,
    ) -> Result<Message> {
        let metadata = media::image_metadata(image.data.clone()).await?;
        let asset = Asset::from_bytes(ChatMetadataType::Image.asset_prefix(), image.mime_type, image.data);

        let mut message = Message::with_body(body);
        message.metadata = Some(metadata);
        self.add_message_with_asset(message, asset, conversation).await
    }

    /// 语音消息：时长（秒）以毫秒存入元数据的 `length`
    pub async fn create_voice_message(
        &self,
        conversation: &Conversation,
        body: &str,
        voice_path: impl AsRef<Path>,
        duration_secs: f64,
    ) -> Result<Message> {
        let metadata = media::voice_metadata(duration_secs)?;
        let path = voice_path.as_ref();
        let data = tokio::fs::read(path).await?;
        let asset = Asset::from_bytes(
            ChatMetadataType::Voice.asset_prefix(),
            media::detect_mime_type(path),
            data,
        );

        let mut message = Message::with_body(body);
        message.metadata = Some(metadata);
        self.add_message_with_asset(message, asset, conversation).await
    }

    /// 把已构造的消息发送到会话
    pub async fn add_message(&self, mut message: Message, conversation: &Conversation) -> Result<Message> {
        message.conversation_id = conversation.id.clone();
        message.validate()?;
        self.save_message(message).await
    }

    /// 先上传附件再发送消息
    ///
    /// 上传前确认当前用户仍在会话中，避免留下无主的资源。
    pub async fn add_message_with_asset(
        &self,
        mut message: Message,
        asset: Asset,
        conversation: &Conversation,
    ) -> Result<Message> {
        message.conversation_id = conversation.id.clone();
        message.attachment = Some(asset.clone());
        message.validate()?;
        self.ensure_participant(&conversation.id).await?;

        let uploaded = if asset.is_uploaded() {
            asset
        } else {
            self.container.upload_asset(asset).await?
        };
        message.attachment = Some(uploaded);
        self.save_message(message).await
    }

    async fn ensure_participant(&self, conversation_id: &str) -> Result<()> {
        let me = self.current_user()?;
        let conversation = self.fetch_conversation(conversation_id).await?;
        if !conversation.is_participant(&me) {
            return Err(ChatSDKError::PermissionDenied(format!(
                "{} 不在会话 {} 中",
                me, conversation_id
            )));
        }
        Ok(())
    }

    async fn save_message(&self, message: Message) -> Result<Message> {
        let saved = self
            .container
            .save_record(message.to_record(), WriteMode::Upsert)
            .await?;
        let message = Message::from_record(&saved)?;
        debug!("📤 消息已发送: {} -> {}", message.id, message.conversation_id);
        Ok(message)
    }

    pub async fn delete_message(&self, message: &Message) -> Result<()> {
        self.delete_message_with_id(&message.id).await
    }

    pub async fn delete_message_with_id(&self, message_id: &str) -> Result<()> {
        let id = message_record_id(message_id)?;
        self.container.delete_record(&id).await?;
        debug!("消息已删除: {}", message_id);
        Ok(())
    }

    /// 按时间倒序分页获取消息
    ///
    /// `before_time` 为不包含的上界；把上一页最早一条消息的时间传入即可获取更早的一页。
    pub async fn fetch_messages(
        &self,
        conversation: &Conversation,
        limit: usize,
        before_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        self.fetch_messages_with_conversation_id(&conversation.id, limit, before_time)
            .await
    }

    pub async fn fetch_messages_with_conversation_id(
        &self,
        conversation_id: &str,
        limit: usize,
        before_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let conversation = conversation_record_id(conversation_id)?;
        if limit == 0 {
            return Err(ChatSDKError::InvalidArgument("limit 必须大于 0".to_string()));
        }

        let mut query = Query::new(record_types::MESSAGE)
            .filter(Predicate::eq("conversation_id", reference_value(&conversation)))
            .sort_by(Sort::desc("_created_at"))
            .limit(limit);
        if let Some(before) = before_time {
            query = query.filter(Predicate::lt("_created_at", date_value(&before)));
        }

        let records = self.container.query_records(&query).await?;
        records.iter().map(Message::from_record).collect()
    }

    // ========== 已读 / 送达 ==========

    async fn mark_messages(&self, lambda: &str, message_ids: Vec<String>) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        if message_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ChatSDKError::InvalidArgument("消息 ID 不能为空".to_string()));
        }
        debug!("{}: {} 条消息", lambda, message_ids.len());
        self.container
            .call_lambda(lambda, json!({ "message_ids": message_ids }))
            .await?;
        Ok(())
    }

    pub async fn mark_read_messages(&self, messages: &[Message]) -> Result<()> {
        self.mark_read_messages_with_ids(messages.iter().map(|m| m.id.clone()))
            .await
    }

    pub async fn mark_read_messages_with_ids<I, S>(&self, message_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mark_messages(LAMBDA_MARK_AS_READ, collect_ids(message_ids))
            .await
    }

    pub async fn mark_delivered_messages(&self, messages: &[Message]) -> Result<()> {
        self.mark_delivered_messages_with_ids(messages.iter().map(|m| m.id.clone()))
            .await
    }

    pub async fn mark_delivered_messages_with_ids<I, S>(&self, message_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mark_messages(LAMBDA_MARK_AS_DELIVERED, collect_ids(message_ids))
            .await
    }

    // ========== 已读位置 ==========

    pub async fn get_or_create_last_message_read(&self, conversation_id: &str) -> Result<LastMessageRead> {
        let me = self.current_user()?;
        conversation_record_id(conversation_id)?;

        let marker = LastMessageRead::new(&me, conversation_id);
        let saved = self
            .container
            .save_record(marker.to_record(), WriteMode::CreateIfAbsent)
            .await?;
        LastMessageRead::from_record(&saved)
    }

    /// 把某条消息标记为会话中最后已读的消息，返回更新后的用户会话
    pub async fn mark_as_last_message_read(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<UserConversation> {
        let me = self.current_user()?;
        conversation_record_id(conversation_id)?;
        let message_id = message_record_id(message_id)?;

        let message = Message::from_record(&self.container.fetch_record(&message_id).await?)?;
        if message.conversation_id != conversation_id {
            return Err(ChatSDKError::InvalidArgument(format!(
                "消息 {} 不属于会话 {}",
                message.id, conversation_id
            )));
        }

        // 不在会话中时在这里失败，之后才写入
        let mut user_conversation = self.fetch_user_conversation(conversation_id).await?;

        let mut marker = LastMessageRead::new(&me, conversation_id);
        marker.message_id = Some(message.id.clone());
        self.container
            .save_record(marker.to_record(), WriteMode::Upsert)
            .await?;

        user_conversation.last_read_message_id = Some(message.id.clone());
        self.container
            .save_record(user_conversation.to_record(), WriteMode::UpdateOnly)
            .await?;

        info!("✅ 会话 {} 已读到消息 {}", conversation_id, message.id);
        // 未读数由后端重新计算，重新获取最新状态
        self.fetch_user_conversation(conversation_id).await
    }

    // ========== 未读数 ==========

    pub async fn total_unread_count(&self) -> Result<TotalUnreadCount> {
        let response = self.container.call_lambda(LAMBDA_TOTAL_UNREAD, json!({})).await?;
        Ok(serde_json::from_value(response)?)
    }

    pub async fn unread_message_count(&self, conversation_id: &str) -> Result<u64> {
        conversation_record_id(conversation_id)?;
        let response = self
            .container
            .call_lambda(LAMBDA_UNREAD_MESSAGE_COUNT, json!({ "conversation_id": conversation_id }))
            .await?;
        response
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| ChatSDKError::InvalidData(format!("未读数响应缺少 count: {}", response)))
    }

    // ========== 频道与订阅 ==========

    pub async fn get_or_create_user_channel(&self) -> Result<UserChannel> {
        let me = self.current_user()?;
        let saved = self
            .container
            .save_record(UserChannel::new(&me).to_record(), WriteMode::CreateIfAbsent)
            .await?;
        UserChannel::from_record(&saved)
    }

    /// 订阅当前用户频道上的推送
    pub async fn subscribe(&self) -> Result<ChatSubscription> {
        let channel = self.get_or_create_user_channel().await?;
        let cancel = CancellationToken::new();
        let receiver = self.container.subscribe(&channel.name, cancel.clone()).await?;
        info!("📡 已订阅用户频道: {}", channel.name);
        Ok(ChatSubscription::new(channel.name, receiver, cancel))
    }

    /// 以回调方式订阅，直到句柄被取消或 drop
    pub async fn subscribe_handler<F>(&self, handler: F) -> Result<SubscriptionHandle>
    where
        F: FnMut(ChatEvent) + Send + 'static,
    {
        let subscription = self.subscribe().await?;
        Ok(SubscriptionHandle::spawn(subscription, handler))
    }

    /// 发送输入状态，由后端推送给会话其他成员
    pub async fn send_typing_indicator(&self, conversation: &Conversation, state: TypingState) -> Result<()> {
        conversation_record_id(&conversation.id)?;
        let at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.container
            .call_lambda(
                LAMBDA_TYPING,
                json!({
                    "conversation_id": conversation.id,
                    "state": state.as_str(),
                    "at": at,
                }),
            )
            .await?;
        Ok(())
    }

    // ========== 资源 ==========

    /// 获取记录上的所有附件，没有类型前缀的 ID 视为消息
    pub async fn fetch_assets_by_record_id(&self, record_id: &str) -> Result<Vec<Asset>> {
        let id = RecordId::parse_or(record_id, record_types::MESSAGE)?;
        let record = self.container.fetch_record(&id).await?;
        Ok(record.assets())
    }
}

fn collect_ids<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ids.into_iter().map(Into::into).collect()
}

fn conversation_record_id(conversation_id: &str) -> Result<RecordId> {
    if conversation_id.trim().is_empty() {
        return Err(ChatSDKError::InvalidArgument("会话 ID 不能为空".to_string()));
    }
    Ok(RecordId::new(record_types::CONVERSATION, conversation_id))
}

fn message_record_id(message_id: &str) -> Result<RecordId> {
    if message_id.trim().is_empty() {
        return Err(ChatSDKError::InvalidArgument("消息 ID 不能为空".to_string()));
    }
    Ok(RecordId::new(record_types::MESSAGE, message_id))
}

/// 排序后的成员对确定唯一的会话 ID
fn direct_conversation_id(members: &BTreeSet<String>) -> String {
    let name = members.iter().cloned().collect::<Vec<_>>().join("\n");
    uuid::Uuid::new_v5(&DIRECT_CONVERSATION_NAMESPACE, name.as_bytes()).to_string()
}

//! 测试用聊天插件
//!
//! 在 `MemoryContainer` 上安装聊天服务端的钩子和 Lambda：
//! - 会话保存后为每个参与者维护 user_conversation，并推送会话事件
//! - 只有管理员可以修改成员关系或删除会话
//! - 消息保存后刷新各参与者的未读数并推送消息事件
//! - 已读/送达回执、未读统计、输入状态

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::container::memory::{PluginContext, RecordStore};
use crate::container::record::{date_value, reference_value};
use crate::container::{HookPoint, MemoryContainer, Predicate, PushPayload, Query, Record, RecordId};
use crate::error::{ChatSDKError, Result};
use crate::models::{compound_key, record_types, Conversation};

const RECEIPT: &str = "receipt";

/// 安装聊天插件，返回同一个容器方便链式调用
pub fn install_chat_plugin(container: &MemoryContainer) -> &MemoryContainer {
    container.register_hook(HookPoint::BeforeSave, record_types::CONVERSATION, check_conversation_write);
    container.register_hook(HookPoint::AfterSave, record_types::CONVERSATION, after_conversation_save);
    container.register_hook(HookPoint::BeforeDelete, record_types::CONVERSATION, |ctx, record, _| {
        require_admin(ctx, &Conversation::from_record(record)?)
    });
    container.register_hook(HookPoint::AfterDelete, record_types::CONVERSATION, after_conversation_delete);
    container.register_hook(HookPoint::BeforeSave, record_types::MESSAGE, check_message_write);
    container.register_hook(HookPoint::AfterSave, record_types::MESSAGE, after_message_save);
    container.register_hook(HookPoint::AfterSave, record_types::USER_CONVERSATION, |ctx, record, _| {
        let user = reference_key(record, "user")?;
        let conversation = reference_key(record, "conversation")?;
        refresh_unread(&mut *ctx.store, &user, &conversation);
        Ok(())
    });

    container.register_lambda("chat:mark_as_read", |ctx, args| mark_receipts(ctx, args, "read_at"));
    container.register_lambda("chat:mark_as_delivered", |ctx, args| {
        mark_receipts(ctx, args, "delivered_at")
    });
    container.register_lambda("chat:total_unread", total_unread);
    container.register_lambda("chat:get_unread_message_count", unread_message_count);
    container.register_lambda("chat:typing", typing);
    container
}

fn user_conversation_id(user_id: &str, conversation_id: &str) -> RecordId {
    RecordId::new(record_types::USER_CONVERSATION, compound_key(&[user_id, conversation_id]))
}

fn reference_key(record: &Record, field: &str) -> Result<String> {
    record
        .get_reference(field)
        .map(|id| id.key)
        .ok_or_else(|| ChatSDKError::InvalidData(format!("{} 缺少 {}", record.id, field)))
}

fn current_user<'a>(ctx: &PluginContext<'a>) -> Result<&'a str> {
    ctx.user_id.ok_or_else(|| ChatSDKError::Auth("未登录".to_string()))
}

fn require_admin(ctx: &PluginContext<'_>, conversation: &Conversation) -> Result<()> {
    let user = current_user(ctx)?;
    let allowed = if conversation.admin_ids.is_empty() {
        conversation.is_participant(user)
    } else {
        conversation.is_admin(user)
    };
    if !allowed {
        return Err(ChatSDKError::PermissionDenied(format!(
            "{} 不是会话 {} 的管理员",
            user, conversation.id
        )));
    }
    Ok(())
}

fn check_conversation_write(ctx: &mut PluginContext<'_>, record: &Record, original: Option<&Record>) -> Result<()> {
    let Some(original) = original else {
        return Ok(());
    };
    let before = Conversation::from_record(original)?;
    let after = Conversation::from_record(record)?;
    if before.participant_ids != after.participant_ids || before.admin_ids != after.admin_ids {
        require_admin(ctx, &before)?;
    }
    Ok(())
}

fn after_conversation_save(ctx: &mut PluginContext<'_>, record: &Record, original: Option<&Record>) -> Result<()> {
    let conversation = Conversation::from_record(record)?;
    let removed: Vec<String> = match original {
        Some(original) => Conversation::from_record(original)?
            .participant_ids
            .difference(&conversation.participant_ids)
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    for user in &conversation.participant_ids {
        let id = user_conversation_id(user, &conversation.id);
        if ctx.store.get(&id).is_none() {
            let mut uc = Record::new(id);
            uc.set_reference("user", &RecordId::new(record_types::USER, user.clone()));
            uc.set_reference("conversation", &conversation.record_id());
            uc.set("unread_count", 0);
            ctx.store.put(uc, Some(user.as_str()));
            refresh_unread(&mut *ctx.store, user, &conversation.id);
        }
    }
    for user in &removed {
        ctx.store.remove(&user_conversation_id(user, &conversation.id));
    }

    let event = if original.is_some() { "update" } else { "create" };
    let recipients: Vec<&String> = conversation.participant_ids.iter().chain(&removed).collect();
    publish_record_event(ctx, recipients, event, record);
    Ok(())
}

fn after_conversation_delete(ctx: &mut PluginContext<'_>, record: &Record, _: Option<&Record>) -> Result<()> {
    let reference = reference_value(&record.id);
    ctx.store
        .remove_where(record_types::USER_CONVERSATION, &Predicate::eq("conversation", reference.clone()));
    ctx.store
        .remove_where(record_types::MESSAGE, &Predicate::eq("conversation_id", reference));
    let conversation = Conversation::from_record(record)?;
    publish_record_event(ctx, conversation.participant_ids.iter(), "delete", record);
    Ok(())
}

fn check_message_write(ctx: &mut PluginContext<'_>, record: &Record, _: Option<&Record>) -> Result<()> {
    let user = current_user(ctx)?;
    let conversation_id = record
        .get_reference("conversation_id")
        .ok_or_else(|| ChatSDKError::InvalidArgument("消息缺少会话".to_string()))?;
    let conversation = ctx
        .store
        .get(&conversation_id)
        .ok_or_else(|| ChatSDKError::NotFound(format!("会话不存在: {}", conversation_id)))?;
    if !Conversation::from_record(conversation)?.is_participant(user) {
        return Err(ChatSDKError::PermissionDenied(format!("{} 不在会话中", user)));
    }
    Ok(())
}

fn after_message_save(ctx: &mut PluginContext<'_>, record: &Record, original: Option<&Record>) -> Result<()> {
    let conversation_id = reference_key(record, "conversation_id")?;
    let conversation = match ctx
        .store
        .get(&RecordId::new(record_types::CONVERSATION, conversation_id.clone()))
    {
        Some(record) => Conversation::from_record(record)?,
        None => return Ok(()),
    };
    for user in &conversation.participant_ids {
        refresh_unread(&mut *ctx.store, user, &conversation_id);
    }
    let event = if original.is_some() { "update" } else { "create" };
    publish_record_event(ctx, conversation.participant_ids.iter(), event, record);
    Ok(())
}

/// 按最后已读消息重新计算未读数：晚于已读位置且不是自己发的消息
fn refresh_unread(store: &mut RecordStore, user: &str, conversation_id: &str) {
    let id = user_conversation_id(user, conversation_id);
    let Some(mut uc) = store.get(&id).cloned() else {
        return;
    };
    let since = uc
        .get_reference("last_read_message")
        .and_then(|message| store.get(&message))
        .and_then(|message| message.created_at);

    let mut query = Query::new(record_types::MESSAGE).filter(Predicate::eq(
        "conversation_id",
        reference_value(&RecordId::new(record_types::CONVERSATION, conversation_id)),
    ));
    if let Some(since) = since {
        query = query.filter(Predicate::gt("_created_at", date_value(&since)));
    }
    let unread = store
        .query(&query)
        .iter()
        .filter(|message| message.owner_id.as_deref() != Some(user))
        .count() as u64;

    if uc.get_u64("unread_count") != Some(unread) {
        uc.set("unread_count", unread);
        store.put(uc, None);
    }
}

fn message_ids(args: &Value) -> Result<Vec<String>> {
    args.get("message_ids")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .ok_or_else(|| ChatSDKError::InvalidArgument("缺少 message_ids".to_string()))
}

fn mark_receipts(ctx: &mut PluginContext<'_>, args: Value, field: &str) -> Result<Value> {
    let user = current_user(ctx)?;
    let ids = message_ids(&args)?;
    let messages: Vec<Record> = ids
        .iter()
        .map(|id| {
            ctx.store
                .get(&RecordId::new(record_types::MESSAGE, id.clone()))
                .cloned()
                .ok_or_else(|| ChatSDKError::NotFound(format!("消息不存在: {}", id)))
        })
        .collect::<Result<_>>()?;

    let now = ctx.store.next_timestamp();
    for message in &messages {
        let receipt_id = RecordId::new(RECEIPT, compound_key(&[user, message.id.key.as_str()]));
        let mut receipt = ctx.store.get(&receipt_id).cloned().unwrap_or_else(|| {
            let mut receipt = Record::new(receipt_id);
            receipt.set_reference("user", &RecordId::new(record_types::USER, user));
            receipt.set_reference("message", &message.id);
            receipt
        });
        if receipt.get(field).is_none() {
            receipt.set_date(field, &now);
        }
        if field == "read_at" && receipt.get("delivered_at").is_none() {
            receipt.set_date("delivered_at", &now);
        }
        ctx.store.put(receipt, Some(user));
        refresh_status(&mut *ctx.store, &message.id);
    }
    Ok(json!({ "updated": messages.len() }))
}

/// 根据回执刷新消息状态
fn refresh_status(store: &mut RecordStore, message_id: &RecordId) {
    let Some(mut message) = store.get(message_id).cloned() else {
        return;
    };
    let conversation = message
        .get_reference("conversation_id")
        .and_then(|id| store.get(&id))
        .and_then(|record| Conversation::from_record(record).ok());
    let Some(conversation) = conversation else {
        return;
    };

    let receipts = store.query(&Query::new(RECEIPT).filter(Predicate::eq("message", reference_value(message_id))));
    let recipients: Vec<&String> = conversation
        .participant_ids
        .iter()
        .filter(|user| message.owner_id.as_deref() != Some(user.as_str()))
        .collect();
    let with = |field: &str| {
        recipients
            .iter()
            .filter(|user| {
                receipts.iter().any(|receipt| {
                    receipt.get_reference("user").map(|id| id.key).as_deref() == Some(user.as_str())
                        && receipt.get(field).is_some()
                })
            })
            .count()
    };
    let (read, delivered) = (with("read_at"), with("delivered_at"));

    let status = if !recipients.is_empty() && read == recipients.len() {
        "all_read"
    } else if read > 0 {
        "some_read"
    } else if delivered > 0 {
        "delivered"
    } else {
        "delivering"
    };
    message.set("message_status", status);
    store.put(message, None);
}

fn total_unread(ctx: &mut PluginContext<'_>, _args: Value) -> Result<Value> {
    let user = current_user(ctx)?;
    let records = ctx.store.query(&Query::new(record_types::USER_CONVERSATION).filter(Predicate::eq(
        "user",
        reference_value(&RecordId::new(record_types::USER, user)),
    )));

    let mut conversations = HashMap::new();
    for record in &records {
        let count = record.get_u64("unread_count").unwrap_or(0);
        if count > 0 {
            conversations.insert(reference_key(record, "conversation")?, count);
        }
    }
    let total: u64 = conversations.values().sum();
    Ok(json!({ "conversations": conversations, "message": total }))
}

fn unread_message_count(ctx: &mut PluginContext<'_>, args: Value) -> Result<Value> {
    let user = current_user(ctx)?;
    let conversation_id = args
        .get("conversation_id")
        .and_then(Value::as_str)
        .ok_or_else(|| ChatSDKError::InvalidArgument("缺少 conversation_id".to_string()))?;
    let record = ctx
        .store
        .get(&user_conversation_id(user, conversation_id))
        .ok_or_else(|| ChatSDKError::NotFound(format!("用户会话不存在: {}", conversation_id)))?;
    Ok(json!({ "count": record.get_u64("unread_count").unwrap_or(0) }))
}

fn typing(ctx: &mut PluginContext<'_>, args: Value) -> Result<Value> {
    let user = current_user(ctx)?.to_string();
    let conversation_id = args
        .get("conversation_id")
        .and_then(Value::as_str)
        .ok_or_else(|| ChatSDKError::InvalidArgument("缺少 conversation_id".to_string()))?;
    let conversation = ctx
        .store
        .get(&RecordId::new(record_types::CONVERSATION, conversation_id))
        .ok_or_else(|| ChatSDKError::NotFound(format!("会话不存在: {}", conversation_id)))
        .and_then(Conversation::from_record)?;

    let mut data = Map::new();
    data.insert("conversation_id".to_string(), json!(conversation_id));
    data.insert("user_id".to_string(), json!(user));
    data.insert("state".to_string(), args.get("state").cloned().unwrap_or(Value::Null));
    data.insert("at".to_string(), args.get("at").cloned().unwrap_or(Value::Null));

    let others = conversation.participant_ids.iter().filter(|id| **id != user);
    publish(ctx, others, "typing", Value::Object(data));
    Ok(json!({}))
}

fn publish_record_event<'a>(
    ctx: &PluginContext<'_>,
    users: impl IntoIterator<Item = &'a String>,
    event: &str,
    record: &Record,
) {
    let data = json!({
        "type": "record",
        "record_type": record.record_type(),
        "record": record.to_json(),
    });
    publish(ctx, users, event, data);
}

fn publish<'a>(ctx: &PluginContext<'_>, users: impl IntoIterator<Item = &'a String>, event: &str, data: Value) {
    for user in users {
        let channel = ctx
            .store
            .get(&RecordId::new(record_types::USER_CHANNEL, user.clone()))
            .and_then(|record| record.get_str("name"))
            .map(str::to_string);
        if let Some(channel) = channel {
            let mut payload = PushPayload::new();
            payload.insert("event".to_string(), json!(event));
            payload.insert("data".to_string(), data.clone());
            ctx.hub.publish(&channel, payload);
        }
    }
}

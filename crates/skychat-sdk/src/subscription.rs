//! 推送订阅
//!
//! 用户频道上的推送被解析为 [`ChatEvent`]：
//! - 记录变更：`{"event": "create", "data": {"type": "record", "record_type": "message", "record": {...}}}`
//! - 输入状态：`{"event": "typing", "data": {"conversation_id": ..., "user_id": ..., "state": "begin"}}`
//! - 其他负载原样作为 `ChatEvent::Raw` 交给调用方
//!
//! 订阅只能通过 `cancel()` 或 drop 结束，结束后不能重新开始。

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::container::record::parse_date;
use crate::container::{PushPayload, Record};
use crate::models::{record_types, Conversation, Message};

/// 记录变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordEvent {
    Create,
    Update,
    Delete,
}

impl RecordEvent {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create" => Some(RecordEvent::Create),
            "update" => Some(RecordEvent::Update),
            "delete" => Some(RecordEvent::Delete),
            _ => None,
        }
    }
}

/// 输入状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingState {
    Begin,
    Pause,
    Finished,
}

impl TypingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypingState::Begin => "begin",
            TypingState::Pause => "pause",
            TypingState::Finished => "finished",
        }
    }
}

/// 推送事件
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Message {
        event: RecordEvent,
        message: Message,
    },
    Conversation {
        event: RecordEvent,
        conversation: Conversation,
    },
    Typing {
        conversation_id: String,
        user_id: String,
        state: TypingState,
        at: Option<DateTime<Utc>>,
    },
    /// 无法识别的负载
    Raw(PushPayload),
}

impl ChatEvent {
    pub fn from_payload(payload: PushPayload) -> Self {
        match Self::parse(&payload) {
            Some(event) => event,
            None => {
                debug!("未识别的推送，按原样交付: {:?}", payload.get("event"));
                ChatEvent::Raw(payload)
            }
        }
    }

    fn parse(payload: &PushPayload) -> Option<Self> {
        let event = payload.get("event")?.as_str()?;
        let data = payload.get("data")?;

        if event == "typing" {
            return Some(ChatEvent::Typing {
                conversation_id: data.get("conversation_id")?.as_str()?.to_string(),
                user_id: data.get("user_id")?.as_str()?.to_string(),
                state: serde_json::from_value(data.get("state")?.clone()).ok()?,
                at: data.get("at").and_then(parse_date),
            });
        }

        let event = RecordEvent::parse(event)?;
        if data.get("type").and_then(Value::as_str) != Some("record") {
            return None;
        }
        let record = Record::from_json(data.get("record")?).ok()?;
        match data.get("record_type")?.as_str()? {
            record_types::MESSAGE => Some(ChatEvent::Message {
                event,
                message: Message::from_record(&record).ok()?,
            }),
            record_types::CONVERSATION => Some(ChatEvent::Conversation {
                event,
                conversation: Conversation::from_record(&record).ok()?,
            }),
            _ => None,
        }
    }
}

/// 用户频道上的推送流
pub struct ChatSubscription {
    channel: String,
    receiver: mpsc::UnboundedReceiver<PushPayload>,
    cancel: CancellationToken,
}

impl ChatSubscription {
    pub(crate) fn new(channel: String, receiver: mpsc::UnboundedReceiver<PushPayload>, cancel: CancellationToken) -> Self {
        Self {
            channel,
            receiver,
            cancel,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// 停止接收推送，流随即结束
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 可以交给其他任务用于取消订阅
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for ChatSubscription {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.receiver
            .poll_recv(cx)
            .map(|payload| payload.map(ChatEvent::from_payload))
    }
}

impl Drop for ChatSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 回调式订阅的句柄，drop 时取消订阅
pub struct SubscriptionHandle {
    channel: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub(crate) fn spawn<F>(mut subscription: ChatSubscription, mut handler: F) -> Self
    where
        F: FnMut(ChatEvent) + Send + 'static,
    {
        let channel = subscription.channel.clone();
        let cancel = subscription.cancellation_token();
        let stop = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    event = subscription.next() => match event {
                        Some(event) => handler(event),
                        None => break,
                    },
                }
            }
            debug!("订阅回调结束: {}", subscription.channel);
        });
        Self {
            channel,
            cancel,
            task: Some(task),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// 取消订阅并等待回调任务退出
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

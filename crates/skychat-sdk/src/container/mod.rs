//! 后端容器抽象
//!
//! 聊天 SDK 只依赖 `BackendContainer` 提供的通用原语：
//! 记录保存/获取/删除/查询、Lambda 调用、资源上传以及频道订阅。
//! 具体实现：
//! - [`HttpContainer`]：通过 HTTP + WebSocket 连接远端后端
//! - [`MemoryContainer`]：进程内实现，用于离线场景和测试

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub mod http;
pub mod memory;
pub mod pubsub;
pub mod query;
pub mod record;
pub mod reconnect;

pub use http::HttpContainer;
pub use memory::{HookPoint, MemoryContainer, PluginContext};
pub use query::{Predicate, Query, Sort};
pub use record::{Asset, Record, RecordId};
pub use reconnect::ReconnectPolicy;

/// 推送消息负载（任意键值）
pub type PushPayload = Map<String, Value>;

/// 记录写入语义
///
/// 幂等的“获取或创建”必须显式声明为 `CreateIfAbsent`，由后端负责去重。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// 存在则覆盖，不存在则创建
    Upsert,
    /// 已存在时原样返回已有记录，不做修改
    CreateIfAbsent,
    /// 只更新已存在的记录，不存在时返回 NotFound
    UpdateOnly,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Upsert => "upsert",
            WriteMode::CreateIfAbsent => "create_if_absent",
            WriteMode::UpdateOnly => "update_only",
        }
    }
}

/// 后端容器
#[async_trait]
pub trait BackendContainer: Send + Sync {
    /// 当前登录用户（未登录时为 None）
    fn current_user_id(&self) -> Option<String>;

    async fn save_record(&self, record: Record, mode: WriteMode) -> Result<Record>;

    async fn fetch_record(&self, id: &RecordId) -> Result<Record>;

    async fn delete_record(&self, id: &RecordId) -> Result<()>;

    async fn query_records(&self, query: &Query) -> Result<Vec<Record>>;

    /// 调用服务端 Lambda
    async fn call_lambda(&self, name: &str, args: Value) -> Result<Value>;

    /// 上传资源，返回带 URL 的资源
    async fn upload_asset(&self, asset: Asset) -> Result<Asset>;

    /// 订阅频道
    ///
    /// 返回的接收端在 `cancel` 触发或底层连接永久关闭后结束。
    /// 接收端不限长度，消费慢时推送排队等待而不会被丢弃。
    async fn subscribe(
        &self,
        channel: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<PushPayload>>;
}

//! 进程内后端容器
//!
//! 提供与远端容器相同的通用原语：记录存储与查询、Lambda、
//! 保存/删除钩子以及进程内 Pub/Sub。聊天相关的服务端逻辑不在这里，
//! 由使用方通过 `register_lambda` / `register_hook` 安装。

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::query::{Predicate, Query};
use super::record::{Asset, Record, RecordId};
use super::{BackendContainer, PushPayload, WriteMode};
use crate::error::{BackendErrorCode, ChatSDKError, Result};

/// 钩子触发点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// 保存前，返回错误会拒绝本次写入
    BeforeSave,
    AfterSave,
    /// 删除前，返回错误会拒绝本次删除
    BeforeDelete,
    AfterDelete,
}

/// 钩子与 Lambda 的执行上下文
pub struct PluginContext<'a> {
    pub user_id: Option<&'a str>,
    pub store: &'a mut RecordStore,
    pub hub: &'a PubsubHub,
}

/// 钩子：`(ctx, record, original)`，删除钩子的 original 为 None
pub type HookHandler =
    Arc<dyn Fn(&mut PluginContext<'_>, &Record, Option<&Record>) -> Result<()> + Send + Sync>;

pub type LambdaHandler = Arc<dyn Fn(&mut PluginContext<'_>, Value) -> Result<Value> + Send + Sync>;

/// 记录存储
#[derive(Debug, Default)]
pub struct RecordStore {
    records: BTreeMap<RecordId, Record>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl RecordStore {
    /// 单调递增的时间戳，保证同一存储内创建时间互不相同
    pub fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now().trunc_subsecs(6);
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.records.get(id)
    }

    /// 直接写入（补齐时间戳），不触发钩子
    pub fn put(&mut self, mut record: Record, user_id: Option<&str>) -> Record {
        let now = self.next_timestamp();
        if let Some(existing) = self.records.get(&record.id) {
            record.owner_id = existing.owner_id.clone();
            record.created_at = existing.created_at;
        } else {
            if record.owner_id.is_none() {
                record.owner_id = user_id.map(str::to_string);
            }
            record.created_at = Some(now);
        }
        record.updated_at = Some(now);
        record.transient.clear();
        self.records.insert(record.id.clone(), record.clone());
        record
    }

    pub fn remove(&mut self, id: &RecordId) -> Option<Record> {
        self.records.remove(id)
    }

    /// 删除所有满足谓词的某类记录，返回删除数量
    pub fn remove_where(&mut self, record_type: &str, predicate: &Predicate) -> usize {
        let before = self.records.len();
        self.records
            .retain(|id, record| !(id.record_type == record_type && predicate.matches(record)));
        before - self.records.len()
    }

    pub fn query(&self, query: &Query) -> Vec<Record> {
        let mut matched: Vec<Record> = self
            .records
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        matched.sort_by(|a, b| query.compare(a, b));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        for record in matched.iter_mut() {
            for field in &query.include {
                if let Some(target) = record.get_reference(field).and_then(|id| self.records.get(&id)) {
                    record.transient.insert(field.clone(), target.to_json());
                }
            }
        }
        matched
    }

    pub fn count(&self, record_type: &str) -> usize {
        self.records.keys().filter(|id| id.record_type == record_type).count()
    }
}

/// 进程内 Pub/Sub
///
/// 每个订阅者一条不限长度的队列，发布时直接写入，不会因为消费慢而丢推送。
#[derive(Debug, Clone, Default)]
pub struct PubsubHub {
    inner: Arc<Mutex<HubState>>,
}

#[derive(Debug, Default)]
struct HubState {
    next_id: u64,
    channels: HashMap<String, Vec<(u64, mpsc::UnboundedSender<PushPayload>)>>,
}

impl PubsubHub {
    /// 发布消息，返回收到消息的订阅者数量
    pub fn publish(&self, channel: &str, payload: PushPayload) -> usize {
        let mut state = self.inner.lock();
        let Some(subscribers) = state.channels.get_mut(channel) else {
            return 0;
        };
        subscribers.retain(|(_, sender)| sender.send(payload.clone()).is_ok());
        let delivered = subscribers.len();
        if delivered == 0 {
            state.channels.remove(channel);
        }
        delivered
    }

    /// 返回订阅 ID 和接收端
    pub fn subscribe(&self, channel: &str) -> (u64, mpsc::UnboundedReceiver<PushPayload>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.inner.lock();
        state.next_id += 1;
        let id = state.next_id;
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .push((id, sender));
        (id, receiver)
    }

    pub fn unsubscribe(&self, channel: &str, id: u64) {
        let mut state = self.inner.lock();
        if let Some(subscribers) = state.channels.get_mut(channel) {
            subscribers.retain(|(subscriber, _)| *subscriber != id);
            if subscribers.is_empty() {
                state.channels.remove(channel);
            }
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner.lock().channels.get(channel).map_or(0, Vec::len)
    }
}

#[derive(Default)]
struct Backend {
    store: Mutex<RecordStore>,
    hooks: RwLock<HashMap<(HookPoint, String), Vec<HookHandler>>>,
    lambdas: RwLock<HashMap<String, LambdaHandler>>,
    assets: Mutex<HashMap<String, Bytes>>,
    hub: PubsubHub,
}

/// 进程内后端容器
///
/// 多个用户视角共享同一份数据：`as_user` 返回同一后端上的另一个登录身份。
#[derive(Clone)]
pub struct MemoryContainer {
    backend: Arc<Backend>,
    user_id: Option<String>,
}

impl Default for MemoryContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContainer {
    /// 创建未登录的容器
    pub fn new() -> Self {
        Self {
            backend: Arc::new(Backend::default()),
            user_id: None,
        }
    }

    pub fn with_user(user_id: impl Into<String>) -> Self {
        Self::new().as_user(user_id)
    }

    /// 同一后端上以另一个用户登录
    pub fn as_user(&self, user_id: impl Into<String>) -> Self {
        Self {
            backend: self.backend.clone(),
            user_id: Some(user_id.into()),
        }
    }

    pub fn logged_out(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            user_id: None,
        }
    }

    pub fn register_lambda<F>(&self, name: &str, handler: F)
    where
        F: Fn(&mut PluginContext<'_>, Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.backend.lambdas.write().insert(name.to_string(), Arc::new(handler));
    }

    pub fn register_hook<F>(&self, point: HookPoint, record_type: &str, handler: F)
    where
        F: Fn(&mut PluginContext<'_>, &Record, Option<&Record>) -> Result<()> + Send + Sync + 'static,
    {
        self.backend
            .hooks
            .write()
            .entry((point, record_type.to_string()))
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn publish(&self, channel: &str, payload: PushPayload) -> usize {
        self.backend.hub.publish(channel, payload)
    }

    /// 某类记录的数量
    pub fn record_count(&self, record_type: &str) -> usize {
        self.backend.store.lock().count(record_type)
    }

    /// 已上传资源的原始字节
    pub fn asset_bytes(&self, name: &str) -> Option<Bytes> {
        self.backend.assets.lock().get(name).cloned()
    }

    pub fn asset_count(&self) -> usize {
        self.backend.assets.lock().len()
    }

    fn require_user(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .ok_or_else(|| ChatSDKError::Auth("未登录".to_string()))
    }

    fn hooks_for(&self, point: HookPoint, record_type: &str) -> Vec<HookHandler> {
        self.backend
            .hooks
            .read()
            .get(&(point, record_type.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn run_hooks(
        &self,
        point: HookPoint,
        store: &mut RecordStore,
        record: &Record,
        original: Option<&Record>,
    ) -> Result<()> {
        for hook in self.hooks_for(point, record.record_type()) {
            let mut ctx = PluginContext {
                user_id: self.user_id.as_deref(),
                store: &mut *store,
                hub: &self.backend.hub,
            };
            hook(&mut ctx, record, original)?;
        }
        Ok(())
    }

    fn run_after_hooks(&self, point: HookPoint, store: &mut RecordStore, record: &Record, original: Option<&Record>) {
        if let Err(e) = self.run_hooks(point, store, record, original) {
            warn!("⚠️ {:?} 钩子执行失败: record={}, error={}", point, record.id, e);
        }
    }
}

#[async_trait]
impl BackendContainer for MemoryContainer {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    async fn save_record(&self, record: Record, mode: WriteMode) -> Result<Record> {
        self.require_user()?;
        let mut store = self.backend.store.lock();
        let original = store.get(&record.id).cloned();

        match (mode, &original) {
            (WriteMode::CreateIfAbsent, Some(existing)) => {
                debug!("记录已存在，直接返回: {}", existing.id);
                return Ok(existing.clone());
            }
            (WriteMode::UpdateOnly, None) => {
                return Err(ChatSDKError::NotFound(format!("记录不存在: {}", record.id)));
            }
            _ => {}
        }

        self.run_hooks(HookPoint::BeforeSave, &mut store, &record, original.as_ref())?;
        let saved = store.put(record, self.user_id.as_deref());
        self.run_after_hooks(HookPoint::AfterSave, &mut store, &saved, original.as_ref());
        debug!("记录已保存: {} ({})", saved.id, mode.as_str());
        Ok(saved)
    }

    async fn fetch_record(&self, id: &RecordId) -> Result<Record> {
        self.require_user()?;
        self.backend
            .store
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ChatSDKError::NotFound(format!("记录不存在: {}", id)))
    }

    async fn delete_record(&self, id: &RecordId) -> Result<()> {
        self.require_user()?;
        let mut store = self.backend.store.lock();
        let existing = store
            .get(id)
            .cloned()
            .ok_or_else(|| ChatSDKError::NotFound(format!("记录不存在: {}", id)))?;

        self.run_hooks(HookPoint::BeforeDelete, &mut store, &existing, None)?;
        store.remove(id);
        self.run_after_hooks(HookPoint::AfterDelete, &mut store, &existing, None);
        debug!("记录已删除: {}", id);
        Ok(())
    }

    async fn query_records(&self, query: &Query) -> Result<Vec<Record>> {
        self.require_user()?;
        Ok(self.backend.store.lock().query(query))
    }

    async fn call_lambda(&self, name: &str, args: Value) -> Result<Value> {
        self.require_user()?;
        let handler = self.backend.lambdas.read().get(name).cloned().ok_or_else(|| {
            ChatSDKError::Backend {
                code: BackendErrorCode::UndefinedOperation,
                message: format!("未定义的 Lambda: {}", name),
            }
        })?;
        let mut store = self.backend.store.lock();
        let mut ctx = PluginContext {
            user_id: self.user_id.as_deref(),
            store: &mut store,
            hub: &self.backend.hub,
        };
        handler(&mut ctx, args)
    }

    async fn upload_asset(&self, mut asset: Asset) -> Result<Asset> {
        self.require_user()?;
        let data = asset
            .data
            .take()
            .ok_or_else(|| ChatSDKError::InvalidArgument(format!("资源没有数据: {}", asset.name)))?;
        asset.size = data.len() as u64;
        asset.url = Some(format!("memory://assets/{}", asset.name));
        self.backend.assets.lock().insert(asset.name.clone(), data);
        Ok(asset)
    }

    async fn subscribe(
        &self,
        channel: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<PushPayload>> {
        self.require_user()?;
        let hub = self.backend.hub.clone();
        let (id, rx) = hub.subscribe(channel);
        let channel = channel.to_string();

        tokio::spawn(async move {
            cancel.cancelled().await;
            hub.unsubscribe(&channel, id);
            debug!("频道订阅结束: {} (#{})", channel, id);
        });

        Ok(rx)
    }
}

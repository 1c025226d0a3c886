//! HTTP 后端容器
//!
//! 所有记录与 Lambda 请求都是 `POST {endpoint}`，请求体带 `action` 字段；
//! 资源通过 `PUT {endpoint}files/{name}` 上传；Pub/Sub 走 WebSocket。

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pubsub::PubsubConnection;
use super::query::Query;
use super::record::{Asset, Record, RecordId};
use super::{BackendContainer, PushPayload, WriteMode};
use crate::config::ChatConfig;
use crate::error::{ChatSDKError, Result};
use crate::version::user_agent;

const HEADER_API_KEY: &str = "X-Skygear-Api-Key";
const HEADER_ACCESS_TOKEN: &str = "X-Skygear-Access-Token";

/// 通过 HTTP/WebSocket 访问远端后端的容器
pub struct HttpContainer {
    client: Client,
    config: ChatConfig,
    endpoint: Url,
    pubsub: Mutex<Option<Arc<PubsubConnection>>>,
}

impl HttpContainer {
    pub fn new(config: ChatConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint_url()?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.http_client_config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }
        if let Some(timeout) = config.http_client_config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let client = builder
            .build()
            .map_err(|e| ChatSDKError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!("✅ HTTP 容器已创建 (endpoint: {})", endpoint);

        Ok(Self {
            client,
            config,
            endpoint,
            pubsub: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// 发送一个 action 请求，返回 `result` 字段
    async fn request(&self, action: &str, mut payload: Map<String, Value>) -> Result<Value> {
        payload.insert("action".to_string(), json!(action));
        payload.insert("api_key".to_string(), json!(self.config.api_key));
        if let Some(token) = &self.config.access_token {
            payload.insert("access_token".to_string(), json!(token));
        }

        debug!("🚀 发送请求: action={}", action);

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(USER_AGENT, user_agent())
            .json(&Value::Object(payload))
            .send()
            .await
            .map_err(|e| ChatSDKError::Transport(format!("请求失败 ({}): {}", action, e)))?;

        let status = response.status();
        let text = response.text().await?;
        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => return Err(status_error(status, &text)),
            Err(e) => {
                return Err(ChatSDKError::InvalidData(format!("解析响应失败 ({}): {}", action, e)));
            }
        };

        if let Some(err) = body.get("error") {
            let error = backend_error(err);
            debug!("📥 后端返回错误: action={}, error={}", action, error);
            return Err(error);
        }
        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| ChatSDKError::InvalidData(format!("响应缺少 result 字段 ({})", action)))
    }

    fn database_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("database_id".to_string(), json!(self.config.database_id));
        payload
    }

    /// 共享的 Pub/Sub 连接；上一条连接的后台任务退出后重新建立
    fn pubsub(&self) -> Result<Arc<PubsubConnection>> {
        let mut guard = self.pubsub.lock();
        if let Some(connection) = guard.as_ref() {
            if !connection.is_closed() {
                return Ok(connection.clone());
            }
            warn!("⚠️ Pub/Sub 连接已关闭，重新建立");
        }
        let connection = Arc::new(PubsubConnection::spawn(
            self.config.pubsub_url()?,
            &self.config.pubsub_config,
        ));
        *guard = Some(connection.clone());
        Ok(connection)
    }
}

/// 批量接口返回的单项结果，可能是记录也可能是错误
fn single_record(result: Value, id: &str) -> Result<Record> {
    let item = first_item(result, id)?;
    Record::from_json(&item)
}

fn first_item(result: Value, id: &str) -> Result<Value> {
    let item = match result {
        Value::Array(items) => items.into_iter().next(),
        other => Some(other),
    }
    .ok_or_else(|| ChatSDKError::NotFound(format!("记录不存在: {}", id)))?;

    if item.get("_type").and_then(Value::as_str) == Some("error") {
        return Err(backend_error(&item));
    }
    Ok(item)
}

fn backend_error(err: &Value) -> ChatSDKError {
    let code = err.get("code").and_then(Value::as_u64).unwrap_or(10000) as u32;
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    ChatSDKError::from_backend(code, message)
}

fn status_error(status: StatusCode, text: &str) -> ChatSDKError {
    let message = format!("HTTP {}: {}", status, text);
    match status {
        StatusCode::UNAUTHORIZED => ChatSDKError::Auth(message),
        StatusCode::FORBIDDEN => ChatSDKError::PermissionDenied(message),
        StatusCode::NOT_FOUND => ChatSDKError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ChatSDKError::InvalidArgument(message),
        _ => ChatSDKError::Transport(message),
    }
}

#[async_trait]
impl BackendContainer for HttpContainer {
    fn current_user_id(&self) -> Option<String> {
        self.config.user_id.clone()
    }

    async fn save_record(&self, record: Record, mode: WriteMode) -> Result<Record> {
        let id = record.id.to_string();
        let mut payload = self.database_payload();
        payload.insert("records".to_string(), json!([record.to_json()]));
        payload.insert("mode".to_string(), json!(mode.as_str()));
        payload.insert("atomic".to_string(), json!(true));

        let result = self.request("record:save", payload).await?;
        single_record(result, &id)
    }

    async fn fetch_record(&self, id: &RecordId) -> Result<Record> {
        let mut payload = self.database_payload();
        payload.insert("ids".to_string(), json!([id.to_string()]));

        let result = self.request("record:fetch", payload).await?;
        single_record(result, &id.to_string())
    }

    async fn delete_record(&self, id: &RecordId) -> Result<()> {
        let mut payload = self.database_payload();
        payload.insert("ids".to_string(), json!([id.to_string()]));

        let result = self.request("record:delete", payload).await?;
        first_item(result, &id.to_string()).map(|_| ())
    }

    async fn query_records(&self, query: &Query) -> Result<Vec<Record>> {
        let mut payload = self.database_payload();
        if let Value::Object(query) = query.to_json() {
            payload.extend(query);
        }

        match self.request("record:query", payload).await? {
            Value::Array(items) => items.iter().map(Record::from_json).collect(),
            other => Err(ChatSDKError::InvalidData(format!("查询结果不是数组: {}", other))),
        }
    }

    async fn call_lambda(&self, name: &str, args: Value) -> Result<Value> {
        let mut payload = Map::new();
        payload.insert("args".to_string(), args);
        self.request(name, payload).await
    }

    async fn upload_asset(&self, asset: Asset) -> Result<Asset> {
        let data = asset
            .data
            .clone()
            .ok_or_else(|| ChatSDKError::InvalidArgument(format!("资源没有数据: {}", asset.name)))?;
        let url = self
            .endpoint
            .join(&format!("files/{}", asset.name))
            .map_err(|e| ChatSDKError::InvalidArgument(format!("无效的资源名 {}: {}", asset.name, e)))?;

        info!("📤 开始上传资源: {} ({} bytes)", asset.name, data.len());

        let mut request = self
            .client
            .put(url)
            .header(USER_AGENT, user_agent())
            .header(CONTENT_TYPE, asset.mime_type.as_str())
            .header(HEADER_API_KEY, self.config.api_key.as_str());
        if let Some(token) = &self.config.access_token {
            request = request.header(HEADER_ACCESS_TOKEN, token.as_str());
        }
        let response = request
            .body(data)
            .send()
            .await
            .map_err(|e| ChatSDKError::Transport(format!("上传资源失败: {}", e)))?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            error!("❌ 上传失败，HTTP 状态码: {}, 错误: {}", status, text);
            return Err(match serde_json::from_str::<Value>(&text).ok().and_then(|v| v.get("error").cloned()) {
                Some(err) => backend_error(&err),
                None => status_error(status, &text),
            });
        }

        let body: Value = serde_json::from_str(&text)?;
        let uploaded = body
            .get("result")
            .and_then(Asset::from_value)
            .ok_or_else(|| ChatSDKError::InvalidData("上传响应缺少资源".to_string()))?;

        info!("✅ 资源上传成功: {}", uploaded.name);
        Ok(Asset {
            size: asset.size,
            mime_type: asset.mime_type,
            ..uploaded
        })
    }

    async fn subscribe(
        &self,
        channel: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<PushPayload>> {
        self.pubsub()?.subscribe(channel, cancel)
    }
}

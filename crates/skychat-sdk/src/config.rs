//! SDK 配置
//!
//! 支持三种来源：`ChatConfig::builder()`、`ChatConfig::from_env()` 以及 serde 反序列化。

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::container::ReconnectPolicy;
use crate::error::{ChatSDKError, Result};

pub const ENV_ENDPOINT: &str = "SKYCHAT_ENDPOINT";
pub const ENV_API_KEY: &str = "SKYCHAT_API_KEY";
pub const ENV_ACCESS_TOKEN: &str = "SKYCHAT_ACCESS_TOKEN";
pub const ENV_USER_ID: &str = "SKYCHAT_USER_ID";

/// HTTP 客户端配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(30),
            request_timeout_secs: Some(120), // 上传语音/图片可能较慢
        }
    }
}

/// Pub/Sub 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubsubConfig {
    /// 心跳间隔（秒）
    pub ping_interval_secs: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for PubsubConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// SkyChat SDK 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// 后端地址，例如 https://myapp.skygeario.com/
    pub endpoint: String,
    pub api_key: String,
    /// 登录后获得的访问令牌
    pub access_token: Option<String>,
    /// 当前登录用户
    pub user_id: Option<String>,
    /// 记录所在数据库
    pub database_id: String,
    pub http_client_config: HttpClientConfig,
    pub pubsub_config: PubsubConfig,
    /// 调试模式（默认日志级别为 debug）
    pub debug_mode: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000/".to_string(),
            api_key: String::new(),
            access_token: None,
            user_id: None,
            database_id: "_public".to_string(),
            http_client_config: HttpClientConfig::default(),
            pubsub_config: PubsubConfig::default(),
            debug_mode: false,
        }
    }
}

impl ChatConfig {
    pub fn builder() -> ChatConfigBuilder {
        ChatConfigBuilder::new()
    }

    /// 从环境变量读取配置
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var(ENV_ENDPOINT)
            .map_err(|_| ChatSDKError::Config(format!("缺少环境变量 {}", ENV_ENDPOINT)))?;
        let api_key = std::env::var(ENV_API_KEY)
            .map_err(|_| ChatSDKError::Config(format!("缺少环境变量 {}", ENV_API_KEY)))?;

        let mut builder = ChatConfig::builder().endpoint(endpoint).api_key(api_key);
        if let Ok(token) = std::env::var(ENV_ACCESS_TOKEN) {
            builder = builder.access_token(token);
        }
        if let Ok(user_id) = std::env::var(ENV_USER_ID) {
            builder = builder.user_id(user_id);
        }
        builder.build()
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.endpoint_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChatSDKError::Config(format!("endpoint 必须是 http/https: {}", self.endpoint)));
        }
        if self.api_key.trim().is_empty() {
            return Err(ChatSDKError::Config("api_key 不能为空".to_string()));
        }
        Ok(())
    }

    /// 规范化后的 endpoint（保证以 `/` 结尾）
    pub fn endpoint_url(&self) -> Result<Url> {
        let mut raw = self.endpoint.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| ChatSDKError::Config(format!("无效的 endpoint {}: {}", self.endpoint, e)))
    }

    /// Pub/Sub WebSocket 地址
    pub fn pubsub_url(&self) -> Result<Url> {
        let mut url = self
            .endpoint_url()?
            .join("pubsub")
            .map_err(|e| ChatSDKError::Config(e.to_string()))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ChatSDKError::Config(format!("无法转换为 WebSocket 地址: {}", url)))?;
        url.query_pairs_mut().append_pair("api_key", &self.api_key);
        Ok(url)
    }
}

/// SkyChat 配置构建器
pub struct ChatConfigBuilder {
    config: ChatConfig,
}

impl ChatConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ChatConfig::default(),
        }
    }

    pub fn endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.config.api_key = api_key.into();
        self
    }

    pub fn access_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.access_token = Some(token.into());
        self
    }

    pub fn user_id<S: Into<String>>(mut self, user_id: S) -> Self {
        self.config.user_id = Some(user_id.into());
        self
    }

    pub fn database_id<S: Into<String>>(mut self, database_id: S) -> Self {
        self.config.database_id = database_id.into();
        self
    }

    pub fn connect_timeout(mut self, seconds: u64) -> Self {
        self.config.http_client_config.connect_timeout_secs = Some(seconds);
        self
    }

    pub fn request_timeout(mut self, seconds: u64) -> Self {
        self.config.http_client_config.request_timeout_secs = Some(seconds);
        self
    }

    pub fn pubsub_config(mut self, config: PubsubConfig) -> Self {
        self.config.pubsub_config = config;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> Result<ChatConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ChatConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_pubsub_url() {
        let config = ChatConfig::builder()
            .endpoint("https://chat.example.com")
            .api_key("secret")
            .access_token("token-1")
            .user_id("u1")
            .request_timeout(10)
            .build()
            .unwrap();

        assert_eq!(config.endpoint_url().unwrap().as_str(), "https://chat.example.com/");
        assert_eq!(
            config.pubsub_url().unwrap().as_str(),
            "wss://chat.example.com/pubsub?api_key=secret"
        );
        assert_eq!(config.http_client_config.request_timeout_secs, Some(10));
        assert_eq!(config.database_id, "_public");
    }

    #[test]
    fn test_validation_errors() {
        assert!(ChatConfig::builder().endpoint("https://x.io").build().is_err());
        assert!(ChatConfig::builder().endpoint("ftp://x.io").api_key("k").build().is_err());
        assert!(ChatConfig::builder().endpoint("not a url").api_key("k").build().is_err());
    }

    #[test]
    fn test_plain_http_maps_to_ws() {
        let config = ChatConfig::builder()
            .endpoint("http://127.0.0.1:3000/api/")
            .api_key("k")
            .build()
            .unwrap();
        assert_eq!(
            config.pubsub_url().unwrap().as_str(),
            "ws://127.0.0.1:3000/api/pubsub?api_key=k"
        );
    }
}

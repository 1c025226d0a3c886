//! 日志初始化
//!
//! 过滤规则优先读取 `SKYCHAT_LOG`（与 `RUST_LOG` 语法相同），
//! 未设置时调试模式为 `debug`，否则为 `info`。

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ChatSDKError, Result};

pub const ENV_LOG: &str = "SKYCHAT_LOG";

/// 默认过滤规则
pub fn default_directive(debug_mode: bool) -> &'static str {
    if debug_mode {
        "skychat_sdk=debug,info"
    } else {
        "info"
    }
}

fn env_filter(debug_mode: bool) -> EnvFilter {
    EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new(default_directive(debug_mode)))
}

/// 安装全局 tracing subscriber，重复调用返回 `Config` 错误
pub fn init_logging(debug_mode: bool) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(debug_mode))
        .with(fmt::layer().with_target(debug_mode))
        .try_init()
        .map_err(|e| ChatSDKError::Config(format!("初始化日志失败: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "info");
        assert!(default_directive(true).contains("debug"));
    }

    #[test]
    fn test_second_init_is_rejected() {
        // 第一次可能已被同进程的其他测试安装
        let _ = init_logging(true);
        assert!(init_logging(false).is_err());
    }
}

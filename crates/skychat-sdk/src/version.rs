//! SDK 版本与构建元信息
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **构建信息** → 构建环境变量，未提供时为 "unknown"

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// git commit（CI 构建时通过 `SKYCHAT_GIT_SHA` 注入）
pub const GIT_SHA: &str = match option_env!("SKYCHAT_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

/// build time（CI 构建时通过 `SKYCHAT_BUILD_TIME` 注入）
pub const BUILD_TIME: &str = match option_env!("SKYCHAT_BUILD_TIME") {
    Some(time) => time,
    None => "unknown",
};

/// 请求头中的 User-Agent
pub fn user_agent() -> String {
    format!("skychat-sdk/{}", SDK_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_version() {
        assert_eq!(user_agent(), format!("skychat-sdk/{}", env!("CARGO_PKG_VERSION")));
        assert!(!GIT_SHA.is_empty());
        assert!(!BUILD_TIME.is_empty());
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pub/Sub 断线重连策略（指数退避 + 随机抖动）
///
/// 只用于维持订阅连接，普通请求不做内部重试。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// 最大连续重连次数，None 表示一直重连直到取消
    pub max_attempts: Option<u32>,
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl ReconnectPolicy {
    pub fn should_reconnect(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// 第 `attempt` 次重连前的等待时间（attempt 从 0 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 基础延迟 = base_delay * (backoff_factor ^ attempt)
        let base = self.base_delay_ms as f64 * self.backoff_factor.powf(attempt as f64);
        let capped = base.min(self.max_delay_ms as f64);

        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let delay = (capped + jitter).max(0.0);
        Duration::from_millis(delay as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = ReconnectPolicy {
            jitter_factor: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(20), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = ReconnectPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(2).as_millis() as f64;
            assert!(delay >= 2000.0 * 0.95 && delay <= 2000.0 * 1.05);
        }
    }

    #[test]
    fn test_attempt_limit() {
        let policy = ReconnectPolicy {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(policy.should_reconnect(2));
        assert!(!policy.should_reconnect(3));
        assert!(ReconnectPolicy::default().should_reconnect(u32::MAX));
    }
}

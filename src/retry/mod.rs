//! 重试策略模块
//!
//! watch 循环在后端出错后按策略等待，再重新同步

pub mod exponential;
pub mod fixed;

pub use exponential::ExponentialBackoffPolicy;
pub use fixed::FixedRetryPolicy;

use std::time::Duration;

/// 重试策略 trait
pub trait RetryPolicy: Send + Sync {
    /// 第 `attempt` 次（从 0 开始）重试前的等待时间
    fn backoff_duration(&self, attempt: u32) -> Duration;

    /// 最大尝试次数，`None` 表示无限重试
    fn max_attempts(&self) -> Option<u32> {
        None
    }

    /// 是否还应继续重试
    fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts().is_none_or(|max| attempt < max)
    }
}

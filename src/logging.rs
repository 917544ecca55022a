//! 日志初始化

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// 安装全局 tracing subscriber
///
/// 优先使用 `RUST_LOG`，未设置时退回到配置中的级别。
/// 重复调用时返回 `false`（subscriber 已经存在）。
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_rejected() {
        let config = LogConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}

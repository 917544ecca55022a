//! 服务发现统一错误类型

use super::code::ErrorCode;
use thiserror::Error;

/// 服务发现错误
///
/// 连接类错误（注册中心不可达、RPC 通道建立失败）与配置类错误
/// （目标地址格式错误、未知 scheme、缺失后端配置）都同步返回给调用方；
/// watch 过程中的瞬时错误只记录日志，不会出现在这里。
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// 连接失败（构造时后端不可达等）
    #[error("连接失败: {0}")]
    Connection(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 目标地址无法解析
    #[error("无效的目标地址 `{target}`: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// scheme 没有注册对应的 resolver builder
    #[error("未注册的 resolver scheme: {0}")]
    UnknownScheme(String),

    /// 当前地址集合为空
    #[error("服务 `{0}` 没有可用地址")]
    NoAvailableAddress(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "etcd")]
    #[error("etcd 错误: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[cfg(feature = "zookeeper")]
    #[error("ZooKeeper 错误: {0}")]
    ZooKeeper(#[from] zookeeper_client::Error),

    #[error("传输层错误: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 服务发现结果类型
pub type Result<T> = std::result::Result<T, DiscoveryError>;

impl DiscoveryError {
    /// 创建连接失败错误
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        DiscoveryError::Connection(reason.into())
    }

    /// 创建配置错误
    pub fn config(reason: impl Into<String>) -> Self {
        DiscoveryError::Config(reason.into())
    }

    /// 创建目标地址错误
    pub fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        DiscoveryError::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            DiscoveryError::Connection(_) | DiscoveryError::Transport(_) => {
                ErrorCode::ConnectionFailed
            }
            #[cfg(feature = "etcd")]
            DiscoveryError::Etcd(_) => ErrorCode::RegistryUnavailable,
            #[cfg(feature = "zookeeper")]
            DiscoveryError::ZooKeeper(_) => ErrorCode::RegistryUnavailable,
            DiscoveryError::Config(_) | DiscoveryError::UnknownScheme(_) => {
                ErrorCode::ConfigurationError
            }
            DiscoveryError::InvalidTarget { .. } => ErrorCode::InvalidParameter,
            DiscoveryError::NoAvailableAddress(_) => ErrorCode::NoAvailableAddress,
            DiscoveryError::Serialization(_) => ErrorCode::SerializationError,
            DiscoveryError::Io(_) => ErrorCode::InternalError,
        }
    }

    /// 是否为配置类错误
    pub fn is_config(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ConfigurationError | ErrorCode::InvalidParameter
        )
    }
}

//! 名字解析模块
//!
//! 把注册中心的 watch 快照转换为连接层可用的地址列表。连接层实现
//! [`ClientConnHandle`]，resolver 在每次快照到达时调用 `update_state`。

pub mod global;
pub mod service;

pub use service::{ServiceResolver, ServiceResolverBuilder, new_builder};

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{DiscoveryError, Result};
use crate::types::ServiceInstance;

/// 解析后的目标地址，形如 `scheme://authority/endpoint`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    /// 服务名
    pub endpoint: String,
}

impl Target {
    /// 以 `scheme:///service` 形式构造
    pub fn new(scheme: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            authority: String::new(),
            endpoint: service_name.into(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| DiscoveryError::invalid_target(raw, "missing `://`"))?;

        if !is_valid_scheme(scheme) {
            return Err(DiscoveryError::invalid_target(raw, "invalid scheme"));
        }

        let (authority, endpoint) = rest.split_once('/').unwrap_or((rest, ""));
        let endpoint = endpoint.trim_start_matches('/');
        if endpoint.is_empty() {
            return Err(DiscoveryError::invalid_target(raw, "missing service name"));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            endpoint: endpoint.to_string(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.authority, self.endpoint)
    }
}

// RFC 3986: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )
fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// 单个后端地址
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    /// "host:port"
    pub addr: String,
    pub attributes: HashMap<String, String>,
}

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            attributes: HashMap::new(),
        }
    }
}

impl From<&ServiceInstance> for Address {
    fn from(instance: &ServiceInstance) -> Self {
        Self {
            addr: instance.address.clone(),
            attributes: instance.metadata.clone(),
        }
    }
}

/// 推送给连接层的解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverState {
    pub addresses: Vec<Address>,
}

impl ResolverState {
    pub fn new(addresses: Vec<Address>) -> Self {
        Self { addresses }
    }

    pub fn addrs(&self) -> impl Iterator<Item = &str> {
        self.addresses.iter().map(|a| a.addr.as_str())
    }
}

/// 构建 resolver 时的选项
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// 父级取消令牌，取消时 resolver 一并关闭
    pub parent_token: Option<CancellationToken>,
}

/// 连接层句柄
#[async_trait]
pub trait ClientConnHandle: Send + Sync {
    /// 用新的地址集合替换当前集合
    async fn update_state(&self, state: ResolverState) -> Result<()>;
}

/// resolver 构建器
#[async_trait]
pub trait ResolverBuilder: Send + Sync {
    async fn build(
        &self,
        target: &Target,
        conn: Arc<dyn ClientConnHandle>,
        options: BuildOptions,
    ) -> Result<Box<dyn Resolver>>;

    fn scheme(&self) -> &str;
}

/// resolver
pub trait Resolver: Send + Sync {
    /// 请求立即重新解析
    fn resolve_now(&self);

    /// 停止解析，可重复调用
    fn close(&self);
}

//! 服务发现驱动的 gRPC 客户端连接
//!
//! [`new_connection`] 为一个服务名建立轮询负载均衡的连接：地址集合由
//! resolver 根据注册中心的 watch 快照持续更新。连接可直接交给
//! tonic 生成的客户端使用。

mod balanced;
mod connection;

pub use balanced::BalancedChannel;
pub use connection::Connection;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::error::{DiscoveryError, Result};
use crate::interceptor::{DEFAULT_FORWARD_HEADERS, PropagationInterceptor};
use crate::registry::Registry;
use crate::resolver::{self, BuildOptions, ResolverBuilder, ServiceResolverBuilder, Target};
use crate::types::ServiceInstance;

/// 默认消息大小上限 100 MiB
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// 客户端连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub max_send_message_size: usize,
    pub max_recv_message_size: usize,
    /// 建连超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 单次请求超时（毫秒），不设置则不限制
    pub request_timeout_ms: Option<u64>,
    /// 从调用上下文转发到下游的请求头
    pub forward_headers: Vec<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_send_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_recv_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            connect_timeout_ms: 5_000,
            request_timeout_ms: None,
            forward_headers: DEFAULT_FORWARD_HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

impl ConnectionOptions {
    pub fn forward_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forward_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = millis(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(millis(timeout));
        self
    }

    pub fn max_message_size(mut self, send: usize, recv: usize) -> Self {
        self.max_send_message_size = send;
        self.max_recv_message_size = recv;
        self
    }

    pub(crate) fn interceptor(&self) -> PropagationInterceptor {
        PropagationInterceptor::new(self.forward_headers.iter().cloned())
    }

    /// 为单个地址构建惰性连接的 endpoint
    pub(crate) fn endpoint(&self, address: &str) -> Result<Endpoint> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        let mut endpoint = Endpoint::from_shared(uri)?
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .tcp_nodelay(true);
        if let Some(ms) = self.request_timeout_ms {
            endpoint = endpoint.timeout(Duration::from_millis(ms));
        }
        Ok(endpoint)
    }
}

fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

/// 为服务名建立连接，目标地址为 `{registry.name()}:///{service_name}`
///
/// 使用该注册中心的 resolver builder，不写入全局 scheme 表。
/// 不等待任何后端可用。
///
/// 消息大小上限在 tonic 中按生成的客户端设置，连接本身不强制执行：
/// 把 [`Connection::max_recv_message_size`] 传给 `max_decoding_message_size`，
/// [`Connection::max_send_message_size`] 传给 `max_encoding_message_size`。
/// 超时由 [`ConnectionOptions`] 在每个 endpoint 上生效。
pub async fn new_connection(
    service_name: &str,
    registry: Arc<dyn Registry>,
    options: ConnectionOptions,
) -> Result<Connection> {
    let builder = ServiceResolverBuilder::new(registry);
    let target = Target::new(builder.scheme(), service_name);
    connect_with(&builder, target, options).await
}

/// 按目标地址建立连接，builder 从全局 scheme 表查找
pub async fn dial(target: &str, options: ConnectionOptions) -> Result<Connection> {
    let target = Target::parse(target)?;
    let builder = resolver::global::get(&target.scheme)
        .ok_or_else(|| DiscoveryError::UnknownScheme(target.scheme.clone()))?;
    connect_with(builder.as_ref(), target, options).await
}

async fn connect_with(
    builder: &dyn ResolverBuilder,
    target: Target,
    options: ConnectionOptions,
) -> Result<Connection> {
    if target.endpoint.trim().is_empty() {
        return Err(DiscoveryError::invalid_target(
            target.to_string(),
            "missing service name",
        ));
    }

    let channel = BalancedChannel::new(target.endpoint.clone(), options.clone());
    let resolver = builder
        .build(&target, Arc::new(channel.clone()), BuildOptions::default())
        .await?;

    info!(target = %target, "Connection created");
    Ok(Connection::new(target, channel, resolver, options))
}

/// 直连单个实例的通道
pub type InstanceChannel = InterceptedService<Channel, PropagationInterceptor>;

/// 为注册中心缓存中的每个实例建立一个直连通道
///
/// 只读取缓存（需要已有 watch）；地址无法解析的实例被跳过。
pub async fn connections_for_all_instances(
    service_name: &str,
    registry: &dyn Registry,
    options: &ConnectionOptions,
) -> Result<Vec<(ServiceInstance, InstanceChannel)>> {
    let instances = registry.get_service_instances(service_name).await?;

    let mut channels = Vec::with_capacity(instances.len());
    for instance in instances {
        match options.endpoint(&instance.address) {
            Ok(endpoint) => {
                let channel = InterceptedService::new(endpoint.connect_lazy(), options.interceptor());
                channels.push((instance, channel));
            }
            Err(e) => {
                debug!(service = %service_name, address = %instance.address, error = %e, "Skipping instance");
            }
        }
    }
    Ok(channels)
}

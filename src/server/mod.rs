//! gRPC 服务端模块
//!
//! 绑定端口、把实际监听地址注册到注册中心、提供服务直到收到关闭信号，
//! 退出前注销。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::Server;
use tracing::{info, warn};

use crate::error::Result;
use crate::registry::Registry;
use crate::types::ServiceInfo;

/// 服务端配置
///
/// tonic 的消息大小上限按生成的服务端设置，`builder()` 不涉及：
///
/// ```ignore
/// let svc = UserServiceServer::new(handler)
///     .max_decoding_message_size(config.max_message_size)
///     .max_encoding_message_size(config.max_message_size);
/// let routes = Routes::new(svc);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 单连接并发流上限
    pub max_concurrent_streams: Option<u32>,
    pub tcp_nodelay: bool,
    pub tcp_keepalive: Option<Duration>,
    /// HTTP/2 初始流窗口（字节）
    pub initial_stream_window_size: u32,
    /// HTTP/2 初始连接窗口（字节）
    pub initial_connection_window_size: u32,
    /// 消息大小上限（字节），传给生成的服务端的
    /// `max_decoding_message_size` 和 `max_encoding_message_size`
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: Some(1000),
            tcp_nodelay: true,
            tcp_keepalive: Some(Duration::from_secs(60)),
            initial_stream_window_size: 10 * 1024 * 1024,
            initial_connection_window_size: 10 * 1024 * 1024,
            max_message_size: crate::client::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn builder(&self) -> Server {
        let mut server = Server::builder()
            .tcp_nodelay(self.tcp_nodelay)
            .tcp_keepalive(self.tcp_keepalive)
            .initial_stream_window_size(self.initial_stream_window_size)
            .initial_connection_window_size(self.initial_connection_window_size);

        if let Some(max_streams) = self.max_concurrent_streams {
            server = server.concurrency_limit_per_connection(max_streams as usize);
        }

        server
    }
}

/// 服务注册参数
///
/// `host` 是写入注册中心的对外地址，端口以实际绑定的为准（`bind` 端口为 0 时由系统分配）。
#[derive(Debug, Clone)]
pub struct Registration {
    pub service_name: String,
    pub host: String,
    pub bind: SocketAddr,
    pub version: String,
    pub metadata: HashMap<String, String>,
}

impl Registration {
    /// 监听 `0.0.0.0:{port}`
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            host: host.into(),
            bind: SocketAddr::from(([0, 0, 0, 0], port)),
            version: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind = addr;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 已绑定端口并完成注册、尚未开始服务的 server
pub struct RegisteredServer {
    listener: TcpListener,
    info: ServiceInfo,
    registry: Arc<dyn Registry>,
}

impl RegisteredServer {
    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 提供服务直到 `shutdown` 取消或收到 Ctrl+C，然后注销
    pub async fn serve(self, routes: Routes, config: &ServerConfig, shutdown: CancellationToken) -> Result<()> {
        let Self {
            listener,
            info,
            registry,
        } = self;

        let signal = async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down");
                }
            }
        };

        info!(
            service = %info.name,
            address = %info.address,
            max_message_size = config.max_message_size,
            "gRPC server started"
        );
        let result = config
            .builder()
            .add_routes(routes)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await;

        if let Err(e) = registry.unregister(&info).await {
            warn!(service = %info.name, address = %info.address, error = %e, "Failed to unregister service");
        }
        info!(service = %info.name, "gRPC server stopped");

        Ok(result?)
    }
}

/// 绑定端口并把 `{host}:{实际端口}` 注册到注册中心
pub async fn bind_and_register(
    registry: Arc<dyn Registry>,
    registration: Registration,
) -> Result<RegisteredServer> {
    let listener = TcpListener::bind(registration.bind).await?;
    let port = listener.local_addr()?.port();

    let mut info = ServiceInfo::new(
        registration.service_name,
        format!("{}:{}", registration.host, port),
    )
    .with_version(registration.version);
    info.metadata = registration.metadata;

    registry.register(&info).await?;

    Ok(RegisteredServer {
        listener,
        info,
        registry,
    })
}

/// [`bind_and_register`] 后立即提供服务
pub async fn serve_and_register(
    registry: Arc<dyn Registry>,
    registration: Registration,
    routes: Routes,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    bind_and_register(registry, registration)
        .await?
        .serve(routes, config, shutdown)
        .await
}

use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::Status;
use tonic::body::Body;
use tower::{BoxError, Service, ServiceExt};
use tracing::trace;

use super::{BalancedChannel, ConnectionOptions};
use crate::error::DiscoveryError;
use crate::interceptor::PropagationInterceptor;
use crate::resolver::{Resolver, Target};

/// 服务发现驱动的连接
///
/// 实现 `tower::Service`，可直接传给 tonic 生成的客户端：
///
/// ```ignore
/// let conn = new_connection("user-service", registry, ConnectionOptions::default()).await?;
/// let client = UserServiceClient::new(conn.clone())
///     .max_decoding_message_size(conn.max_recv_message_size())
///     .max_encoding_message_size(conn.max_send_message_size());
/// ```
///
/// 消息大小上限只作为取值暴露，需要像上面这样在生成的客户端上设置。
/// 地址集合为空时请求以 `UNAVAILABLE` 失败。最后一个克隆释放时关闭 resolver。
#[derive(Clone)]
pub struct Connection {
    target: Arc<Target>,
    channel: BalancedChannel,
    propagation: PropagationInterceptor,
    options: Arc<ConnectionOptions>,
    resolver: Arc<ResolverGuard>,
}

struct ResolverGuard(Box<dyn Resolver>);

impl Drop for ResolverGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl Connection {
    pub(crate) fn new(
        target: Target,
        channel: BalancedChannel,
        resolver: Box<dyn Resolver>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            target: Arc::new(target),
            channel,
            propagation: options.interceptor(),
            options: Arc::new(options),
            resolver: Arc::new(ResolverGuard(resolver)),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// resolver 最近推送的地址
    pub fn addresses(&self) -> Vec<String> {
        self.channel.addresses()
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn max_send_message_size(&self) -> usize {
        self.options.max_send_message_size
    }

    pub fn max_recv_message_size(&self) -> usize {
        self.options.max_recv_message_size
    }

    /// 提前关闭 resolver，地址集合停止更新
    pub fn close(&self) {
        self.resolver.0.close();
    }
}

impl Service<http::Request<Body>> for Connection {
    type Response = http::Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // 选中的通道在 call 中通过 oneshot 等待就绪
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut request: http::Request<Body>) -> Self::Future {
        self.propagation.apply_to_headers(request.headers_mut());

        let picked = self.channel.pick();
        let service_name = self.target.endpoint.clone();

        Box::pin(async move {
            let Some((address, channel)) = picked else {
                let status = Status::from(DiscoveryError::NoAvailableAddress(service_name));
                return Err(status.into());
            };
            trace!(service = %service_name, address = %address, path = %request.uri().path(), "Dispatching call");
            channel.oneshot(request).await.map_err(Into::into)
        })
    }
}

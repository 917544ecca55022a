//! 端到端连接测试：真实 gRPC 服务端 + 内存注册中心

use flare_discovery::server::RegisteredServer;
use flare_discovery::{
    CallContext, Connection, ConnectionOptions, MemoryRegistry, Registration, Registry,
    ServerConfig, bind_and_register, connections_for_all_instances, new_connection,
};
use futures::future::{Ready, ready};
use std::collections::HashSet;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::body::Body;
use tonic::server::NamedService;
use tonic::service::Routes;
use tower::{Service, ServiceExt};

/// 把收到的传播头回显到响应头，并标记处理请求的服务端
#[derive(Clone)]
struct EchoHeaders {
    server_id: &'static str,
}

impl NamedService for EchoHeaders {
    const NAME: &'static str = "test.Echo";
}

impl Service<http::Request<Body>> for EchoHeaders {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        let mut response = http::Response::builder()
            .header("content-type", "application/grpc")
            .header("grpc-status", "0")
            .header("echo-server", self.server_id);
        for key in ["x-trace-id", "clientip", "user-id", "secret"] {
            if let Some(value) = req.headers().get(key) {
                response = response.header(format!("echo-{}", key), value.clone());
            }
        }
        ready(Ok(response.body(Body::empty()).unwrap()))
    }
}

async fn start(
    registry: Arc<MemoryRegistry>,
    server_id: &'static str,
    shutdown: &CancellationToken,
) -> tokio::task::JoinHandle<flare_discovery::Result<()>> {
    let registration = Registration::new("echo", "127.0.0.1", 0)
        .bind(SocketAddr::from(([127, 0, 0, 1], 0)));
    let server: RegisteredServer = bind_and_register(registry, registration).await.unwrap();
    let routes = Routes::new(EchoHeaders { server_id });
    let shutdown = shutdown.clone();
    tokio::spawn(async move { server.serve(routes, &ServerConfig::default(), shutdown).await })
}

fn request() -> http::Request<Body> {
    http::Request::builder()
        .method("POST")
        .uri("http://echo/test.Echo/Say")
        .header("content-type", "application/grpc")
        .header("te", "trailers")
        .body(Body::empty())
        .unwrap()
}

async fn wait_for_addresses(conn: &Connection, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while conn.addresses().len() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("resolver did not deliver addresses");
}

fn header<B>(response: &http::Response<B>, key: &str) -> Option<String> {
    response
        .headers()
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[tokio::test]
async fn calls_are_balanced_round_robin() {
    let registry = Arc::new(MemoryRegistry::new());
    let shutdown = CancellationToken::new();
    let watch_token = CancellationToken::new();
    let _watch = registry.watch(watch_token.clone(), "echo").await.unwrap();
    let first = start(registry.clone(), "a", &shutdown).await;
    let second = start(registry.clone(), "b", &shutdown).await;

    let conn = new_connection("echo", registry.clone(), ConnectionOptions::default())
        .await
        .unwrap();
    wait_for_addresses(&conn, 2).await;

    let mut seen = Vec::new();
    for _ in 0..4 {
        let response = conn.clone().oneshot(request()).await.unwrap();
        seen.push(header(&response, "echo-server").unwrap());
    }
    assert_eq!(seen[0], seen[2]);
    assert_eq!(seen[1], seen[3]);
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 2);

    drop(conn);
    shutdown.cancel();
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert!(registry.get_service_instances("echo").await.unwrap().is_empty());
    watch_token.cancel();
}

#[tokio::test]
async fn call_context_is_propagated() {
    let registry = Arc::new(MemoryRegistry::new());
    let shutdown = CancellationToken::new();
    let server = start(registry.clone(), "a", &shutdown).await;

    let conn = new_connection("echo", registry, ConnectionOptions::default())
        .await
        .unwrap();
    wait_for_addresses(&conn, 1).await;

    let ctx = CallContext::new()
        .with_trace_id("trace-e2e")
        .with_client_ip("192.168.0.7")
        .with_value("user-id", "42")
        .with_value("secret", "not-forwarded");
    let response = ctx
        .scope(conn.clone().oneshot(request()))
        .await
        .unwrap();

    assert_eq!(header(&response, "echo-x-trace-id").as_deref(), Some("trace-e2e"));
    assert_eq!(header(&response, "echo-clientip").as_deref(), Some("192.168.0.7"));
    assert_eq!(header(&response, "echo-user-id").as_deref(), Some("42"));
    assert_eq!(header(&response, "echo-secret"), None);

    // 没有上下文时也会生成 trace ID
    let response = conn.clone().oneshot(request()).await.unwrap();
    assert!(header(&response, "echo-x-trace-id").is_some_and(|id| !id.is_empty()));

    drop(conn);
    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn per_instance_channels_reach_each_server() {
    let registry = Arc::new(MemoryRegistry::new());
    let shutdown = CancellationToken::new();
    let first = start(registry.clone(), "a", &shutdown).await;
    let second = start(registry.clone(), "b", &shutdown).await;

    // 只读缓存，先订阅
    let watch_token = CancellationToken::new();
    let _watch = registry.watch(watch_token.clone(), "echo").await.unwrap();
    let channels = connections_for_all_instances("echo", registry.as_ref(), &ConnectionOptions::default())
        .await
        .unwrap();
    assert_eq!(channels.len(), 2);

    let mut servers = HashSet::new();
    for (_, channel) in channels {
        let response = channel.oneshot(request()).await.unwrap();
        assert!(header(&response, "echo-x-trace-id").is_some());
        servers.insert(header(&response, "echo-server").unwrap());
    }
    assert_eq!(servers.len(), 2);

    watch_token.cancel();
    shutdown.cancel();
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
}

//! etcd 后端集成测试
//!
//! 需要运行中的 etcd，默认忽略：
//! `cargo test --test etcd_registry_test -- --ignored`
//!
//! ```bash
//! docker run -d --name etcd-test -p 2379:2379 quay.io/coreos/etcd:v3.5.9 \
//!   etcd --advertise-client-urls=http://127.0.0.1:2379 \
//!        --listen-client-urls=http://0.0.0.0:2379
//! ```
#![cfg(feature = "etcd")]

use flare_discovery::{
    ConnectionOptions, EtcdOption, EtcdRegistry, Registry, RegistryOption, ServiceInfo,
    ServiceInstance, new_connection, new_registry,
};
use std::sync::Arc;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

/// 可以通过环境变量 ETCD_ENDPOINTS 覆盖
fn etcd_endpoints() -> Vec<String> {
    std::env::var("ETCD_ENDPOINTS")
        .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["http://127.0.0.1:2379".to_string()])
}

fn option() -> EtcdOption {
    let mut option = EtcdOption::new(etcd_endpoints());
    option.key_prefix = format!("/flare-discovery-test-{}", std::process::id());
    option.lease_ttl_secs = 10;
    option
}

async fn wait_for<F>(stream: &mut flare_discovery::InstanceWatch, mut accept: F) -> Vec<ServiceInstance>
where
    F: FnMut(&[ServiceInstance]) -> bool,
{
    timeout(Duration::from_secs(10), async {
        loop {
            let snapshot = stream.recv().await.expect("watch closed");
            if accept(&snapshot) {
                return snapshot;
            }
        }
    })
    .await
    .expect("expected snapshot not observed")
}

#[tokio::test]
#[ignore]
async fn register_watch_unregister() {
    let registry = EtcdRegistry::new(&option()).await.unwrap();
    assert_eq!(registry.name(), "flare-etcd");

    let token = CancellationToken::new();
    let mut stream = registry.watch(token.clone(), "etcd-svc").await.unwrap();
    wait_for(&mut stream, |s| s.is_empty()).await;

    let info = ServiceInfo::new("etcd-svc", "127.0.0.1:7001").with_version("v1");
    registry.register(&info).await.unwrap();
    let snapshot = wait_for(&mut stream, |s| s.len() == 1).await;
    assert_eq!(snapshot[0].address, "127.0.0.1:7001");
    assert_eq!(snapshot[0].metadata.get("version").map(String::as_str), Some("v1"));

    let cached = registry.get_service_instances("etcd-svc").await.unwrap();
    assert_eq!(cached.len(), 1);

    registry.unregister(&info).await.unwrap();
    wait_for(&mut stream, |s| s.is_empty()).await;

    token.cancel();
    let closed = timeout(Duration::from_secs(5), async {
        while stream.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
#[ignore]
async fn reregistration_keeps_single_entry() {
    let registry = EtcdRegistry::new(&option()).await.unwrap();
    let token = CancellationToken::new();
    let mut stream = registry.watch(token.clone(), "etcd-dup").await.unwrap();

    let info = ServiceInfo::new("etcd-dup", "127.0.0.1:7002");
    registry.register(&info).await.unwrap();
    registry.register(&info.clone().with_metadata("weight", "3")).await.unwrap();

    let snapshot = wait_for(&mut stream, |s| {
        s.len() == 1 && s[0].metadata.get("weight").is_some()
    })
    .await;
    assert_eq!(snapshot[0].metadata.get("weight").map(String::as_str), Some("3"));

    registry.unregister(&info).await.unwrap();
    token.cancel();
}

#[tokio::test]
#[ignore]
async fn connection_follows_etcd_membership() {
    let registry = new_registry(Some(&RegistryOption::etcd(option()))).await.unwrap();
    let info = ServiceInfo::new("etcd-conn", "127.0.0.1:7003");
    registry.register(&info).await.unwrap();

    let conn = new_connection("etcd-conn", Arc::clone(&registry), ConnectionOptions::default())
        .await
        .unwrap();
    assert_eq!(conn.target().to_string(), "flare-etcd:///etcd-conn");

    timeout(Duration::from_secs(10), async {
        while conn.addresses().is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();

    registry.unregister(&info).await.unwrap();
}

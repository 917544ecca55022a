//! 内存注册中心集成测试

use flare_discovery::{MemoryRegistry, Registry, ServiceInfo, ServiceInstance};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

async fn next(stream: &mut flare_discovery::InstanceWatch) -> Vec<ServiceInstance> {
    timeout(Duration::from_secs(1), stream.recv())
        .await
        .expect("no snapshot within 1s")
        .expect("stream closed")
}

fn addresses(snapshot: &[ServiceInstance]) -> Vec<&str> {
    snapshot.iter().map(|i| i.address.as_str()).collect()
}

#[tokio::test]
async fn every_watcher_receives_full_snapshots() {
    let registry = MemoryRegistry::new();
    let token = CancellationToken::new();

    let mut first = registry.watch(token.clone(), "svc").await.unwrap();
    let mut second = registry.watch(token.clone(), "svc").await.unwrap();
    assert!(next(&mut first).await.is_empty());
    assert!(next(&mut second).await.is_empty());

    registry.register(&ServiceInfo::new("svc", "10.0.0.1:1")).await.unwrap();
    assert_eq!(addresses(&next(&mut first).await), vec!["10.0.0.1:1"]);
    assert_eq!(addresses(&next(&mut second).await), vec!["10.0.0.1:1"]);

    registry.register(&ServiceInfo::new("svc", "10.0.0.2:1")).await.unwrap();
    assert_eq!(addresses(&next(&mut first).await), vec!["10.0.0.1:1", "10.0.0.2:1"]);
    assert_eq!(addresses(&next(&mut second).await), vec!["10.0.0.1:1", "10.0.0.2:1"]);

    token.cancel();
}

#[tokio::test]
async fn slow_consumer_sees_latest_snapshot() {
    let registry = MemoryRegistry::new();
    let token = CancellationToken::new();
    let mut stream = registry.watch(token.clone(), "svc").await.unwrap();
    assert!(next(&mut stream).await.is_empty());

    for port in 1..=20 {
        registry
            .register(&ServiceInfo::new("svc", format!("10.0.0.1:{}", port)))
            .await
            .unwrap();
    }

    let snapshot = next(&mut stream).await;
    assert_eq!(snapshot.len(), 20);
    token.cancel();
}

#[tokio::test]
async fn watch_on_existing_service_starts_with_members() {
    let registry = MemoryRegistry::new();
    registry
        .register(&ServiceInfo::new("svc", "10.0.0.1:1").with_version("v2"))
        .await
        .unwrap();

    let mut stream = registry.watch(CancellationToken::new(), "svc").await.unwrap();
    let snapshot = next(&mut stream).await;
    assert_eq!(addresses(&snapshot), vec!["10.0.0.1:1"]);
    assert_eq!(snapshot[0].metadata.get("version").map(String::as_str), Some("v2"));
}

#[tokio::test]
async fn reregistration_replaces_previous_data() {
    let registry = MemoryRegistry::new();
    let token = CancellationToken::new();
    let _watch = registry.watch(token.clone(), "svc").await.unwrap();
    registry
        .register(&ServiceInfo::new("svc", "10.0.0.1:1").with_metadata("weight", "1"))
        .await
        .unwrap();
    registry
        .register(&ServiceInfo::new("svc", "10.0.0.1:1").with_metadata("weight", "5"))
        .await
        .unwrap();

    let instances = registry.get_service_instances("svc").await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].metadata.get("weight").map(String::as_str), Some("5"));

    token.cancel();
}

#[tokio::test]
async fn services_are_isolated() {
    let registry = MemoryRegistry::new();
    let token = CancellationToken::new();
    let mut other = registry.watch(token.clone(), "other").await.unwrap();
    assert!(next(&mut other).await.is_empty());

    registry.register(&ServiceInfo::new("svc", "10.0.0.1:1")).await.unwrap();
    assert!(timeout(Duration::from_millis(100), other.recv()).await.is_err());
    assert!(registry.get_service_instances("other").await.unwrap().is_empty());

    token.cancel();
}

#[tokio::test]
async fn unregistering_unknown_instance_is_ok() {
    let registry = MemoryRegistry::new();
    tokio_test::assert_ok!(registry.unregister(&ServiceInfo::new("svc", "10.0.0.9:1")).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_are_all_visible() {
    const TASKS: usize = 64;
    let registry = MemoryRegistry::new();
    let token = CancellationToken::new();
    let mut stream = registry.watch(token.clone(), "svc").await.unwrap();
    assert!(next(&mut stream).await.is_empty());

    let handles: Vec<_> = (0..TASKS)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .register(&ServiceInfo::new("svc", format!("10.0.{}.{}:80", i / 256, i % 256)))
                    .await
            })
        })
        .collect();
    for handle in handles {
        tokio_test::assert_ok!(handle.await.unwrap());
    }

    // 中间快照可能被合并，最新一次必须包含全部实例
    let snapshot = next(&mut stream).await;
    let mut seen = addresses(&snapshot);
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), TASKS);
    assert_eq!(registry.get_service_instances("svc").await.unwrap().len(), TASKS);

    token.cancel();
}

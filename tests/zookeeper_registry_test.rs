//! ZooKeeper 后端集成测试
//!
//! 需要运行中的 ZooKeeper，默认忽略：
//! `cargo test --test zookeeper_registry_test -- --ignored`
//!
//! ```bash
//! docker run -d --name zk-test -p 2181:2181 zookeeper:3.9
//! ```
#![cfg(feature = "zookeeper")]

use flare_discovery::{Registry, ServiceInfo, ServiceInstance, ZkOption, ZkRegistry};
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

/// 可以通过环境变量 ZK_SERVERS 覆盖
fn zk_servers() -> Vec<String> {
    std::env::var("ZK_SERVERS")
        .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["127.0.0.1:2181".to_string()])
}

fn option() -> ZkOption {
    ZkOption::new(
        zk_servers(),
        format!("/flare-discovery-test-{}", std::process::id()),
    )
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
    let registry = ZkRegistry::new(&option()).await.unwrap();
    assert_eq!(registry.name(), "flare-zookeeper");

    let token = CancellationToken::new();
    let mut stream = registry.watch(token.clone(), "zk-svc").await.unwrap();
    wait_for(&mut stream, |s| s.is_empty()).await;

    let info = ServiceInfo::new("zk-svc", "127.0.0.1:8001").with_metadata("zone", "b");
    registry.register(&info).await.unwrap();
    let snapshot = wait_for(&mut stream, |s| s.len() == 1).await;
    assert_eq!(snapshot[0].address, "127.0.0.1:8001");
    assert_eq!(snapshot[0].metadata.get("zone").map(String::as_str), Some("b"));
    assert_eq!(registry.get_service_instances("zk-svc").await.unwrap().len(), 1);

    registry.unregister(&info).await.unwrap();
    wait_for(&mut stream, |s| s.is_empty()).await;

    token.cancel();
}

#[tokio::test]
#[ignore]
async fn unregister_missing_node_is_ok() {
    let registry = ZkRegistry::new(&option()).await.unwrap();
    registry
        .unregister(&ServiceInfo::new("zk-svc", "127.0.0.1:8999"))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn unreachable_servers_fail_construction() {
    let mut option = ZkOption::new(vec!["127.0.0.1:1".to_string()], "/flare-discovery");
    option.timeout_secs = 1;
    assert!(ZkRegistry::new(&option).await.is_err());
}

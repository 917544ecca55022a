//! ZooKeeper 服务注册发现实现
//!
//! 每个实例是 `{root}/{service}/{address}` 下的临时节点，会话结束时自动消失。
//! watch 使用一次性子节点监听，每次触发后重新拉取全量；出错后固定间隔重试。

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zookeeper_client as zk;

use super::trait_def::Registry;
use super::watch::{InstanceWatch, SnapshotCache, SnapshotPublisher};
use crate::config::ZkOption;
use crate::error::{DiscoveryError, Result};
use crate::retry::{FixedRetryPolicy, RetryPolicy};
use crate::types::{ServiceInfo, ServiceInstance};

pub const ZOOKEEPER_SCHEME: &str = "flare-zookeeper";

/// ZooKeeper 服务注册发现
pub struct ZkRegistry {
    shared: Arc<ZkShared>,
    scheme: String,
}

struct ZkShared {
    client: RwLock<zk::Client>,
    cluster: String,
    timeout: Duration,
    root_path: String,
    cache: SnapshotCache,
    retry: FixedRetryPolicy,
}

async fn connect(cluster: &str, timeout: Duration) -> Result<zk::Client> {
    match tokio::time::timeout(timeout, zk::Client::connect(cluster)).await {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(e)) => Err(DiscoveryError::connection_failed(format!(
            "Failed to connect to ZooKeeper: {}",
            e
        ))),
        Err(_) => Err(DiscoveryError::connection_failed(format!(
            "Timed out connecting to ZooKeeper after {:?}",
            timeout
        ))),
    }
}

impl ZkRegistry {
    pub async fn new(option: &ZkOption) -> Result<Self> {
        if option.servers.is_empty() {
            return Err(DiscoveryError::config("zookeeper servers not configured"));
        }
        let root_path = normalize_root(&option.root_path)?;
        let cluster = option.servers.join(",");
        let client = connect(&cluster, option.timeout()).await?;

        let shared = Arc::new(ZkShared {
            client: RwLock::new(client),
            cluster,
            timeout: option.timeout(),
            root_path,
            cache: SnapshotCache::default(),
            retry: FixedRetryPolicy::default(),
        });

        // 初始化根路径
        shared.ensure_path(&shared.root_path).await?;
        info!(servers = ?option.servers, root = %shared.root_path, "Connected to ZooKeeper");

        Ok(Self {
            shared,
            scheme: option
                .scheme
                .clone()
                .unwrap_or_else(|| ZOOKEEPER_SCHEME.to_string()),
        })
    }
}

impl ZkShared {
    async fn client(&self) -> zk::Client {
        self.client.read().await.clone()
    }

    fn service_path(&self, service_name: &str) -> String {
        format!("{}/{}", self.root_path, service_name.trim_matches('/'))
    }

    fn node_path(&self, info: &ServiceInfo) -> String {
        format!("{}/{}", self.service_path(&info.name), info.address)
    }

    /// 逐级创建持久节点，已存在的忽略
    async fn ensure_path(&self, path: &str) -> Result<()> {
        let client = self.client().await;
        let options = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());

        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            match client.create(&current, &[], &options).await {
                Ok(_) | Err(zk::Error::NodeExists) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// 会话过期后客户端不可再用，重新建立连接
    async fn reconnect(&self) {
        match connect(&self.cluster, self.timeout).await {
            Ok(client) => {
                *self.client.write().await = client;
                info!(cluster = %self.cluster, "Reconnected to ZooKeeper with a new session");
            }
            Err(e) => warn!(error = %e, "ZooKeeper reconnect failed"),
        }
    }

    /// 拉取全量子节点并注册一次性监听
    async fn load(&self, service_name: &str) -> Result<(Vec<ServiceInstance>, zk::OneshotWatcher)> {
        let path = self.service_path(service_name);
        self.ensure_path(&path).await?;

        let client = self.client().await;
        let (mut children, watcher) = client.list_and_watch_children(&path).await?;
        children.sort();

        let mut instances = Vec::with_capacity(children.len());
        for child in children {
            match client.get_data(&format!("{}/{}", path, child)).await {
                Ok((data, _)) => instances.push(decode_node(&child, &data)),
                // 节点在列举和读取之间消失
                Err(zk::Error::NoNode) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok((instances, watcher))
    }
}

/// 节点数据优先按 JSON 解析，兼容只写入地址字符串的节点
fn decode_node(child: &str, data: &[u8]) -> ServiceInstance {
    if let Ok(info) = serde_json::from_slice::<ServiceInfo>(data) {
        return info.to_instance();
    }
    match std::str::from_utf8(data) {
        Ok(address) if !address.trim().is_empty() => ServiceInstance::new(address.trim()),
        _ => ServiceInstance::new(child),
    }
}

fn normalize_root(root: &str) -> Result<String> {
    let trimmed = root.trim().trim_end_matches('/');
    if trimmed.is_empty() || !trimmed.starts_with('/') {
        return Err(DiscoveryError::config(format!(
            "zookeeper root path must be absolute, got `{}`",
            root
        )));
    }
    Ok(trimmed.to_string())
}

#[async_trait]
impl Registry for ZkRegistry {
    async fn register(&self, info: &ServiceInfo) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_path(&shared.service_path(&info.name)).await?;

        let path = shared.node_path(info);
        let data = serde_json::to_vec(info)?;
        let client = shared.client().await;

        if client.check_stat(&path).await?.is_some() {
            match client.delete(&path, None).await {
                Ok(()) | Err(zk::Error::NoNode) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let options = zk::CreateMode::Ephemeral.with_acls(zk::Acls::anyone_all());
        client.create(&path, &data, &options).await?;

        info!(service = %info.name, address = %info.address, "Service registered in ZooKeeper");
        Ok(())
    }

    async fn unregister(&self, info: &ServiceInfo) -> Result<()> {
        let path = self.shared.node_path(info);
        match self.shared.client().await.delete(&path, None).await {
            Ok(()) | Err(zk::Error::NoNode) => {
                info!(service = %info.name, address = %info.address, "Service unregistered from ZooKeeper");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn watch(&self, token: CancellationToken, service_name: &str) -> Result<InstanceWatch> {
        let (publisher, stream) = InstanceWatch::pending();
        tokio::spawn(watch_loop(
            self.shared.clone(),
            service_name.to_string(),
            token,
            publisher,
        ));
        Ok(stream)
    }

    fn name(&self) -> &str {
        &self.scheme
    }

    async fn get_service_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        Ok(self.shared.cache.get(service_name).await)
    }
}

async fn watch_loop(
    shared: Arc<ZkShared>,
    service_name: String,
    token: CancellationToken,
    publisher: SnapshotPublisher,
) {
    let mut attempt: u32 = 0;

    loop {
        match shared.load(&service_name).await {
            Ok((snapshot, watcher)) => {
                attempt = 0;
                debug!(service = %service_name, instances = snapshot.len(), "ZooKeeper snapshot synced");
                shared.cache.store(&service_name, snapshot.clone()).await;
                publisher.publish(snapshot);

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = publisher.closed() => break,
                    event = watcher.changed() => {
                        debug!(service = %service_name, event = ?event.event_type, "ZooKeeper children changed");
                    }
                }
            }
            Err(e) => {
                warn!(service = %service_name, error = %e, attempt, "ZooKeeper watch failed, retrying");
                if matches!(e, DiscoveryError::ZooKeeper(zk::Error::SessionExpired)) {
                    shared.reconnect().await;
                }

                if !shared.retry.should_retry(attempt) {
                    error!(service = %service_name, attempt, "ZooKeeper watch retries exhausted");
                    break;
                }
                let delay = shared.retry.backoff_duration(attempt);
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = publisher.closed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    debug!(service = %service_name, "ZooKeeper watch stopped");
}

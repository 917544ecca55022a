//! etcd 服务注册发现实现
//!
//! 实例以 JSON 形式写在 `{prefix}/{service}/{address}` 下并绑定租约，
//! 后台任务按 TTL/3 续约。watch 先建立前缀监听再全量拉取，出错后按指数退避重建。

use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions,
    WatchOptions,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::trait_def::Registry;
use super::watch::{InstanceWatch, SnapshotCache, SnapshotPublisher, decode_snapshot};
use crate::config::EtcdOption;
use crate::error::{DiscoveryError, Result};
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use crate::types::{ServiceInfo, ServiceInstance};

pub const ETCD_SCHEME: &str = "flare-etcd";

/// 已注册实例持有的租约
struct LeaseHandle {
    lease_id: i64,
    keep_alive: CancellationToken,
}

/// etcd 服务注册发现
pub struct EtcdRegistry {
    client: Client,
    scheme: String,
    key_prefix: String,
    lease_ttl: i64,
    cache: SnapshotCache,
    leases: Arc<Mutex<HashMap<String, LeaseHandle>>>,
    retry: ExponentialBackoffPolicy,
    shutdown: CancellationToken,
}

impl EtcdRegistry {
    pub async fn new(option: &EtcdOption) -> Result<Self> {
        if option.endpoints.is_empty() {
            return Err(DiscoveryError::config("etcd endpoints not configured"));
        }

        let mut connect = ConnectOptions::new().with_connect_timeout(option.dial_timeout());
        if let (Some(user), Some(password)) = (&option.username, &option.password) {
            connect = connect.with_user(user.clone(), password.clone());
        }

        let client = Client::connect(&option.endpoints, Some(connect))
            .await
            .map_err(|e| DiscoveryError::connection_failed(format!("Failed to connect to etcd: {}", e)))?;

        info!(endpoints = ?option.endpoints, "Connected to etcd");

        Ok(Self {
            client,
            scheme: option.scheme.clone().unwrap_or_else(|| ETCD_SCHEME.to_string()),
            key_prefix: option.key_prefix.trim_end_matches('/').to_string(),
            lease_ttl: option.lease_ttl_secs.max(1),
            cache: SnapshotCache::default(),
            leases: Arc::new(Mutex::new(HashMap::new())),
            retry: ExponentialBackoffPolicy::default(),
            shutdown: CancellationToken::new(),
        })
    }

    fn service_prefix(&self, service_name: &str) -> String {
        format!("{}/{}/", self.key_prefix, service_name)
    }

    fn service_key(&self, info: &ServiceInfo) -> String {
        format!("{}{}", self.service_prefix(&info.name), info.address)
    }
}

#[async_trait]
impl Registry for EtcdRegistry {
    async fn register(&self, info: &ServiceInfo) -> Result<()> {
        let key = self.service_key(info);
        let mut client = self.client.clone();

        let lease_id = client.lease_grant(self.lease_ttl, None).await?.id();

        let mut stored = info.clone();
        stored.lease_id = lease_id;
        let value = match serde_json::to_string(&stored) {
            Ok(value) => value,
            Err(e) => {
                let _ = client.lease_revoke(lease_id).await;
                return Err(e.into());
            }
        };

        if let Err(e) = client
            .put(key.clone(), value, Some(PutOptions::new().with_lease(lease_id)))
            .await
        {
            let _ = client.lease_revoke(lease_id).await;
            return Err(e.into());
        }

        let (keeper, stream) = match client.lease_keep_alive(lease_id).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = client.delete(key.clone(), None).await;
                let _ = client.lease_revoke(lease_id).await;
                return Err(e.into());
            }
        };

        let keep_alive = self.shutdown.child_token();
        tokio::spawn(keep_alive_loop(
            client.clone(),
            key.clone(),
            lease_id,
            self.lease_ttl,
            keeper,
            stream,
            keep_alive.clone(),
        ));

        let previous = self.leases.lock().await.insert(
            key.clone(),
            LeaseHandle {
                lease_id,
                keep_alive,
            },
        );
        // 覆盖注册：停止旧续约并回收旧租约（key 已绑定新租约）
        if let Some(previous) = previous {
            previous.keep_alive.cancel();
            if let Err(e) = client.lease_revoke(previous.lease_id).await {
                debug!(lease_id = previous.lease_id, error = %e, "Failed to revoke replaced lease");
            }
        }

        info!(
            service = %info.name,
            address = %info.address,
            lease_id,
            "Service registered in etcd"
        );
        Ok(())
    }

    async fn unregister(&self, info: &ServiceInfo) -> Result<()> {
        let key = self.service_key(info);
        let mut client = self.client.clone();

        let handle = self.leases.lock().await.remove(&key);
        if let Some(handle) = &handle {
            handle.keep_alive.cancel();
        }

        let result = client.delete(key, None).await;

        let lease_id = handle
            .map(|h| h.lease_id)
            .or((info.lease_id != 0).then_some(info.lease_id));
        if let Some(lease_id) = lease_id {
            if let Err(e) = client.lease_revoke(lease_id).await {
                debug!(lease_id, error = %e, "Lease revoke failed");
            }
        }

        result?;
        info!(service = %info.name, address = %info.address, "Service unregistered from etcd");
        Ok(())
    }

    async fn watch(&self, token: CancellationToken, service_name: &str) -> Result<InstanceWatch> {
        let (publisher, stream) = InstanceWatch::pending();

        let task = WatchTask {
            client: self.client.clone(),
            prefix: self.service_prefix(service_name),
            service_name: service_name.to_string(),
            cache: self.cache.clone(),
            retry: self.retry.clone(),
            token,
            publisher,
        };
        tokio::spawn(task.run());

        Ok(stream)
    }

    fn name(&self) -> &str {
        &self.scheme
    }

    async fn get_service_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        Ok(self.cache.get(service_name).await)
    }
}

impl Drop for EtcdRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// 租约续约循环
///
/// 续约失败或续约流关闭时删除 key 并回收租约后退出；被取消时直接退出。
async fn keep_alive_loop(
    mut client: Client,
    key: String,
    lease_id: i64,
    ttl: i64,
    mut keeper: LeaseKeeper,
    mut stream: LeaseKeepAliveStream,
    cancel: CancellationToken,
) {
    let interval = Duration::from_secs((ttl / 3).max(1) as u64);

    loop {
        let alive = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(lease_id, "Lease keep-alive stopped");
                return;
            }
            alive = async {
                tokio::time::sleep(interval).await;
                renew(&mut keeper, &mut stream, lease_id).await
            } => alive,
        };

        if !alive {
            if cancel.is_cancelled() {
                return;
            }
            error!(lease_id, key = %key, "Lease keep-alive lost, removing registration");
            let _ = client.delete(key.clone(), None).await;
            let _ = client.lease_revoke(lease_id).await;
            return;
        }
    }
}

async fn renew(keeper: &mut LeaseKeeper, stream: &mut LeaseKeepAliveStream, lease_id: i64) -> bool {
    if let Err(e) = keeper.keep_alive().await {
        warn!(lease_id, error = %e, "Lease keep-alive request failed");
        return false;
    }
    match stream.message().await {
        Ok(Some(resp)) => {
            debug!(lease_id, ttl = resp.ttl(), "Lease keep-alive successful");
            resp.ttl() > 0
        }
        Ok(None) => {
            warn!(lease_id, "Lease keep-alive stream closed");
            false
        }
        Err(e) => {
            warn!(lease_id, error = %e, "Lease keep-alive stream error");
            false
        }
    }
}

/// 单个订阅的 watch 任务
struct WatchTask {
    client: Client,
    prefix: String,
    service_name: String,
    cache: SnapshotCache,
    retry: ExponentialBackoffPolicy,
    token: CancellationToken,
    publisher: SnapshotPublisher,
}

impl WatchTask {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            match self.sync_and_watch(&mut attempt).await {
                Ok(()) => break,
                Err(e) => warn!(
                    service = %self.service_name,
                    error = %e,
                    attempt,
                    "etcd watch interrupted, resyncing after backoff"
                ),
            }

            if !self.retry.should_retry(attempt) {
                error!(service = %self.service_name, attempt, "etcd watch retries exhausted");
                break;
            }
            let delay = self.retry.backoff_duration(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = self.publisher.closed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(service = %self.service_name, "etcd watch stopped");
    }

    /// 建立监听、全量同步并持续推送；正常返回表示订阅结束
    async fn sync_and_watch(&mut self, attempt: &mut u32) -> Result<()> {
        // 先建立监听再拉取全量，两者之间的变更不会丢失
        let (mut watcher, mut stream) = self
            .client
            .watch(self.prefix.clone(), Some(WatchOptions::new().with_prefix()))
            .await?;

        self.resync().await?;
        *attempt = 0;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    let _ = watcher.cancel().await;
                    return Ok(());
                }
                _ = self.publisher.closed() => {
                    let _ = watcher.cancel().await;
                    return Ok(());
                }
                message = stream.message() => match message? {
                    Some(resp) => {
                        if resp.canceled() {
                            return Err(DiscoveryError::connection_failed("watch canceled by etcd"));
                        }
                        if !resp.events().is_empty() {
                            self.resync().await?;
                        }
                    }
                    None => {
                        return Err(DiscoveryError::connection_failed("watch stream closed"));
                    }
                },
            }
        }
    }

    async fn resync(&mut self) -> Result<()> {
        let resp = self
            .client
            .get(self.prefix.clone(), Some(GetOptions::new().with_prefix()))
            .await?;
        let snapshot = decode_snapshot(resp.kvs().iter().map(|kv| kv.value()));

        debug!(service = %self.service_name, instances = snapshot.len(), "etcd snapshot synced");
        self.cache.store(&self.service_name, snapshot.clone()).await;
        self.publisher.publish(snapshot);
        Ok(())
    }
}

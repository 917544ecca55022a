//! 内存注册中心
//!
//! 进程内的服务表，适合单进程部署和测试。也是未配置注册中心时的默认后端。
//! 与网络后端一致，`get_service_instances` 只返回 watch 推送过的快照。

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::trait_def::Registry;
use super::watch::{InstanceWatch, SnapshotPublisher};
use crate::error::{DiscoveryError, Result};
use crate::types::{ServiceInfo, ServiceInstance};

pub const MEMORY_SCHEME: &str = "memory";

/// 内存注册中心
///
/// 服务表和订阅者列表由同一把锁保护；每次注册/注销后重新计算快照并
/// 非阻塞地推送给所有订阅者。
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<MemoryState>>,
    next_subscriber: Arc<AtomicU64>,
}

#[derive(Default)]
struct MemoryState {
    // serviceName -> address -> info
    services: HashMap<String, BTreeMap<String, ServiceInfo>>,
    watchers: HashMap<String, Vec<Subscriber>>,
    // 最近一次推送给订阅者的快照
    cache: HashMap<String, Vec<ServiceInstance>>,
}

struct Subscriber {
    id: u64,
    publisher: Arc<SnapshotPublisher>,
}

impl MemoryState {
    fn snapshot(&self, service_name: &str) -> Vec<ServiceInstance> {
        self.services
            .get(service_name)
            .map(|by_address| by_address.values().map(ServiceInfo::to_instance).collect())
            .unwrap_or_default()
    }

    fn notify_watchers(&mut self, service_name: &str) {
        if !self.watchers.contains_key(service_name) {
            return;
        }
        let snapshot = self.snapshot(service_name);
        let Some(subscribers) = self.watchers.get_mut(service_name) else {
            return;
        };

        // 订阅端已释放的直接移除
        subscribers.retain(|sub| sub.publisher.publish(snapshot.clone()));
        if !subscribers.is_empty() {
            self.cache.insert(service_name.to_string(), snapshot);
        }
    }

    fn remove_subscriber(&mut self, service_name: &str, id: u64) {
        if let Some(subscribers) = self.watchers.get_mut(service_name) {
            subscribers.retain(|sub| sub.id != id);
            if subscribers.is_empty() {
                self.watchers.remove(service_name);
            }
        }
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 当前订阅某服务的 watcher 数量
    pub fn watcher_count(&self, service_name: &str) -> usize {
        self.lock()
            .watchers
            .get(service_name)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn validate(info: &ServiceInfo) -> Result<()> {
    if info.name.is_empty() {
        return Err(DiscoveryError::config("service name must not be empty"));
    }
    if info.address.is_empty() {
        return Err(DiscoveryError::config("service address must not be empty"));
    }
    Ok(())
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, info: &ServiceInfo) -> Result<()> {
        validate(info)?;

        let mut state = self.lock();
        state
            .services
            .entry(info.name.clone())
            .or_default()
            .insert(info.address.clone(), info.clone());
        state.notify_watchers(&info.name);
        drop(state);

        info!(service = %info.name, address = %info.address, "Service registered in memory registry");
        Ok(())
    }

    async fn unregister(&self, info: &ServiceInfo) -> Result<()> {
        let mut state = self.lock();
        if let Some(by_address) = state.services.get_mut(&info.name) {
            by_address.remove(&info.address);
            if by_address.is_empty() {
                state.services.remove(&info.name);
            }
        }
        state.notify_watchers(&info.name);
        drop(state);

        info!(service = %info.name, address = %info.address, "Service unregistered from memory registry");
        Ok(())
    }

    async fn watch(&self, token: CancellationToken, service_name: &str) -> Result<InstanceWatch> {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);

        let (publisher, stream) = {
            let mut state = self.lock();
            // 首次推送当前实例列表（可能为空）
            let snapshot = state.snapshot(service_name);
            state.cache.insert(service_name.to_string(), snapshot.clone());
            let (publisher, stream) = InstanceWatch::with_initial(snapshot);
            let publisher = Arc::new(publisher);
            state
                .watchers
                .entry(service_name.to_string())
                .or_default()
                .push(Subscriber {
                    id,
                    publisher: publisher.clone(),
                });
            (publisher, stream)
        };

        // token 取消或订阅端释放后移除 watcher，最后一个发布端引用随任务结束释放，流随之关闭
        let registry = self.clone();
        let service_name = service_name.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = publisher.closed() => {}
            }
            registry.lock().remove_subscriber(&service_name, id);
            debug!(service = %service_name, subscriber = id, "Memory watcher removed");
        });

        Ok(stream)
    }

    fn name(&self) -> &str {
        MEMORY_SCHEME
    }

    async fn get_service_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        Ok(self
            .lock()
            .cache
            .get(service_name)
            .cloned()
            .unwrap_or_default())
    }
}

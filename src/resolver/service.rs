//! 基于注册中心的 resolver

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Address, BuildOptions, ClientConnHandle, Resolver, ResolverBuilder, ResolverState, Target};
use crate::error::Result;
use crate::registry::{InstanceWatch, Registry};

/// 创建 resolver builder，不做任何全局注册
pub fn new_builder(registry: Arc<dyn Registry>) -> ServiceResolverBuilder {
    ServiceResolverBuilder::new(registry)
}

/// 基于注册中心的 resolver builder
///
/// scheme 即注册中心的 `name()`。
#[derive(Clone)]
pub struct ServiceResolverBuilder {
    registry: Arc<dyn Registry>,
}

impl ServiceResolverBuilder {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// 与 [`ResolverBuilder::build`] 相同，但返回具体类型
    pub async fn build_resolver(
        &self,
        target: &Target,
        conn: Arc<dyn ClientConnHandle>,
        options: BuildOptions,
    ) -> Result<ServiceResolver> {
        let token = options
            .parent_token
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();

        let service_name = target.endpoint.clone();
        let stream = match self.registry.watch(token.clone(), &service_name).await {
            Ok(stream) => stream,
            Err(e) => {
                token.cancel();
                return Err(e);
            }
        };

        let addresses = Arc::new(RwLock::new(Vec::new()));
        let task = tokio::spawn(watch_loop(
            service_name.clone(),
            stream,
            conn,
            addresses.clone(),
            token.clone(),
        ));

        info!(target = %target, "Resolver built");

        Ok(ServiceResolver {
            service_name,
            token,
            addresses,
            task: Mutex::new(Some(task)),
        })
    }
}

#[async_trait]
impl ResolverBuilder for ServiceResolverBuilder {
    async fn build(
        &self,
        target: &Target,
        conn: Arc<dyn ClientConnHandle>,
        options: BuildOptions,
    ) -> Result<Box<dyn Resolver>> {
        let resolver = self.build_resolver(target, conn, options).await?;
        Ok(Box::new(resolver))
    }

    fn scheme(&self) -> &str {
        self.registry.name()
    }
}

/// 单个服务名的 resolver
///
/// 持有一个 watch 订阅和一个后台 watch 循环，两者绑定到同一个取消令牌。
pub struct ServiceResolver {
    service_name: String,
    token: CancellationToken,
    addresses: Arc<RwLock<Vec<Address>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceResolver {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// 最近一次推送的地址列表
    pub async fn addresses(&self) -> Vec<Address> {
        self.addresses.read().await.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 关闭并等待 watch 循环退出
    pub async fn shutdown(&self) {
        self.token.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Resolver for ServiceResolver {
    fn resolve_now(&self) {
        // watch 流本身是推送式的
        debug!(service = %self.service_name, "resolve_now ignored");
    }

    fn close(&self) {
        if !self.token.is_cancelled() {
            debug!(service = %self.service_name, "Resolver closed");
        }
        self.token.cancel();
    }
}

impl Drop for ServiceResolver {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn watch_loop(
    service_name: String,
    mut stream: InstanceWatch,
    conn: Arc<dyn ClientConnHandle>,
    addresses: Arc<RwLock<Vec<Address>>>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            snapshot = stream.recv() => {
                let Some(instances) = snapshot else {
                    debug!(service = %service_name, "Registry stream closed");
                    break;
                };

                let resolved: Vec<Address> = instances.iter().map(Address::from).collect();
                *addresses.write().await = resolved.clone();

                debug!(service = %service_name, addresses = resolved.len(), "Pushing resolver state");
                if let Err(e) = conn.update_state(ResolverState::new(resolved)).await {
                    warn!(service = %service_name, error = %e, "Failed to update connection state");
                }
            }
        }
    }

    debug!(service = %service_name, "Resolver watch loop stopped");
}

//! 注册中心工厂
//!
//! 按配置选择并构造一个后端

use std::sync::Arc;
use tracing::info;

use super::memory::MemoryRegistry;
use super::trait_def::Registry;
use crate::config::{RegistryKind, RegistryOption};
use crate::error::{DiscoveryError, Result};

/// 根据配置创建注册中心，未提供配置时使用内存后端
///
/// 显式选择了 etcd / ZooKeeper 却缺少对应子配置时返回配置错误，
/// 不会悄悄退回到内存后端。
pub async fn new_registry(option: Option<&RegistryOption>) -> Result<Arc<dyn Registry>> {
    let Some(option) = option else {
        info!("No registry configured, using memory registry");
        return Ok(Arc::new(MemoryRegistry::new()));
    };

    match option.kind {
        RegistryKind::Memory => Ok(Arc::new(MemoryRegistry::new())),
        RegistryKind::Etcd => {
            let etcd = option.etcd.as_ref().ok_or_else(|| {
                DiscoveryError::config("registry type `etcd` requires an etcd section")
            })?;
            build_etcd(etcd).await
        }
        RegistryKind::Zookeeper => {
            let zookeeper = option.zookeeper.as_ref().ok_or_else(|| {
                DiscoveryError::config("registry type `zookeeper` requires a zookeeper section")
            })?;
            build_zookeeper(zookeeper).await
        }
    }
}

#[cfg(feature = "etcd")]
async fn build_etcd(option: &crate::config::EtcdOption) -> Result<Arc<dyn Registry>> {
    let registry = super::etcd::EtcdRegistry::new(option).await?;
    Ok(Arc::new(registry))
}

#[cfg(not(feature = "etcd"))]
async fn build_etcd(_option: &crate::config::EtcdOption) -> Result<Arc<dyn Registry>> {
    Err(DiscoveryError::config("etcd support is not enabled (feature `etcd`)"))
}

#[cfg(feature = "zookeeper")]
async fn build_zookeeper(option: &crate::config::ZkOption) -> Result<Arc<dyn Registry>> {
    let registry = super::zookeeper::ZkRegistry::new(option).await?;
    Ok(Arc::new(registry))
}

#[cfg(not(feature = "zookeeper"))]
async fn build_zookeeper(_option: &crate::config::ZkOption) -> Result<Arc<dyn Registry>> {
    Err(DiscoveryError::config("zookeeper support is not enabled (feature `zookeeper`)"))
}

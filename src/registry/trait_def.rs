//! 服务注册发现 Trait 定义

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::watch::InstanceWatch;
use crate::error::Result;
use crate::types::{ServiceInfo, ServiceInstance};

/// 服务注册发现 Trait
///
/// 所有后端（memory、etcd、ZooKeeper）都实现这个 trait，通过
/// `Arc<dyn Registry>` 动态分发。
#[async_trait]
pub trait Registry: Send + Sync {
    /// 注册服务实例
    ///
    /// 相同 (name, address) 重复注册会覆盖之前的数据。
    async fn register(&self, info: &ServiceInfo) -> Result<()>;

    /// 注销服务实例
    async fn unregister(&self, info: &ServiceInfo) -> Result<()>;

    /// 监听服务成员变化
    ///
    /// 返回的流每次携带完整快照（不是增量），订阅后至少推送一次。
    /// 取消 `token` 会结束后台任务并关闭流。
    async fn watch(&self, token: CancellationToken, service_name: &str) -> Result<InstanceWatch>;

    /// resolver scheme，同时作为 RPC 目标地址的 scheme
    fn name(&self) -> &str;

    /// 读取本地缓存的实例列表，不会访问网络
    async fn get_service_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>>;
}

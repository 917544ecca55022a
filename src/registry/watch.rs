//! 快照流与快照缓存

use futures::Stream;
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{RwLock, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::types::{ServiceInfo, ServiceInstance};

/// 服务实例快照流
///
/// 每个订阅者一个单槽位的“最新值”通道：消费者处理不过来时，
/// 中间状态会被新的快照覆盖，但总能收到最新的成员集合。
/// 发送端释放后流结束。
pub struct InstanceWatch {
    inner: WatchStream<Vec<ServiceInstance>>,
}

impl InstanceWatch {
    /// 创建立即携带初始快照的流
    pub(crate) fn with_initial(initial: Vec<ServiceInstance>) -> (SnapshotPublisher, Self) {
        let (tx, rx) = watch::channel(initial);
        (
            SnapshotPublisher { tx },
            Self {
                inner: WatchStream::new(rx),
            },
        )
    }

    /// 创建只在第一次发布后才产生数据的流
    pub(crate) fn pending() -> (SnapshotPublisher, Self) {
        let (tx, rx) = watch::channel(Vec::new());
        (
            SnapshotPublisher { tx },
            Self {
                inner: WatchStream::from_changes(rx),
            },
        )
    }

    /// 接收下一个快照，流关闭后返回 `None`
    pub async fn recv(&mut self) -> Option<Vec<ServiceInstance>> {
        self.inner.next().await
    }
}

impl Stream for InstanceWatch {
    type Item = Vec<ServiceInstance>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// 快照发布端
#[derive(Debug)]
pub(crate) struct SnapshotPublisher {
    tx: watch::Sender<Vec<ServiceInstance>>,
}

impl SnapshotPublisher {
    /// 发布快照，订阅者已经离开时返回 `false`
    pub(crate) fn publish(&self, snapshot: Vec<ServiceInstance>) -> bool {
        self.tx.send(snapshot).is_ok()
    }

    /// 等待订阅者释放流
    pub(crate) async fn closed(&self) {
        self.tx.closed().await
    }
}

/// 网络后端的最近快照缓存
///
/// 只由 watch 任务写入，由 `get_service_instances` 读取。
#[derive(Debug, Clone, Default)]
pub(crate) struct SnapshotCache {
    inner: Arc<RwLock<HashMap<String, Vec<ServiceInstance>>>>,
}

impl SnapshotCache {
    pub(crate) async fn store(&self, service_name: &str, snapshot: Vec<ServiceInstance>) {
        self.inner
            .write()
            .await
            .insert(service_name.to_string(), snapshot);
    }

    pub(crate) async fn get(&self, service_name: &str) -> Vec<ServiceInstance> {
        self.inner
            .read()
            .await
            .get(service_name)
            .cloned()
            .unwrap_or_default()
    }
}

/// 将存储中的 JSON 值解码为快照
///
/// 无法解析的值被跳过，同一地址只保留一个实例，结果按地址排序。
pub(crate) fn decode_snapshot<'a, I>(values: I) -> Vec<ServiceInstance>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut by_address = BTreeMap::new();
    for value in values {
        match serde_json::from_slice::<ServiceInfo>(value) {
            Ok(info) => {
                by_address
                    .entry(info.address.clone())
                    .or_insert_with(|| info.to_instance());
            }
            Err(e) => debug!(error = %e, "Skipping undecodable service entry"),
        }
    }
    by_address.into_values().collect()
}

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tonic::transport::Channel;
use tracing::{debug, warn};

use super::ConnectionOptions;
use crate::error::Result;
use crate::resolver::{ClientConnHandle, ResolverState};

/// 轮询负载均衡的通道集合
///
/// 每个地址一个惰性连接的 tonic `Channel`。resolver 推送新地址集合时，
/// 未变化的地址复用原有通道，新增地址建立新通道，移除的地址直接丢弃。
#[derive(Clone)]
pub struct BalancedChannel {
    inner: Arc<Inner>,
}

struct Inner {
    service_name: String,
    options: ConnectionOptions,
    endpoints: RwLock<Vec<(String, Channel)>>,
    next: AtomicUsize,
}

impl BalancedChannel {
    pub(crate) fn new(service_name: String, options: ConnectionOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                service_name,
                options,
                endpoints: RwLock::new(Vec::new()),
                next: AtomicUsize::new(0),
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    /// 当前地址集合
    pub fn addresses(&self) -> Vec<String> {
        self.read().iter().map(|(addr, _)| addr.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// 轮询选择下一个通道
    pub(crate) fn pick(&self) -> Option<(String, Channel)> {
        let endpoints = self.read();
        if endpoints.is_empty() {
            return None;
        }
        let index = self.inner.next.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        endpoints.get(index).cloned()
    }

    /// 用新的地址集合替换当前集合
    pub(crate) fn update<'a, I>(&self, addresses: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut endpoints = self
            .inner
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut existing: HashMap<String, Channel> = endpoints.drain(..).collect();

        let mut updated = Vec::new();
        for address in addresses {
            if updated.iter().any(|(a, _): &(String, Channel)| a == address) {
                continue;
            }
            if let Some(channel) = existing.remove(address) {
                updated.push((address.to_string(), channel));
                continue;
            }
            match self.inner.options.endpoint(address) {
                Ok(endpoint) => updated.push((address.to_string(), endpoint.connect_lazy())),
                Err(e) => warn!(
                    service = %self.inner.service_name,
                    address,
                    error = %e,
                    "Ignoring unusable address"
                ),
            }
        }

        debug!(
            service = %self.inner.service_name,
            addresses = updated.len(),
            removed = existing.len(),
            "Balanced channel updated"
        );
        *endpoints = updated;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<(String, Channel)>> {
        self.inner
            .endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ClientConnHandle for BalancedChannel {
    async fn update_state(&self, state: ResolverState) -> Result<()> {
        self.update(state.addrs());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> BalancedChannel {
        BalancedChannel::new("svc".to_string(), ConnectionOptions::default())
    }

    #[tokio::test]
    async fn picks_round_robin() {
        let balanced = channel();
        assert!(balanced.pick().is_none());

        balanced.update(["10.0.0.1:1", "10.0.0.2:1", "10.0.0.1:1"]);
        assert_eq!(balanced.addresses(), vec!["10.0.0.1:1", "10.0.0.2:1"]);

        let picked: Vec<String> = (0..4).filter_map(|_| balanced.pick()).map(|(a, _)| a).collect();
        assert_eq!(picked, vec!["10.0.0.1:1", "10.0.0.2:1", "10.0.0.1:1", "10.0.0.2:1"]);
    }

    #[tokio::test]
    async fn update_replaces_set_and_skips_bad_addresses() {
        let balanced = channel();
        balanced.update(["10.0.0.1:1", "10.0.0.2:1"]);
        balanced.update(["10.0.0.2:1", "bad address", "10.0.0.3:1"]);
        assert_eq!(balanced.addresses(), vec!["10.0.0.2:1", "10.0.0.3:1"]);

        balanced.update([]);
        assert!(balanced.is_empty());
    }
}

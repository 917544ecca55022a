//! 服务注册发现模块
//!
//! 支持多种注册中心后端：内存、etcd 和 ZooKeeper

#[cfg(feature = "etcd")]
pub mod etcd;
pub mod factory;
pub mod memory;
pub mod trait_def;
pub mod watch;
#[cfg(feature = "zookeeper")]
pub mod zookeeper;

#[cfg(feature = "etcd")]
pub use etcd::{ETCD_SCHEME, EtcdRegistry};
pub use factory::new_registry;
pub use memory::{MEMORY_SCHEME, MemoryRegistry};
pub use trait_def::Registry;
pub use watch::InstanceWatch;
#[cfg(feature = "zookeeper")]
pub use zookeeper::{ZOOKEEPER_SCHEME, ZkRegistry};

//! Flare Discovery Library
//!
//! Registry-driven gRPC name resolution for tonic clients: services register
//! themselves in a pluggable registry (in-memory, etcd or ZooKeeper), resolvers
//! watch the registry for membership changes, and connections balance calls
//! round robin across the currently known addresses.
//!
//! ```ignore
//! let registry = new_registry(Some(&config.registry)).await?;
//! let conn = new_connection("user-service", registry.clone(), ConnectionOptions::default()).await?;
//! let client = UserServiceClient::new(conn);
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// 注册中心与名字解析
pub mod registry;
pub mod resolver;
pub mod retry;

// gRPC 客户端/服务端
pub mod client;
pub mod interceptor;
pub mod server;

// Re-exports
pub use config::{Config, EtcdOption, LogConfig, RegistryKind, RegistryOption, ZkOption};
pub use error::{DiscoveryError, ErrorCategory, ErrorCode, Result};
pub use types::{ServiceInfo, ServiceInstance};

pub use registry::{InstanceWatch, MemoryRegistry, Registry, new_registry};
#[cfg(feature = "etcd")]
pub use registry::EtcdRegistry;
#[cfg(feature = "zookeeper")]
pub use registry::ZkRegistry;

pub use resolver::{
    Address, BuildOptions, ClientConnHandle, Resolver, ResolverBuilder, ResolverState,
    ServiceResolver, ServiceResolverBuilder, Target, new_builder,
};
pub use retry::{ExponentialBackoffPolicy, FixedRetryPolicy, RetryPolicy};

pub use client::{
    BalancedChannel, Connection, ConnectionOptions, connections_for_all_instances, dial,
    new_connection,
};
pub use interceptor::{CallContext, PropagationInterceptor, call_context_from_request};
pub use server::{Registration, ServerConfig, bind_and_register, serve_and_register};

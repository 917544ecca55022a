//! 注册中心数据模型

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 服务注册信息
///
/// 由调用方创建并提交给注册中心，提交后由后端持有。
/// 网络后端（etcd、ZooKeeper）以 JSON 形式存储。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    /// 服务名（如 "user-service"）
    pub name: String,

    /// 服务地址，格式为 "host:port"
    pub address: String,

    /// 版本
    #[serde(default)]
    pub version: String,

    /// 元数据
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// 后端相关的租约句柄（etcd lease ID），未使用时为 0
    #[serde(default, rename = "leaseID")]
    pub lease_id: i64,
}

impl ServiceInfo {
    /// 创建新的服务注册信息
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            ..Default::default()
        }
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 投影为只读的服务实例
    pub fn to_instance(&self) -> ServiceInstance {
        let mut metadata = self.metadata.clone();
        if !self.version.is_empty() && !metadata.contains_key("version") {
            metadata.insert("version".to_string(), self.version.clone());
        }
        ServiceInstance {
            address: self.address.clone(),
            metadata,
        }
    }
}

/// 服务实例
///
/// ServiceInfo 的精简投影，每次快照都会重新生成，不会被原地修改。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub address: String,
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            metadata: HashMap::new(),
        }
    }

    /// 转换为 gRPC URI
    pub fn to_grpc_uri(&self) -> String {
        format!("http://{}", self.address)
    }
}

impl From<&ServiceInfo> for ServiceInstance {
    fn from(info: &ServiceInfo) -> Self {
        info.to_instance()
    }
}

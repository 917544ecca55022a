//! 配置模块
//!
//! 注册中心选择、各后端连接参数、客户端连接参数以及日志配置。
//! 支持从 TOML 文件加载，并可通过环境变量覆盖常用字段。

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::client::ConnectionOptions;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryOption,
    pub client: ConnectionOptions,
    pub log: LogConfig,
}

/// 注册中心类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    #[default]
    Memory,
    Etcd,
    #[serde(alias = "zk")]
    Zookeeper,
}

impl FromStr for RegistryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "" => Ok(RegistryKind::Memory),
            "etcd" => Ok(RegistryKind::Etcd),
            "zookeeper" | "zk" => Ok(RegistryKind::Zookeeper),
            _ => Err(format!("Unknown registry type: {}", s)),
        }
    }
}

/// 注册中心配置
///
/// `kind` 为类型标签，每种网络后端各有一个可选的子配置。
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistryOption {
    #[serde(rename = "type", default)]
    pub kind: RegistryKind,
    pub etcd: Option<EtcdOption>,
    pub zookeeper: Option<ZkOption>,
}

impl RegistryOption {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn etcd(option: EtcdOption) -> Self {
        Self {
            kind: RegistryKind::Etcd,
            etcd: Some(option),
            zookeeper: None,
        }
    }

    pub fn zookeeper(option: ZkOption) -> Self {
        Self {
            kind: RegistryKind::Zookeeper,
            etcd: None,
            zookeeper: Some(option),
        }
    }
}

/// etcd 后端配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EtcdOption {
    pub endpoints: Vec<String>,
    /// 建立连接的超时时间（秒）
    pub dial_timeout_secs: u64,
    /// 租约 TTL（秒）
    pub lease_ttl_secs: i64,
    /// 服务 key 前缀
    pub key_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 覆盖默认的 resolver scheme
    pub scheme: Option<String>,
}

impl Default for EtcdOption {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            dial_timeout_secs: 5,
            lease_ttl_secs: 600,
            key_prefix: "/flare-services".to_string(),
            username: None,
            password: None,
            scheme: None,
        }
    }
}

impl EtcdOption {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

/// ZooKeeper 后端配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ZkOption {
    pub servers: Vec<String>,
    pub root_path: String,
    /// 建立会话的超时时间（秒）
    pub timeout_secs: u64,
    pub scheme: Option<String>,
}

impl Default for ZkOption {
    fn default() -> Self {
        Self {
            servers: vec!["127.0.0.1:2181".to_string()],
            root_path: "/flare-services".to_string(),
            timeout_secs: 5,
            scheme: None,
        }
    }
}

impl ZkOption {
    pub fn new(servers: Vec<String>, root_path: impl Into<String>) -> Self {
        Self {
            servers,
            root_path: root_path.into(),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// 未设置 RUST_LOG 时使用的过滤级别
    pub level: String,
    /// 是否输出 JSON 格式
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path))?;
        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("failed to parse config file {}", path))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 使用进程环境变量覆盖配置
    ///
    /// - `REGISTRY_TYPE`: memory | etcd | zookeeper
    /// - `ETCD_ENDPOINTS`: 逗号分隔
    /// - `ETCD_TTL_SECONDS`
    /// - `ZK_SERVERS`: 逗号分隔
    /// - `ZK_ROOT_PATH`
    /// - `LOG_LEVEL`
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("REGISTRY_TYPE") {
            self.registry.kind = kind.parse().map_err(anyhow::Error::msg)?;
        }

        if let Some(endpoints) = lookup("ETCD_ENDPOINTS") {
            self.registry.etcd.get_or_insert_with(EtcdOption::default).endpoints =
                split_list(&endpoints);
        }
        if let Some(ttl) = lookup("ETCD_TTL_SECONDS") {
            self.registry.etcd.get_or_insert_with(EtcdOption::default).lease_ttl_secs = ttl
                .trim()
                .parse()
                .with_context(|| format!("invalid ETCD_TTL_SECONDS: {}", ttl))?;
        }

        if let Some(servers) = lookup("ZK_SERVERS") {
            self.registry.zookeeper.get_or_insert_with(ZkOption::default).servers =
                split_list(&servers);
        }
        if let Some(root) = lookup("ZK_ROOT_PATH") {
            self.registry.zookeeper.get_or_insert_with(ZkOption::default).root_path = root;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.log.level = level;
        }

        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

//! 进程级 resolver scheme 表
//!
//! 由进程启动代码显式注册，[`crate::client::dial`] 按 scheme 查找。

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::{info, warn};

use super::ResolverBuilder;

static BUILDERS: LazyLock<RwLock<HashMap<String, Arc<dyn ResolverBuilder>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// 注册 builder，同名 scheme 会被覆盖并返回旧值
pub fn register(builder: Arc<dyn ResolverBuilder>) -> Option<Arc<dyn ResolverBuilder>> {
    let scheme = builder.scheme().to_string();
    let previous = BUILDERS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(scheme.clone(), builder);

    if previous.is_some() {
        warn!(scheme = %scheme, "Resolver scheme re-registered, previous builder replaced");
    } else {
        info!(scheme = %scheme, "Resolver scheme registered");
    }
    previous
}

pub fn get(scheme: &str) -> Option<Arc<dyn ResolverBuilder>> {
    BUILDERS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(scheme)
        .cloned()
}

pub fn unregister(scheme: &str) -> Option<Arc<dyn ResolverBuilder>> {
    BUILDERS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(scheme)
}

pub fn schemes() -> Vec<String> {
    let mut schemes: Vec<String> = BUILDERS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    schemes.sort();
    schemes
}

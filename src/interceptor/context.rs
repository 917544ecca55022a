use std::collections::HashMap;
use std::future::Future;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: CallContext;
}

/// 调用上下文
///
/// 绑定在当前任务上，由 [`super::PropagationInterceptor`] 读取。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    pub trace_id: Option<String>,
    pub client_ip: Option<String>,
    values: HashMap<String, String>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    /// 附加一个可被转发的值，键按请求头规则转为小写
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values
            .insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// 没有 trace ID 时生成一个
    pub fn ensure_trace_id(&mut self) -> &str {
        self.trace_id.get_or_insert_with(generate_trace_id)
    }

    /// 在此上下文中执行 future
    pub async fn scope<F>(self, f: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, f).await
    }

    /// 当前任务绑定的上下文
    pub fn current() -> Option<CallContext> {
        CURRENT.try_with(Clone::clone).ok()
    }
}

pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

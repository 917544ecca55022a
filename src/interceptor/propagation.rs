use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use std::sync::Arc;
use tonic::metadata::MetadataMap;
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::debug;

use super::context::{CallContext, generate_trace_id};
use super::{CLIENT_IP_HEADER, DEFAULT_FORWARD_HEADERS, TRACE_ID_HEADER};

/// 客户端请求头传播
///
/// 始终写入 trace ID（上下文中没有时新生成），存在时写入客户端 IP，
/// 其余只转发白名单中的键。请求上已有的同名头不会被覆盖。
#[derive(Debug, Clone)]
pub struct PropagationInterceptor {
    forward_headers: Arc<[String]>,
}

impl Default for PropagationInterceptor {
    fn default() -> Self {
        Self::new(DEFAULT_FORWARD_HEADERS)
    }
}

impl PropagationInterceptor {
    pub fn new<I, S>(forward_headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let forward_headers: Vec<String> = forward_headers
            .into_iter()
            .map(|h| h.into().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self {
            forward_headers: forward_headers.into(),
        }
    }

    pub fn forward_headers(&self) -> &[String] {
        &self.forward_headers
    }

    /// 使用当前任务的上下文写入请求头
    pub fn apply_to_headers(&self, headers: &mut HeaderMap) {
        let ctx = CallContext::current().unwrap_or_default();
        self.apply_context(&ctx, headers);
    }

    pub fn apply_context(&self, ctx: &CallContext, headers: &mut HeaderMap) {
        if !headers.contains_key(TRACE_ID_HEADER) {
            let trace_id = ctx.trace_id.clone().unwrap_or_else(generate_trace_id);
            insert_if_absent(headers, TRACE_ID_HEADER, &trace_id);
        }
        if let Some(client_ip) = ctx.client_ip.as_deref() {
            insert_if_absent(headers, CLIENT_IP_HEADER, client_ip);
        }
        for key in self.forward_headers.iter() {
            if let Some(value) = ctx.value(key).filter(|v| !v.is_empty()) {
                insert_if_absent(headers, key, value);
            }
        }
    }
}

fn insert_if_absent(headers: &mut HeaderMap, name: &str, value: &str) {
    if headers.contains_key(name) {
        return;
    }
    match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => debug!(header = %name, "Skipping header that is not valid ASCII metadata"),
    }
}

impl Interceptor for PropagationInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let mut headers = std::mem::take(request.metadata_mut()).into_headers();
        self.apply_to_headers(&mut headers);
        *request.metadata_mut() = MetadataMap::from_headers(headers);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_only_allow_listed_values() {
        let interceptor = PropagationInterceptor::default();
        let ctx = CallContext::new()
            .with_trace_id("trace-1")
            .with_client_ip("192.168.1.10")
            .with_value("user-id", "42")
            .with_value("password", "secret");

        let mut headers = HeaderMap::new();
        interceptor.apply_context(&ctx, &mut headers);

        assert_eq!(headers.get(TRACE_ID_HEADER).unwrap(), "trace-1");
        assert_eq!(headers.get(CLIENT_IP_HEADER).unwrap(), "192.168.1.10");
        assert_eq!(headers.get("user-id").unwrap(), "42");
        assert!(headers.get("password").is_none());
        assert!(headers.get("platform-id").is_none());
    }

    #[test]
    fn generates_trace_id_without_context() {
        let mut headers = HeaderMap::new();
        PropagationInterceptor::new(Vec::<String>::new()).apply_to_headers(&mut headers);
        let trace_id = headers.get(TRACE_ID_HEADER).unwrap().to_str().unwrap();
        assert!(!trace_id.is_empty());
        assert!(headers.get(CLIENT_IP_HEADER).is_none());
    }

    #[test]
    fn existing_headers_are_kept() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACE_ID_HEADER, HeaderValue::from_static("upstream"));
        PropagationInterceptor::default()
            .apply_context(&CallContext::new().with_trace_id("local"), &mut headers);
        assert_eq!(headers.get(TRACE_ID_HEADER).unwrap(), "upstream");
    }

    #[tokio::test]
    async fn interceptor_reads_task_context() {
        let mut interceptor = PropagationInterceptor::new(["Tenant-Id"]);
        let ctx = CallContext::new().with_trace_id("t-9").with_value("tenant-id", "acme");

        let request = ctx
            .scope(async move { interceptor.call(Request::new(())) })
            .await
            .unwrap();

        let metadata = request.metadata();
        assert_eq!(metadata.get(TRACE_ID_HEADER).unwrap(), "t-9");
        assert_eq!(metadata.get("tenant-id").unwrap(), "acme");
    }
}

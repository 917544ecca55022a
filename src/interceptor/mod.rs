//! 调用上下文传播
//!
//! 客户端把当前 [`CallContext`] 写入请求头（trace ID、客户端 IP、白名单头），
//! 服务端用 [`call_context_from_request`] 把请求头还原为上下文，
//! 处理函数在 [`CallContext::scope`] 中发起的下游调用会继续传播。

pub mod context;
pub mod propagation;

pub use context::{CallContext, generate_trace_id};
pub use propagation::PropagationInterceptor;

use tonic::Request;

pub const TRACE_ID_HEADER: &str = "x-trace-id";
pub const CLIENT_IP_HEADER: &str = "clientip";

/// 默认转发的请求头
pub const DEFAULT_FORWARD_HEADERS: [&str; 2] = ["user-id", "platform-id"];

/// 从服务端请求中提取调用上下文
///
/// 只保留 ASCII 元数据；`forward_headers` 中的键作为上下文值，
/// 缺少客户端 IP 时使用对端地址。
pub fn call_context_from_request<T>(req: &Request<T>, forward_headers: &[String]) -> CallContext {
    let metadata = req.metadata();
    let get = |key: &str| {
        metadata
            .get(key)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let mut ctx = CallContext::new();
    ctx.trace_id = get(TRACE_ID_HEADER);
    ctx.client_ip = get(CLIENT_IP_HEADER).or_else(|| req.remote_addr().map(|a| a.ip().to_string()));

    for key in forward_headers {
        if let Some(value) = get(key) {
            ctx = ctx.with_value(key.to_ascii_lowercase(), value);
        }
    }
    ctx
}

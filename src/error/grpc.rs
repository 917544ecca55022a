//! gRPC 错误处理
//!
//! 提供 DiscoveryError 到 tonic::Status 的转换

use super::{DiscoveryError, ErrorCode};
use tonic::{Code, Status};

impl From<DiscoveryError> for Status {
    fn from(err: DiscoveryError) -> Self {
        let code = err.code();
        let mut status = Status::new(map_error_code_to_grpc(code), err.to_string());

        // 添加错误代码到 metadata
        if let Ok(value) = code.as_u32().to_string().parse() {
            status.metadata_mut().insert("error-code", value);
        }

        status
    }
}

/// 将错误代码映射到 gRPC 状态码
fn map_error_code_to_grpc(code: ErrorCode) -> Code {
    match code {
        ErrorCode::ConnectionFailed
        | ErrorCode::RegistryUnavailable
        | ErrorCode::NoAvailableAddress => Code::Unavailable,

        ErrorCode::ConnectionTimeout => Code::DeadlineExceeded,

        ErrorCode::ConfigurationError | ErrorCode::InvalidParameter => Code::InvalidArgument,

        ErrorCode::InternalError | ErrorCode::SerializationError => Code::Internal,

        ErrorCode::UnknownError => Code::Unknown,
    }
}

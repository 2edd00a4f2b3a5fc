//! 云端客户端错误定义。

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

/// 云端调用统一错误。
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// 安装实例密钥或调用参数不完整、格式非法，不可重试。
    #[error("validation failed: {0}")]
    Validation(String),
    /// 客户端配置非法（例如 API 地址）。
    #[error("invalid client config: {0}")]
    Config(String),
    /// 请求超过等待上限，调用方可自行决定是否重试。
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// 服务端返回非 2xx。
    #[error("request failed: {status}")]
    Http {
        status: StatusCode,
        /// 已尝试按 JSON 解析的响应体；非 JSON 时为原始文本。
        payload: Value,
    },
    /// DNS、连接重置等其他网络层错误。
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// 密钥生成或编码失败。
    #[error("key material error: {0}")]
    Key(String),
    /// 成功响应的结构不符合预期。
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl CloudError {
    /// 构造校验错误。
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        CloudError::Validation(message.into())
    }

    /// 是否为超时错误。
    pub fn is_timeout(&self) -> bool {
        matches!(self, CloudError::Timeout(_))
    }

    /// 非 2xx 时返回状态码。
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CloudError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// 云端调用结果。
pub type CloudResult<T> = Result<T, CloudError>;

use serde_json::Value as JsonValue;
use thiserror::Error;

/// 客户端错误类型
#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP传输错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket错误: {0}")]
    WebSocket(String),

    /// 对端已关闭流式连接
    #[error("连接已被对端关闭")]
    ConnectionClosed,

    /// 服务端返回的失败响应
    #[error("{message}")]
    Service {
        message: String,
        code: u16,
        body: Option<JsonValue>,
    },

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("{object} 未绑定到API")]
    NotBound { object: String },

    #[error("服务器响应格式不正确: {0}")]
    UnexpectedResponse(String),

    #[error("内部错误: {0}")]
    Internal(#[from] anyhow::Error),
}

/// 客户端Result类型别名
pub type AppResult<T> = Result<T, AppError>;

/// 错误构造辅助函数
impl AppError {
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn websocket<T: Into<String>>(msg: T) -> Self {
        Self::WebSocket(msg.into())
    }

    pub fn not_bound<T: Into<String>>(object: T) -> Self {
        Self::NotBound {
            object: object.into(),
        }
    }

    pub fn unexpected_response<T: Into<String>>(msg: T) -> Self {
        Self::UnexpectedResponse(msg.into())
    }

    pub fn service<T: Into<String>>(msg: T, code: u16, body: Option<JsonValue>) -> Self {
        Self::Service {
            message: msg.into(),
            code,
            body,
        }
    }

    /// 服务端返回的HTTP状态码（仅服务错误携带）
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Service { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 是否为对端关闭连接
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = AppError::validation("测试验证错误");
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(err.to_string(), "验证错误: 测试验证错误");
    }

    #[test]
    fn test_service_error_keeps_code_and_body() {
        let err = AppError::service("Not found", 404, Some(serde_json::json!({"error": "Not found"})));
        assert_eq!(err.to_string(), "Not found");
        assert_eq!(err.status_code(), Some(404));
        assert!(matches!(err, AppError::Service { body: Some(_), .. }));
    }

    #[test]
    fn test_not_bound_error() {
        let err = AppError::not_bound("Sample");
        assert!(matches!(err, AppError::NotBound { .. }));
        assert_eq!(err.status_code(), None);
    }

    #[test]
    fn test_connection_closed() {
        assert!(AppError::ConnectionClosed.is_connection_closed());
        assert!(!AppError::websocket("boom").is_connection_closed());
    }
}

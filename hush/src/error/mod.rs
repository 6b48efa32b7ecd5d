use crate::Response;
use http::header::{ALLOW, CONTENT_TYPE};
use http::{HeaderValue, Method, StatusCode};
use serde::Serialize;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// BoxedError
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// HushError is the error type for the `hush` library.
#[derive(Error, Debug)]
pub enum HushError {
    /// IO 错误
    #[error("io error: {0}")]
    IOError(#[from] io::Error),
    /// 序列化 错误
    #[error("serde_json error `{0}`")]
    SerdeJsonError(#[from] serde_json::Error),
    /// anyhow错误
    #[error("{0}")]
    AnyhowError(#[from] anyhow::Error),
    /// 配置错误，构造阶段即失败
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// 服务器状态不允许当前操作
    #[error("invalid state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    /// 优雅关停超时，仍有连接未关闭
    #[error("unable to complete graceful shutdown in {0:?}")]
    ShutdownTimeout(Duration),
    /// 没有匹配的路由
    #[error("not found")]
    NotFound,
    /// 路由存在但方法不匹配，携带该路径允许的方法
    #[error("method not allowed")]
    MethodNotAllowed(Vec<Method>),
    /// 调用链已到末尾，没有可继续执行的处理器
    #[error("no further handler in chain")]
    NoFurtherHandler,
    /// 存储后端错误（限流器等）
    #[error("storage error: {0}")]
    Storage(#[source] BoxedError),
    /// 请求体超出限制
    #[error("request body too large")]
    BodyTooLarge,
    /// 业务错误
    #[error("business error: {msg} ({code})")]
    BusinessError {
        /// 错误码
        code: StatusCode,
        /// 错误信息
        msg: String,
    },
}

pub type HushResult<T> = Result<T, HushError>;

impl From<(StatusCode, String)> for HushError {
    fn from(value: (StatusCode, String)) -> Self {
        Self::business_error(value.0, value.1)
    }
}

impl From<(u16, String)> for HushError {
    fn from(value: (u16, String)) -> Self {
        let code = StatusCode::from_u16(value.0).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::business_error(code, value.1)
    }
}

impl From<String> for HushError {
    fn from(value: String) -> Self {
        Self::business_error(StatusCode::INTERNAL_SERVER_ERROR, value)
    }
}

impl HushError {
    pub fn business_error_obj<S>(code: StatusCode, msg: S) -> Self
    where
        S: Serialize,
    {
        let msg = serde_json::to_string(&msg).unwrap_or_default();
        Self::BusinessError { code, msg }
    }

    pub fn business_error<T: Into<String>>(code: StatusCode, msg: T) -> Self {
        Self::BusinessError {
            code,
            msg: msg.into(),
        }
    }

    /// 包装存储后端返回的任意错误。
    pub fn storage<E>(err: E) -> Self
    where
        E: Into<BoxedError>,
    {
        Self::Storage(err.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BusinessError { code, .. } => *code,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SerdeJsonError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 错误的完整描述，仅供自定义错误处理器选择性地暴露给客户端。
    pub fn message(&self) -> String {
        match self {
            Self::BusinessError { msg, .. } => msg.clone(),
            _ => self.to_string(),
        }
    }

    /// 返回给客户端的安全文本：业务错误保留原文，其余只给出状态码的标准描述。
    pub fn public_message(&self) -> String {
        match self {
            Self::BusinessError { msg, .. } if !msg.is_empty() => msg.clone(),
            _ => self
                .status()
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ShutdownTimeout(_))
    }
}

impl From<HushError> for Response {
    fn from(value: HushError) -> Self {
        let mut res = Response::empty();
        res.set_status(value.status());
        if let HushError::MethodNotAllowed(allowed) = &value {
            if let Some(allow) = allow_header(allowed) {
                res.set_header(ALLOW, allow);
            }
        }
        let msg = value.public_message();
        if serde_json::from_str::<serde_json::Value>(&msg).is_ok_and(|v| v.is_object()) {
            res.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        } else {
            res.set_header(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
        }
        res.set_body(msg);
        res
    }
}

/// 拼接 `Allow` 响应头，方法列表为空时返回 `None`
pub(crate) fn allow_header(allowed: &[Method]) -> Option<HeaderValue> {
    if allowed.is_empty() {
        return None;
    }
    let allow = allowed
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    HeaderValue::from_str(&allow).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    // ==================== From trait 测试 ====================

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: HushError = io_err.into();
        assert!(matches!(err, HushError::IOError(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<Value>("invalid json").unwrap_err();
        let err: HushError = json_err.into();
        assert!(matches!(err, HushError::SerdeJsonError(_)));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_from_u16_string_tuple_invalid() {
        let err: HushError = (9999u16, "Invalid status".to_string()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_from_anyhow_error() {
        let err: HushError = anyhow::anyhow!("Something went wrong").into();
        assert!(matches!(err, HushError::AnyhowError(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // ==================== 分类测试 ====================

    #[test]
    fn test_routing_errors_are_distinct() {
        assert_eq!(HushError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            HushError::MethodNotAllowed(vec![Method::GET]).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            HushError::NoFurtherHandler.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_ne!(
            HushError::NotFound.to_string(),
            HushError::NoFurtherHandler.to_string()
        );
    }

    #[test]
    fn test_shutdown_timeout_is_distinct() {
        let err = HushError::ShutdownTimeout(Duration::from_millis(50));
        assert!(err.is_timeout());
        assert!(!HushError::NotFound.is_timeout());
        assert!(err.to_string().contains("50ms"));
    }

    #[test]
    fn test_storage_error_keeps_source() {
        let err = HushError::storage(io::Error::other("redis down"));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.message().contains("redis down"));
        assert!(std::error::Error::source(&err).is_some());
    }

    // ==================== 响应转换测试 ====================

    #[test]
    fn test_internal_error_does_not_leak() {
        let err = HushError::storage(io::Error::other("secret connection string"));
        let res: Response = err.into();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = String::from_utf8_lossy(res.body()).to_string();
        assert!(!body.contains("secret"));
        assert_eq!(body, "Service Unavailable");
    }

    #[test]
    fn test_method_not_allowed_sets_allow() {
        let err = HushError::MethodNotAllowed(vec![Method::GET, Method::HEAD]);
        let res: Response = err.into();
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers().get(ALLOW).unwrap(), "GET, HEAD");

        let res: Response = HushError::MethodNotAllowed(Vec::new()).into();
        assert!(res.headers().get(ALLOW).is_none());
    }

    #[test]
    fn test_business_error_keeps_message() {
        let err = HushError::business_error(StatusCode::BAD_REQUEST, "Invalid data");
        let res: Response = err.into();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(res.body().as_ref(), b"Invalid data");
    }

    #[test]
    fn test_business_error_obj_is_json() {
        #[derive(Serialize)]
        struct ErrorDetail {
            field: String,
        }
        let err = HushError::business_error_obj(
            StatusCode::BAD_REQUEST,
            ErrorDetail {
                field: "email".to_string(),
            },
        );
        let res: Response = err.into();
        assert_eq!(
            res.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}

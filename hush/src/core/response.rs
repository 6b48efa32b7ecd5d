use crate::Result;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, IntoHeaderName};
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::Full;
use serde::Serialize;

/// 响应体
/// ```
/// use hush::Response;
/// let res = Response::text("hello");
/// assert_eq!(res.body().as_ref(), b"hello");
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl Default for Response {
    fn default() -> Self {
        Self::empty()
    }
}

impl Response {
    /// 创建空响应体
    pub fn empty() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// 文本响应
    pub fn text<T: Into<String>>(text: T) -> Self {
        let mut res = Self::empty();
        res.set_header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        res.set_body(text.into());
        res
    }

    /// JSON 响应
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let mut res = Self::empty();
        res.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        res.set_body(serde_json::to_vec(value)?);
        Ok(res)
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// 设置响应状态
    #[inline]
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// 状态码 >= 400 视为失败响应
    #[inline]
    pub fn is_failure(&self) -> bool {
        self.status.as_u16() >= 400
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// 设置响应header，同名header会被覆盖
    #[inline]
    pub fn set_header<K: IntoHeaderName>(&mut self, key: K, value: HeaderValue) {
        self.headers.insert(key, value);
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// 设置响应体
    #[inline]
    pub fn set_body<B: Into<Bytes>>(&mut self, body: B) {
        self.body = body.into();
    }

    /// 恢复到初始状态（200、无header、无body）
    pub fn clear(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.body = Bytes::new();
    }

    /// 转换为 hyper 可发送的响应
    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

impl From<&str> for Response {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Response {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

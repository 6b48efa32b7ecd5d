use crate::{HushError, Result};
use bytes::Bytes;
use http::request::Parts;
use http::{Extensions, HeaderMap, Method, Uri, Version};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// 请求体
///
/// 请求体在进入调用链之前已完整读取（受 `max_request_body_size` 限制），
/// 因此处理器之间可以反复读取 `body()`。
/// ```
/// use hush::Request;
/// let req = Request::empty();
/// assert_eq!(req.method(), http::Method::GET);
/// ```
#[derive(Debug)]
pub struct Request {
    parts: Parts,
    body: Bytes,
    path_params: HashMap<String, String>,
}

impl Default for Request {
    fn default() -> Self {
        Self::empty()
    }
}

impl Request {
    /// 创建空请求体
    pub fn empty() -> Self {
        let (parts, _) = http::Request::new(()).into_parts();
        Self {
            parts,
            body: Bytes::new(),
            path_params: HashMap::new(),
        }
    }

    /// 从请求头与请求体创建请求
    #[inline]
    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        Self {
            parts,
            body,
            path_params: HashMap::new(),
        }
    }

    /// 获取请求方法
    #[inline]
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    /// 获取可变请求方法
    #[inline]
    pub fn method_mut(&mut self) -> &mut Method {
        &mut self.parts.method
    }

    /// 获取请求uri
    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// 获取可变请求uri
    #[inline]
    pub fn uri_mut(&mut self) -> &mut Uri {
        &mut self.parts.uri
    }

    /// 请求路径（不含查询参数）
    #[inline]
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    /// 获取请求版本
    #[inline]
    pub fn version(&self) -> Version {
        self.parts.version
    }

    /// 获取请求头
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// 获取可变请求头
    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    /// 以字符串形式读取单个请求头，非法 UTF-8 视为不存在
    pub fn header(&self, key: &str) -> Option<&str> {
        self.parts.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// 获取请求拓展
    #[inline]
    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    /// 获取可变请求拓展
    #[inline]
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.parts.extensions
    }

    /// 获取请求体
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// 取出请求体，原位置留空
    #[inline]
    pub fn take_body(&mut self) -> Bytes {
        std::mem::take(&mut self.body)
    }

    /// 以 JSON 解析请求体
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Err(HushError::business_error(
                http::StatusCode::BAD_REQUEST,
                "body is empty",
            ));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// 路由解析时捕获的路径参数
    #[inline]
    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    /// 读取单个路径参数
    pub fn path_param(&self, key: &str) -> Option<&str> {
        self.path_params.get(key).map(String::as_str)
    }

    pub(crate) fn set_path_params(&mut self, params: HashMap<String, String>) {
        self.path_params = params;
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(value: http::Request<Bytes>) -> Self {
        let (parts, body) = value.into_parts();
        Self::from_parts(parts, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_request_empty() {
        let req = Request::empty();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.path(), "/");
        assert!(req.body().is_empty());
        assert!(req.path_params().is_empty());
    }

    #[test]
    fn test_request_from_http() {
        let http_req = http::Request::builder()
            .method(Method::POST)
            .uri("/users/1?x=1")
            .header("x-test", "yes")
            .body(Bytes::from_static(b"hello"))
            .unwrap();
        let mut req = Request::from(http_req);
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.path(), "/users/1");
        assert_eq!(req.header("x-test"), Some("yes"));
        assert_eq!(req.take_body(), Bytes::from_static(b"hello"));
        assert!(req.body().is_empty());
    }

    #[test]
    fn test_request_json() {
        #[derive(Deserialize)]
        struct Payload {
            name: String,
        }
        let http_req = http::Request::builder()
            .body(Bytes::from_static(br#"{"name":"hush"}"#))
            .unwrap();
        let req = Request::from(http_req);
        let payload: Payload = req.json().unwrap();
        assert_eq!(payload.name, "hush");

        let empty = Request::empty();
        assert!(empty.json::<Payload>().is_err());
    }
}

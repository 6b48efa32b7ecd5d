use crate::core::pipeline::Pipeline;
use crate::error::allow_header;
use crate::route::RouteMatch;
use crate::{Handler, HushError, Request, Response, Result};
use http::header::{HOST, IntoHeaderName};
use http::{Extensions, HeaderValue, Method, StatusCode};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

const TRUE_CLIENT_IP: &str = "true-client-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

pub(crate) type HandlerList = Arc<[Arc<dyn Handler>]>;

/// 单个请求的工作对象。
///
/// 由 [`RequestContextPool`](crate::RequestContextPool) 分配并回收，同一时间只属于一个请求。
/// 调用链用一个整数游标描述当前位置：
///
/// | 游标            | 执行内容           |
/// |-----------------|--------------------|
/// | `1..=S`         | 全局中间件         |
/// | `S + 1`         | 路由解析（仅一次） |
/// | `S+2..=S+1+R`   | 路由中间件         |
/// | `S + 2 + R`     | 终端处理器         |
///
/// 其中 `S`、`R` 分别为全局与路由中间件数量，`0` 为链外的起始位置。
pub struct RequestContext {
    request: Request,
    response: Response,
    remote_addr: Option<SocketAddr>,
    extensions: Extensions,
    cursor: usize,
    server_middlewares: Option<HandlerList>,
    route_middlewares: Option<HandlerList>,
    handler: Option<Arc<dyn Handler>>,
    pipeline: Option<Arc<Pipeline>>,
    resolved: bool,
}

impl RequestContext {
    pub(crate) fn new() -> Self {
        Self {
            request: Request::empty(),
            response: Response::empty(),
            remote_addr: None,
            extensions: Extensions::new(),
            cursor: 0,
            server_middlewares: None,
            route_middlewares: None,
            handler: None,
            pipeline: None,
            resolved: false,
        }
    }

    /// 绑定一个已经确定终端处理器的调用链，路由解析位置直接跳过。
    pub(crate) fn bind(
        &mut self,
        request: Request,
        handler: Arc<dyn Handler>,
        server_middlewares: HandlerList,
        route_middlewares: HandlerList,
    ) {
        self.request = request;
        self.cursor = 0;
        self.handler = Some(handler);
        self.server_middlewares = Some(server_middlewares);
        self.route_middlewares = Some(route_middlewares);
        self.resolved = true;
    }

    /// 绑定服务器流水线，终端处理器在游标到达解析位置时才由路由器确定。
    pub(crate) fn bind_pipeline(&mut self, request: Request, pipeline: &Arc<Pipeline>) {
        self.request = request;
        self.cursor = 0;
        self.server_middlewares = Some(pipeline.middlewares());
        self.pipeline = Some(Arc::clone(pipeline));
        self.resolved = false;
    }

    /// 清空所有引用，回收前调用。
    pub(crate) fn reset(&mut self) {
        self.request = Request::empty();
        self.response.clear();
        self.remote_addr = None;
        self.extensions.clear();
        self.cursor = 0;
        self.server_middlewares = None;
        self.route_middlewares = None;
        self.handler = None;
        self.pipeline = None;
        self.resolved = false;
    }

    /// 执行调用链中的下一个环节。
    ///
    /// 游标先前进一格，按位置分派到中间件、路由解析或终端处理器，返回时恢复到调用者所在的位置。
    /// 超出调用链末尾时返回 [`HushError::NoFurtherHandler`]。
    pub async fn next(&mut self) -> Result<()> {
        let frame = self.cursor;
        self.cursor += 1;
        let result = self.dispatch_current().await;
        self.cursor = frame;
        result
    }

    async fn dispatch_current(&mut self) -> Result<()> {
        let server_len = self.server_len();
        if self.cursor <= server_len {
            let middleware = self.server_middleware(self.cursor - 1)?;
            return middleware.call(self).await;
        }

        if self.cursor == server_len + 1 {
            self.resolve()?;
            self.cursor += 1;
        }

        let position = self.cursor - server_len - 2;
        let route_len = self.route_len();
        if position < route_len {
            let middleware = self.route_middleware(position)?;
            return middleware.call(self).await;
        }
        match self.handler.clone() {
            Some(handler) if position == route_len => handler.call(self).await,
            _ => Err(HushError::NoFurtherHandler),
        }
    }

    fn server_len(&self) -> usize {
        self.server_middlewares.as_ref().map_or(0, |m| m.len())
    }

    fn route_len(&self) -> usize {
        self.route_middlewares.as_ref().map_or(0, |m| m.len())
    }

    fn server_middleware(&self, index: usize) -> Result<Arc<dyn Handler>> {
        self.server_middlewares
            .as_ref()
            .and_then(|m| m.get(index))
            .cloned()
            .ok_or(HushError::NoFurtherHandler)
    }

    fn route_middleware(&self, index: usize) -> Result<Arc<dyn Handler>> {
        self.route_middlewares
            .as_ref()
            .and_then(|m| m.get(index))
            .cloned()
            .ok_or(HushError::NoFurtherHandler)
    }

    fn resolve(&mut self) -> Result<()> {
        if self.resolved {
            return Ok(());
        }
        self.resolved = true;
        let Some(pipeline) = self.pipeline.clone() else {
            return Ok(());
        };
        match pipeline
            .router()
            .resolve(self.request.method(), self.request.path())
        {
            RouteMatch::Found { endpoint, params } => {
                self.handler = Some(endpoint.handler);
                self.route_middlewares = Some(endpoint.middlewares);
                self.request.set_path_params(params);
                Ok(())
            }
            RouteMatch::NotFound => {
                let handler = pipeline.not_found_handler().ok_or(HushError::NotFound)?;
                self.handler = Some(handler);
                Ok(())
            }
            RouteMatch::MethodNotAllowed { allowed } => {
                let Some(handler) = pipeline.method_not_allowed_handler() else {
                    return Err(HushError::MethodNotAllowed(allowed));
                };
                if let Some(allow) = allow_header(&allowed) {
                    self.response.set_header(http::header::ALLOW, allow);
                }
                self.handler = Some(handler);
                Ok(())
            }
        }
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn restore_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    pub(crate) fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    #[inline]
    pub fn request(&self) -> &Request {
        &self.request
    }

    #[inline]
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    #[inline]
    pub fn response(&self) -> &Response {
        &self.response
    }

    #[inline]
    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// 取出响应，上下文中留下空响应
    pub fn take_response(&mut self) -> Response {
        std::mem::take(&mut self.response)
    }

    /// 对端地址
    #[inline]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// 客户端 IP，未知时为 `None`。
    ///
    /// 对端是受信任代理时，依次采用 `True-Client-IP` 与 `X-Forwarded-For` 的第一个地址；
    /// 请求头缺失或无法解析时退回对端地址。
    pub fn remote_ip(&self) -> Option<IpAddr> {
        let peer = self.remote_addr.map(|addr| addr.ip())?;
        if !self.from_trusted_proxy(peer) {
            return Some(peer);
        }
        let headers = self.request.headers();
        let true_client = headers
            .get(TRUE_CLIENT_IP)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let forwarded = || {
            headers
                .get(X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse().ok())
        };
        Some(true_client.or_else(forwarded).unwrap_or(peer))
    }

    /// 请求的主机名。
    ///
    /// 对端是受信任代理时优先 `X-Forwarded-Host`，否则依次为 `Host` 请求头与 URI 中的 authority。
    pub fn host(&self) -> Option<&str> {
        let headers = self.request.headers();
        let forwarded = self
            .remote_addr
            .filter(|addr| self.from_trusted_proxy(addr.ip()))
            .and_then(|_| headers.get(X_FORWARDED_HOST))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        forwarded
            .or_else(|| headers.get(HOST).and_then(|v| v.to_str().ok()))
            .or_else(|| self.request.uri().host())
    }

    fn from_trusted_proxy(&self, peer: IpAddr) -> bool {
        self.pipeline
            .as_ref()
            .is_some_and(|pipeline| pipeline.trusted_proxies().is_trusted(peer))
    }

    pub fn is_head(&self) -> bool {
        self.request.method() == Method::HEAD
    }

    pub fn path_param(&self, key: &str) -> Option<&str> {
        self.request.path_param(key)
    }

    /// 用户附加的上下文数据，回收时清空
    #[inline]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    #[inline]
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn set_response_header<K: IntoHeaderName>(&mut self, key: K, value: HeaderValue) {
        self.response.set_header(key, value);
    }

    /// 写入错误响应；`msg` 为空时使用状态码的标准描述，HEAD 请求不写响应体
    pub fn error(&mut self, msg: &str, status: StatusCode) {
        self.response.set_status(status);
        if self.is_head() {
            self.response.set_body(bytes::Bytes::new());
            return;
        }
        let text = if msg.is_empty() {
            status.canonical_reason().unwrap_or_default()
        } else {
            msg
        };
        self.response.set_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.response.set_body(text.to_string());
    }

    pub fn success(&mut self) {
        self.response.set_status(StatusCode::OK);
    }

    pub fn not_found(&mut self, msg: &str) {
        self.error(msg, StatusCode::NOT_FOUND);
    }

    pub fn bad_request(&mut self, msg: &str) {
        self.error(msg, StatusCode::BAD_REQUEST);
    }

    pub fn unauthorized(&mut self, msg: &str) {
        self.error(msg, StatusCode::UNAUTHORIZED);
    }

    pub fn access_denied(&mut self, msg: &str) {
        self.error(msg, StatusCode::FORBIDDEN);
    }

    pub fn internal_server_error(&mut self, msg: &str) {
        self.error(msg, StatusCode::INTERNAL_SERVER_ERROR);
    }

    pub fn service_unavailable(&mut self, msg: &str) {
        self.error(msg, StatusCode::SERVICE_UNAVAILABLE);
    }

    pub fn too_many_requests(&mut self, msg: &str) {
        self.error(msg, StatusCode::TOO_MANY_REQUESTS);
    }

    pub fn no_content(&mut self, status: StatusCode) {
        self.response.set_status(status);
        self.response.set_body(bytes::Bytes::new());
    }

    pub fn write_text<T: Into<String>>(&mut self, text: T) {
        self.response.set_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.response.set_body(text.into());
    }

    pub fn write_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.response.set_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.response.set_body(body);
        Ok(())
    }
}

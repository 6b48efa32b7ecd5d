use crate::core::context::HandlerList;
use crate::core::trusted_proxy::TrustedProxies;
use crate::log::*;
use crate::route::{RouteTable, Router};
use crate::{Handler, HushError, RequestContext, Response};
use std::fmt;
use std::sync::Arc;

/// 调用链返回错误时执行的处理器，负责写出最终响应。
pub type ErrorHandler = Arc<dyn Fn(&mut RequestContext, HushError) + Send + Sync>;

/// 服务器级的请求流水线：全局中间件、路由器与兜底处理器。
///
/// 构建完成后只读，所有连接共享同一个实例。
#[derive(Clone)]
pub struct Pipeline {
    middlewares: HandlerList,
    router: Arc<dyn Router>,
    not_found: Option<Arc<dyn Handler>>,
    method_not_allowed: Option<Arc<dyn Handler>>,
    error_handler: ErrorHandler,
    trusted_proxies: Arc<TrustedProxies>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("middlewares", &self.middlewares.len())
            .field("not_found", &self.not_found.is_some())
            .field("method_not_allowed", &self.method_not_allowed.is_some())
            .field("trusted_proxies", &self.trusted_proxies)
            .finish()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Arc::new(RouteTable::new()))
    }
}

impl Pipeline {
    pub fn new(router: Arc<dyn Router>) -> Self {
        Self {
            middlewares: Arc::from(Vec::new()),
            router,
            not_found: None,
            method_not_allowed: None,
            error_handler: Arc::new(default_error_handler),
            trusted_proxies: Arc::new(TrustedProxies::default()),
        }
    }

    pub fn with_middlewares<M: Into<HandlerList>>(mut self, middlewares: M) -> Self {
        self.middlewares = middlewares.into();
        self
    }

    pub fn with_not_found(mut self, handler: Arc<dyn Handler>) -> Self {
        self.not_found = Some(handler);
        self
    }

    pub fn with_method_not_allowed(mut self, handler: Arc<dyn Handler>) -> Self {
        self.method_not_allowed = Some(handler);
        self
    }

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut RequestContext, HushError) + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn with_trusted_proxies(mut self, proxies: TrustedProxies) -> Self {
        self.trusted_proxies = Arc::new(proxies);
        self
    }

    pub(crate) fn trusted_proxies(&self) -> &TrustedProxies {
        &self.trusted_proxies
    }

    pub(crate) fn middlewares(&self) -> HandlerList {
        self.middlewares.clone()
    }

    pub(crate) fn router(&self) -> &dyn Router {
        self.router.as_ref()
    }

    pub(crate) fn not_found_handler(&self) -> Option<Arc<dyn Handler>> {
        self.not_found.clone()
    }

    pub(crate) fn method_not_allowed_handler(&self) -> Option<Arc<dyn Handler>> {
        self.method_not_allowed.clone()
    }

    /// 从链外起点执行整条调用链。
    ///
    /// 链中任一环节返回错误时，已写入的响应被清空，交由错误处理器重新写出。
    pub async fn dispatch(&self, ctx: &mut RequestContext) {
        if let Err(err) = ctx.next().await {
            ctx.response_mut().clear();
            (self.error_handler)(ctx, err);
        }
    }
}

/// 默认错误处理：内部错误记录日志，客户端只看到状态码的标准描述。
pub fn default_error_handler(ctx: &mut RequestContext, err: HushError) {
    let status = err.status();
    if status.is_server_error() {
        error!(
            method = %ctx.request().method(),
            path = ctx.request().path(),
            error = %err,
            "request failed"
        );
    } else {
        debug!(
            method = %ctx.request().method(),
            path = ctx.request().path(),
            status = status.as_u16(),
            "request rejected"
        );
    }
    let head = ctx.is_head();
    let mut res = Response::from(err);
    if head {
        res.set_body(bytes::Bytes::new());
    }
    *ctx.response_mut() = res;
}

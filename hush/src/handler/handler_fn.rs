use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;

use crate::{Handler, RequestContext, Result};

/// 异步闭包包装器。
///
/// 闭包返回的 future 需要借用上下文，因此约定返回 [`BoxFuture`]：
///
/// ```
/// use hush::{HandlerFn, RequestContext};
///
/// let logger = HandlerFn::new(|ctx: &mut RequestContext| {
///     Box::pin(async move {
///         let res = ctx.next().await;
///         tracing::info!(status = %ctx.response().status(), "done");
///         res
///     })
/// });
/// # let _ = logger;
/// ```
pub struct HandlerFn<F> {
    func: F,
}

impl<F> HandlerFn<F> {
    pub fn new(func: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        Self { func }
    }

    pub fn arc(self) -> Arc<dyn Handler>
    where
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        Arc::new(self)
    }
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    async fn call(&self, ctx: &mut RequestContext) -> Result<()> {
        (self.func)(ctx).await
    }
}

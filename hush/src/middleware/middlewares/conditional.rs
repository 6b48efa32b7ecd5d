use crate::{Handler, RequestContext, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// 条件中间件：判断为真时执行被包装的中间件，否则直接进入下一环节。
///
/// ```rust
/// use hush::middlewares::{Conditional, RequestTimeLogger};
/// use hush::RequestContext;
///
/// let _ = Conditional::new(
///     |ctx: &RequestContext| ctx.request().path().starts_with("/api"),
///     RequestTimeLogger::new(),
/// );
/// ```
pub struct Conditional<F> {
    condition: F,
    inner: Arc<dyn Handler>,
}

impl<F> Conditional<F>
where
    F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
{
    pub fn new<H: Handler>(condition: F, inner: H) -> Self {
        Self {
            condition,
            inner: Arc::new(inner),
        }
    }
}

#[async_trait]
impl<F> Handler for Conditional<F>
where
    F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
{
    async fn call(&self, ctx: &mut RequestContext) -> Result<()> {
        if (self.condition)(ctx) {
            self.inner.call(ctx).await
        } else {
            ctx.next().await
        }
    }
}

use crate::{RequestContext, Result};
use async_trait::async_trait;

/// 调用链中的一个环节。
///
/// 中间件与终端处理器共用同一个 trait：中间件在需要继续时调用
/// [`RequestContext::next`]，不调用即表示短路；终端处理器只负责写入响应。
///
/// ```
/// use hush::{Handler, RequestContext, Result};
/// use async_trait::async_trait;
///
/// struct Auth;
///
/// #[async_trait]
/// impl Handler for Auth {
///     async fn call(&self, ctx: &mut RequestContext) -> Result<()> {
///         if ctx.request().header("authorization").is_none() {
///             ctx.unauthorized("");
///             return Ok(());
///         }
///         ctx.next().await
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: &mut RequestContext) -> Result<()>;
}

/// 同步闭包可以直接作为终端处理器使用。
#[async_trait]
impl<F> Handler for F
where
    F: Fn(&mut RequestContext) -> Result<()> + Send + Sync + 'static,
{
    async fn call(&self, ctx: &mut RequestContext) -> Result<()> {
        (self)(ctx)
    }
}

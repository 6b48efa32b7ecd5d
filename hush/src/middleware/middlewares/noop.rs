use crate::{Handler, RequestContext, Result};
use async_trait::async_trait;

/// 直接进入下一环节的空中间件，常用于按配置占位
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOp;

#[async_trait]
impl Handler for NoOp {
    async fn call(&self, ctx: &mut RequestContext) -> Result<()> {
        ctx.next().await
    }
}

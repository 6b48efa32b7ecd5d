use crate::{Handler, HushError, RequestContext, Result};
use async_trait::async_trait;
use http::StatusCode;
use std::time::Duration;

/// Timeout 中间件，为剩余调用链设置执行时限
/// ```rust
/// use hush::middlewares::Timeout;
/// use std::time::Duration;
/// let _ = Timeout::new(Duration::from_secs(30));
/// ```
#[derive(Default, Clone)]
pub struct Timeout {
    timeout: Duration,
}

impl Timeout {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Handler for Timeout {
    async fn call(&self, ctx: &mut RequestContext) -> Result<()> {
        let cursor = ctx.cursor();
        let res = tokio::time::timeout(self.timeout, ctx.next()).await;
        match res {
            Ok(res) => res,
            Err(_) => {
                // 被取消的调用链没有机会恢复游标
                ctx.restore_cursor(cursor);
                Err(HushError::business_error(
                    StatusCode::REQUEST_TIMEOUT,
                    "Request timed out",
                ))
            }
        }
    }
}

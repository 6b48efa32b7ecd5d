use crate::{Handler, RequestContext, Result};
use async_trait::async_trait;
use chrono::Utc;

/// 请求耗时日志中间件
/// ```rust
/// use hush::middlewares::RequestTimeLogger;
/// let _ = RequestTimeLogger::new();
/// ```
#[derive(Default, Clone)]
pub struct RequestTimeLogger;

impl RequestTimeLogger {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl Handler for RequestTimeLogger {
    async fn call(&self, ctx: &mut RequestContext) -> Result<()> {
        let start_time = Utc::now();
        let res = ctx.next().await;
        let req_time = Utc::now() - start_time;
        let elapsed_ms = req_time.num_microseconds().unwrap_or(0) as f64 / 1000.0;

        let peer_addr = ctx
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string());
        let req = ctx.request();
        match &res {
            Ok(()) => {
                let status = ctx.response().status().as_u16();
                let length = ctx.response().body().len();
                if status >= 400 {
                    tracing::warn!(
                        "{} {} {} {:?} {} {} {}",
                        peer_addr,
                        req.method(),
                        req.uri(),
                        req.version(),
                        status,
                        length,
                        elapsed_ms
                    );
                } else {
                    tracing::info!(
                        "{} {} {} {:?} {} {} {}",
                        peer_addr,
                        req.method(),
                        req.uri(),
                        req.version(),
                        status,
                        length,
                        elapsed_ms
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    "{} {} {} {:?} {} {} {} {}",
                    peer_addr,
                    req.method(),
                    req.uri(),
                    req.version(),
                    e.status().as_u16(),
                    0,
                    elapsed_ms,
                    e
                );
            }
        }
        res
    }
}

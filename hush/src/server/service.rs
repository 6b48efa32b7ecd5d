use crate::core::pipeline::Pipeline;
use crate::core::pool::RequestContextPool;
use crate::log::*;
use crate::server::listener::Connection;
use crate::{HushError, Request, Response};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 单个连接的传输层参数
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnConfig {
    pub(crate) read_timeout: Duration,
    pub(crate) max_request_body_size: usize,
    pub(crate) disable_keepalive: bool,
}

/// 把 hyper 请求转交给流水线：获取上下文、执行调用链、归还上下文。
#[derive(Clone)]
pub(crate) struct HttpService {
    pipeline: Arc<Pipeline>,
    pool: RequestContextPool,
    peer: SocketAddr,
    max_body: usize,
}

impl HttpService {
    pub(crate) fn new(
        pipeline: Arc<Pipeline>,
        pool: RequestContextPool,
        peer: SocketAddr,
        max_body: usize,
    ) -> Self {
        Self {
            pipeline,
            pool,
            peer,
            max_body,
        }
    }

    pub(crate) async fn handle(self, req: hyper::Request<Incoming>) -> http::Response<Full<Bytes>> {
        let (parts, body) = req.into_parts();
        let body = match Limited::new(body, self.max_body).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                if err.downcast_ref::<LengthLimitError>().is_some() {
                    debug!(peer = %self.peer, limit = self.max_body, "request body too large");
                    return Response::from(HushError::BodyTooLarge).into_http();
                }
                debug!(peer = %self.peer, error = %err, "failed to read request body");
                return Response::from(HushError::business_error(
                    http::StatusCode::BAD_REQUEST,
                    "failed to read request body",
                ))
                .into_http();
            }
        };

        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let mut ctx = self
            .pool
            .acquire_routed(Request::from_parts(parts, body), &self.pipeline);
        ctx.set_remote_addr(self.peer);
        self.pipeline.dispatch(&mut ctx).await;
        let response = ctx.take_response();
        drop(ctx);

        #[cfg(feature = "metrics")]
        {
            use crate::server::metrics;
            if response.status().is_server_error() {
                metrics::record_handler_err();
            } else {
                metrics::record_handler_ok();
            }
            metrics::record_handler_duration(started.elapsed().as_nanos() as u64);
        }

        response.into_http()
    }
}

impl Service<hyper::Request<Incoming>> for HttpService {
    type Response = http::Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: hyper::Request<Incoming>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.handle(req).await) })
    }
}

/// 驱动一个 HTTP/1.1 或 HTTP/2 连接直到结束。
///
/// `shutdown` 触发后连接在处理完当前请求后关闭。
pub(crate) async fn serve_connection<C: Connection>(
    conn: C,
    service: HttpService,
    config: ConnConfig,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut builder = Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(config.read_timeout)
        .keep_alive(!config.disable_keepalive);

    let conn = builder.serve_connection(TokioIo::new(conn), service);
    tokio::pin!(conn);
    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => return res,
            _ = shutdown.cancelled(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

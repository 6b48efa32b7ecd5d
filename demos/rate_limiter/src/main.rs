use hush::middlewares::{RateLimiter, RateLimiterOptions, Recover, RequestTimeLogger, Timeout};
use hush::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    logger::fmt().with_max_level(Level::INFO).init();

    let options = ServerOptions {
        port: 8080,
        shutdown_timeout: Duration::from_secs(10),
        ..Default::default()
    };
    let mut server = Server::create(options)?;

    // 每个客户端 IP 每 10 秒最多 5 次请求
    server
        .hook(RequestTimeLogger::new())
        .hook(Recover::new())
        .hook(RateLimiter::new(RateLimiterOptions {
            max: 5,
            expiration: Duration::from_secs(10),
            ..Default::default()
        }));

    server.get("/", |ctx: &mut RequestContext| -> Result<()> {
        ctx.write_text("Hello, World!");
        Ok(())
    });
    server.handle(
        Method::GET,
        "/slow/{ms}",
        HandlerFn::new(|ctx: &mut RequestContext| {
            Box::pin(async move {
                let ms: u64 = ctx
                    .path_param("ms")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                ctx.write_text(format!("slept {ms}ms"));
                Ok(())
            })
        }),
        vec![Arc::new(Timeout::new(Duration::from_secs(1))) as Arc<dyn Handler>],
    );

    server.start().await?;
    if let Some(addr) = server.local_addr() {
        info!("try: curl -i http://{addr}/");
    }

    tokio::signal::ctrl_c().await?;
    server.stop().await
}

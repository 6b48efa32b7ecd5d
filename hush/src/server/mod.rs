mod config;
mod graceful;
pub(crate) mod listener;
#[cfg(feature = "metrics")]
pub mod metrics;
mod service;
mod state;

pub use config::{ListenErrorHandler, ServerOptions};
pub use graceful::{GracefulConnection, GracefulListener};
pub use state::ServerState;

use crate::core::pipeline::Pipeline;
use crate::core::pool::RequestContextPool;
use crate::core::trusted_proxy::TrustedProxies;
use crate::log::*;
use crate::route::{Endpoint, RouteTable};
use crate::{Handler, HushError, Result};
use http::Method;
use listener::{Listen, Listener};
use service::{ConnConfig, HttpService};
use state::AtomicState;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// 关停结果，所有 `stop` 调用方看到同一个结果
#[derive(Debug, Clone)]
enum StopOutcome {
    Clean,
    TimedOut(Duration),
    Failed(String),
}

struct Shared {
    state: AtomicState,
    state_changed: Notify,
    shutdown: CancellationToken,
    local_addr: OnceLock<SocketAddr>,
    outcome: OnceLock<StopOutcome>,
}

impl Shared {
    fn set_state(&self, from: ServerState, to: ServerState) -> bool {
        let changed = self.state.transition(from, to).is_ok();
        if changed {
            self.state_changed.notify_waiters();
        }
        changed
    }

    fn outcome(&self) -> Result<()> {
        match self.outcome.get() {
            Some(StopOutcome::TimedOut(timeout)) => Err(HushError::ShutdownTimeout(*timeout)),
            Some(StopOutcome::Failed(msg)) => Err(io::Error::other(msg.clone()).into()),
            _ => Ok(()),
        }
    }
}

/// 可嵌入的 HTTP 服务器。
///
/// 路由与中间件在 `start` 之前注册，启动时生成只读快照；
/// 之后的注册不影响正在运行的实例。
///
/// ```no_run
/// use hush::{RequestContext, Result, Server, ServerOptions};
///
/// # async fn run() -> Result<()> {
/// let mut server = Server::create(ServerOptions {
///     port: 8080,
///     ..Default::default()
/// })?;
/// server.get("/", |ctx: &mut RequestContext| -> Result<()> {
///     ctx.write_text("hello");
///     Ok(())
/// });
/// server.start().await?;
/// tokio::signal::ctrl_c().await?;
/// server.stop().await
/// # }
/// ```
pub struct Server {
    options: ServerOptions,
    middlewares: Vec<Arc<dyn Handler>>,
    routes: RouteTable,
    trusted_proxies: TrustedProxies,
    pool: RequestContextPool,
    shared: Arc<Shared>,
}

impl Server {
    /// 校验配置并创建服务器，配置错误在这里直接返回
    pub fn create(options: ServerOptions) -> Result<Self> {
        options.validate()?;
        let trusted_proxies = TrustedProxies::parse(&options.trusted_proxies)?;
        Ok(Self {
            options,
            middlewares: Vec::new(),
            routes: RouteTable::new(),
            trusted_proxies,
            pool: RequestContextPool::new(),
            shared: Arc::new(Shared {
                state: AtomicState::new(ServerState::NotStarted),
                state_changed: Notify::new(),
                shutdown: CancellationToken::new(),
                local_addr: OnceLock::new(),
                outcome: OnceLock::new(),
            }),
        })
    }

    /// 注册服务器级中间件，按注册顺序执行
    pub fn hook<H: Handler>(&mut self, middleware: H) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn get<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(Method::GET, path, handler, Vec::new())
    }

    pub fn head<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(Method::HEAD, path, handler, Vec::new())
    }

    pub fn options<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(Method::OPTIONS, path, handler, Vec::new())
    }

    pub fn post<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(Method::POST, path, handler, Vec::new())
    }

    pub fn put<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(Method::PUT, path, handler, Vec::new())
    }

    pub fn patch<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(Method::PATCH, path, handler, Vec::new())
    }

    pub fn delete<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(Method::DELETE, path, handler, Vec::new())
    }

    /// 注册带路由级中间件的处理器
    pub fn handle<H: Handler>(
        &mut self,
        method: Method,
        path: &str,
        handler: H,
        middlewares: Vec<Arc<dyn Handler>>,
    ) -> &mut Self {
        let endpoint = Endpoint::new(Arc::new(handler)).with_middlewares(middlewares);
        self.routes.insert(method, path, endpoint);
        self
    }

    pub fn state(&self) -> ServerState {
        self.shared.state.load()
    }

    /// 实际监听地址，启动成功后可用
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr.get().copied()
    }

    /// 绑定配置中的地址并开始服务
    pub async fn start(&self) -> Result<()> {
        self.begin_start()?;
        let addr = match self.options.socket_addr() {
            Ok(addr) => addr,
            Err(err) => return Err(self.abort_start(err)),
        };
        match Listener::bind(addr).await {
            Ok(listener) => self.launch(listener),
            Err(err) => {
                error!(server = %self.options.name, %addr, error = %err, "failed to bind");
                Err(self.abort_start(err.into()))
            }
        }
    }

    /// 使用外部提供的监听器开始服务
    pub async fn start_with_listener<L: Listen + 'static>(&self, listener: L) -> Result<()> {
        self.begin_start()?;
        self.launch(listener)
    }

    fn begin_start(&self) -> Result<()> {
        self.shared
            .state
            .transition(ServerState::NotStarted, ServerState::Starting)
            .map_err(|actual| HushError::InvalidState {
                expected: ServerState::NotStarted.as_str(),
                actual: actual.as_str(),
            })?;
        self.shared.state_changed.notify_waiters();
        Ok(())
    }

    fn abort_start(&self, err: HushError) -> HushError {
        self.shared
            .set_state(ServerState::Starting, ServerState::NotStarted);
        err
    }

    fn launch<L: Listen + 'static>(&self, listener: L) -> Result<()> {
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(err) => return Err(self.abort_start(err.into())),
        };
        let _ = self.shared.local_addr.set(local_addr);

        let accept = AcceptLoop {
            shared: self.shared.clone(),
            listener: GracefulListener::new(listener, self.options.shutdown_timeout),
            pipeline: Arc::new(self.pipeline()),
            pool: self.pool.clone(),
            conn: ConnConfig {
                read_timeout: self.options.read_timeout,
                max_request_body_size: self.options.max_request_body_size,
                disable_keepalive: self.options.disable_keepalive,
            },
            permits: Arc::new(Semaphore::new(self.options.concurrency)),
            listen_error_handler: self.options.listen_error_handler.clone(),
            name: self.options.name.clone(),
        };

        self.shared
            .set_state(ServerState::Starting, ServerState::Running);
        tokio::spawn(accept.run());
        info!(server = %self.options.name, "listening on {}", local_addr);
        Ok(())
    }

    fn pipeline(&self) -> Pipeline {
        let mut pipeline = Pipeline::new(Arc::new(self.routes.clone()))
            .with_middlewares(self.middlewares.clone())
            .with_trusted_proxies(self.trusted_proxies.clone());
        if let Some(handler) = &self.options.not_found_handler {
            pipeline = pipeline.with_not_found(handler.clone());
        }
        if let Some(handler) = &self.options.method_not_allowed_handler {
            pipeline = pipeline.with_method_not_allowed(handler.clone());
        }
        if let Some(handler) = self.options.request_error_handler.clone() {
            pipeline = pipeline.with_error_handler(move |ctx, err| handler(ctx, err));
        }
        pipeline
    }

    /// 停止服务并等待关停完成。
    ///
    /// 并发调用时只有一个调用方真正触发关停，其余等待同一结果。
    /// 从未启动的服务器直接返回 `Ok(())`。
    pub async fn stop(&self) -> Result<()> {
        loop {
            let notified = self.shared.state_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.shared.state.load() {
                ServerState::NotStarted => return Ok(()),
                ServerState::Stopped => return self.shared.outcome(),
                ServerState::Running => {
                    if self
                        .shared
                        .set_state(ServerState::Running, ServerState::Stopping)
                    {
                        info!(server = %self.options.name, "shutting down");
                        self.shared.shutdown.cancel();
                    }
                }
                ServerState::Starting | ServerState::Stopping => notified.await,
            }
        }
    }
}

struct AcceptLoop<L> {
    shared: Arc<Shared>,
    listener: GracefulListener<L>,
    pipeline: Arc<Pipeline>,
    pool: RequestContextPool,
    conn: ConnConfig,
    permits: Arc<Semaphore>,
    listen_error_handler: Option<ListenErrorHandler>,
    name: String,
}

impl<L: Listen + 'static> AcceptLoop<L> {
    async fn run(mut self) {
        let mut connections: JoinSet<()> = JoinSet::new();
        let fatal = loop {
            tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => break None,
                accepted = self.listener.accept() => match accepted {
                    Ok((conn, peer)) => {
                        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                            warn!(server = %self.name, %peer, "too many connections, dropping");
                            #[cfg(feature = "metrics")]
                            metrics::record_connection_rejected();
                            continue;
                        };
                        #[cfg(feature = "metrics")]
                        metrics::record_accept_ok();
                        let service = HttpService::new(
                            self.pipeline.clone(),
                            self.pool.clone(),
                            peer,
                            self.conn.max_request_body_size,
                        );
                        let config = self.conn;
                        let shutdown = self.shared.shutdown.clone();
                        connections.spawn(async move {
                            let _permit = permit;
                            if let Err(err) = service::serve_connection(conn, service, config, shutdown).await {
                                debug!(%peer, error = %err, "connection closed with error");
                            }
                        });
                    }
                    Err(err) if is_transient(&err) => {
                        #[cfg(feature = "metrics")]
                        metrics::record_accept_err();
                        warn!(server = %self.name, error = %err, "accept connection failed");
                    }
                    Err(err) => {
                        #[cfg(feature = "metrics")]
                        metrics::record_accept_err();
                        error!(server = %self.name, error = %err, "listener failed");
                        break Some(err);
                    }
                },
                Some(joined) = connections.join_next() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            error!(error = ?err, "connection task panicked");
                        }
                    }
                }
            }
        };

        if let Some(err) = fatal {
            if self
                .shared
                .set_state(ServerState::Running, ServerState::Stopping)
            {
                info!(server = %self.name, "shutting down after listener failure");
            }
            if let Some(handler) = &self.listen_error_handler {
                handler(&err);
            }
            self.shared.shutdown.cancel();
        }

        let outcome = match self.listener.close().await {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                metrics::record_graceful_shutdown();
                info!(server = %self.name, "all connections closed");
                StopOutcome::Clean
            }
            Err(HushError::ShutdownTimeout(timeout)) => {
                #[cfg(feature = "metrics")]
                metrics::record_forced_shutdown();
                warn!(
                    server = %self.name,
                    remaining = self.listener.active_connections(),
                    "connections still open after {:?}, aborting",
                    timeout
                );
                StopOutcome::TimedOut(timeout)
            }
            Err(err) => {
                #[cfg(feature = "metrics")]
                metrics::record_forced_shutdown();
                error!(server = %self.name, error = %err, "failed to close listener");
                StopOutcome::Failed(err.to_string())
            }
        };

        connections.abort_all();
        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    error!(error = ?err, "connection task panicked during shutdown");
                }
            }
        }

        let _ = self.shared.outcome.set(outcome);
        self.shared
            .set_state(ServerState::Stopping, ServerState::Stopped);
        info!(server = %self.name, "stopped");
    }
}

/// 只影响单个连接的 accept 错误，监听器本身仍可继续工作
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

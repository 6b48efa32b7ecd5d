mod core;
mod error;
mod handler;
pub mod log;
pub mod middleware;
pub mod prelude;
mod route;
mod server;
mod storage;

pub use crate::core::context::RequestContext;
pub use crate::core::pipeline::{ErrorHandler, Pipeline, default_error_handler};
pub use crate::core::pool::{PooledContext, RequestContextPool};
pub use crate::core::trusted_proxy::TrustedProxies;
pub use crate::core::{request::Request, response::Response};
pub use crate::middleware::middlewares;
pub use crate::route::{Endpoint, RouteMatch, RouteTable, Router};
#[cfg(feature = "metrics")]
pub use crate::server::metrics;
pub use crate::server::listener::{AcceptFuture, BoxedConnection, Connection, Listen, Listener};
pub use crate::server::{
    GracefulConnection, GracefulListener, ListenErrorHandler, Server, ServerOptions, ServerState,
};
pub use crate::storage::{MemoryStorage, Storage};
pub use error::HushError;
pub use error::HushResult as Result;
pub use handler::{Handler, HandlerFn};
pub use http::{Method, StatusCode, header};

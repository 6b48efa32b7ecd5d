pub use crate::log::*;
pub use crate::middleware::middlewares::*;
pub use crate::{
    Endpoint, Handler, HandlerFn, HushError, MemoryStorage, Method, Pipeline, Request,
    RequestContext, RequestContextPool, Response, Result, RouteTable, Server, ServerOptions,
    ServerState, StatusCode, Storage,
};
pub use tracing_subscriber as logger;

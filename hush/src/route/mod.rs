use crate::Handler;
use crate::core::context::HandlerList;
use http::Method;
use std::collections::HashMap;
use std::sync::Arc;

mod table;
pub use table::RouteTable;

/// 路由命中的终端处理器及其路由级中间件
#[derive(Clone)]
pub struct Endpoint {
    pub handler: Arc<dyn Handler>,
    pub middlewares: HandlerList,
}

impl Endpoint {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            handler,
            middlewares: Arc::from(Vec::new()),
        }
    }

    pub fn with_middlewares<M: Into<HandlerList>>(mut self, middlewares: M) -> Self {
        self.middlewares = middlewares.into();
        self
    }
}

/// 路由解析结果。未命中与方法不匹配是两种不同的结果。
pub enum RouteMatch {
    Found {
        endpoint: Endpoint,
        params: HashMap<String, String>,
    },
    NotFound,
    MethodNotAllowed {
        allowed: Vec<Method>,
    },
}

impl RouteMatch {
    pub fn is_found(&self) -> bool {
        matches!(self, RouteMatch::Found { .. })
    }
}

/// 路由器：根据方法与路径给出终端处理器。
///
/// 每个请求在调用链到达解析位置时调用一次。
pub trait Router: Send + Sync + 'static {
    fn resolve(&self, method: &Method, path: &str) -> RouteMatch;
}

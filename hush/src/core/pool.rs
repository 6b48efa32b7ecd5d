use crate::core::context::{HandlerList, RequestContext};
use crate::core::pipeline::Pipeline;
use crate::{Handler, Request};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

const DEFAULT_MAX_IDLE: usize = 1024;

struct PoolInner {
    free: Mutex<Vec<Box<RequestContext>>>,
    max_idle: usize,
}

/// 请求上下文对象池。
///
/// 获取到的 [`PooledContext`] 在 drop 时自动清空并归还，
/// 因此被回收的上下文不会再持有上一个请求的任何数据。
/// 空闲数量超过上限的上下文直接释放。
#[derive(Clone)]
pub struct RequestContextPool {
    inner: Arc<PoolInner>,
}

impl Default for RequestContextPool {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContextPool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    /// 指定最多保留的空闲上下文数量
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                max_idle,
            }),
        }
    }

    /// 获取一个绑定了固定调用链的上下文，游标位于链外起点。
    pub fn acquire<S, R>(
        &self,
        request: Request,
        handler: Arc<dyn Handler>,
        server_middlewares: S,
        route_middlewares: R,
    ) -> PooledContext
    where
        S: Into<HandlerList>,
        R: Into<HandlerList>,
    {
        let mut ctx = self.take();
        ctx.bind(
            request,
            handler,
            server_middlewares.into(),
            route_middlewares.into(),
        );
        self.wrap(ctx)
    }

    /// 获取一个绑定服务器流水线的上下文，终端处理器在执行到路由位置时解析。
    pub fn acquire_routed(&self, request: Request, pipeline: &Arc<Pipeline>) -> PooledContext {
        let mut ctx = self.take();
        ctx.bind_pipeline(request, pipeline);
        self.wrap(ctx)
    }

    /// 显式归还，等价于直接 drop。
    pub fn release(&self, ctx: PooledContext) {
        drop(ctx);
    }

    /// 当前空闲的上下文数量
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }

    fn take(&self) -> Box<RequestContext> {
        self.inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| Box::new(RequestContext::new()))
    }

    fn wrap(&self, ctx: Box<RequestContext>) -> PooledContext {
        PooledContext {
            ctx: Some(ctx),
            pool: self.inner.clone(),
        }
    }
}

/// 从对象池借出的上下文
pub struct PooledContext {
    ctx: Option<Box<RequestContext>>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledContext {
    type Target = RequestContext;

    fn deref(&self) -> &Self::Target {
        // ctx 只在 drop 中取出
        self.ctx.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        let Some(mut ctx) = self.ctx.take() else {
            return;
        };
        ctx.reset();
        let mut free = self.pool.free.lock();
        if free.len() < self.pool.max_idle {
            free.push(ctx);
        }
    }
}

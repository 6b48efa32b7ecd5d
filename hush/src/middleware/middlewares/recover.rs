use crate::{Handler, HushError, RequestContext, Result};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};

type PanicHandler = Arc<dyn Fn(&mut RequestContext, RecoveredPanic) -> Result<()> + Send + Sync>;

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static BACKTRACE_HOOK: Once = Once::new();

/// 在进程的 panic hook 前插入一层，把 panic 现场的调用栈存入当前线程。
/// 原有 hook 仍会被调用。
fn install_backtrace_hook() {
    BACKTRACE_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            previous(info);
        }));
    });
}

/// 被捕获的 panic
#[derive(Debug)]
pub struct RecoveredPanic {
    /// panic 携带的消息
    pub message: String,
    /// panic 发生处的调用栈，仅在启用 [`Recover::capture_backtrace`] 时存在
    pub backtrace: Option<Backtrace>,
}

/// 捕获后续调用链中的 panic，转换为普通错误。
///
/// 默认记录错误日志并返回 500；也可以提供自定义处理器写出响应。
#[derive(Default, Clone)]
pub struct Recover {
    handler: Option<PanicHandler>,
    capture_backtrace: bool,
}

impl Recover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&mut RequestContext, RecoveredPanic) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Arc::new(handler)),
            capture_backtrace: false,
        }
    }

    /// 记录 panic 现场的调用栈。
    ///
    /// 启用后会在全局 panic hook 前插入一层捕获逻辑，进程内每次 panic 都会采集一次调用栈。
    pub fn capture_backtrace(mut self) -> Self {
        install_backtrace_hook();
        self.capture_backtrace = true;
        self
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl Handler for Recover {
    async fn call(&self, ctx: &mut RequestContext) -> Result<()> {
        let cursor = ctx.cursor();
        let res = AssertUnwindSafe(ctx.next()).catch_unwind().await;
        let payload = match res {
            Ok(res) => return res,
            Err(payload) => payload,
        };
        // panic 与 catch_unwind 在同一次 poll 中发生，调用栈留在当前线程
        let backtrace = LAST_BACKTRACE.with(|slot| slot.borrow_mut().take());
        ctx.restore_cursor(cursor);
        ctx.response_mut().clear();
        let panic = RecoveredPanic {
            message: panic_message(payload.as_ref()),
            backtrace: if self.capture_backtrace {
                backtrace
            } else {
                None
            },
        };
        match &self.handler {
            Some(handler) => handler(ctx, panic),
            None => {
                match &panic.backtrace {
                    Some(backtrace) => tracing::error!(
                        method = %ctx.request().method(),
                        path = ctx.request().path(),
                        "recovered from panic: {}\n{}",
                        panic.message,
                        backtrace
                    ),
                    None => tracing::error!(
                        method = %ctx.request().method(),
                        path = ctx.request().path(),
                        "recovered from panic: {}",
                        panic.message
                    ),
                }
                Err(HushError::AnyhowError(anyhow::anyhow!(
                    "unhandled panic: {}",
                    panic.message
                )))
            }
        }
    }
}

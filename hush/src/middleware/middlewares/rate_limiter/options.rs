use crate::storage::Storage;
use crate::{RequestContext, Result};
use chrono::Utc;
use http::HeaderName;
use std::sync::Arc;
use std::time::Duration;

/// 从请求中生成限流键
pub type KeyGenerator = Arc<dyn Fn(&RequestContext) -> Vec<u8> + Send + Sync>;

/// 超出限制时代替后续调用链执行
pub type LimitReachedHandler = Arc<dyn Fn(&mut RequestContext) -> Result<()> + Send + Sync>;

/// 限流器使用的时钟，单位为 unix 秒
pub trait RateLimitClock: Send + Sync + 'static {
    fn now(&self) -> u64;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl RateLimitClock for SystemClock {
    fn now(&self) -> u64 {
        u64::try_from(Utc::now().timestamp()).unwrap_or(0)
    }
}

/// 限流相关响应头的名称
#[derive(Debug, Clone)]
pub struct RateLimitHeaders {
    pub limit: HeaderName,
    pub remaining: HeaderName,
    pub reset: HeaderName,
    pub retry_after: HeaderName,
}

impl Default for RateLimitHeaders {
    fn default() -> Self {
        Self {
            limit: HeaderName::from_static("x-ratelimit-limit"),
            remaining: HeaderName::from_static("x-ratelimit-remaining"),
            reset: HeaderName::from_static("x-ratelimit-reset"),
            retry_after: http::header::RETRY_AFTER,
        }
    }
}

/// 限流器配置
///
/// ```rust
/// use hush::middlewares::RateLimiterOptions;
/// use std::time::Duration;
///
/// let options = RateLimiterOptions {
///     max: 100,
///     expiration: Duration::from_secs(60),
///     skip_failed_requests: true,
///     ..Default::default()
/// };
/// # let _ = options;
/// ```
#[derive(Clone)]
pub struct RateLimiterOptions {
    /// 窗口内允许的最大请求数，0 表示使用默认值 10
    pub max: u32,
    /// 窗口长度，按整秒计算；为零时使用默认值 60 秒
    pub expiration: Duration,
    /// 限流键，默认为对端 IP
    pub key_generator: Option<KeyGenerator>,
    /// 超出限制时的处理器，默认返回 429
    pub limit_reached: Option<LimitReachedHandler>,
    /// 为真时失败的请求（错误或状态码 >= 400）不计入限额
    pub skip_failed_requests: bool,
    /// 外部存储，未设置时使用进程内存储
    pub storage: Option<Arc<dyn Storage>>,
    /// 进程内存储的容量（字节），按每条记录 16 字节换算
    pub max_memory_cache_size: usize,
    pub headers: RateLimitHeaders,
    pub clock: Option<Arc<dyn RateLimitClock>>,
}

impl Default for RateLimiterOptions {
    fn default() -> Self {
        Self {
            max: 10,
            expiration: Duration::from_secs(60),
            key_generator: None,
            limit_reached: None,
            skip_failed_requests: false,
            storage: None,
            max_memory_cache_size: 0,
            headers: RateLimitHeaders::default(),
            clock: None,
        }
    }
}

impl RateLimiterOptions {
    pub fn with_key_generator<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> Vec<u8> + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(f));
        self
    }

    pub fn with_limit_reached<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext) -> Result<()> + Send + Sync + 'static,
    {
        self.limit_reached = Some(Arc::new(f));
        self
    }

    pub fn with_storage<S: Storage>(mut self, storage: S) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    pub fn with_clock<C: RateLimitClock>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }
}

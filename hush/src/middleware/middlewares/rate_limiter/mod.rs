use crate::storage::{MemoryStorage, Storage};
use crate::{Handler, RequestContext, Result};
use async_trait::async_trait;
use http::HeaderValue;
use rustc_hash::FxHasher;
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

mod entry;
mod options;

use entry::RateLimiterEntry;
pub use options::{
    KeyGenerator, LimitReachedHandler, RateLimitClock, RateLimitHeaders, RateLimiterOptions,
    SystemClock,
};

/// 分片锁数量，必须是 2 的幂
const SHARD_COUNT: usize = 16;
const DEFAULT_MAX: u32 = 10;
const DEFAULT_WINDOW_SECS: u64 = 60;
const MIN_MEMORY_ENTRIES: usize = 100_000;
/// 窗口长度上限：一年
const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// 滑动窗口限流中间件。
///
/// 每个键保存当前窗口与上一窗口的命中数，用上一窗口按剩余时间加权的方式近似连续滑动窗口，
/// 不需要记录每个请求的时间戳。同一键的读改写在对应分片锁内完成。
///
/// 存储读写失败时请求以 [`HushError::Storage`](crate::HushError::Storage) 失败，
/// 既不放行也不按超限处理。
///
/// ```rust
/// use hush::middlewares::{RateLimiter, RateLimiterOptions};
/// use std::time::Duration;
///
/// let _ = RateLimiter::new(RateLimiterOptions {
///     max: 5,
///     expiration: Duration::from_secs(1),
///     ..Default::default()
/// });
/// ```
pub struct RateLimiter {
    max: u32,
    window: u64,
    key_generator: KeyGenerator,
    limit_reached: LimitReachedHandler,
    skip_failed_requests: bool,
    storage: Arc<dyn Storage>,
    headers: RateLimitHeaders,
    clock: Arc<dyn RateLimitClock>,
    shards: [Mutex<()>; SHARD_COUNT],
}

fn remote_ip_key(ctx: &RequestContext) -> Vec<u8> {
    ctx.remote_ip()
        .map(|ip| ip.to_string().into_bytes())
        .unwrap_or_default()
}

fn too_many_requests(ctx: &mut RequestContext) -> Result<()> {
    ctx.too_many_requests("");
    Ok(())
}

impl RateLimiter {
    pub fn new(options: RateLimiterOptions) -> Self {
        let max = if options.max == 0 {
            DEFAULT_MAX
        } else {
            options.max
        };
        let window = if options.expiration.is_zero() {
            DEFAULT_WINDOW_SECS
        } else {
            options.expiration.as_secs().clamp(1, MAX_WINDOW_SECS)
        };
        let storage = options.storage.unwrap_or_else(|| {
            let entries = options
                .max_memory_cache_size
                .div_ceil(entry::ENTRY_SIZE)
                .max(MIN_MEMORY_ENTRIES);
            Arc::new(MemoryStorage::new(entries))
        });
        Self {
            max,
            window,
            key_generator: options
                .key_generator
                .unwrap_or_else(|| Arc::new(remote_ip_key)),
            limit_reached: options
                .limit_reached
                .unwrap_or_else(|| Arc::new(too_many_requests)),
            skip_failed_requests: options.skip_failed_requests,
            storage,
            headers: options.headers,
            clock: options.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            shards: std::array::from_fn(|_| Mutex::new(())),
        }
    }

    fn shard(&self, key: &[u8]) -> &Mutex<()> {
        let mut hasher = FxHasher::default();
        hasher.write(key);
        &self.shards[hasher.finish() as usize & (SHARD_COUNT - 1)]
    }

    async fn load(&self, key: &[u8]) -> Result<RateLimiterEntry> {
        let raw = self.storage.get(key).await.inspect_err(|err| {
            tracing::error!(error = %err, "rate limiter storage read failed");
        })?;
        Ok(raw
            .map(|raw| RateLimiterEntry::decode(&raw))
            .unwrap_or_default())
    }

    async fn save(&self, key: &[u8], entry: &RateLimiterEntry, ttl_secs: u64) -> Result<()> {
        self.storage
            .set(key, entry.encode().to_vec(), Duration::from_secs(ttl_secs))
            .await
            .inspect_err(|err| {
                tracing::error!(error = %err, "rate limiter storage write failed");
            })
    }

    /// 计入一次命中，返回计数后的记录、距窗口结束的秒数与剩余额度
    async fn hit(&self, key: &[u8]) -> Result<(RateLimiterEntry, u64, i64)> {
        let _guard = self.shard(key).lock().await;
        let now = self.clock.now();
        let mut entry = self.load(key).await?;
        entry.roll(now, self.window);
        entry.curr_hits = entry.curr_hits.saturating_add(1);
        let reset = entry.reset_after(now);
        let rate = entry.rate(reset, self.window);
        let remaining = i64::from(self.max) - i64::try_from(rate).unwrap_or(i64::MAX);
        self.save(key, &entry, reset.saturating_add(self.window))
            .await?;
        Ok((entry, reset, remaining))
    }

    /// 撤销一次失败请求的命中。
    ///
    /// 记录的窗口未变化时从当前窗口扣除；期间窗口已推进时，这次命中已经转入上一窗口，从上一窗口扣除。
    async fn refund(&self, key: &[u8], counted: &RateLimiterEntry) -> Result<bool> {
        let _guard = self.shard(key).lock().await;
        let mut entry = self.load(key).await?;
        let counter = if entry.exp == counted.exp {
            &mut entry.curr_hits
        } else {
            &mut entry.prev_hits
        };
        if *counter == 0 {
            return Ok(false);
        }
        *counter -= 1;
        let reset = entry.reset_after(self.clock.now());
        self.save(key, &entry, reset.saturating_add(self.window))
            .await?;
        Ok(true)
    }

    fn set_header(ctx: &mut RequestContext, name: &http::HeaderName, value: impl ToString) {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            ctx.set_response_header(name.clone(), value);
        }
    }
}

#[async_trait]
impl Handler for RateLimiter {
    async fn call(&self, ctx: &mut RequestContext) -> Result<()> {
        let key = (self.key_generator)(ctx);
        let (counted, reset, mut remaining) = self.hit(&key).await?;

        if remaining < 0 {
            tracing::debug!(
                key = %String::from_utf8_lossy(&key),
                limit = self.max,
                retry_after = reset,
                "rate limit reached"
            );
            #[cfg(feature = "metrics")]
            crate::server::metrics::record_rate_limited();
            (self.limit_reached)(ctx)?;
            if !ctx.response().headers().contains_key(&self.headers.retry_after) {
                Self::set_header(ctx, &self.headers.retry_after, reset);
            }
            return Ok(());
        }

        let res = ctx.next().await;

        if self.skip_failed_requests
            && (res.is_err() || ctx.response().is_failure())
            && self.refund(&key, &counted).await?
        {
            remaining += 1;
        }

        Self::set_header(ctx, &self.headers.limit, self.max);
        Self::set_header(ctx, &self.headers.remaining, remaining);
        Self::set_header(ctx, &self.headers.reset, reset);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pool::RequestContextPool;
    use crate::{HushError, Request};
    use http::StatusCode;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct ManualClock(Arc<AtomicU64>);

    impl ManualClock {
        fn at(secs: u64) -> Self {
            Self(Arc::new(AtomicU64::new(secs)))
        }

        fn advance(&self, secs: u64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl RateLimitClock for ManualClock {
        fn now(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct FailingStorage;

    #[async_trait]
    impl Storage for FailingStorage {
        async fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>> {
            Err(HushError::storage(std::io::Error::other("connection refused")))
        }
        async fn set(&self, _key: &[u8], _value: Vec<u8>, _ttl: Duration) -> Result<()> {
            Err(HushError::storage(std::io::Error::other("connection refused")))
        }
        async fn delete(&self, _key: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn reset(&self) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// 读取正常、写入失败的存储
    #[derive(Default)]
    struct ReadOnlyStorage {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl Storage for ReadOnlyStorage {
        async fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn set(&self, _key: &[u8], _value: Vec<u8>, _ttl: Duration) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(HushError::storage(std::io::Error::other("read-only replica")))
        }
        async fn delete(&self, _key: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn reset(&self) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        pool: RequestContextPool,
        limiter: Arc<dyn Handler>,
        calls: Arc<AtomicUsize>,
        status: StatusCode,
    }

    impl Harness {
        fn new(options: RateLimiterOptions) -> Self {
            Self {
                pool: RequestContextPool::new(),
                limiter: Arc::new(RateLimiter::new(
                    options.with_key_generator(|_ctx: &RequestContext| b"client".to_vec()),
                )),
                calls: Arc::new(AtomicUsize::new(0)),
                status: StatusCode::OK,
            }
        }

        async fn send(&self) -> (Result<()>, crate::Response) {
            let calls = self.calls.clone();
            let status = self.status;
            let mut ctx = self.pool.acquire(
                Request::empty(),
                Arc::new(move |ctx: &mut RequestContext| -> Result<()> {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ctx.response_mut().set_status(status);
                    Ok(())
                }),
                vec![self.limiter.clone()],
                Vec::<Arc<dyn Handler>>::new(),
            );
            let res = ctx.next().await;
            (res, ctx.take_response())
        }
    }

    fn header<'a>(res: &'a crate::Response, name: &str) -> Option<&'a str> {
        res.headers().get(name).and_then(|v| v.to_str().ok())
    }

    // ==================== 限额测试 ====================

    #[tokio::test]
    async fn test_limit_and_remaining() {
        let h = Harness::new(
            RateLimiterOptions {
                max: 5,
                expiration: Duration::from_secs(1),
                ..Default::default()
            }
            .with_clock(ManualClock::at(1_000)),
        );
        for expected in ["4", "3", "2", "1", "0"] {
            let (res, response) = h.send().await;
            res.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(header(&response, "x-ratelimit-limit"), Some("5"));
            assert_eq!(header(&response, "x-ratelimit-remaining"), Some(expected));
        }

        let (res, response) = h.send().await;
        res.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry: u64 = header(&response, "retry-after").unwrap().parse().unwrap();
        assert!(retry > 0);
        assert_eq!(h.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_rollover_decays_instead_of_resetting() {
        let clock = ManualClock::at(100);
        let h = Harness::new(
            RateLimiterOptions {
                max: 10,
                expiration: Duration::from_secs(10),
                ..Default::default()
            }
            .with_clock(clock.clone()),
        );
        for _ in 0..10 {
            h.send().await.0.unwrap();
        }
        // 窗口结束 2 秒后：上一窗口 10 次按 8/10 加权，再加本次 1 次
        clock.advance(12);
        let (_, response) = h.send().await;
        assert_eq!(header(&response, "x-ratelimit-remaining"), Some("1"));

        clock.advance(6);
        let (_, response) = h.send().await;
        assert_eq!(header(&response, "x-ratelimit-remaining"), Some("6"));
    }

    #[tokio::test]
    async fn test_custom_limit_reached_keeps_retry_after() {
        let h = Harness::new(
            RateLimiterOptions {
                max: 1,
                ..Default::default()
            }
            .with_clock(ManualClock::at(5_000))
            .with_limit_reached(|ctx: &mut RequestContext| {
                ctx.service_unavailable("slow down");
                ctx.set_response_header(
                    http::header::RETRY_AFTER,
                    HeaderValue::from_static("3600"),
                );
                Ok(())
            }),
        );
        h.send().await.0.unwrap();
        let (_, response) = h.send().await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(header(&response, "retry-after"), Some("3600"));
    }

    #[tokio::test]
    async fn test_custom_header_names() {
        let h = Harness::new(
            RateLimiterOptions {
                max: 3,
                headers: RateLimitHeaders {
                    limit: http::HeaderName::from_static("ratelimit-limit"),
                    remaining: http::HeaderName::from_static("ratelimit-remaining"),
                    reset: http::HeaderName::from_static("ratelimit-reset"),
                    retry_after: http::header::RETRY_AFTER,
                },
                ..Default::default()
            }
            .with_clock(ManualClock::at(10)),
        );
        let (_, response) = h.send().await;
        assert_eq!(header(&response, "ratelimit-remaining"), Some("2"));
        assert_eq!(header(&response, "ratelimit-reset"), Some("60"));
        assert!(header(&response, "x-ratelimit-limit").is_none());
    }

    // ==================== 失败请求测试 ====================

    #[tokio::test]
    async fn test_skip_failed_requests() {
        let mut h = Harness::new(
            RateLimiterOptions {
                max: 2,
                skip_failed_requests: true,
                ..Default::default()
            }
            .with_clock(ManualClock::at(1_000)),
        );
        h.status = StatusCode::BAD_REQUEST;
        for _ in 0..5 {
            let (_, response) = h.send().await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(header(&response, "x-ratelimit-remaining"), Some("2"));
        }
        h.status = StatusCode::OK;
        let (_, response) = h.send().await;
        assert_eq!(header(&response, "x-ratelimit-remaining"), Some("1"));
    }

    #[tokio::test]
    async fn test_failed_requests_counted_by_default() {
        let mut h = Harness::new(
            RateLimiterOptions {
                max: 2,
                ..Default::default()
            }
            .with_clock(ManualClock::at(1_000)),
        );
        h.status = StatusCode::INTERNAL_SERVER_ERROR;
        h.send().await.0.unwrap();
        h.send().await.0.unwrap();
        let (_, response) = h.send().await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_refund_after_rollover_hits_previous_window() {
        let clock = ManualClock::at(1_000);
        let limiter = RateLimiter::new(
            RateLimiterOptions {
                max: 10,
                expiration: Duration::from_secs(10),
                ..Default::default()
            }
            .with_clock(clock.clone()),
        );
        let (counted, _, _) = limiter.hit(b"k").await.unwrap();
        // 另一请求在窗口结束后推进了记录
        clock.advance(10);
        limiter.hit(b"k").await.unwrap();
        assert!(limiter.refund(b"k", &counted).await.unwrap());

        let entry = limiter.load(b"k").await.unwrap();
        assert_eq!(entry.prev_hits, 0);
        assert_eq!(entry.curr_hits, 1);
    }

    // ==================== 存储故障测试 ====================

    #[tokio::test]
    async fn test_storage_failure_is_fail_closed() {
        let h = Harness::new(RateLimiterOptions::default().with_storage(FailingStorage));
        let (res, _) = h.send().await;
        assert!(matches!(res, Err(HushError::Storage(_))));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    // ==================== 并发测试 ====================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_hits_are_serialized() {
        let clock = ManualClock::at(1_000);
        let limiter = Arc::new(RateLimiter::new(
            RateLimiterOptions {
                max: 1_000,
                ..Default::default()
            }
            .with_clock(clock),
        ));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    limiter.hit(b"shared").await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let entry = limiter.load(b"shared").await.unwrap();
        assert_eq!(entry.curr_hits, 200);
    }

    #[test]
    fn test_default_options() {
        let limiter = RateLimiter::new(RateLimiterOptions {
            max: 0,
            expiration: Duration::ZERO,
            ..Default::default()
        });
        assert_eq!(limiter.max, 10);
        assert_eq!(limiter.window, 60);
    }

    // ==================== 配置边界测试 ====================

    #[tokio::test]
    async fn test_huge_expiration_is_clamped() {
        let h = Harness::new(
            RateLimiterOptions {
                max: 2,
                expiration: Duration::MAX,
                ..Default::default()
            }
            .with_clock(ManualClock::at(1_700_000_000)),
        );
        let (res, response) = h.send().await;
        res.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-remaining"), Some("1"));
        assert_eq!(
            header(&response, "x-ratelimit-reset"),
            Some(MAX_WINDOW_SECS.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_clock_near_limit_does_not_overflow() {
        let h = Harness::new(
            RateLimiterOptions {
                max: 1,
                ..Default::default()
            }
            .with_clock(ManualClock::at(u64::MAX - 1)),
        );
        let (res, response) = h.send().await;
        res.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let (_, response) = h.send().await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_storage_write_failure_fails_closed() {
        let storage = Arc::new(ReadOnlyStorage::default());
        let mut options = RateLimiterOptions::default().with_clock(ManualClock::at(1_000));
        options.storage = Some(storage.clone());
        let h = Harness::new(options);

        let (res, _) = h.send().await;
        assert!(matches!(res, Err(HushError::Storage(_))));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
    }
}

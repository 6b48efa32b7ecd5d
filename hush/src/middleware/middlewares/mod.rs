mod conditional;
mod noop;
mod rate_limiter;
mod recover;
mod request_time_logger;
mod timeout;

pub use conditional::Conditional;
pub use noop::NoOp;
pub use rate_limiter::{
    KeyGenerator, LimitReachedHandler, RateLimitClock, RateLimitHeaders, RateLimiter,
    RateLimiterOptions, SystemClock,
};
pub use recover::{RecoveredPanic, Recover};
pub use request_time_logger::RequestTimeLogger;
pub use timeout::Timeout;

use crate::core::pipeline::ErrorHandler;
use crate::core::trusted_proxy::TrustedProxies;
use crate::{Handler, HushError, RequestContext, Result};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// 监听循环遇到致命错误时调用
pub type ListenErrorHandler = Arc<dyn Fn(&io::Error) + Send + Sync>;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_BODY_SIZE: usize = 4 * 1024 * 1024;
const DEFAULT_CONCURRENCY: usize = 256 * 1024;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// 服务器配置，在 [`Server::create`](crate::Server::create) 时校验。
///
/// ```
/// use hush::ServerOptions;
/// use std::time::Duration;
///
/// let options = ServerOptions {
///     port: 8080,
///     shutdown_timeout: Duration::from_secs(10),
///     ..Default::default()
/// };
/// assert!(options.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct ServerOptions {
    /// 服务名称，用于日志
    pub name: String,
    /// 监听地址（IP 或 `localhost`）
    pub address: String,
    /// 监听端口，0 表示由系统分配
    pub port: u16,
    /// 读取请求头的超时时间
    pub read_timeout: Duration,
    /// 请求体大小上限（字节）
    pub max_request_body_size: usize,
    pub disable_keepalive: bool,
    /// 同时服务的连接数上限，超出的连接直接关闭
    pub concurrency: usize,
    /// 优雅关停等待时间，超时后强制关闭剩余连接
    pub shutdown_timeout: Duration,
    /// 受信任的反向代理，单个 IP 或 CIDR 网段。为空时不信任任何转发头
    pub trusted_proxies: Vec<String>,
    pub listen_error_handler: Option<ListenErrorHandler>,
    pub request_error_handler: Option<ErrorHandler>,
    pub not_found_handler: Option<Arc<dyn Handler>>,
    pub method_not_allowed_handler: Option<Arc<dyn Handler>>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: "hush".to_string(),
            address: Ipv4Addr::LOCALHOST.to_string(),
            port: 0,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_request_body_size: DEFAULT_MAX_BODY_SIZE,
            disable_keepalive: false,
            concurrency: DEFAULT_CONCURRENCY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            trusted_proxies: Vec::new(),
            listen_error_handler: None,
            request_error_handler: None,
            not_found_handler: None,
            method_not_allowed_handler: None,
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("read_timeout", &self.read_timeout)
            .field("max_request_body_size", &self.max_request_body_size)
            .field("disable_keepalive", &self.disable_keepalive)
            .field("concurrency", &self.concurrency)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("trusted_proxies", &self.trusted_proxies)
            .finish_non_exhaustive()
    }
}

impl ServerOptions {
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.concurrency == 0 {
            return Err(HushError::InvalidConfig(
                "concurrency must be greater than zero".to_string(),
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(HushError::InvalidConfig(
                "shutdown timeout must be greater than zero".to_string(),
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(HushError::InvalidConfig(
                "read timeout must be greater than zero".to_string(),
            ));
        }
        TrustedProxies::parse(&self.trusted_proxies)?;
        Ok(())
    }

    /// 解析监听地址
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(HushError::InvalidConfig("address is empty".to_string()));
        }
        let ip = if address.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            address
                .trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<IpAddr>()
                .map_err(|_| HushError::InvalidConfig(format!("invalid address `{address}`")))?
        };
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn with_listen_error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&io::Error) + Send + Sync + 'static,
    {
        self.listen_error_handler = Some(Arc::new(f));
        self
    }

    pub fn with_request_error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext, HushError) + Send + Sync + 'static,
    {
        self.request_error_handler = Some(Arc::new(f));
        self
    }

    pub fn with_not_found_handler<H: Handler>(mut self, handler: H) -> Self {
        self.not_found_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_method_not_allowed_handler<H: Handler>(mut self, handler: H) -> Self {
        self.method_not_allowed_handler = Some(Arc::new(handler));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_options_default() {
        let options = ServerOptions::default();
        assert_eq!(options.read_timeout, Duration::from_secs(10));
        assert_eq!(options.max_request_body_size, 4 * 1024 * 1024);
        assert_eq!(options.concurrency, 256 * 1024);
        assert_eq!(options.shutdown_timeout, Duration::from_secs(5));
        assert!(options.validate().is_ok());
    }

    // ==================== 校验测试 ====================

    #[test]
    fn test_invalid_address() {
        for address in ["", "   ", "not-an-ip", "300.1.1.1"] {
            let options = ServerOptions {
                address: address.to_string(),
                ..Default::default()
            };
            assert!(matches!(
                options.validate(),
                Err(HushError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_address_forms() {
        let options = ServerOptions {
            address: "localhost".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(
            options.socket_addr().unwrap(),
            "127.0.0.1:8080".parse().unwrap()
        );
        let options = ServerOptions {
            address: "[::1]".to_string(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(options.socket_addr().unwrap(), "[::1]:9000".parse().unwrap());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let options = ServerOptions {
            concurrency: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
        let options = ServerOptions {
            shutdown_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_trusted_proxies_validated() {
        let options = ServerOptions {
            trusted_proxies: vec!["10.0.0.0/8".to_string(), "::1".to_string()],
            ..Default::default()
        };
        assert!(options.validate().is_ok());
        let options = ServerOptions {
            trusted_proxies: vec!["10.0.0.0/40".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(HushError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_debug_omits_handlers() {
        let options = ServerOptions::default().with_listen_error_handler(|_err| {});
        let debug = format!("{options:?}");
        assert!(debug.contains("ServerOptions"));
        assert!(!debug.contains("listen_error_handler"));
    }
}

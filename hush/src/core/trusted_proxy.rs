use crate::{HushError, Result};
use std::collections::HashSet;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_v4(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_v6(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_v4(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

fn prefix_mask_v6(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0)
}

/// 受信任的反向代理集合。
///
/// 支持单个 IP（`10.0.0.1`）与 CIDR 网段（`10.0.0.0/8`、`fd00::/8`）。
/// 只有来自受信任代理的连接，才会采用 `True-Client-IP` / `X-Forwarded-For` 中的客户端地址。
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    ips: HashSet<IpAddr>,
    ranges: Vec<IpRange>,
}

impl TrustedProxies {
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let mut proxies = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            match entry.split_once('/') {
                Some((network, prefix)) => {
                    let invalid =
                        || HushError::InvalidConfig(format!("invalid trusted proxy `{entry}`"));
                    let network = network.parse::<IpAddr>().map_err(|_| invalid())?;
                    let prefix = prefix.parse::<u8>().map_err(|_| invalid())?;
                    let max = if network.is_ipv4() { 32 } else { 128 };
                    if prefix > max {
                        return Err(invalid());
                    }
                    proxies.ranges.push(IpRange { network, prefix });
                }
                None => {
                    let ip = entry.parse::<IpAddr>().map_err(|_| {
                        HushError::InvalidConfig(format!("invalid trusted proxy `{entry}`"))
                    })?;
                    proxies.ips.insert(ip);
                }
            }
        }
        Ok(proxies)
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.ranges.is_empty()
    }

    /// 空集合不信任任何地址
    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        self.ips.contains(&ip) || self.ranges.iter().any(|range| range.contains(ip))
    }
}

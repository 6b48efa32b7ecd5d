/// 单个键在存储中的编码长度：两个 u32 计数器加一个 u64 时间戳
pub(crate) const ENTRY_SIZE: usize = 16;

/// 限流记录：当前窗口命中数、上一窗口命中数与当前窗口结束时间（unix 秒）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RateLimiterEntry {
    pub(crate) curr_hits: u32,
    pub(crate) prev_hits: u32,
    pub(crate) exp: u64,
}

impl RateLimiterEntry {
    /// 小端序编码
    pub(crate) fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[..4].copy_from_slice(&self.curr_hits.to_le_bytes());
        buf[4..8].copy_from_slice(&self.prev_hits.to_le_bytes());
        buf[8..].copy_from_slice(&self.exp.to_le_bytes());
        buf
    }

    /// 长度不符的数据视为全新记录
    pub(crate) fn decode(src: &[u8]) -> Self {
        let Ok(buf) = <[u8; ENTRY_SIZE]>::try_from(src) else {
            return Self::default();
        };
        let mut curr = [0u8; 4];
        let mut prev = [0u8; 4];
        let mut exp = [0u8; 8];
        curr.copy_from_slice(&buf[..4]);
        prev.copy_from_slice(&buf[4..8]);
        exp.copy_from_slice(&buf[8..]);
        Self {
            curr_hits: u32::from_le_bytes(curr),
            prev_hits: u32::from_le_bytes(prev),
            exp: u64::from_le_bytes(exp),
        }
    }

    /// 推进窗口。
    ///
    /// 新记录从 `now` 开始一个窗口；窗口结束后当前计数转入上一窗口，
    /// 新窗口的结束时间扣除已超出的时间，保持与原窗口边界对齐。
    pub(crate) fn roll(&mut self, now: u64, window: u64) {
        if self.exp == 0 {
            self.exp = now.saturating_add(window);
        } else if now >= self.exp {
            self.prev_hits = self.curr_hits;
            self.curr_hits = 0;
            let elapsed = now - self.exp;
            self.exp = if elapsed >= window {
                now.saturating_add(window)
            } else {
                now.saturating_add(window - elapsed)
            };
        }
    }

    /// 距离当前窗口结束的秒数
    pub(crate) fn reset_after(&self, now: u64) -> u64 {
        self.exp.saturating_sub(now)
    }

    /// 估算的滑动窗口命中数：上一窗口按剩余时间比例加权，再加上当前窗口命中数
    pub(crate) fn rate(&self, reset: u64, window: u64) -> u64 {
        let weighted = u64::from(self.prev_hits).saturating_mul(reset) / window.max(1);
        weighted.saturating_add(u64::from(self.curr_hits))
    }
}

use super::Storage;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_MAX_ENTRIES: usize = 8192;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 进程内存储，未配置外部存储时的默认实现。
///
/// 过期在读取时惰性判断；条目数达到上限时先清理过期条目，仍然满则淘汰任意一条。
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    inner: Arc<DashMap<Vec<u8>, MemoryEntry>>,
    max_entries: usize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl MemoryStorage {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// 当前条目数（含尚未清理的过期条目）
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn make_room(&self, now: Instant) {
        if self.inner.len() < self.max_entries {
            return;
        }
        self.inner.retain(|_, entry| !entry.is_expired(now));
        if self.inner.len() < self.max_entries {
            return;
        }
        let victim = self.inner.iter().next().map(|e| e.key().clone());
        if let Some(key) = victim {
            self.inner.remove(&key);
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        match self.inner.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        self.inner.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &[u8], value: Vec<u8>, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        // 超出可表示范围的 TTL 视为永不过期
        let expires_at = if ttl.is_zero() {
            None
        } else {
            now.checked_add(ttl)
        };
        if !self.inner.contains_key(key) {
            self.make_room(now);
        }
        self.inner
            .insert(key.to_vec(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.remove(key);
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.inner.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

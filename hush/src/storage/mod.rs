use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

mod memory;
pub use memory::MemoryStorage;

/// 带过期时间的键值存储，限流器等组件通过它持久化状态。
///
/// 实现可以是进程内缓存，也可以是远程数据库；错误统一包装为
/// [`HushError::Storage`](crate::HushError::Storage)。
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// 读取键值，不存在或已过期时返回 `None`
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// 写入键值，`ttl` 为 `Duration::ZERO` 表示永不过期
    async fn set(&self, key: &[u8], value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// 删除键值，键不存在时不报错
    async fn delete(&self, key: &[u8]) -> Result<()>;

    /// 清空所有键值
    async fn reset(&self) -> Result<()>;

    /// 关闭存储，释放连接等资源
    async fn close(&self) -> Result<()>;
}

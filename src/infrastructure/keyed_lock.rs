//! 进程内按 key 加锁
//!
//! 同一 key 串行，不同 key 并行；守卫释放时若无其他持有者则回收该 key 的条目

use std::{hash::Hash, sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, thiserror::Error)]
#[error("timed out waiting for lock")]
pub struct LockTimeout;

/// 按 key 的异步互斥锁
pub struct KeyedLock<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Clone for KeyedLock<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            locks: self.locks.clone(),
        }
    }
}

impl<K> Default for KeyedLock<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// 锁守卫（自动释放）
pub struct KeyedLockGuard<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Drop for KeyedLockGuard<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // 先释放互斥锁，再尝试回收条目
        self.guard.take();
        // map 持有一份 Arc；只剩这一份说明没有等待者
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl<K> KeyedLock<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// 获取 key 对应的锁，超时返回 `LockTimeout`
    pub async fn acquire(&self, key: K, wait: Duration) -> Result<KeyedLockGuard<K>, LockTimeout> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = tokio::time::timeout(wait, mutex.lock_owned())
            .await
            .map_err(|_| LockTimeout)?;

        Ok(KeyedLockGuard {
            key,
            guard: Some(guard),
            locks: self.locks.clone(),
        })
    }

    /// 当前持有条目数（用于测试与监控）
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

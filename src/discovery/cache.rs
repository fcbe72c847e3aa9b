//! 服务快照缓存
//!
//! 按服务名存储最近一次刷新得到的快照，支持可选 TTL 与读取时惰性淘汰。
//! 本身不保证并发安全，并发约束由 Instancer 提供

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::discovery::instance::ServiceSnapshot;

/// 缓存条目，由 `ServiceCache` 独占持有
struct CacheEntry {
    snapshot: Arc<ServiceSnapshot>,
    /// None 表示永不过期
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// 服务快照缓存
#[derive(Default)]
pub struct ServiceCache {
    entries: HashMap<String, CacheEntry>,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回指定服务名的快照；不存在或已过期时返回 None，
    /// 过期检查会顺带删除该条目
    pub fn get(&mut self, name: &str) -> Option<Arc<ServiceSnapshot>> {
        self.evict_if_expired(name);
        self.entries.get(name).map(|e| e.snapshot.clone())
    }

    /// 存储快照（永不过期），返回被替换的未过期快照
    pub fn set(
        &mut self,
        name: &str,
        snapshot: Arc<ServiceSnapshot>,
    ) -> Option<Arc<ServiceSnapshot>> {
        self.insert(name, snapshot, None)
    }

    /// 存储带 TTL 的快照，ttl 为零时等同于 `set`
    pub fn set_with_ttl(
        &mut self,
        name: &str,
        snapshot: Arc<ServiceSnapshot>,
        ttl: Duration,
    ) -> Option<Arc<ServiceSnapshot>> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.insert(name, snapshot, expires_at)
    }

    /// 指定服务名是否存在未过期的快照
    pub fn has(&mut self, name: &str) -> bool {
        self.evict_if_expired(name);
        self.entries.contains_key(name)
    }

    /// 返回所有未过期的快照
    pub fn entries(&mut self) -> HashMap<String, Arc<ServiceSnapshot>> {
        self.entries.retain(|_, e| !e.expired());
        self.entries
            .iter()
            .map(|(name, e)| (name.clone(), e.snapshot.clone()))
            .collect()
    }

    /// 只读查询，不触发淘汰
    ///
    /// Instancer 的读路径使用：其条目不设置 TTL，语义与 `get` 一致，
    /// 但允许多个读者共享读锁
    pub(crate) fn peek(&self, name: &str) -> Option<Arc<ServiceSnapshot>> {
        self.entries
            .get(name)
            .filter(|e| !e.expired())
            .map(|e| e.snapshot.clone())
    }

    fn insert(
        &mut self,
        name: &str,
        snapshot: Arc<ServiceSnapshot>,
        expires_at: Option<Instant>,
    ) -> Option<Arc<ServiceSnapshot>> {
        self.evict_if_expired(name);
        self.entries
            .insert(
                name.to_string(),
                CacheEntry {
                    snapshot,
                    expires_at,
                },
            )
            .map(|e| e.snapshot)
    }

    fn evict_if_expired(&mut self, name: &str) {
        if self.entries.get(name).is_some_and(CacheEntry::expired) {
            self.entries.remove(name);
        }
    }
}

//! 测试公共工具：内存版注册中心后端
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use beacon_discovery::{BackendError, DiscoveryBackend, RawServiceEntry, WaitToken};

struct MockState {
    version: u64,
    entries: Vec<RawServiceEntry>,
    fail: Option<String>,
}

/// 内存注册中心，支持长轮询语义：携带当前版本的查询阻塞到数据变化或超时
pub struct MockBackend {
    state: Mutex<MockState>,
    notify: Notify,
    query_count: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                version: 0,
                entries: Vec::new(),
                fail: None,
            }),
            notify: Notify::new(),
            query_count: AtomicUsize::new(0),
        })
    }

    /// 替换实例列表并唤醒阻塞中的长轮询
    pub async fn set_entries(&self, entries: Vec<RawServiceEntry>) {
        let mut state = self.state.lock().await;
        state.version += 1;
        state.entries = entries;
        state.fail = None;
        drop(state);
        self.notify.notify_waiters();
    }

    /// 让后续查询全部失败
    pub async fn set_failure(&self, message: &str) {
        let mut state = self.state.lock().await;
        state.version += 1;
        state.fail = Some(message.to_string());
        drop(state);
        self.notify.notify_waiters();
    }

    /// 恢复成功，沿用当前实例列表
    pub async fn clear_failure(&self) {
        let mut state = self.state.lock().await;
        state.version += 1;
        state.fail = None;
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }

    fn current(
        state: &MockState,
    ) -> Result<(Vec<RawServiceEntry>, Option<WaitToken>), BackendError> {
        match &state.fail {
            Some(message) => Err(BackendError::Request(message.clone())),
            None => Ok((state.entries.clone(), Some(WaitToken(state.version)))),
        }
    }
}

#[async_trait]
impl DiscoveryBackend for MockBackend {
    async fn query(
        &self,
        _service_name: &str,
        wait_token: Option<WaitToken>,
        wait: Duration,
    ) -> Result<(Vec<RawServiceEntry>, Option<WaitToken>), BackendError> {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        {
            let state = self.state.lock().await;
            // 版本不同（或首次查询）立即返回当前数据
            if wait_token != Some(WaitToken(state.version)) {
                return Self::current(&state);
            }
        }
        let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        let state = self.state.lock().await;
        Self::current(&state)
    }
}

/// 构造一条原始实例条目
pub fn entry(
    service: &str,
    id: &str,
    port: u16,
    tags: &[&str],
    meta: &[(&str, &str)],
    status: &str,
) -> RawServiceEntry {
    RawServiceEntry {
        id: id.to_string(),
        service_name: service.to_string(),
        address: "10.0.0.1".to_string(),
        node_address: "10.0.0.100".to_string(),
        port,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        meta: meta
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        aggregated_status: status.to_string(),
        raw: None,
    }
}

//! 轮询负载均衡

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::discovery::instance::ServiceInstance;
use crate::error::{DiscoveryError, Result};

/// 轮询负载均衡器
///
/// 单调递增计数对候选数取模，候选列表稳定时依次轮转；
/// 无锁，可跨任务并发调用
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从候选实例中选出一个
    pub fn balance(
        &self,
        service_name: &str,
        candidates: &[Arc<ServiceInstance>],
    ) -> Result<Arc<ServiceInstance>> {
        if candidates.is_empty() {
            return Err(DiscoveryError::NoEndpointFound {
                service: service_name.to_string(),
            });
        }
        let index = self.next_index(candidates.len());
        Ok(candidates[index].clone())
    }

    /// 仅递增计数取模，供不经过实例列表的静态解析使用
    pub(crate) fn next_index(&self, len: usize) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

//! 服务发现客户端
//!
//! 同一个 DiscoveryClient 内保证每个服务名只有一个 Instancer 实例，
//! 避免对同一服务重复建立刷新循环

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::discovery::backend::DiscoveryBackend;
use crate::discovery::config::DiscoveryClientConfig;
use crate::discovery::instancer::{Instancer, InstancerOption};
use crate::discovery::matcher::InstanceMatcher;
use crate::error::{DiscoveryError, Result};

/// 服务发现客户端，Instancer 的工厂与单例注册表
pub struct DiscoveryClient {
    backend: Arc<dyn DiscoveryBackend>,
    config: DiscoveryClientConfig,
    /// 配置编译一次，所有 Instancer 共享
    default_selector: Option<InstanceMatcher>,
    instancers: Mutex<HashMap<String, Arc<Instancer>>>,
}

impl DiscoveryClient {
    pub fn new(backend: Arc<dyn DiscoveryBackend>, config: DiscoveryClientConfig) -> Self {
        let default_selector = config
            .default_selector
            .as_ref()
            .and_then(|selector| selector.compile());
        Self {
            backend,
            config,
            default_selector,
            instancers: Mutex::new(HashMap::new()),
        }
    }

    /// 返回指定服务名的 Instancer，不存在时创建并启动
    ///
    /// 同名调用返回同一个实例（`Arc::ptr_eq` 成立）
    pub async fn instancer(&self, service_name: &str) -> Result<Arc<Instancer>> {
        if service_name.is_empty() {
            return Err(DiscoveryError::EmptyServiceName);
        }
        let mut instancers = self.instancers.lock().await;
        if let Some(existing) = instancers.get(service_name) {
            return Ok(existing.clone());
        }

        let instancer = Instancer::new(InstancerOption {
            service_name: service_name.to_string(),
            backend: self.backend.clone(),
            selector: self.default_selector.clone(),
            verbose: self.config.verbose,
            poll_wait: Duration::from_millis(self.config.poll_wait_ms),
            backoff_base: Duration::from_millis(self.config.backoff_base_ms),
        });
        instancer.start().await;
        instancers.insert(service_name.to_string(), instancer.clone());
        Ok(instancer)
    }

    /// 停止并移除所有 Instancer
    pub async fn close(&self) {
        let drained: Vec<Arc<Instancer>> = {
            let mut instancers = self.instancers.lock().await;
            instancers.drain().map(|(_, i)| i).collect()
        };
        for instancer in drained {
            instancer.stop().await;
        }
    }
}

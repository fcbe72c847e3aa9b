//! 服务发现核心
//!
//! 模块划分：
//! - `backend`：注册中心后端抽象与 Consul 适配器
//! - `instance`：服务实例、快照与健康状态
//! - `matcher`：实例匹配 DSL
//! - `cache`：服务快照缓存
//! - `instancer`：单服务刷新引擎与变更通知
//! - `client`：Instancer 工厂与单例注册表
//! - `config`：客户端与选择器配置

pub mod backend;
pub mod cache;
pub mod client;
pub mod config;
pub mod instance;
pub mod instancer;
pub mod matcher;

pub use backend::{DiscoveryBackend, RawServiceEntry, WaitToken};
pub use cache::ServiceCache;
pub use client::DiscoveryClient;
pub use config::{DiscoveryClientConfig, SelectorConfig};
pub use instance::{HealthStatus, ServiceInstance, ServiceSnapshot};
pub use instancer::{Callback, DiscoveryEvent, Instancer, InstancerOption};
pub use matcher::InstanceMatcher;

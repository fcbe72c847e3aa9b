//! Beacon Discovery Core Library
//!
//! Provides dynamic service discovery and load-balanced target resolution for
//! remote-call clients, including long-polling instancers, instance matching,
//! stale-fallback policies, and endpoint management.

pub mod discovery;
pub mod error;
pub mod resolver;

// Re-exports
pub use error::{BackendError, DiscoveryError, Result};

// 服务发现核心
pub use discovery::{
    Callback, DiscoveryBackend, DiscoveryClient, DiscoveryClientConfig, DiscoveryEvent,
    HealthStatus, InstanceMatcher, Instancer, InstancerOption, RawServiceEntry, SelectorConfig,
    ServiceCache, ServiceInstance, ServiceSnapshot, WaitToken,
};
pub use discovery::backend::consul::ConsulBackend;

// 目标解析与端点管理
pub use resolver::{
    Endpoint, EndpointFactory, Endpointer, ResolvedTarget, RoundRobinBalancer, StalePolicy,
    StaticTargetResolver, TargetResolver, TargetResolverOption,
};

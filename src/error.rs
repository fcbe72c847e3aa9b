//! 错误定义
//!
//! 两层错误：`BackendError` 表达注册中心查询失败（随快照存储，需要 Clone），
//! `DiscoveryError` 是核心对调用方暴露的统一错误类型。

use thiserror::Error;

/// 注册中心后端错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// 请求失败（网络、超时、非成功状态码）
    #[error("backend request failed: {0}")]
    Request(String),

    /// 响应负载无法解析
    #[error("backend payload invalid: {0}")]
    Payload(String),
}

/// 服务发现错误
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    #[error("service name cannot be empty")]
    EmptyServiceName,

    #[error("invalid target URL {url}: {reason}")]
    InvalidTarget { url: String, reason: String },

    /// 候选实例为空（服务不存在或全部被选择器过滤）
    #[error("no endpoint found for service {service}")]
    NoEndpointFound { service: String },

    /// 发现失败且过期回退策略不允许使用旧快照
    #[error("service discovery unavailable for service {service}")]
    DiscoveryUnavailable {
        service: String,
        #[source]
        source: BackendError,
    },

    /// Instancer 已停止，结果不再保证新鲜
    #[error("instancer has been stopped")]
    InstancerStopped,

    /// 端点构造失败的占位端点被调用
    #[error("endpoint construction failed: {0}")]
    EndpointConstruction(String),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

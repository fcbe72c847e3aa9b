//! 目标解析与端点管理
//!
//! 在服务发现之上为远程调用客户端提供每次调用的目标选择：
//! - [`TargetResolver`]：基于 Instancer 快照解析单个调用目标；
//! - [`StaticTargetResolver`]：固定 URL 列表的静态解析；
//! - [`Endpointer`]：将实例列表物化为可调用端点集合。

pub mod balancer;
pub mod endpointer;
pub mod target;

pub use balancer::RoundRobinBalancer;
pub use endpointer::{Endpoint, EndpointFactory, Endpointer};
pub use target::{
    ResolvedTarget, StalePolicy, StaticTargetResolver, TargetResolver, TargetResolverOption,
};

use std::sync::Arc;

use crate::discovery::instance::ServiceSnapshot;
use crate::discovery::instancer::Instancer;
use crate::error::{DiscoveryError, Result};

/// 获取可用快照，TargetResolver 与 Endpointer 共用
///
/// 快照带错误且过期回退策略不允许使用时，
/// 返回 [`DiscoveryError::DiscoveryUnavailable`] 并携带后端原始错误
pub(crate) async fn usable_snapshot(
    instancer: &Instancer,
    stale_policy: &StalePolicy,
) -> Result<Arc<ServiceSnapshot>> {
    let Some(snapshot) = instancer.service().await else {
        return Err(DiscoveryError::NoEndpointFound {
            service: instancer.service_name().to_string(),
        });
    };
    if let Some(error) = &snapshot.error {
        if !stale_policy.allows_stale(&snapshot) {
            return Err(DiscoveryError::DiscoveryUnavailable {
                service: instancer.service_name().to_string(),
                source: error.clone(),
            });
        }
    }
    Ok(snapshot)
}

//! 端点集合管理
//!
//! 将当前快照中的实例物化为可调用端点。单个实例的端点构造失败不会
//! 影响其余实例：失败的实例被替换为一个调用即报错的占位端点。

use futures::future::BoxFuture;
use std::sync::Arc;

use crate::discovery::instance::ServiceInstance;
use crate::discovery::instancer::Instancer;
use crate::discovery::matcher::InstanceMatcher;
use crate::error::{DiscoveryError, Result};
use crate::resolver::target::StalePolicy;
use crate::resolver::usable_snapshot;

/// 可调用端点
pub type Endpoint<Req, Res> =
    Arc<dyn Fn(Req) -> BoxFuture<'static, Result<Res>> + Send + Sync>;

/// 端点工厂，由调用方提供，把单个实例转换为端点
pub type EndpointFactory<Req, Res> =
    Arc<dyn Fn(&ServiceInstance) -> Result<Endpoint<Req, Res>> + Send + Sync>;

/// 端点集合管理器
pub struct Endpointer<Req, Res> {
    instancer: Arc<Instancer>,
    selector: Option<InstanceMatcher>,
    stale_policy: StalePolicy,
    factory: EndpointFactory<Req, Res>,
}

impl<Req, Res> Endpointer<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn new(
        instancer: Arc<Instancer>,
        selector: Option<InstanceMatcher>,
        stale_policy: StalePolicy,
        factory: EndpointFactory<Req, Res>,
    ) -> Self {
        Self {
            instancer,
            selector,
            stale_policy,
            factory,
        }
    }

    /// 返回当前快照物化出的端点列表
    ///
    /// `selector` 覆盖默认选择器（仅本次调用生效）
    pub async fn endpoints(
        &self,
        selector: Option<&InstanceMatcher>,
    ) -> Result<Vec<Endpoint<Req, Res>>> {
        let snapshot = usable_snapshot(&self.instancer, &self.stale_policy).await?;
        let effective = selector.or(self.selector.as_ref());
        let endpoints = snapshot
            .instances(effective)
            .into_iter()
            .map(|instance| match (self.factory)(&instance) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    tracing::error!(
                        service = %self.instancer.service_name(),
                        instance = %instance.id,
                        error = %e,
                        "failed to construct endpoint for instance"
                    );
                    error_endpoint(e.to_string())
                }
            })
            .collect();
        Ok(endpoints)
    }
}

/// 构造失败占位端点，任何调用都返回构造错误
fn error_endpoint<Req, Res>(reason: String) -> Endpoint<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    Arc::new(move |_req: Req| -> BoxFuture<'static, Result<Res>> {
        let reason = reason.clone();
        Box::pin(async move { Err(DiscoveryError::EndpointConstruction(reason)) })
    })
}

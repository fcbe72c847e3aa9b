//! 注册中心查询端口抽象和实现

pub mod consul;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BackendError;

/// 长轮询游标
///
/// 注册中心提供的不透明令牌，核心只负责在两次查询之间原样传递
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitToken(pub u64);

/// 注册中心返回的原始实例条目（尚未映射为 `ServiceInstance`）
#[derive(Debug, Clone)]
pub struct RawServiceEntry {
    pub id: String,
    pub service_name: String,

    /// 实例级地址，可能为空
    pub address: String,

    /// 节点级地址，实例级地址为空时回退使用
    pub node_address: String,

    pub port: u16,
    pub tags: Vec<String>,
    pub meta: HashMap<String, String>,

    /// 所有健康检查的聚合状态（如 "passing"、"critical"）
    pub aggregated_status: String,

    /// 后端原始负载，核心不解释，仅透传给调用方
    pub raw: Option<Arc<serde_json::Value>>,
}

/// 注册中心查询端口
///
/// 刷新循环通过这个 trait 消费外部注册中心。
/// 注意：由于需要动态分发（dyn），使用 async-trait
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// 查询指定服务名下的全部实例
    ///
    /// 必须支持长轮询语义：携带上一次返回的 `wait_token` 时，注册中心应阻塞
    /// 至数据变化或 `wait` 超时后返回，避免刷新循环退化为紧轮询。
    ///
    /// # 返回
    /// 原始实例列表和下一轮查询使用的游标
    async fn query(
        &self,
        service_name: &str,
        wait_token: Option<WaitToken>,
        wait: Duration,
    ) -> Result<(Vec<RawServiceEntry>, Option<WaitToken>), BackendError>;
}

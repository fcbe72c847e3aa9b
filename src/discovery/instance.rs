//! 服务实例与服务快照定义

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::discovery::backend::RawServiceEntry;
use crate::discovery::matcher::InstanceMatcher;
use crate::error::BackendError;

/// 实例元数据保留键：构建版本
pub const META_KEY_VERSION: &str = "version";

/// 实例元数据保留键：HTTP context path
pub const META_KEY_CONTEXT_PATH: &str = "context";

/// 标签/元数据保留键：是否启用 TLS
pub const TAG_SECURE: &str = "secure";

/// 健康状态
///
/// 按严重程度排序：Maintenance > Critical > Warning > Passing > Any
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum HealthStatus {
    /// 未知/任意
    #[default]
    Any,
    Passing,
    Warning,
    Critical,
    Maintenance,
}

impl HealthStatus {
    /// 从注册中心的聚合检查状态映射而来，无法识别的状态映射为 `Any`
    pub fn from_aggregated(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "passing" => HealthStatus::Passing,
            "warning" => HealthStatus::Warning,
            "critical" => HealthStatus::Critical,
            "maintenance" => HealthStatus::Maintenance,
            _ => HealthStatus::Any,
        }
    }
}

/// 服务实例
///
/// 一个可寻址的服务副本。同一快照内实例按 ID 升序排列
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInstance {
    /// 实例 ID（同一服务名下唯一）
    pub id: String,

    /// 所属服务名
    pub service_name: String,

    /// 服务地址
    pub address: String,

    /// 服务端口
    pub port: u16,

    /// 自定义标签（来源中允许重复，匹配器按集合处理）
    pub tags: Vec<String>,

    /// 元数据
    pub meta: HashMap<String, String>,

    /// 健康状态
    pub health: HealthStatus,

    /// 后端原始条目，核心不解释，仅透传
    pub raw_entry: Option<Arc<serde_json::Value>>,
}

impl ServiceInstance {
    /// 将注册中心原始条目映射为服务实例
    ///
    /// 实例级地址为空时回退到节点级地址；健康状态由聚合检查状态映射而来
    pub fn from_raw(entry: RawServiceEntry) -> Self {
        let address = if entry.address.is_empty() {
            entry.node_address
        } else {
            entry.address
        };
        Self {
            id: entry.id,
            service_name: entry.service_name,
            address,
            port: entry.port,
            tags: entry.tags,
            meta: entry.meta,
            health: HealthStatus::from_aggregated(&entry.aggregated_status),
            raw_entry: entry.raw,
        }
    }

    /// "address:port" 形式的地址
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// 服务快照
///
/// 一次刷新得到的服务实例全集，含捕获时间与错误状态。
/// 写入缓存后不再修改，由下一轮刷新整体替换
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub name: String,

    /// 实例列表，按 ID 升序（diff 算法依赖该不变量）
    pub instances: Vec<Arc<ServiceInstance>>,

    /// 捕获时间
    pub captured_at: DateTime<Utc>,

    /// 本轮刷新的错误；为 None 表示本轮刷新成功
    pub error: Option<BackendError>,

    /// 首次进入错误状态的时间
    ///
    /// 本轮成功时为 None；本轮失败且上一快照已有错误时原样继承
    /// （记录的是首次失败时间，不是最近一次）
    pub first_error_at: Option<DateTime<Utc>>,
}

impl ServiceSnapshot {
    /// 返回匹配选择器的实例；选择器为 None 时返回全部实例
    pub fn instances(&self, selector: Option<&InstanceMatcher>) -> Vec<Arc<ServiceInstance>> {
        self.instances
            .iter()
            .filter(|inst| match selector {
                None => true,
                Some(m) => matches!(m.matches(inst), Ok(true)),
            })
            .cloned()
            .collect()
    }

    /// 统计匹配选择器的实例数量
    pub fn instance_count(&self, selector: Option<&InstanceMatcher>) -> usize {
        self.instances
            .iter()
            .filter(|inst| match selector {
                None => true,
                Some(m) => matches!(m.matches(inst), Ok(true)),
            })
            .count()
    }
}

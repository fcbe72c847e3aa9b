//! 实例匹配 DSL
//!
//! 匹配器是针对单个服务实例的纯谓词，可用 and/or 组合。
//! `Option<InstanceMatcher>` 中的 `None` 表示"匹配所有实例"，
//! 调用方依赖这个约定来表达"不过滤"。

use std::fmt;
use std::sync::Arc;

use crate::discovery::instance::{HealthStatus, META_KEY_VERSION, ServiceInstance};
use crate::error::DiscoveryError;

type MatchFn = dyn Fn(&ServiceInstance) -> Result<bool, DiscoveryError> + Send + Sync;

/// 可组合的实例匹配器
#[derive(Clone)]
pub struct InstanceMatcher {
    desc: Arc<str>,
    func: Arc<MatchFn>,
}

impl InstanceMatcher {
    /// 由谓词函数构造匹配器，`desc` 用于日志与调试输出
    pub fn new<F>(desc: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ServiceInstance) -> Result<bool, DiscoveryError> + Send + Sync + 'static,
    {
        Self {
            desc: Arc::from(desc.into()),
            func: Arc::new(func),
        }
    }

    /// 判断实例是否匹配
    pub fn matches(&self, instance: &ServiceInstance) -> Result<bool, DiscoveryError> {
        (self.func)(instance)
    }

    /// 匹配健康（Passing）实例
    pub fn is_healthy() -> Self {
        Self::new("is healthy", |inst| {
            Ok(inst.health == HealthStatus::Passing)
        })
    }

    /// 匹配指定健康状态的实例，`Any` 匹配所有实例
    pub fn with_health(status: HealthStatus) -> Self {
        Self::new(format!("with health status {status:?}"), move |inst| {
            Ok(status == HealthStatus::Any || inst.health == status)
        })
    }

    /// 匹配带指定标签的实例
    pub fn with_tag(tag: impl Into<String>, case_insensitive: bool) -> Self {
        let tag = tag.into();
        Self::new(format!("with tag {tag}"), move |inst| {
            Ok(inst
                .tags
                .iter()
                .any(|t| t == &tag || case_insensitive && t.eq_ignore_ascii_case(&tag)))
        })
    }

    /// 匹配带 "key=value" 形式标签的实例
    pub fn with_tag_kv(
        key: impl Into<String>,
        value: impl Into<String>,
        case_insensitive: bool,
    ) -> Self {
        let mut key = key.into();
        let mut value = value.into();
        if case_insensitive {
            key = key.to_lowercase();
            value = value.to_lowercase();
        }
        Self::new(format!("with tag {key}={value}"), move |inst| {
            for tag in &inst.tags {
                let tag = if case_insensitive {
                    tag.to_lowercase()
                } else {
                    tag.clone()
                };
                if let Some((k, v)) = tag.trim().split_once('=') {
                    if k == key && v == value {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        })
    }

    /// 匹配带指定元数据的实例，value 为空时只检查键是否存在
    pub fn with_meta_kv(key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        Self::new(format!("has meta {key}={value}"), move |inst| {
            Ok(inst
                .meta
                .get(&key)
                .is_some_and(|v| value.is_empty() || v == &value))
        })
    }

    /// 匹配指定版本的实例（精确匹配保留元数据键 `version`）
    pub fn with_version(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        Self::new(format!("of version {pattern}"), move |inst| {
            Ok(inst.meta.get(META_KEY_VERSION) == Some(&pattern))
        })
    }

    /// 与另一个匹配器求逻辑与
    pub fn and(self, other: InstanceMatcher) -> InstanceMatcher {
        let desc = format!("{} and {}", self.desc, other.desc);
        Self::new(desc, move |inst| {
            Ok(self.matches(inst)? && other.matches(inst)?)
        })
    }

    /// 与另一个匹配器求逻辑或
    pub fn or(self, other: InstanceMatcher) -> InstanceMatcher {
        let desc = format!("{} or {}", self.desc, other.desc);
        Self::new(desc, move |inst| {
            Ok(self.matches(inst)? || other.matches(inst)?)
        })
    }
}

impl fmt::Display for InstanceMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.desc)
    }
}

impl fmt::Debug for InstanceMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceMatcher")
            .field("desc", &self.desc)
            .finish()
    }
}

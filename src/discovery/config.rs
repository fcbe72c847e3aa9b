//! 服务发现配置

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::discovery::matcher::InstanceMatcher;

/// 声明式实例选择器配置
///
/// 编译结果是每个 tag 一个 `with_tag` 与每个 meta 键值一个 `with_meta_kv`
/// 的逻辑与
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SelectorConfig {
    /// 标签列表（大小写不敏感匹配）
    #[serde(default)]
    pub tags: Vec<String>,

    /// 元数据键值对
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl SelectorConfig {
    /// 编译为匹配器
    ///
    /// 零条件时返回 None（匹配所有实例），而不是永假匹配器——
    /// 调用方依赖 None 表达"不过滤"
    pub fn compile(&self) -> Option<InstanceMatcher> {
        let mut matcher: Option<InstanceMatcher> = None;
        for tag in &self.tags {
            let next = InstanceMatcher::with_tag(tag.clone(), true);
            matcher = Some(match matcher {
                Some(cur) => cur.and(next),
                None => next,
            });
        }
        for (key, value) in &self.meta {
            let next = InstanceMatcher::with_meta_kv(key.clone(), value.clone());
            matcher = Some(match matcher {
                Some(cur) => cur.and(next),
                None => next,
            });
        }
        matcher
    }
}

/// DiscoveryClient 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryClientConfig {
    /// 默认选择器，应用于每个 Instancer 的刷新过滤
    #[serde(default)]
    pub default_selector: Option<SelectorConfig>,

    /// 是否输出每轮刷新差异的详细日志
    #[serde(default)]
    pub verbose: bool,

    /// 单次长轮询等待时间（毫秒）
    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,

    /// 刷新失败后的退避基础间隔（毫秒），按指数增长，成功后重置
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for DiscoveryClientConfig {
    fn default() -> Self {
        Self {
            default_selector: None,
            verbose: false,
            poll_wait_ms: default_poll_wait_ms(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_poll_wait_ms() -> u64 {
    30_000
}

fn default_backoff_base_ms() -> u64 {
    50
}

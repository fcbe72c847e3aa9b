//! 调用目标解析
//!
//! 将一次远程调用（服务名 + 路径）解析为具体实例上的 URL。
//! 每次调用独立解析，实例选择由轮询负载均衡决定。

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::discovery::instance::{
    META_KEY_CONTEXT_PATH, ServiceInstance, ServiceSnapshot, TAG_SECURE,
};
use crate::discovery::instancer::Instancer;
use crate::discovery::matcher::InstanceMatcher;
use crate::error::{DiscoveryError, Result};
use crate::resolver::balancer::RoundRobinBalancer;
use crate::resolver::usable_snapshot;

/// 发现失败时的过期快照回退策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StalePolicy {
    /// 始终信任过期快照
    TrustAlways,
    /// 一旦发现失败立即拒绝
    TrustNever,
    /// 自首次失败起的时间窗口内信任
    TrustFor(Duration),
}

impl StalePolicy {
    /// 由"失败时是否失效 + 失效宽限时长"两个开关组合而来
    pub fn from_options(invalidate_on_error: bool, invalidate_timeout: Option<Duration>) -> Self {
        if !invalidate_on_error {
            return StalePolicy::TrustAlways;
        }
        match invalidate_timeout {
            Some(timeout) if !timeout.is_zero() => StalePolicy::TrustFor(timeout),
            _ => StalePolicy::TrustNever,
        }
    }

    /// 带错误的快照是否仍可使用
    pub fn allows_stale(&self, snapshot: &ServiceSnapshot) -> bool {
        match self {
            StalePolicy::TrustAlways => true,
            StalePolicy::TrustNever => false,
            StalePolicy::TrustFor(window) => {
                let Some(first_error_at) = snapshot.first_error_at else {
                    return false;
                };
                let window = chrono::Duration::from_std(*window).unwrap_or(chrono::Duration::MAX);
                match first_error_at.checked_add_signed(window) {
                    Some(deadline) => Utc::now() < deadline,
                    // 加法溢出说明窗口远超时间表示范围，视为仍在窗口内
                    None => true,
                }
            }
        }
    }
}

/// 解析出的调用目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// 以 '/' 开头的完整路径（含实例 context path）
    pub path: String,
}

impl ResolvedTarget {
    /// 组装为 URL 字符串
    pub fn to_url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

/// TargetResolver 配置
pub struct TargetResolverOption {
    /// 实例选择器，默认只选健康实例
    pub selector: Option<InstanceMatcher>,

    /// 过期快照回退策略
    pub stale_policy: StalePolicy,

    /// 强制 scheme，设置后跳过实例元数据推断
    pub scheme: Option<String>,

    /// 推断不出 scheme 时的缺省值
    pub default_scheme: String,

    /// 强制 context path，设置后忽略实例元数据中的 context path
    pub context_path: Option<String>,
}

impl Default for TargetResolverOption {
    fn default() -> Self {
        Self {
            selector: Some(InstanceMatcher::is_healthy()),
            stale_policy: StalePolicy::TrustNever,
            scheme: None,
            default_scheme: "http".to_string(),
            context_path: None,
        }
    }
}

/// 基于服务发现的调用目标解析器
pub struct TargetResolver {
    instancer: Arc<Instancer>,
    opt: TargetResolverOption,
    balancer: RoundRobinBalancer,
}

impl TargetResolver {
    pub fn new(instancer: Arc<Instancer>, opt: TargetResolverOption) -> Self {
        Self {
            instancer,
            opt,
            balancer: RoundRobinBalancer::new(),
        }
    }

    /// 解析一次调用的目标 URL
    ///
    /// `selector` 覆盖本解析器的默认选择器（仅本次调用生效）
    pub async fn resolve(
        &self,
        path: &str,
        selector: Option<&InstanceMatcher>,
    ) -> Result<ResolvedTarget> {
        let snapshot = usable_snapshot(&self.instancer, &self.opt.stale_policy).await?;
        let effective = selector.or(self.opt.selector.as_ref());
        let candidates = snapshot.instances(effective);
        let instance = self
            .balancer
            .balance(self.instancer.service_name(), &candidates)?;
        Ok(self.target_for(&instance, path))
    }

    fn target_for(&self, instance: &ServiceInstance, path: &str) -> ResolvedTarget {
        let context_path = match &self.opt.context_path {
            Some(cp) => cp.clone(),
            None => instance
                .meta
                .get(META_KEY_CONTEXT_PATH)
                .cloned()
                .unwrap_or_default(),
        };
        let scheme = match &self.opt.scheme {
            Some(s) => s.clone(),
            None => infer_scheme(instance).unwrap_or_else(|| self.opt.default_scheme.clone()),
        };
        ResolvedTarget {
            scheme,
            host: instance.address.clone(),
            port: instance.port,
            path: join_path(&context_path, path),
        }
    }
}

/// 从实例标签/元数据推断 scheme
///
/// `secure=true`（标签或元数据）→ https，`secure=false` → http，
/// 未声明时返回 None 由调用方决定缺省值
fn infer_scheme(instance: &ServiceInstance) -> Option<String> {
    let tag_value = instance.tags.iter().find_map(|tag| {
        let (k, v) = tag.trim().split_once('=')?;
        k.eq_ignore_ascii_case(TAG_SECURE).then(|| v.to_ascii_lowercase())
    });
    let value = tag_value.or_else(|| {
        instance
            .meta
            .get(TAG_SECURE)
            .map(|v| v.to_ascii_lowercase())
    })?;
    match value.as_str() {
        "true" => Some("https".to_string()),
        "false" => Some("http".to_string()),
        _ => None,
    }
}

/// 拼接 context path 与调用路径，结果始终以 '/' 开头
fn join_path(context_path: &str, path: &str) -> String {
    let context_path = context_path.trim_matches('/');
    let path = path.trim_start_matches('/');
    match (context_path.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => format!("/{context_path}"),
        (false, false) => format!("/{context_path}/{path}"),
    }
}

/// 固定 URL 列表的静态解析器，不依赖服务发现
#[derive(Debug)]
pub struct StaticTargetResolver {
    targets: Vec<ResolvedTarget>,
    balancer: RoundRobinBalancer,
}

impl StaticTargetResolver {
    /// 从基础 URL 列表构造，URL 须为带主机的 http/https 地址
    pub fn new(base_urls: &[String]) -> Result<Self> {
        let mut targets = Vec::with_capacity(base_urls.len());
        for url in base_urls {
            let parsed = reqwest::Url::parse(url).map_err(|e| DiscoveryError::InvalidTarget {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(DiscoveryError::InvalidTarget {
                    url: url.clone(),
                    reason: format!("unsupported scheme {}", parsed.scheme()),
                });
            }
            let host = parsed
                .host_str()
                .ok_or_else(|| DiscoveryError::InvalidTarget {
                    url: url.clone(),
                    reason: "missing host".to_string(),
                })?
                .to_string();
            let port = parsed
                .port_or_known_default()
                .ok_or_else(|| DiscoveryError::InvalidTarget {
                    url: url.clone(),
                    reason: "unable to determine port".to_string(),
                })?;
            targets.push(ResolvedTarget {
                scheme: parsed.scheme().to_string(),
                host,
                port,
                path: normalize_base_path(parsed.path()),
            });
        }
        Ok(Self {
            targets,
            balancer: RoundRobinBalancer::new(),
        })
    }

    /// 在固定目标间轮询并拼接调用路径
    pub fn resolve(&self, path: &str) -> Result<ResolvedTarget> {
        if self.targets.is_empty() {
            return Err(DiscoveryError::NoEndpointFound {
                service: "<static>".to_string(),
            });
        }
        let index = self.balancer.next_index(self.targets.len());
        let base = &self.targets[index];
        Ok(ResolvedTarget {
            scheme: base.scheme.clone(),
            host: base.host.clone(),
            port: base.port,
            path: join_path(&base.path, path),
        })
    }
}

fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        trimmed.to_string()
    }
}

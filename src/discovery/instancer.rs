//! Instancer 刷新引擎
//!
//! 每个被观察的服务名对应一个 Instancer：独占一个后台刷新循环，将注册中心
//! 查询结果写入缓存，对比相邻两次快照，并向回调与旧式事件通道两套订阅接口
//! 分发变更通知。
//!
//! 两个相互独立的锁域：
//! - 缓存锁：保护快照缓存与就绪状态，写锁只覆盖快照写入与通知判定，
//!   回调与事件广播都在释放写锁之后执行；
//! - 状态锁：保护启停生命周期与回调/订阅者集合，注册回调不会与快照读取争锁。

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::discovery::backend::{DiscoveryBackend, RawServiceEntry, WaitToken};
use crate::discovery::cache::ServiceCache;
use crate::discovery::instance::{ServiceInstance, ServiceSnapshot};
use crate::discovery::matcher::InstanceMatcher;
use crate::error::{BackendError, DiscoveryError, Result};

const BACKOFF_FACTOR: f64 = 1.5;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// 变更回调，每个通知周期调用一次
pub type Callback = Arc<dyn Fn(&Instancer) + Send + Sync>;

/// 兼容旧接口的粗粒度变更事件
///
/// 每个订阅者收到自己的副本，修改互不影响
#[derive(Debug, Clone)]
pub struct DiscoveryEvent {
    /// "address:port" 形式的实例列表
    pub instances: Vec<String>,

    /// 最近一轮刷新的错误
    pub error: Option<BackendError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    NotStarted,
    Running,
    Stopped,
}

struct InstancerState {
    run_state: RunState,
    callbacks: HashMap<String, Callback>,
    subscribers: Vec<mpsc::Sender<DiscoveryEvent>>,
}

/// Instancer 创建选项
pub struct InstancerOption {
    pub service_name: String,
    pub backend: Arc<dyn DiscoveryBackend>,

    /// 默认选择器，刷新时即过滤掉不匹配的实例
    pub selector: Option<InstanceMatcher>,

    /// 是否输出每轮刷新差异的详细日志
    pub verbose: bool,

    /// 单次长轮询等待时间
    pub poll_wait: Duration,

    /// 刷新失败后的退避基础间隔
    pub backoff_base: Duration,
}

/// 按服务名保持快照新鲜并分发变更通知的刷新引擎
///
/// 刷新循环是其服务名下缓存条目的唯一写入方；任意数量的调用方可并发读取
pub struct Instancer {
    service_name: String,
    backend: Arc<dyn DiscoveryBackend>,
    selector: Option<InstanceMatcher>,
    verbose: bool,
    poll_wait: Duration,
    backoff_base: Duration,

    /// 缓存锁域
    cache: RwLock<ServiceCache>,
    /// 状态锁域
    state: RwLock<InstancerState>,

    /// 首个快照就绪信号（stop 也会置位，保证等待方不会永久挂起）
    ready: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Instancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instancer")
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

impl Instancer {
    /// 创建 Instancer，不会启动刷新循环，需显式调用 [`Instancer::start`]
    pub fn new(opt: InstancerOption) -> Arc<Self> {
        let (ready, _) = watch::channel(false);
        Arc::new(Self {
            service_name: opt.service_name,
            backend: opt.backend,
            selector: opt.selector,
            verbose: opt.verbose,
            poll_wait: opt.poll_wait,
            backoff_base: opt.backoff_base,
            cache: RwLock::new(ServiceCache::new()),
            state: RwLock::new(InstancerState {
                run_state: RunState::NotStarted,
                callbacks: HashMap::new(),
                subscribers: Vec::new(),
            }),
            ready,
            cancel: CancellationToken::new(),
        })
    }

    /// 所观察的服务名
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// 启动后台刷新循环，幂等：重复调用与停止后调用均为空操作
    pub async fn start(self: &Arc<Self>) {
        let mut state = self.state.write().await;
        if state.run_state != RunState::NotStarted {
            return;
        }
        state.run_state = RunState::Running;
        drop(state);

        tokio::spawn(self.clone().run_loop());
    }

    /// 停止刷新循环，终态且幂等
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if state.run_state == RunState::Stopped {
            return;
        }
        state.run_state = RunState::Stopped;
        drop(state);

        self.cancel.cancel();
        // 释放仍在等待首个快照的调用方
        self.ready.send_replace(true);
    }

    /// 返回当前服务快照
    ///
    /// 首轮刷新未完成时阻塞等待，调用方不会把"尚无数据"误读为空结果；
    /// 仅当 Instancer 在首轮完成前被停止时返回 None
    pub async fn service(&self) -> Option<Arc<ServiceSnapshot>> {
        let mut ready = self.ready.subscribe();
        loop {
            let cached = { self.cache.read().await.peek(&self.service_name) };
            if let Some(snapshot) = cached {
                return Some(snapshot);
            }
            if *ready.borrow_and_update() {
                // 就绪置位与上面的读缓存之间首个快照可能刚好落地，
                // 必须重查缓存；仍为空才是"首轮完成前被停止"
                return self.cache.read().await.peek(&self.service_name);
            }
            if ready.changed().await.is_err() {
                return None;
            }
        }
    }

    /// 返回当前快照中匹配选择器的实例
    ///
    /// Instancer 停止后返回 [`DiscoveryError::InstancerStopped`]——
    /// 即使缓存仍有快照，停止后也无法再保证其新鲜度。
    ///
    /// 快照带刷新错误时不报错，照常返回沿用的实例列表；需要区分
    /// 新鲜与过期数据的调用方应读取 [`Instancer::service`] 的
    /// `error`/`first_error_at` 字段，或走解析层的过期回退策略
    pub async fn instances(
        &self,
        selector: Option<&InstanceMatcher>,
    ) -> Result<Vec<Arc<ServiceInstance>>> {
        if self.cancel.is_cancelled() {
            return Err(DiscoveryError::InstancerStopped);
        }
        let Some(snapshot) = self.service().await else {
            return Err(DiscoveryError::InstancerStopped);
        };
        if self.cancel.is_cancelled() {
            return Err(DiscoveryError::InstancerStopped);
        }
        Ok(snapshot.instances(selector))
    }

    /// 在当前任务中立即执行一次前台刷新，与后台循环共用同一条写入/通知路径
    pub async fn refresh_now(&self) -> Result<Arc<ServiceSnapshot>> {
        if self.cancel.is_cancelled() {
            return Err(DiscoveryError::InstancerStopped);
        }
        match self
            .backend
            .query(&self.service_name, None, Duration::ZERO)
            .await
        {
            Ok((entries, _)) => {
                let instances = make_instances(entries, self.selector.as_ref());
                self.on_refresh(instances, None).await;
            }
            Err(e) => {
                let previous = self.previous_instances().await;
                self.on_refresh(previous, Some(e)).await;
            }
        }
        let cached = self.cache.read().await.peek(&self.service_name);
        cached.ok_or(DiscoveryError::InstancerStopped)
    }

    /// 注册变更回调，相同 id 后写覆盖先写；注册时不会立即调用
    pub async fn register_callback(&self, id: impl Into<String>, callback: Callback) {
        let mut state = self.state.write().await;
        state.callbacks.insert(id.into(), callback);
    }

    /// 注销变更回调
    pub async fn deregister_callback(&self, id: &str) {
        let mut state = self.state.write().await;
        state.callbacks.remove(id);
    }

    /// 订阅旧式事件通道
    ///
    /// 订阅时立即投递最近一次已知事件（可能为空列表），
    /// 之后每个通知周期投递一次
    pub async fn register_event_channel(&self, sender: mpsc::Sender<DiscoveryEvent>) {
        // 状态写锁持有至回放发送完成：广播在状态读锁下进行，
        // 保证回放一定先于之后的广播到达，订阅者看到的事件不乱序
        let mut state = self.state.write().await;
        let last_event = {
            let cache = self.cache.read().await;
            cache
                .peek(&self.service_name)
                .map(|snapshot| make_event(&snapshot))
                .unwrap_or(DiscoveryEvent {
                    instances: Vec::new(),
                    error: None,
                })
        };
        state.subscribers.push(sender.clone());
        let _ = sender.send(last_event).await;
    }

    /// 退订旧式事件通道
    pub async fn deregister_event_channel(&self, sender: &mpsc::Sender<DiscoveryEvent>) {
        let mut state = self.state.write().await;
        state.subscribers.retain(|s| !s.same_channel(sender));
    }

    /// 后台刷新循环：查询 → 建快照 → 写缓存 → 判定通知 → 分发
    ///
    /// 单循环、单写入方，刷新周期严格串行；查询失败不会终止循环，
    /// 只有显式 stop 才会
    async fn run_loop(self: Arc<Self>) {
        let mut wait_token: Option<WaitToken> = None;
        let mut backoff = self.backoff_base;
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                r = self.backend.query(&self.service_name, wait_token, self.poll_wait) => r,
            };
            // 取消后不再写入快照
            if self.cancel.is_cancelled() {
                break;
            }
            match result {
                Ok((entries, token)) => {
                    wait_token = token;
                    let instances = make_instances(entries, self.selector.as_ref());
                    self.on_refresh(instances, None).await;
                    backoff = self.backoff_base;
                }
                Err(e) => {
                    tracing::warn!(
                        service = %self.service_name,
                        error = %e,
                        "failed to refresh service instances"
                    );
                    // 失败时沿用上一次的实例列表，供过期回退策略使用
                    let previous = self.previous_instances().await;
                    self.on_refresh(previous, Some(e)).await;
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = next_backoff(backoff);
                }
            }
        }
        tracing::debug!(service = %self.service_name, "instancer refresh loop exited");
    }

    async fn previous_instances(&self) -> Vec<Arc<ServiceInstance>> {
        self.cache
            .read()
            .await
            .peek(&self.service_name)
            .map(|s| s.instances.clone())
            .unwrap_or_default()
    }

    /// 记录一轮刷新结果并按需分发通知
    async fn on_refresh(&self, instances: Vec<Arc<ServiceInstance>>, error: Option<BackendError>) {
        // 取消后不再写入快照
        if self.cancel.is_cancelled() {
            return;
        }
        let now = Utc::now();
        let (notify, snapshot, previous) = {
            let mut cache = self.cache.write().await;
            let previous = cache.peek(&self.service_name);
            // 首次失败时间只记录一次，后续失败原样继承
            let first_error_at = match (&error, previous.as_deref()) {
                (None, _) => None,
                (Some(_), Some(prev)) if prev.error.is_some() => prev.first_error_at,
                (Some(_), _) => Some(now),
            };
            let snapshot = Arc::new(ServiceSnapshot {
                name: self.service_name.clone(),
                instances,
                captured_at: now,
                error,
                first_error_at,
            });
            cache.set(&self.service_name, snapshot.clone());
            let notify = should_notify(&snapshot, previous.as_deref());
            (notify, snapshot, previous)
        };
        // 写锁已释放，先唤醒等待首个快照的调用方，再分发通知
        self.ready.send_replace(true);
        if notify {
            self.log_update(&snapshot, previous.as_deref());
            self.broadcast(make_event(&snapshot)).await;
            self.invoke_callbacks().await;
        }
    }

    async fn broadcast(&self, event: DiscoveryEvent) {
        // 读锁持有至发送完成，与订阅时的回放（状态写锁下发送）互斥
        let state = self.state.read().await;
        for sender in &state.subscribers {
            // 每个订阅者一份独立副本
            let _ = sender.send(event.clone()).await;
        }
    }

    async fn invoke_callbacks(&self) {
        let callbacks: Vec<Callback> = {
            let state = self.state.read().await;
            state.callbacks.values().cloned().collect()
        };
        for callback in callbacks {
            callback(self);
        }
    }

    fn log_update(&self, new: &ServiceSnapshot, old: Option<&ServiceSnapshot>) {
        if self.verbose {
            self.verbose_log(new, old);
        }

        // 常规日志只记录健康实例数在 0 与非 0 之间的跃迁
        let healthy = InstanceMatcher::is_healthy();
        let before = old.map_or(0, |s| s.instance_count(Some(&healthy)));
        let now = new.instance_count(Some(&healthy));
        if before == 0 && now > 0 {
            tracing::info!(service = %self.service_name, "service became available");
        } else if before > 0 && now == 0 {
            tracing::warn!(service = %self.service_name, "service healthy instances dropped to 0");
        }
    }

    fn verbose_log(&self, new: &ServiceSnapshot, old: Option<&ServiceSnapshot>) {
        if new.error.is_some() && old.is_none_or(|s| s.error.is_none()) {
            tracing::info!(
                service = %self.service_name,
                error = %new.error.as_ref().map(ToString::to_string).unwrap_or_default(),
                "error when finding instances"
            );
        } else {
            let diff = diff(new, old);
            tracing::debug!(
                service = %self.service_name,
                healthy = diff.healthy,
                unchanged = diff.unchanged,
                updated = diff.updated,
                added = diff.added,
                removed = diff.removed,
                "refreshed instances"
            );
        }
    }
}

/// 通知判定：满足任一条件才通知，避免多余唤醒且不漏真实变更
///
/// 1. 实例列表（按 ID 序结构比较）发生变化；
/// 2. 新快照有错误而旧快照没有；
/// 3. 旧快照有错误而新快照没有
fn should_notify(new: &ServiceSnapshot, old: Option<&ServiceSnapshot>) -> bool {
    let Some(old) = old else {
        return true;
    };
    new.instances != old.instances || new.error.is_some() != old.error.is_some()
}

/// 原始条目映射为实例，应用默认选择器过滤并按 ID 升序排序
fn make_instances(
    entries: Vec<RawServiceEntry>,
    selector: Option<&InstanceMatcher>,
) -> Vec<Arc<ServiceInstance>> {
    let mut instances = Vec::with_capacity(entries.len());
    for entry in entries {
        let instance = ServiceInstance::from_raw(entry);
        match selector {
            None => instances.push(Arc::new(instance)),
            Some(m) => {
                if matches!(m.matches(&instance), Ok(true)) {
                    instances.push(Arc::new(instance));
                }
            }
        }
    }
    instances.sort_by(|a, b| a.id.cmp(&b.id));
    instances
}

fn make_event(snapshot: &ServiceSnapshot) -> DiscoveryEvent {
    DiscoveryEvent {
        instances: snapshot.instances.iter().map(|i| i.host_port()).collect(),
        error: snapshot.error.clone(),
    }
}

fn next_backoff(current: Duration) -> Duration {
    current.mul_f64(BACKOFF_FACTOR).min(MAX_BACKOFF)
}

/// 相邻快照差异统计，仅用于日志观测，不参与通知判定
#[derive(Debug, Default, PartialEq, Eq)]
struct SnapshotDiff {
    healthy: usize,
    unchanged: usize,
    updated: usize,
    added: usize,
    removed: usize,
}

/// 双游标 O(n) 差异统计，依赖两侧实例都按 ID 升序的不变量
fn diff(new: &ServiceSnapshot, old: Option<&ServiceSnapshot>) -> SnapshotDiff {
    let mut ret = SnapshotDiff::default();
    let empty = Vec::new();
    let old_insts = old.map_or(&empty, |s| &s.instances);
    let new_insts = &new.instances;

    let (mut i, mut j) = (0, 0);
    while i < new_insts.len() && j < old_insts.len() {
        let (new_inst, old_inst) = (&new_insts[i], &old_insts[j]);
        if new_inst.id > old_inst.id {
            j += 1;
            ret.removed += 1;
        } else if new_inst.id < old_inst.id {
            i += 1;
            ret.added += 1;
        } else {
            i += 1;
            j += 1;
            if new_inst == old_inst {
                ret.unchanged += 1;
            } else {
                ret.updated += 1;
            }
        }
    }
    ret.added += new_insts.len() - i;
    ret.removed += old_insts.len() - j;

    ret.healthy = new
        .instances
        .iter()
        .filter(|inst| inst.health == crate::discovery::instance::HealthStatus::Passing)
        .count();
    ret
}

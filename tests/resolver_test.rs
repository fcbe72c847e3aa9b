//! 目标解析与端点管理测试

mod common;

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use beacon_discovery::{
    DiscoveryError, Endpoint, EndpointFactory, Endpointer, HealthStatus, InstanceMatcher,
    Instancer, InstancerOption, RoundRobinBalancer, ServiceInstance, StalePolicy,
    StaticTargetResolver, TargetResolver, TargetResolverOption,
};
use common::{MockBackend, entry};

const SERVICE: &str = "orders";

fn instance(id: &str, port: u16) -> Arc<ServiceInstance> {
    Arc::new(ServiceInstance {
        id: id.to_string(),
        service_name: SERVICE.to_string(),
        address: "10.0.0.1".to_string(),
        port,
        tags: Vec::new(),
        meta: HashMap::new(),
        health: HealthStatus::Passing,
        raw_entry: None,
    })
}

async fn start_instancer(backend: Arc<MockBackend>) -> Arc<Instancer> {
    let instancer = Instancer::new(InstancerOption {
        service_name: SERVICE.to_string(),
        backend,
        selector: None,
        verbose: false,
        poll_wait: Duration::from_millis(200),
        backoff_base: Duration::from_millis(20),
    });
    instancer.start().await;
    instancer
}

/// 等待失败快照落地
async fn wait_for_error(instancer: &Instancer) {
    timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = instancer.service().await.unwrap();
            if snapshot.error.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("failure snapshot never appeared");
}

/// 测试：轮询均衡器在稳定候选集上严格轮转
#[test]
fn test_round_robin_fairness() {
    let balancer = RoundRobinBalancer::new();
    let candidates = vec![instance("a", 1), instance("b", 2), instance("c", 3)];

    let mut counts: HashMap<String, usize> = HashMap::new();
    for i in 0..9 {
        let picked = balancer.balance(SERVICE, &candidates).unwrap();
        assert_eq!(picked.id, candidates[i % 3].id, "selection should rotate in order");
        *counts.entry(picked.id.clone()).or_default() += 1;
    }
    assert!(counts.values().all(|&c| c == 3), "9 picks over 3 candidates should be 3 each");
}

/// 测试：空候选集报 NoEndpointFound
#[test]
fn test_balance_empty_candidates() {
    let balancer = RoundRobinBalancer::new();
    let err = balancer.balance(SERVICE, &[]).unwrap_err();
    assert!(matches!(err, DiscoveryError::NoEndpointFound { .. }));
}

/// 测试：过期回退策略的开关组合
#[test]
fn test_stale_policy_from_options() {
    assert_eq!(StalePolicy::from_options(false, None), StalePolicy::TrustAlways);
    assert_eq!(
        StalePolicy::from_options(false, Some(Duration::from_secs(1))),
        StalePolicy::TrustAlways
    );
    assert_eq!(StalePolicy::from_options(true, None), StalePolicy::TrustNever);
    assert_eq!(StalePolicy::from_options(true, Some(Duration::ZERO)), StalePolicy::TrustNever);
    assert_eq!(
        StalePolicy::from_options(true, Some(Duration::from_secs(1))),
        StalePolicy::TrustFor(Duration::from_secs(1))
    );
}

/// 测试：解析 URL 拼装（context path 来自实例元数据）
#[tokio::test]
async fn test_resolve_builds_url_with_context_path() {
    let backend = MockBackend::new();
    backend
        .set_entries(vec![entry(
            SERVICE,
            "a",
            8081,
            &[],
            &[("context", "/api")],
            "passing",
        )])
        .await;
    let instancer = start_instancer(backend).await;
    let resolver = TargetResolver::new(instancer, TargetResolverOption::default());

    let target = resolver.resolve("/users/42", None).await.unwrap();
    assert_eq!(target.to_url(), "http://10.0.0.1:8081/api/users/42");

    let root = resolver.resolve("", None).await.unwrap();
    assert_eq!(root.path, "/api");
}

/// 测试：scheme 推断——secure 标签/元数据优先，其次缺省值，强制覆盖最高
#[tokio::test]
async fn test_resolve_scheme_inference() {
    let backend = MockBackend::new();
    backend
        .set_entries(vec![entry(SERVICE, "a", 8443, &["secure=true"], &[], "passing")])
        .await;
    let instancer = start_instancer(backend.clone()).await;

    let resolver = TargetResolver::new(instancer.clone(), TargetResolverOption::default());
    let target = resolver.resolve("/ping", None).await.unwrap();
    assert_eq!(target.scheme, "https", "secure=true tag should infer https");

    let forced = TargetResolver::new(
        instancer,
        TargetResolverOption {
            scheme: Some("http".to_string()),
            ..Default::default()
        },
    );
    let target = forced.resolve("/ping", None).await.unwrap();
    assert_eq!(target.scheme, "http", "forced scheme should win over inference");
}

/// 测试：默认只选健康实例，每次调用可整体覆盖选择器
#[tokio::test]
async fn test_resolve_selector_override() {
    let backend = MockBackend::new();
    backend
        .set_entries(vec![
            entry(SERVICE, "a", 8081, &[], &[], "passing"),
            entry(SERVICE, "b", 8082, &["canary"], &[], "critical"),
        ])
        .await;
    let instancer = start_instancer(backend).await;
    let resolver = TargetResolver::new(instancer, TargetResolverOption::default());

    // 默认选择器只会选中健康实例 a
    for _ in 0..4 {
        let target = resolver.resolve("/ping", None).await.unwrap();
        assert_eq!(target.port, 8081);
    }

    // 覆盖后可以选中不健康的 canary 实例
    let canary = InstanceMatcher::with_tag("canary", false);
    let target = resolver.resolve("/ping", Some(&canary)).await.unwrap();
    assert_eq!(target.port, 8082);
}

/// 测试：TrustNever——发现失败立即拒绝
#[tokio::test]
async fn test_stale_trust_never() {
    let backend = MockBackend::new();
    backend
        .set_entries(vec![entry(SERVICE, "a", 8081, &[], &[], "passing")])
        .await;
    let instancer = start_instancer(backend.clone()).await;
    instancer.instances(None).await.unwrap();

    backend.set_failure("consul is down").await;
    wait_for_error(&instancer).await;

    let resolver = TargetResolver::new(instancer, TargetResolverOption::default());
    let err = resolver.resolve("/ping", None).await.unwrap_err();
    match err {
        DiscoveryError::DiscoveryUnavailable { service, .. } => assert_eq!(service, SERVICE),
        other => panic!("expected DiscoveryUnavailable, got {other:?}"),
    }
}

/// 测试：TrustAlways——发现失败时继续使用旧实例
#[tokio::test]
async fn test_stale_trust_always() {
    let backend = MockBackend::new();
    backend
        .set_entries(vec![entry(SERVICE, "a", 8081, &[], &[], "passing")])
        .await;
    let instancer = start_instancer(backend.clone()).await;
    instancer.instances(None).await.unwrap();

    backend.set_failure("consul is down").await;
    wait_for_error(&instancer).await;

    let resolver = TargetResolver::new(
        instancer,
        TargetResolverOption {
            stale_policy: StalePolicy::TrustAlways,
            ..Default::default()
        },
    );
    let target = resolver.resolve("/ping", None).await.unwrap();
    assert_eq!(target.port, 8081, "stale instances should still be used");
}

/// 测试：TrustFor——宽限窗口内可用，窗口过后拒绝
#[tokio::test]
async fn test_stale_trust_for_window() {
    let backend = MockBackend::new();
    backend
        .set_entries(vec![entry(SERVICE, "a", 8081, &[], &[], "passing")])
        .await;
    let instancer = start_instancer(backend.clone()).await;
    instancer.instances(None).await.unwrap();

    backend.set_failure("consul is down").await;
    wait_for_error(&instancer).await;

    let resolver = TargetResolver::new(
        instancer,
        TargetResolverOption {
            stale_policy: StalePolicy::TrustFor(Duration::from_millis(300)),
            ..Default::default()
        },
    );
    let target = resolver.resolve("/ping", None).await;
    assert!(target.is_ok(), "within grace window resolution should succeed");

    tokio::time::sleep(Duration::from_millis(400)).await;
    let err = resolver.resolve("/ping", None).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::DiscoveryUnavailable { .. }));
}

/// 测试：静态解析器在固定目标间轮询并拼接路径
#[test]
fn test_static_resolver_round_robin() {
    let resolver = StaticTargetResolver::new(&[
        "http://svc1:8080".to_string(),
        "https://svc2/base/".to_string(),
    ])
    .unwrap();

    let first = resolver.resolve("/ping").unwrap();
    assert_eq!(first.to_url(), "http://svc1:8080/ping");
    let second = resolver.resolve("/ping").unwrap();
    assert_eq!(second.to_url(), "https://svc2:443/base/ping");
    let third = resolver.resolve("/ping").unwrap();
    assert_eq!(third.to_url(), "http://svc1:8080/ping");
}

/// 测试：静态解析器拒绝非法 URL
#[test]
fn test_static_resolver_rejects_invalid_urls() {
    let err = StaticTargetResolver::new(&["not a url".to_string()]).unwrap_err();
    assert!(matches!(err, DiscoveryError::InvalidTarget { .. }));

    let err = StaticTargetResolver::new(&["ftp://svc1:21".to_string()]).unwrap_err();
    match err {
        DiscoveryError::InvalidTarget { reason, .. } => {
            assert!(reason.contains("scheme"), "reason should mention scheme: {reason}")
        }
        other => panic!("expected InvalidTarget, got {other:?}"),
    }
}

/// 测试：单个实例端点构造失败不影响其余实例
#[tokio::test]
async fn test_endpointer_isolates_construction_failure() {
    let backend = MockBackend::new();
    backend
        .set_entries(vec![
            entry(SERVICE, "bad", 8081, &[], &[], "passing"),
            entry(SERVICE, "good", 8082, &[], &[], "passing"),
        ])
        .await;
    let instancer = start_instancer(backend).await;

    let factory: EndpointFactory<(), String> = Arc::new(|instance: &ServiceInstance| {
        if instance.id == "bad" {
            return Err(DiscoveryError::EndpointConstruction("bad instance".to_string()));
        }
        let addr = instance.host_port();
        let endpoint: Endpoint<(), String> = Arc::new(
            move |_req: ()| -> BoxFuture<'static, beacon_discovery::Result<String>> {
                let addr = addr.clone();
                Box::pin(async move { Ok(addr) })
            },
        );
        Ok(endpoint)
    });
    let endpointer = Endpointer::new(instancer, None, StalePolicy::TrustNever, factory);

    let endpoints = endpointer.endpoints(None).await.unwrap();
    assert_eq!(endpoints.len(), 2, "failed construction must not shrink the endpoint set");

    // 按 ID 序："bad" 在前
    let err = endpoints[0](()).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::EndpointConstruction(_)));
    let addr = endpoints[1](()).await.unwrap();
    assert_eq!(addr, "10.0.0.1:8082");
}

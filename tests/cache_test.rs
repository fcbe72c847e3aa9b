//! 服务快照缓存测试

use std::sync::Arc;
use std::time::Duration;

use beacon_discovery::{ServiceCache, ServiceSnapshot};

fn snapshot(name: &str) -> Arc<ServiceSnapshot> {
    Arc::new(ServiceSnapshot {
        name: name.to_string(),
        instances: Vec::new(),
        captured_at: chrono::Utc::now(),
        error: None,
        first_error_at: None,
    })
}

/// 测试：基本读写与 set 返回被替换的快照
#[test]
fn test_set_get() {
    let mut cache = ServiceCache::new();
    assert!(cache.get("orders").is_none());

    let first = snapshot("orders");
    assert!(cache.set("orders", first.clone()).is_none());
    assert!(Arc::ptr_eq(&cache.get("orders").unwrap(), &first));

    let second = snapshot("orders");
    let replaced = cache.set("orders", second.clone()).expect("should return previous");
    assert!(Arc::ptr_eq(&replaced, &first));
    assert!(Arc::ptr_eq(&cache.get("orders").unwrap(), &second));
}

/// 测试：TTL 过期后条目不可见且被惰性删除
#[tokio::test]
async fn test_ttl_eviction() {
    let mut cache = ServiceCache::new();
    cache.set_with_ttl("orders", snapshot("orders"), Duration::from_millis(100));
    assert!(cache.has("orders"));

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!cache.has("orders"), "entry should expire after TTL");
    assert!(cache.get("orders").is_none());
}

/// 测试：TTL 为零等同于永不过期
#[tokio::test]
async fn test_zero_ttl_never_expires() {
    let mut cache = ServiceCache::new();
    cache.set_with_ttl("orders", snapshot("orders"), Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(cache.has("orders"), "zero TTL should never expire");
}

/// 测试：覆盖已过期条目时 set 不返回旧快照
#[tokio::test]
async fn test_set_over_expired_returns_none() {
    let mut cache = ServiceCache::new();
    cache.set_with_ttl("orders", snapshot("orders"), Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(
        cache.set("orders", snapshot("orders")).is_none(),
        "expired entry should not be reported as replaced"
    );
}

/// 测试：entries 只返回未过期条目
#[tokio::test]
async fn test_entries_filters_expired() {
    let mut cache = ServiceCache::new();
    cache.set("orders", snapshot("orders"));
    cache.set_with_ttl("billing", snapshot("billing"), Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(120)).await;

    let entries = cache.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries.contains_key("orders"));
}

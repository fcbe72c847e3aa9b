//! Consul 后端适配器
//!
//! 通过 Consul HTTP API 的健康查询接口（`/v1/health/service/{name}`）
//! 获取服务实例，支持基于 `X-Consul-Index` 的阻塞式长轮询。

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::discovery::backend::{DiscoveryBackend, RawServiceEntry, WaitToken};
use crate::error::BackendError;

/// 检查状态聚合顺序，严重者优先
const STATUS_SEVERITY: [&str; 4] = ["maintenance", "critical", "warning", "passing"];

/// 基于 Consul HTTP API 的发现后端
pub struct ConsulBackend {
    http_client: reqwest::Client,
    base_url: String,
}

impl ConsulBackend {
    /// 创建后端，`base_url` 形如 `http://127.0.0.1:8500`
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client: reqwest::Client::new(),
            base_url,
        }
    }

    /// 使用外部构造的 HTTP 客户端（自定义超时、TLS 等）
    pub fn with_client(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
        }
    }
}

#[async_trait]
impl DiscoveryBackend for ConsulBackend {
    async fn query(
        &self,
        service_name: &str,
        wait_token: Option<WaitToken>,
        wait: Duration,
    ) -> Result<(Vec<RawServiceEntry>, Option<WaitToken>), BackendError> {
        let url = format!("{}/v1/health/service/{}", self.base_url, service_name);
        let mut request = self.http_client.get(&url);
        if let Some(token) = wait_token {
            // 携带 index 时 Consul 才进入阻塞查询模式
            request = request.query(&[
                ("index", token.0.to_string()),
                ("wait", format!("{}ms", wait.as_millis())),
            ]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BackendError::Request(format!(
                "consul returned status {} for service {}",
                response.status(),
                service_name
            )));
        }

        let next_token = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(WaitToken)
            .or(wait_token);

        let body: Vec<Value> = response
            .json()
            .await
            .map_err(|e| BackendError::Payload(e.to_string()))?;
        let entries = parse_entries(&body)?;
        Ok((entries, next_token))
    }
}

/// 解析健康查询响应中的全部条目
pub fn parse_entries(values: &[Value]) -> Result<Vec<RawServiceEntry>, BackendError> {
    values.iter().map(parse_entry).collect()
}

fn parse_entry(value: &Value) -> Result<RawServiceEntry, BackendError> {
    let service = value
        .get("Service")
        .ok_or_else(|| BackendError::Payload("missing Service object".to_string()))?;
    let id = str_field(service, "ID")?;
    let service_name = str_field(service, "Service")?;
    let address = service
        .get("Address")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let node_address = value
        .get("Node")
        .and_then(|n| n.get("Address"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let port = service
        .get("Port")
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| BackendError::Payload(format!("invalid port for instance {id}")))?;

    let tags = service
        .get("Tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let meta: HashMap<String, String> = service
        .get("Meta")
        .and_then(Value::as_object)
        .map(|meta| {
            meta.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let checks = value.get("Checks").and_then(Value::as_array);
    let aggregated_status = aggregate_check_status(checks.map_or(&[][..], Vec::as_slice));

    Ok(RawServiceEntry {
        id,
        service_name,
        address,
        node_address,
        port,
        tags,
        meta,
        aggregated_status,
        raw: Some(Arc::new(value.clone())),
    })
}

/// 聚合实例的全部检查状态，取最严重者；没有检查时视为 passing
pub fn aggregate_check_status(checks: &[Value]) -> String {
    let statuses: Vec<String> = checks
        .iter()
        .filter_map(|c| c.get("Status").and_then(Value::as_str))
        .map(str::to_ascii_lowercase)
        .collect();
    for severity in STATUS_SEVERITY {
        if statuses.iter().any(|s| s == severity) {
            return severity.to_string();
        }
    }
    "passing".to_string()
}

fn str_field(value: &Value, key: &str) -> Result<String, BackendError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BackendError::Payload(format!("missing field {key}")))
}

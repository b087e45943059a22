//! Helpers shared by the scenario tests.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use fleet_core::config::{AgentCredential, ManualCluster, ScalingMode};
use fleet_core::{FleetConfig, FleetContext};
use fleet_state::{ClusterType, Condition, ProviderType, StateStore, StrimziVersion};
use serde_json::Value;
use tower::ServiceExt;

pub const ADMIN_TOKEN: &str = "admin-token";

pub fn agent_token(cluster_id: &str) -> String {
    format!("agent-{cluster_id}")
}

pub fn manual_cluster(id: &str, limit: u32) -> ManualCluster {
    ManualCluster {
        cluster_id: id.to_string(),
        cloud_provider: "aws".into(),
        region: "us-east-1".into(),
        multi_az: true,
        schedulable: true,
        streaming_unit_limit: limit,
        supported_instance_types: vec!["standard".into(), "developer".into()],
        provider_type: ProviderType::Ocm,
        cluster_type: ClusterType::Managed,
        organization_id: None,
    }
}

/// Manual-mode config with an agent credential per cluster and one admin.
pub fn manual_config(clusters: &[(&str, u32)]) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.dataplane.scaling_mode = ScalingMode::Manual;
    config.dataplane.manual_clusters = clusters.iter().map(|(id, limit)| manual_cluster(id, *limit)).collect();
    config.agent.credentials = clusters
        .iter()
        .map(|(id, _)| AgentCredential {
            token: agent_token(id),
            cluster_id: Some(id.to_string()),
            role: Some("agent".into()),
        })
        .collect();
    config.agent.credentials.push(AgentCredential {
        token: ADMIN_TOKEN.into(),
        cluster_id: None,
        role: Some("admin".into()),
    });
    config
}

pub fn context(config: FleetConfig) -> (FleetContext, std::sync::Arc<fleet_core::InMemoryProvider>) {
    FleetContext::simulated(config, StateStore::open_in_memory().unwrap())
}

pub fn ready_report() -> Value {
    serde_json::json!({
        "conditions": [Condition::new("Ready", "True")],
        "remaining": {"connections": 5000, "partitions": 500},
        "strimzi_versions": [StrimziVersion {
            version: "strimzi-cluster-operator.v0.23.0-0".into(),
            ready: true,
            kafka_versions: vec!["2.7.0".into(), "2.8.0".into()],
            kafka_ibp_versions: vec!["2.8".into()],
        }],
    })
}

pub async fn send(router: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Response<Body> {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    router.clone().oneshot(req).await.unwrap()
}

/// Send and decode the JSON envelope, asserting the status code.
pub async fn call(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
    expected: StatusCode,
) -> Value {
    let resp = send(router, method, uri, token, body).await;
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    assert_eq!(status, expected, "{method} {uri}: {json}");
    json
}

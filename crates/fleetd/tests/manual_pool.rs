//! A manual pool of three clusters, each limited to one streaming unit,
//! brought up by the cluster workers and filled through the admin API.

mod common;

use axum::http::StatusCode;
use fleet_clusters::ClusterManager;
use fleet_core::FleetContext;
use fleet_instances::{AcceptedWorker, DeletingWorker, PreparingWorker};
use fleet_state::{ClusterStatus, InstanceRequest, InstanceRequestStatus, epoch_secs};

use common::*;

const CLUSTERS: [&str; 3] = ["c1", "c2", "c3"];

/// Run the cluster workers and the agents' first reports until every
/// configured cluster is ready.
async fn bring_up(ctx: &FleetContext, router: &axum::Router) {
    let manager = ClusterManager::new(ctx.clone());
    for _ in 0..6 {
        assert!(manager.reconcile_all().await.is_empty());
    }
    for id in CLUSTERS {
        let cluster = ctx.store.get_cluster(id).unwrap().unwrap();
        assert_eq!(cluster.status, ClusterStatus::WaitingForKasFleetshardOperator, "{id}");

        let uri = format!("/api/v1/agent-clusters/{id}/status");
        let body = call(router, "PUT", &uri, Some(&agent_token(id)), Some(ready_report()), StatusCode::OK).await;
        assert_eq!(body["data"]["status"], "ready");
    }
}

fn new_request(ctx: &FleetContext, name: &str) -> String {
    let r = InstanceRequest::new(name, "alice", "org-1", "aws", "us-east-1", "standard", "x1", 1);
    ctx.store.insert_request(&r).unwrap();
    r.id
}

async fn place(router: &axum::Router, id: &str, expected: StatusCode) -> serde_json::Value {
    let uri = format!("/api/v1/admin/kafkas/{id}/placement");
    call(router, "POST", &uri, Some(ADMIN_TOKEN), None, expected).await
}

#[tokio::test]
async fn fourth_request_is_refused_until_a_cluster_frees_up() {
    let (ctx, _) = context(manual_config(&[("c1", 1), ("c2", 1), ("c3", 1)]));
    let router = fleet_agent::build_router(ctx.clone());
    bring_up(&ctx, &router).await;

    let ids: Vec<String> = (0..4).map(|i| new_request(&ctx, &format!("k{i}"))).collect();
    for (id, cluster) in ids.iter().zip(CLUSTERS) {
        let body = place(&router, id, StatusCode::OK).await;
        assert_eq!(body["data"]["cluster_id"], cluster);
    }
    let body = place(&router, &ids[3], StatusCode::TOO_MANY_REQUESTS).await;
    assert_eq!(body["success"], false);
    assert!(ctx.store.get_request(&ids[3]).unwrap().unwrap().cluster_id.is_none());

    // Delete the first request; it never got a bootstrap host, so the
    // deleting worker removes it straight away.
    ctx.store
        .transition_request(&ids[0], &[InstanceRequestStatus::Accepted], InstanceRequestStatus::Deprovision)
        .unwrap();
    assert!(DeletingWorker::new(ctx.clone()).reconcile_all().is_empty());
    assert!(ctx.store.get_request(&ids[0]).unwrap().unwrap().is_deleted());

    let body = place(&router, &ids[3], StatusCode::OK).await;
    assert_eq!(body["data"]["cluster_id"], "c1");
}

#[tokio::test]
async fn request_lifecycle_through_the_agent() {
    let (ctx, _) = context(manual_config(&[("c1", 1)]));
    let router = fleet_agent::build_router(ctx.clone());
    let manager = ClusterManager::new(ctx.clone());
    for _ in 0..6 {
        manager.reconcile_all().await;
    }
    call(&router, "PUT", "/api/v1/agent-clusters/c1/status", Some(&agent_token("c1")), Some(ready_report()), StatusCode::OK).await;

    let id = new_request(&ctx, "my-kafka");
    let now = epoch_secs();
    assert!(AcceptedWorker::new(ctx.clone()).reconcile_at(now).is_empty());
    let request = ctx.store.get_request(&id).unwrap().unwrap();
    assert_eq!(request.status, InstanceRequestStatus::Preparing);
    assert_eq!(request.cluster_id.as_deref(), Some("c1"));
    assert_eq!(request.desired_kafka_version.as_deref(), Some("2.8.0"));

    assert!(PreparingWorker::new(ctx.clone()).reconcile_at(now).is_empty());
    let request = ctx.store.get_request(&id).unwrap().unwrap();
    assert_eq!(request.status, InstanceRequestStatus::Provisioning);
    assert!(request.bootstrap_server_host.as_deref().is_some_and(|h| h.starts_with("my-kafka-")));

    let token = agent_token("c1");
    let listed = call(&router, "GET", "/api/v1/agent-clusters/c1/kafkas", Some(&token), None, StatusCode::OK).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    assert_eq!(listed["data"][0]["id"], id.as_str());

    let mut reports = serde_json::Map::new();
    reports.insert(
        id.clone(),
        serde_json::json!({
            "conditions": [{"type": "Ready", "status": "True"}],
            "versions": {"kafka": "2.8.0"},
            "routes": [{"name": "bootstrap", "prefix": "", "router": "router.example"}]
        }),
    );
    let report = serde_json::Value::Object(reports);
    let body = call(&router, "PUT", "/api/v1/agent-clusters/c1/kafkas/status", Some(&token), Some(report), StatusCode::OK).await;
    assert_eq!(body["data"][id.as_str()], "ready");

    let uri = format!("/api/v1/admin/kafkas/{id}/suspend");
    let body = call(&router, "POST", &uri, Some(ADMIN_TOKEN), Some(serde_json::json!({"suspended": true})), StatusCode::OK).await;
    assert_eq!(body["data"]["status"], "suspending");

    let listed = call(&router, "GET", "/api/v1/agent-clusters/c1/kafkas", Some(&token), None, StatusCode::OK).await;
    assert_eq!(listed["data"][0]["suspended"], true);
}

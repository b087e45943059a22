//! Compute node scaling driven by cluster reports over the agent API.

mod common;

use axum::http::StatusCode;
use fleet_state::{Cluster, ClusterStatus};
use serde_json::{Value, json};

use common::*;

fn report(current: u32, connections: u64, partitions: u64) -> Value {
    json!({
        "conditions": [{"type": "Ready", "status": "True"}],
        "total": {"connections": 9000, "partitions": 900},
        "remaining": {"connections": connections, "partitions": partitions},
        "node_info": {"current": current, "ceiling": 20, "floor": 3, "current_work_load_minimum": 3},
        "resize_info": {"node_delta": 3, "delta": {"connections": 1000, "partitions": 100}},
    })
}

fn setup() -> (axum::Router, fleet_core::FleetContext, std::sync::Arc<fleet_core::InMemoryProvider>) {
    let (ctx, provider) = context(manual_config(&[("c1", 10)]));
    let mut cluster = Cluster::new("c1", "aws", "us-east-1", true);
    cluster.status = ClusterStatus::Ready;
    ctx.store.put_cluster(&cluster).unwrap();
    provider.set_compute_nodes("c1", 5, 5);
    (fleet_agent::build_router(ctx.clone()), ctx, provider)
}

const STATUS_URI: &str = "/api/v1/agent-clusters/c1/status";

#[tokio::test]
async fn low_capacity_scales_up_by_one_step_then_settles() {
    let (router, ctx, provider) = setup();
    let token = agent_token("c1");

    let body = call(&router, "PUT", STATUS_URI, Some(&token), Some(report(5, 500, 80)), StatusCode::OK).await;
    assert_eq!(body["data"]["status"], "compute_node_scaling_up");
    assert_eq!(body["data"]["scaled_to"], 8);
    assert_eq!(provider.scale_requests(), vec![("c1".to_string(), 8)]);

    provider.complete_scaling();
    let body = call(&router, "PUT", STATUS_URI, Some(&token), Some(report(8, 3500, 350)), StatusCode::OK).await;
    assert_eq!(body["data"]["status"], "ready");
    assert_eq!(body["data"]["scaled_to"], Value::Null);
    assert_eq!(
        ctx.store.get_cluster("c1").unwrap().unwrap().status,
        ClusterStatus::Ready
    );
    assert_eq!(provider.scale_requests().len(), 1);
}

#[tokio::test]
async fn identical_report_twice_acts_once() {
    let (router, ctx, provider) = setup();
    let token = agent_token("c1");

    for _ in 0..2 {
        call(&router, "PUT", STATUS_URI, Some(&token), Some(report(5, 500, 80)), StatusCode::OK).await;
    }
    assert_eq!(provider.scale_requests().len(), 1);
    assert_eq!(
        ctx.store.get_cluster("c1").unwrap().unwrap().status,
        ClusterStatus::ComputeNodeScalingUp
    );

    // Settled capacity, delivered twice, stays ready without resizing.
    provider.complete_scaling();
    for _ in 0..2 {
        let body = call(&router, "PUT", STATUS_URI, Some(&token), Some(report(8, 3500, 350)), StatusCode::OK).await;
        assert_eq!(body["data"]["status"], "ready");
    }
    assert_eq!(provider.scale_requests().len(), 1);
}

#[tokio::test]
async fn agent_losing_readiness_parks_the_cluster() {
    let (router, ctx, _) = setup();
    let mut r = report(5, 5000, 500);
    r["conditions"] = json!([{"type": "Ready", "status": "False"}]);
    call(&router, "PUT", STATUS_URI, Some(&agent_token("c1")), Some(r), StatusCode::OK).await;
    assert_eq!(
        ctx.store.get_cluster("c1").unwrap().unwrap().status,
        ClusterStatus::WaitingForKasFleetshardOperator
    );
}

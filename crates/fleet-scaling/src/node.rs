//! Node scaler: compute pool resizes driven by agent capacity reports.
//!
//! Each report is compared against the configured scale-up and scale-down
//! thresholds. The scale-down band sits above the scale-up band by at least
//! one resize step, so a single report can never trigger a resize that the
//! next report undoes.

use fleet_core::FleetContext;
use fleet_core::config::NodeScalingConfig;
use fleet_state::{Cluster, ClusterStatus, DynamicCapacityInfo};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ScalingError, ScalingResult};
use crate::report::{ClusterCapacityReport, NodeInfo, ResizeInfo};

/// Multi-AZ clusters grow and shrink one node per zone at a time.
const MULTI_AZ_STEP: u32 = 3;
const MULTI_AZ_MIN_NODES: u32 = 3;

/// A resize decision for a single cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Resize the compute pool to the given node count.
    ScaleTo(u32),
    NoChange,
}

/// The status and resize a report calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEvaluation {
    pub status: ClusterStatus,
    pub decision: ScaleDecision,
}

/// What applying a report did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportOutcome {
    pub previous: ClusterStatus,
    pub status: ClusterStatus,
    /// The cluster is in a status that does not take reports.
    pub ignored: bool,
    /// Node count requested from the provider by this report.
    pub scaled_to: Option<u32>,
}

/// Applies agent reports to clusters.
pub struct NodeScaler {
    ctx: FleetContext,
}

impl NodeScaler {
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }

    /// Decide the status and resize for a report, without side effects.
    pub fn evaluate(&self, cluster: &Cluster, report: &ClusterCapacityReport) -> NodeEvaluation {
        evaluate(&self.ctx.config.dataplane.node_scaling, cluster.multi_az, report)
    }

    /// Record a report against a cluster and act on it.
    ///
    /// Clusters outside the report-processing statuses are left untouched.
    /// A resize is skipped while the provider still converges a previous one,
    /// which makes re-delivering the same report a no-op.
    pub async fn apply_report(
        &self,
        cluster_id: &str,
        report: &ClusterCapacityReport,
    ) -> ScalingResult<ReportOutcome> {
        let cluster = self
            .ctx
            .store
            .get_cluster(cluster_id)?
            .filter(|c| !c.is_deleted())
            .ok_or_else(|| ScalingError::ClusterNotFound(cluster_id.to_string()))?;

        let previous = cluster.status;
        if !previous.processes_status_reports() {
            debug!(%cluster_id, status = %previous, "status report ignored");
            return Ok(ReportOutcome {
                previous,
                status: previous,
                ignored: true,
                scaled_to: None,
            });
        }

        let cluster = self.record_capacity(cluster, report)?;
        let evaluation = self.evaluate(&cluster, report);

        let mut scaled_to = None;
        if let ScaleDecision::ScaleTo(desired) = evaluation.decision {
            scaled_to = self.resize(&cluster, desired).await?;
        }

        let mut status = previous;
        if evaluation.status != previous {
            let moved = self
                .ctx
                .store
                .transition_cluster(cluster_id, &[previous], evaluation.status)?;
            if moved {
                info!(%cluster_id, from = %previous, to = %evaluation.status, "cluster status updated from report");
                status = evaluation.status;
            } else {
                debug!(%cluster_id, "cluster changed concurrently, report status dropped");
            }
        }

        Ok(ReportOutcome {
            previous,
            status,
            ignored: false,
            scaled_to,
        })
    }

    /// Store per-type capacity and operator versions. Skips the write when
    /// nothing changed.
    fn record_capacity(&self, cluster: Cluster, report: &ClusterCapacityReport) -> ScalingResult<Cluster> {
        let mut updated = cluster.clone();
        merge_capacity(&mut updated, report, report.node_info.map(|n| n.ceiling).unwrap_or(0));
        if updated == cluster {
            return Ok(cluster);
        }

        let default_max_nodes = report.node_info.map(|n| n.ceiling).unwrap_or(0);
        let stored = self
            .ctx
            .store
            .update_cluster_if(&cluster.cluster_id, &[], |c| {
                merge_capacity(c, report, default_max_nodes);
            })?;
        Ok(stored.unwrap_or(updated))
    }

    async fn resize(&self, cluster: &Cluster, desired: u32) -> ScalingResult<Option<u32>> {
        let provider = &self.ctx.provider;
        let nodes = self
            .ctx
            .bounded("compute_nodes", provider.compute_nodes(cluster))
            .await?;
        if nodes.is_scaling() {
            debug!(
                cluster_id = %cluster.cluster_id,
                actual = nodes.actual,
                desired = nodes.desired,
                "resize already in progress"
            );
            return Ok(None);
        }
        if nodes.desired == desired {
            return Ok(None);
        }

        self.ctx
            .bounded("scale_compute_nodes", provider.scale_compute_nodes(cluster, desired))
            .await?;
        info!(
            cluster_id = %cluster.cluster_id,
            from = nodes.desired,
            to = desired,
            "compute nodes resized"
        );
        Ok(Some(desired))
    }
}

/// Write the reported units into `cluster`, leaving `max_nodes` of known
/// instance types alone.
fn merge_capacity(cluster: &mut Cluster, report: &ClusterCapacityReport, default_max_nodes: u32) {
    for (instance_type, capacity) in &report.capacity {
        let entry = cluster
            .dynamic_capacity_info
            .entry(instance_type.clone())
            .or_insert_with(|| DynamicCapacityInfo {
                max_nodes: default_max_nodes,
                ..DynamicCapacityInfo::default()
            });
        entry.max_units = capacity.max_units;
        entry.remaining_units = capacity.remaining_units;
    }
    if !report.strimzi_versions.is_empty() {
        cluster.strimzi_versions = report.strimzi_versions.clone();
    }
}

/// Decide the status and resize for a report.
pub fn evaluate(config: &NodeScalingConfig, multi_az: bool, report: &ClusterCapacityReport) -> NodeEvaluation {
    if !report.is_ready() {
        return NodeEvaluation {
            status: ClusterStatus::WaitingForKasFleetshardOperator,
            decision: ScaleDecision::NoChange,
        };
    }

    let remaining = report.remaining;
    let needs_more = remaining.connections <= config.scale_up.connections
        || remaining.partitions <= config.scale_up.partitions;

    let (Some(nodes), Some(resize)) = (report.node_info, report.resize_info) else {
        let status = if needs_more || report.all_types_exhausted() {
            ClusterStatus::Full
        } else {
            ClusterStatus::Ready
        };
        return NodeEvaluation {
            status,
            decision: ScaleDecision::NoChange,
        };
    };
    let bounds = NodeBounds::new(nodes, resize, multi_az);

    if needs_more {
        if nodes.current >= bounds.ceiling {
            debug!(current = nodes.current, ceiling = bounds.ceiling, "no node headroom left");
            return NodeEvaluation {
                status: ClusterStatus::Full,
                decision: ScaleDecision::NoChange,
            };
        }
        let desired = nodes.current.saturating_add(bounds.delta).min(bounds.ceiling);
        let decision = if config.enabled && desired > nodes.current {
            debug!(
                from = nodes.current,
                to = desired,
                remaining_connections = remaining.connections,
                remaining_partitions = remaining.partitions,
                "scaling up"
            );
            ScaleDecision::ScaleTo(desired)
        } else {
            ScaleDecision::NoChange
        };
        return NodeEvaluation {
            status: ClusterStatus::ComputeNodeScalingUp,
            decision,
        };
    }

    let status = if report.all_types_exhausted() {
        ClusterStatus::Full
    } else {
        ClusterStatus::Ready
    };
    let plenty = remaining.connections
        > config.scale_down.connections.saturating_add(resize.delta.connections)
        && remaining.partitions > config.scale_down.partitions.saturating_add(resize.delta.partitions);
    let decision = match nodes.current.checked_sub(bounds.delta) {
        Some(desired)
            if config.enabled && plenty && bounds.delta > 0 && desired >= bounds.minimum =>
        {
            debug!(
                from = nodes.current,
                to = desired,
                remaining_connections = remaining.connections,
                remaining_partitions = remaining.partitions,
                "scaling down"
            );
            ScaleDecision::ScaleTo(desired)
        }
        _ => ScaleDecision::NoChange,
    };
    NodeEvaluation { status, decision }
}

/// Node limits after zone rounding.
struct NodeBounds {
    delta: u32,
    ceiling: u32,
    /// Lowest node count a scale-down may reach.
    minimum: u32,
}

impl NodeBounds {
    fn new(nodes: NodeInfo, resize: ResizeInfo, multi_az: bool) -> Self {
        if multi_az {
            Self {
                delta: resize.node_delta.div_ceil(MULTI_AZ_STEP).saturating_mul(MULTI_AZ_STEP),
                ceiling: nodes.ceiling / MULTI_AZ_STEP * MULTI_AZ_STEP,
                minimum: (nodes.floor.div_ceil(MULTI_AZ_STEP).saturating_mul(MULTI_AZ_STEP))
                    .max(nodes.current_work_load_minimum)
                    .max(MULTI_AZ_MIN_NODES),
            }
        } else {
            Self {
                delta: resize.node_delta,
                ceiling: nodes.ceiling,
                minimum: nodes.floor.max(nodes.current_work_load_minimum),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use fleet_core::FleetConfig;
    use fleet_state::{Condition, StateStore};

    use super::*;
    use crate::report::{CapacityMetrics, InstanceTypeCapacity};

    fn report(current: u32, connections: u64, partitions: u64) -> ClusterCapacityReport {
        ClusterCapacityReport {
            conditions: vec![Condition::new("Ready", "True")],
            remaining: CapacityMetrics { connections, partitions },
            node_info: Some(NodeInfo {
                current,
                ceiling: 20,
                floor: 3,
                current_work_load_minimum: 3,
            }),
            resize_info: Some(ResizeInfo {
                node_delta: 3,
                delta: CapacityMetrics {
                    connections: 1000,
                    partitions: 100,
                },
            }),
            ..ClusterCapacityReport::default()
        }
    }

    fn config() -> NodeScalingConfig {
        NodeScalingConfig::default()
    }

    #[test]
    fn low_connections_scale_up_by_delta() {
        let eval = evaluate(&config(), true, &report(5, 500, 1000));
        assert_eq!(eval.status, ClusterStatus::ComputeNodeScalingUp);
        assert_eq!(eval.decision, ScaleDecision::ScaleTo(8));
    }

    #[test]
    fn scale_up_stops_at_the_zone_rounded_ceiling() {
        let eval = evaluate(&config(), true, &report(18, 500, 1000));
        assert_eq!(eval.status, ClusterStatus::Full);
        assert_eq!(eval.decision, ScaleDecision::NoChange);

        let eval = evaluate(&config(), true, &report(16, 500, 1000));
        assert_eq!(eval.decision, ScaleDecision::ScaleTo(18));
    }

    #[test]
    fn multi_az_rounds_the_delta_up() {
        let mut r = report(6, 500, 1000);
        r.resize_info = Some(ResizeInfo {
            node_delta: 1,
            delta: CapacityMetrics::default(),
        });
        assert_eq!(evaluate(&config(), true, &r).decision, ScaleDecision::ScaleTo(9));
        assert_eq!(evaluate(&config(), false, &r).decision, ScaleDecision::ScaleTo(7));
    }

    #[test]
    fn within_the_band_nothing_changes() {
        // Above the scale-down threshold, but not by a full step.
        let eval = evaluate(&config(), true, &report(8, 3500, 350));
        assert_eq!(eval.status, ClusterStatus::Ready);
        assert_eq!(eval.decision, ScaleDecision::NoChange);
    }

    #[test]
    fn plenty_of_room_scales_down() {
        let eval = evaluate(&config(), true, &report(9, 5000, 500));
        assert_eq!(eval.status, ClusterStatus::Ready);
        assert_eq!(eval.decision, ScaleDecision::ScaleTo(6));
    }

    #[test]
    fn scale_down_respects_floor_and_workload_minimum() {
        let eval = evaluate(&config(), true, &report(3, 5000, 500));
        assert_eq!(eval.decision, ScaleDecision::NoChange);

        let mut r = report(9, 5000, 500);
        if let Some(nodes) = r.node_info.as_mut() {
            nodes.current_work_load_minimum = 7;
        }
        assert_eq!(evaluate(&config(), true, &r).decision, ScaleDecision::NoChange);
    }

    #[test]
    fn extreme_report_values_saturate() {
        let mut r = report(9, u64::MAX, u64::MAX);
        r.resize_info = Some(ResizeInfo {
            node_delta: u32::MAX,
            delta: CapacityMetrics {
                connections: u64::MAX,
                partitions: u64::MAX,
            },
        });
        if let Some(nodes) = r.node_info.as_mut() {
            nodes.floor = u32::MAX;
        }
        let eval = evaluate(&config(), true, &r);
        assert_eq!(eval.status, ClusterStatus::Ready);
        assert_eq!(eval.decision, ScaleDecision::NoChange);

        r.remaining = CapacityMetrics {
            connections: 0,
            partitions: 0,
        };
        assert_eq!(evaluate(&config(), true, &r).decision, ScaleDecision::ScaleTo(18));
        assert_eq!(evaluate(&config(), false, &r).decision, ScaleDecision::ScaleTo(20));
    }

    #[test]
    fn not_ready_waits_for_the_operator() {
        let mut r = report(5, 500, 1000);
        r.conditions = vec![Condition::new("Ready", "False")];
        let eval = evaluate(&config(), true, &r);
        assert_eq!(eval.status, ClusterStatus::WaitingForKasFleetshardOperator);
        assert_eq!(eval.decision, ScaleDecision::NoChange);
    }

    #[test]
    fn disabled_scaling_only_sets_status() {
        let mut cfg = config();
        cfg.enabled = false;
        let eval = evaluate(&cfg, true, &report(5, 500, 1000));
        assert_eq!(eval.status, ClusterStatus::ComputeNodeScalingUp);
        assert_eq!(eval.decision, ScaleDecision::NoChange);
    }

    #[test]
    fn exhausted_types_without_node_info_are_full() {
        let mut r = report(5, 5000, 500);
        r.node_info = None;
        r.capacity = BTreeMap::from([(
            "standard".to_string(),
            InstanceTypeCapacity {
                max_units: 4,
                remaining_units: 0,
            },
        )]);
        assert_eq!(evaluate(&config(), true, &r).status, ClusterStatus::Full);
    }

    fn scaler_with_cluster(status: ClusterStatus) -> (NodeScaler, std::sync::Arc<fleet_core::InMemoryProvider>) {
        let (ctx, provider) =
            FleetContext::simulated(FleetConfig::default(), StateStore::open_in_memory().unwrap());
        let mut cluster = Cluster::new("c1", "aws", "us-east-1", true);
        cluster.status = status;
        ctx.store.put_cluster(&cluster).unwrap();
        provider.set_compute_nodes("c1", 5, 5);
        (NodeScaler::new(ctx), provider)
    }

    #[tokio::test]
    async fn scale_up_then_back_to_ready() {
        let (scaler, provider) = scaler_with_cluster(ClusterStatus::Ready);

        let outcome = scaler.apply_report("c1", &report(5, 500, 1000)).await.unwrap();
        assert_eq!(outcome.status, ClusterStatus::ComputeNodeScalingUp);
        assert_eq!(outcome.scaled_to, Some(8));
        assert_eq!(provider.scale_requests(), vec![("c1".to_string(), 8)]);

        provider.complete_scaling();
        let outcome = scaler.apply_report("c1", &report(8, 3500, 350)).await.unwrap();
        assert_eq!(outcome.status, ClusterStatus::Ready);
        assert_eq!(outcome.scaled_to, None);
    }

    #[tokio::test]
    async fn redelivered_report_is_a_no_op() {
        let (scaler, provider) = scaler_with_cluster(ClusterStatus::Ready);
        let r = report(5, 500, 1000);

        let first = scaler.apply_report("c1", &r).await.unwrap();
        let second = scaler.apply_report("c1", &r).await.unwrap();
        assert_eq!(first.scaled_to, Some(8));
        assert_eq!(second.previous, ClusterStatus::ComputeNodeScalingUp);
        assert_eq!(second.status, ClusterStatus::ComputeNodeScalingUp);
        assert_eq!(second.scaled_to, None);
        assert_eq!(provider.scale_requests().len(), 1);
    }

    #[tokio::test]
    async fn reports_record_capacity_and_versions() {
        let (scaler, _) = scaler_with_cluster(ClusterStatus::WaitingForKasFleetshardOperator);
        let mut r = report(5, 5000, 500);
        r.capacity = BTreeMap::from([(
            "standard".to_string(),
            InstanceTypeCapacity {
                max_units: 10,
                remaining_units: 7,
            },
        )]);
        r.strimzi_versions = vec![fleet_state::StrimziVersion {
            version: "strimzi-cluster-operator.v0.23.0-0".into(),
            ready: true,
            kafka_versions: vec!["2.8.0".into()],
            kafka_ibp_versions: vec!["2.8".into()],
        }];

        let outcome = scaler.apply_report("c1", &r).await.unwrap();
        assert_eq!(outcome.status, ClusterStatus::Ready);

        let stored = scaler.ctx.store.get_cluster("c1").unwrap().unwrap();
        assert_eq!(stored.max_units("standard"), 10);
        assert_eq!(stored.dynamic_capacity_info["standard"].remaining_units, 7);
        assert_eq!(stored.strimzi_versions.len(), 1);
        assert!(stored.ready_at.is_some());
    }

    #[test]
    fn capacity_write_keeps_max_nodes_set_meanwhile() {
        let (scaler, _) = scaler_with_cluster(ClusterStatus::Ready);
        let snapshot = scaler.ctx.store.get_cluster("c1").unwrap().unwrap();

        // The cluster worker sets max_nodes between the read and the write.
        scaler
            .ctx
            .store
            .update_cluster_if("c1", &[], |c| {
                c.dynamic_capacity_info.entry("standard".to_string()).or_default().max_nodes = 30;
            })
            .unwrap();

        let mut r = report(5, 5000, 500);
        r.capacity = BTreeMap::from([(
            "standard".to_string(),
            InstanceTypeCapacity {
                max_units: 10,
                remaining_units: 4,
            },
        )]);
        let stored = scaler.record_capacity(snapshot, &r).unwrap();
        let standard = &stored.dynamic_capacity_info["standard"];
        assert_eq!(standard.max_nodes, 30);
        assert_eq!(standard.max_units, 10);
        assert_eq!(standard.remaining_units, 4);
    }

    #[tokio::test]
    async fn clusters_not_taking_reports_are_ignored() {
        let (scaler, provider) = scaler_with_cluster(ClusterStatus::Provisioning);
        let outcome = scaler.apply_report("c1", &report(5, 500, 1000)).await.unwrap();
        assert!(outcome.ignored);
        assert_eq!(outcome.status, ClusterStatus::Provisioning);
        assert!(provider.scale_requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_cluster() {
        let (scaler, _) = scaler_with_cluster(ClusterStatus::Ready);
        let err = scaler.apply_report("nope", &report(5, 500, 1000)).await.unwrap_err();
        assert!(matches!(err, ScalingError::ClusterNotFound(_)));
    }
}

//! fleet-scaling: capacity feedback loops.
//!
//! Two loops keep the pool sized to demand:
//!
//! - [`NodeScaler`] reacts to each agent status report, resizing a
//!   cluster's compute pool and moving it between `ready`,
//!   `compute_node_scaling_up` and `full`.
//! - [`DynamicScaleUpManager`] and [`DynamicScaleDownManager`] run as
//!   reconcile workers in dynamic mode, creating clusters for short shapes
//!   and deprovisioning idle ones.

pub mod dynamic;
pub mod error;
pub mod node;
pub mod report;
pub mod summary;

pub use dynamic::{
    DynamicScaleDownManager, DynamicScaleUpManager, ScaleDownAction, ScaleDownReason, ScaleUpAction,
};
pub use error::{ScalingError, ScalingResult};
pub use node::{NodeEvaluation, NodeScaler, ReportOutcome, ScaleDecision};
pub use report::{CapacityMetrics, ClusterCapacityReport, InstanceTypeCapacity, NodeInfo, ResizeInfo};
pub use summary::CapacitySummary;

//! fleet-placement: assigns instance requests to clusters.
//!
//! # Components
//!
//! - **`candidate`**: eligibility filter and capacity ranking
//! - **`strategy`**: manual, capacity (auto/dynamic) and enterprise strategies
//! - **`placer`**: the claim-with-retry placement call

pub mod candidate;
pub mod error;
pub mod placer;
pub mod strategy;

pub use candidate::{Candidate, PlacementRequirements, is_eligible, rank_candidates};
pub use error::{PlacementError, PlacementResult};
pub use placer::{MAX_CLAIM_ATTEMPTS, place_instance_request};
pub use strategy::{
    CapacityPlacement, ClusterPlacementStrategy, EnterprisePlacement, ManualPlacement, strategy_for,
};

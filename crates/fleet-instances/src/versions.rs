//! Operator and broker version selection.
//!
//! Strimzi bundle names end in `<major>.<minor>.<patch>-<build>`, e.g.
//! `strimzi-cluster-operator.v0.23.0-0`. Broker and IBP versions may omit the
//! patch component (`2.8`).

use std::cmp::Ordering;

use fleet_state::StrimziVersion;
use regex::Regex;
use semver::Version;

/// Versions a new instance is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedVersions {
    pub strimzi: String,
    pub kafka: String,
    pub kafka_ibp: String,
}

/// Semantic version of a strimzi bundle name.
pub fn strimzi_semver(name: &str) -> Option<Version> {
    let re = Regex::new(r"\d+\.\d+\.\d+-\d+$").ok()?;
    let found = re.find(name)?;
    Version::parse(found.as_str()).ok()
}

/// Parse `2.8` or `2.8.1` as a semantic version.
pub fn loose_semver(version: &str) -> Option<Version> {
    let parts = version.split('.').count();
    let padded = match parts {
        1 => format!("{version}.0.0"),
        2 => format!("{version}.0"),
        _ => version.to_string(),
    };
    Version::parse(&padded).ok()
}

fn compare_loose(a: &str, b: &str) -> Ordering {
    match (loose_semver(a), loose_semver(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// The newest ready strimzi bundle with its newest broker and IBP versions.
/// `None` when no ready bundle offers both.
pub fn latest_ready(versions: &[StrimziVersion]) -> Option<SelectedVersions> {
    let bundle = versions
        .iter()
        .filter(|v| v.ready)
        .filter_map(|v| strimzi_semver(&v.version).map(|semver| (semver, v)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, v)| v)?;

    let kafka = bundle.kafka_versions.iter().max_by(|a, b| compare_loose(a, b))?;
    let kafka_ibp = bundle
        .kafka_ibp_versions
        .iter()
        .max_by(|a, b| compare_loose(a, b))?;

    Some(SelectedVersions {
        strimzi: bundle.version.clone(),
        kafka: kafka.clone(),
        kafka_ibp: kafka_ibp.clone(),
    })
}

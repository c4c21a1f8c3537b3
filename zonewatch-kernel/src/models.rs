//! Data model shared by the client, the dashboard caches and the REST API.
//!
//! `Raw*` types mirror what the monitoring backend sends and are tolerant of
//! missing fields. The other types are the shapes the dashboards work with.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Dashboard variants served by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardVariant {
    /// Vital for Group
    Vfg,
    /// Vital for Enterprise
    Vfe,
    Unified,
}

impl DashboardVariant {
    pub const ALL: [DashboardVariant; 3] = [Self::Vfg, Self::Vfe, Self::Unified];

    pub fn slug(&self) -> &'static str {
        match self {
            Self::Vfg => "vfg",
            Self::Vfe => "vfe",
            Self::Unified => "unified",
        }
    }

    /// Value of the backend `type` query parameter. Unified queries are unfiltered.
    pub fn backend_type(&self) -> Option<&'static str> {
        match self {
            Self::Vfg => Some("vfg"),
            Self::Vfe => Some("vfe"),
            Self::Unified => None,
        }
    }

    pub fn storage_key(&self) -> String {
        format!("{}{}_cache", crate::storage::DASHBOARD_KEY_PREFIX, self.slug())
    }
}

impl fmt::Display for DashboardVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for DashboardVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vfg" => Ok(Self::Vfg),
            "vfe" => Ok(Self::Vfe),
            "unified" | "all" => Ok(Self::Unified),
            other => Err(format!("unknown dashboard variant '{other}'")),
        }
    }
}

/// Look-back window for "recent" problems, sent as the `from` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Timeframe {
    #[default]
    #[serde(rename = "-24h")]
    Last24Hours,
    #[serde(rename = "-72h")]
    Last72Hours,
    #[serde(rename = "-7d")]
    Last7Days,
    #[serde(rename = "-30d")]
    Last30Days,
}

impl Timeframe {
    pub fn as_param(&self) -> &'static str {
        match self {
            Self::Last24Hours => "-24h",
            Self::Last72Hours => "-72h",
            Self::Last7Days => "-7d",
            Self::Last30Days => "-30d",
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "-24h" | "24h" => Ok(Self::Last24Hours),
            "-72h" | "72h" => Ok(Self::Last72Hours),
            "-7d" | "7d" => Ok(Self::Last7Days),
            "-30d" | "30d" => Ok(Self::Last30Days),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

// ============================================================================
// Backend records
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEntity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "entity_type", rename = "type")]
    pub entity_type: Option<String>,
}

/// Problem record as returned by `/problems`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProblem {
    #[serde(default, alias = "problemId")]
    pub id: Option<String>,
    #[serde(default, alias = "displayId")]
    pub display_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "impactLevel")]
    pub impact: Option<String>,
    #[serde(default, alias = "severityLevel")]
    pub severity: Option<String>,
    #[serde(default, alias = "startTime", deserialize_with = "de_timestamp")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(default, alias = "endTime", deserialize_with = "de_timestamp")]
    pub end_time: Option<OffsetDateTime>,
    #[serde(default, alias = "management_zone")]
    pub zone: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub impacted: Option<String>,
    #[serde(default, alias = "affectedEntities", alias = "impacted_entities")]
    pub affected_entities: Vec<RawEntity>,
    #[serde(default, alias = "rootCause")]
    pub root_cause: Option<String>,
    #[serde(default, alias = "problemUrl", alias = "dt_url")]
    pub problem_url: Option<String>,
}

/// Accepts epoch milliseconds, RFC 3339 strings, or null.
fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok()),
        Some(serde_json::Value::String(s)) if !s.is_empty() => {
            match s.parse::<i64>() {
                Ok(ms) => OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok(),
                Err(_) => OffsetDateTime::parse(&s, &Rfc3339).ok(),
            }
        }
        _ => None,
    })
}

// ============================================================================
// Dashboard shapes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    High,
    Medium,
    Low,
}

impl ImpactLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemStatus {
    Open,
    Closed,
}

impl ProblemStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub code: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub zone: String,
    pub impact: ImpactLevel,
    pub status: ProblemStatus,
    pub host: String,
    pub impacted_entities: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    pub duration: String,
    pub root_cause: Option<String>,
    pub problem_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneHealth {
    Healthy,
    Warning,
    Critical,
}

impl ZoneHealth {
    pub fn from_problem_count(count: u32) -> Self {
        match count {
            0 => Self::Healthy,
            1..=3 => Self::Warning,
            _ => Self::Critical,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawManagementZone {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "hosts")]
    pub host_count: u32,
    #[serde(default, alias = "services")]
    pub service_count: u32,
    #[serde(default, alias = "apps", alias = "applications")]
    pub application_count: u32,
    #[serde(default, alias = "problems")]
    pub problem_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementZone {
    pub id: String,
    pub name: String,
    pub host_count: u32,
    pub service_count: u32,
    pub application_count: u32,
    pub problem_count: u32,
    pub health: ZoneHealth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: i64,
    pub value: f64,
}

/// Historical series attached to an inventory entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricHistory {
    #[serde(default)]
    pub points: Vec<MetricPoint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default, alias = "cpu_usage")]
    pub cpu: Option<f64>,
    #[serde(default, alias = "ram_usage", alias = "memory")]
    pub ram: Option<f64>,
    #[serde(default, alias = "os_type")]
    pub os: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cpu_history: Option<MetricHistory>,
    #[serde(default)]
    pub ram_history: Option<MetricHistory>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub technology: Option<String>,
    #[serde(default, alias = "response_time_ms")]
    pub response_time: Option<f64>,
    #[serde(default)]
    pub error_rate: Option<f64>,
    #[serde(default)]
    pub requests: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub response_time_history: Option<MetricHistory>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub technology: Option<String>,
    #[serde(default)]
    pub process_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub active_problems: u32,
    #[serde(default)]
    pub hosts: u32,
    #[serde(default)]
    pub services: u32,
    #[serde(default)]
    pub process_groups: u32,
    #[serde(default)]
    pub management_zones: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_keys() {
        assert_eq!(DashboardVariant::Vfg.storage_key(), "dashboard_vfg_cache");
        assert_eq!(DashboardVariant::Unified.backend_type(), None);
        assert_eq!("VFE".parse::<DashboardVariant>().unwrap(), DashboardVariant::Vfe);
        assert!("nope".parse::<DashboardVariant>().is_err());
    }

    #[test]
    fn test_raw_problem_timestamps() {
        let raw: RawProblem = serde_json::from_value(serde_json::json!({
            "id": "P-1",
            "startTime": 1_700_000_000_000i64,
            "end_time": "2023-11-14T23:13:20Z",
        }))
        .unwrap();
        assert_eq!(raw.start_time.unwrap().unix_timestamp(), 1_700_000_000);
        assert_eq!(raw.end_time.unwrap().unix_timestamp(), 1_700_003_600);

        let empty: RawProblem = serde_json::from_value(serde_json::json!({"start_time": null})).unwrap();
        assert!(empty.start_time.is_none());
    }

    #[test]
    fn test_zone_health_thresholds() {
        assert_eq!(ZoneHealth::from_problem_count(0), ZoneHealth::Healthy);
        assert_eq!(ZoneHealth::from_problem_count(3), ZoneHealth::Warning);
        assert_eq!(ZoneHealth::from_problem_count(4), ZoneHealth::Critical);
    }

    #[test]
    fn test_host_aliases_and_history() {
        let host: Host = serde_json::from_value(serde_json::json!({
            "id": "HOST-1",
            "name": "web-01",
            "cpu_usage": 42.5,
            "memory": 61.0,
            "cpu_history": {"points": [{"timestamp": 1, "value": 40.0}]},
        }))
        .unwrap();
        assert_eq!(host.cpu, Some(42.5));
        assert_eq!(host.ram, Some(61.0));
        assert_eq!(host.cpu_history.unwrap().points[0].value, 40.0);
        assert!(host.ram_history.is_none());
    }
}

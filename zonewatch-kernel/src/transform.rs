//! Raw backend problem records to dashboard `Problem`s.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::models::{ImpactLevel, Problem, ProblemStatus, RawProblem};

pub const UNKNOWN_HOST: &str = "Unknown";

static HOST_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bhost[\s:]+([a-z0-9][a-z0-9._-]*)").expect("valid regex"));
static SERVER_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bserver[\s:]+([a-z0-9][a-z0-9._-]*)").expect("valid regex"));
static FQDN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([a-z0-9][a-z0-9-]*(?:\.[a-z0-9-]+){2,})\b").expect("valid regex")
});

/// Decodes and transforms a batch. Records that do not decode are skipped;
/// the second value is how many were.
pub fn transform_problems(raw: &[Value], now: OffsetDateTime) -> (Vec<Problem>, usize) {
    let mut skipped = 0;
    let problems = raw
        .iter()
        .filter_map(|value| match serde_json::from_value::<RawProblem>(value.clone()) {
            Ok(record) => Some(transform_problem(&record, now)),
            Err(e) => {
                debug!("skipping undecodable problem record: {e}");
                skipped += 1;
                None
            }
        })
        .collect();
    (problems, skipped)
}

pub fn transform_problem(raw: &RawProblem, now: OffsetDateTime) -> Problem {
    let status = map_status(raw.status.as_deref());
    let id = non_empty(raw.id.as_deref())
        .or_else(|| non_empty(raw.display_id.as_deref()))
        .unwrap_or("unknown")
        .to_string();

    Problem {
        code: non_empty(raw.display_id.as_deref()).unwrap_or(&id).to_string(),
        id,
        title: non_empty(raw.title.as_deref()).unwrap_or("Untitled problem").to_string(),
        subtitle: non_empty(raw.subtitle.as_deref()).map(str::to_string),
        zone: non_empty(raw.zone.as_deref()).unwrap_or("").to_string(),
        impact: map_impact(raw.impact.as_deref(), raw.severity.as_deref()),
        status,
        host: extract_host_name(raw),
        impacted_entities: raw.affected_entities.len(),
        start_time: raw.start_time,
        end_time: raw.end_time,
        duration: format_duration(raw.start_time, raw.end_time, status, now),
        root_cause: non_empty(raw.root_cause.as_deref()).map(str::to_string),
        problem_url: non_empty(raw.problem_url.as_deref()).map(str::to_string),
    }
}

/// Entity list, explicit host fields, title/subtitle heuristics, zone, then "Unknown".
pub fn extract_host_name(raw: &RawProblem) -> String {
    let from_entities = raw
        .affected_entities
        .iter()
        .find(|e| {
            e.entity_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("host"))
                && non_empty(e.name.as_deref()).is_some()
        })
        .or_else(|| raw.affected_entities.iter().find(|e| non_empty(e.name.as_deref()).is_some()))
        .and_then(|e| e.name.as_deref());
    if let Some(name) = from_entities {
        return name.trim().to_string();
    }

    if let Some(host) = non_empty(raw.host.as_deref()).or_else(|| non_empty(raw.impacted.as_deref())) {
        return host.to_string();
    }

    for text in [raw.title.as_deref(), raw.subtitle.as_deref()].into_iter().flatten() {
        if let Some(host) = host_from_text(text) {
            return host;
        }
    }

    non_empty(raw.zone.as_deref()).unwrap_or(UNKNOWN_HOST).to_string()
}

/// Label matches must look like a host name (digit or separator), so
/// "Host CPU saturation" does not yield "CPU".
fn host_from_text(text: &str) -> Option<String> {
    [&*HOST_LABEL, &*SERVER_LABEL, &*FQDN]
        .iter()
        .find_map(|re| {
            re.captures_iter(text)
                .filter_map(|caps| caps.get(1))
                .map(|m| m.as_str().trim_end_matches('.'))
                .find(|token| looks_like_host(token))
        })
        .map(str::to_string)
}

fn looks_like_host(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit() || matches!(c, '-' | '.' | '_'))
}

fn map_impact(impact: Option<&str>, severity: Option<&str>) -> ImpactLevel {
    let level = match impact.map(str::to_ascii_uppercase).as_deref() {
        Some("APPLICATION") | Some("ENVIRONMENT") => ImpactLevel::High,
        Some("SERVICE") => ImpactLevel::Medium,
        _ => ImpactLevel::Low,
    };
    let severe = severity
        .map(str::to_ascii_uppercase)
        .is_some_and(|s| s == "AVAILABILITY" || s == "ERROR");
    if level == ImpactLevel::Low && severe {
        ImpactLevel::Medium
    } else {
        level
    }
}

fn map_status(status: Option<&str>) -> ProblemStatus {
    match status.map(str::to_ascii_uppercase).as_deref() {
        Some("OPEN") | Some("ACTIVE") => ProblemStatus::Open,
        _ => ProblemStatus::Closed,
    }
}

pub fn format_duration(
    start: Option<OffsetDateTime>,
    end: Option<OffsetDateTime>,
    status: ProblemStatus,
    now: OffsetDateTime,
) -> String {
    let Some(start) = start else { return String::new() };
    let end = match (end, status) {
        (Some(end), _) => end,
        (None, ProblemStatus::Open) => now,
        (None, ProblemStatus::Closed) => return String::new(),
    };

    let minutes = (end - start).whole_minutes().max(0);
    let (days, hours, mins) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);
    match (days, hours, mins) {
        (0, 0, 0) => "< 1m".to_string(),
        (0, 0, m) => format!("{m}m"),
        (0, h, m) => format!("{h}h {m}m"),
        (d, h, _) => format!("{d}d {h}h"),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/*!
Backend record fixtures

JSON values shaped like the monitoring backend's responses, ready to load
into [`BackendStub`](crate::BackendStub).
*/

use chrono::{Duration, Utc};
use serde_json::{json, Value};

/// Builds a `/problems` record. Defaults to an open, service-impact problem
/// that started 30 minutes ago on host `host-<id>`.
#[derive(Debug, Clone)]
pub struct ProblemBuilder {
    id: String,
    title: String,
    zone: Option<String>,
    status: &'static str,
    impact: String,
    severity: Option<String>,
    host: Option<String>,
    started_minutes_ago: i64,
    ended_minutes_ago: Option<i64>,
}

impl ProblemBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: format!("Problem {id}"),
            zone: None,
            status: "OPEN",
            impact: "SERVICE".to_string(),
            severity: None,
            host: Some(format!("host-{}", id.to_lowercase())),
            started_minutes_ago: 30,
            ended_minutes_ago: None,
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn zone(mut self, zone: &str) -> Self {
        self.zone = Some(zone.to_string());
        self
    }

    pub fn open(mut self) -> Self {
        self.status = "OPEN";
        self.ended_minutes_ago = None;
        self
    }

    /// Closed 5 minutes ago.
    pub fn closed(mut self) -> Self {
        self.status = "CLOSED";
        self.ended_minutes_ago = Some(5);
        self
    }

    pub fn impact(mut self, impact: &str) -> Self {
        self.impact = impact.to_string();
        self
    }

    pub fn severity(mut self, severity: &str) -> Self {
        self.severity = Some(severity.to_string());
        self
    }

    /// `None` leaves the affected entity list empty.
    pub fn host(mut self, host: Option<&str>) -> Self {
        self.host = host.map(str::to_string);
        self
    }

    pub fn started_minutes_ago(mut self, minutes: i64) -> Self {
        self.started_minutes_ago = minutes;
        self
    }

    pub fn build(self) -> Value {
        let now = Utc::now();
        let start = now - Duration::minutes(self.started_minutes_ago);
        let end = self.ended_minutes_ago.map(|m| (now - Duration::minutes(m)).timestamp_millis());
        let entities: Vec<Value> = self
            .host
            .iter()
            .map(|h| json!({"name": h, "type": "HOST"}))
            .collect();

        json!({
            "problemId": self.id,
            "displayId": format!("P-{}", self.id.trim_start_matches("P-")),
            "title": self.title,
            "status": self.status,
            "impactLevel": self.impact,
            "severityLevel": self.severity,
            "startTime": start.timestamp_millis(),
            "endTime": end,
            "zone": self.zone,
            "affectedEntities": entities,
        })
    }
}

pub fn host(id: &str, name: &str, zone: &str, cpu: f64) -> Value {
    let now = Utc::now().timestamp_millis();
    json!({
        "id": id,
        "name": name,
        "zone": zone,
        "cpu": cpu,
        "ram": 42.0,
        "os": "Linux",
        "status": "RUNNING",
        "cpu_history": {
            "points": [
                {"timestamp": now - 120_000, "value": cpu},
                {"timestamp": now - 60_000, "value": cpu},
            ]
        }
    })
}

pub fn service(id: &str, name: &str, zone: &str, response_time: f64) -> Value {
    json!({
        "id": id,
        "name": name,
        "zone": zone,
        "technology": "Java",
        "response_time": response_time,
        "error_rate": 0.5,
        "requests": 1200,
        "status": "RUNNING",
    })
}

pub fn process_group(id: &str, name: &str, zone: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "zone": zone,
        "technology": "Tomcat",
        "process_count": 2,
    })
}

pub fn zone(id: &str, name: &str, problem_count: Option<u32>) -> Value {
    json!({
        "id": id,
        "name": name,
        "host_count": 4,
        "service_count": 6,
        "application_count": 1,
        "problem_count": problem_count,
    })
}

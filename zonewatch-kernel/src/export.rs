//! CSV reports for problems and hosts.
//!
//! Layout: UTF-8 BOM, a bordered header block, one blank line, the column
//! row, then one row per record. Every field is quoted, `;` separates fields
//! and lines end with CRLF so spreadsheet tools open the file as-is.

use std::fmt::Write;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::models::{Host, Problem};

pub const BOM: &str = "\u{feff}";
pub const DELIMITER: char = ';';
pub const LINE_ENDING: &str = "\r\n";
pub const HEADER_BORDER: &str = "==================================================";

pub const PROBLEM_COLUMNS: [&str; 10] = [
    "ID", "Code", "Title", "Zone", "Host", "Impact", "Status", "Start", "End", "Duration",
];
pub const HOST_COLUMNS: [&str; 7] = ["ID", "Name", "Zone", "CPU %", "RAM %", "OS", "Status"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("timestamp formatting failed: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("write failed: {0}")]
    Write(#[from] std::fmt::Error),
}

pub fn export_problems_to_csv(
    problems: &[Problem],
    title: &str,
    generated_at: OffsetDateTime,
) -> Result<String, ExportError> {
    let mut out = header_block(title, generated_at, problems.len())?;
    write_row(&mut out, PROBLEM_COLUMNS)?;
    for p in problems {
        write_row(
            &mut out,
            [
                p.id.clone(),
                p.code.clone(),
                p.title.clone(),
                p.zone.clone(),
                p.host.clone(),
                p.impact.label().to_string(),
                p.status.label().to_string(),
                timestamp(p.start_time)?,
                timestamp(p.end_time)?,
                p.duration.clone(),
            ],
        )?;
    }
    Ok(out)
}

pub fn export_hosts_to_csv(
    hosts: &[Host],
    title: &str,
    generated_at: OffsetDateTime,
) -> Result<String, ExportError> {
    let mut out = header_block(title, generated_at, hosts.len())?;
    write_row(&mut out, HOST_COLUMNS)?;
    for h in hosts {
        write_row(
            &mut out,
            [
                h.id.clone(),
                h.name.clone(),
                h.zone.clone().unwrap_or_default(),
                percent(h.cpu),
                percent(h.ram),
                h.os.clone().unwrap_or_default(),
                h.status.clone().unwrap_or_default(),
            ],
        )?;
    }
    Ok(out)
}

/// Suggested download name, e.g. `problems_unified_20260310_1200.csv`.
pub fn export_file_name(kind: &str, generated_at: OffsetDateTime) -> String {
    format!(
        "{kind}_{:04}{:02}{:02}_{:02}{:02}.csv",
        generated_at.year(),
        u8::from(generated_at.month()),
        generated_at.day(),
        generated_at.hour(),
        generated_at.minute()
    )
}

fn header_block(title: &str, generated_at: OffsetDateTime, rows: usize) -> Result<String, ExportError> {
    let mut out = String::from(BOM);
    write!(out, "{HEADER_BORDER}{LINE_ENDING}")?;
    write!(out, "{}{LINE_ENDING}", quote(title))?;
    write!(out, "{}{LINE_ENDING}", quote(&format!("Generated: {}", generated_at.format(&Rfc3339)?)))?;
    write!(out, "{}{LINE_ENDING}", quote(&format!("Rows: {rows}")))?;
    write!(out, "{HEADER_BORDER}{LINE_ENDING}{LINE_ENDING}")?;
    Ok(out)
}

fn write_row<I, S>(out: &mut String, fields: I) -> Result<(), ExportError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let line = fields
        .into_iter()
        .map(|f| quote(f.as_ref()))
        .collect::<Vec<_>>()
        .join(&DELIMITER.to_string());
    write!(out, "{line}{LINE_ENDING}")?;
    Ok(())
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn timestamp(value: Option<OffsetDateTime>) -> Result<String, ExportError> {
    Ok(match value {
        Some(t) => t.format(&Rfc3339)?,
        None => String::new(),
    })
}

fn percent(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImpactLevel, ProblemStatus};
    use time::macros::datetime;

    const GENERATED: OffsetDateTime = datetime!(2026-03-10 12:00 UTC);

    fn problem(id: &str, title: &str) -> Problem {
        Problem {
            id: id.into(),
            code: format!("P-{id}"),
            title: title.into(),
            subtitle: None,
            zone: "Retail".into(),
            impact: ImpactLevel::High,
            status: ProblemStatus::Closed,
            host: "web-01".into(),
            impacted_entities: 1,
            start_time: Some(datetime!(2026-03-10 09:00 UTC)),
            end_time: Some(datetime!(2026-03-10 09:45 UTC)),
            duration: "45m".into(),
            root_cause: None,
            problem_url: None,
        }
    }

    /// Minimal reader for the quoted, `;`-separated rows after the header block.
    fn parse_body(csv: &str) -> Vec<Vec<String>> {
        let marker = format!("{HEADER_BORDER}{LINE_ENDING}{LINE_ENDING}");
        let body = csv.split(marker.as_str()).nth(1).expect("header block present");
        body.split(LINE_ENDING)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let inner = &line[1..line.len() - 1];
                inner.split("\";\"").map(|f| f.replace("\"\"", "\"")).collect()
            })
            .collect()
    }

    #[test]
    fn test_problems_csv_rows_in_column_order() {
        let problems = vec![problem("1", "CPU saturation"), problem("2", "Disk \"full\"")];
        let csv = export_problems_to_csv(&problems, "Unified problems", GENERATED).unwrap();

        assert!(csv.starts_with(BOM));
        assert!(csv.contains("\"Rows: 2\""));
        let rows = parse_body(&csv);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], PROBLEM_COLUMNS.to_vec());
        assert_eq!(
            rows[1],
            vec![
                "1", "P-1", "CPU saturation", "Retail", "web-01", "high", "closed",
                "2026-03-10T09:00:00Z", "2026-03-10T09:45:00Z", "45m"
            ]
        );
        assert_eq!(rows[2][2], "Disk \"full\"");
    }

    #[test]
    fn test_empty_export_still_has_header() {
        let csv = export_problems_to_csv(&[], "Nothing", GENERATED).unwrap();
        assert_eq!(csv.matches(HEADER_BORDER).count(), 2);
        assert_eq!(parse_body(&csv), vec![PROBLEM_COLUMNS.to_vec()]);
        assert!(csv.ends_with(LINE_ENDING));
    }

    #[test]
    fn test_hosts_csv() {
        let hosts = vec![Host {
            id: "HOST-1".into(),
            name: "web-01".into(),
            zone: Some("Retail".into()),
            cpu: Some(35.26),
            ram: None,
            os: Some("Linux; x86".into()),
            ..Default::default()
        }];
        let csv = export_hosts_to_csv(&hosts, "Hosts", GENERATED).unwrap();
        let rows = parse_body(&csv);
        assert_eq!(rows[0], HOST_COLUMNS.to_vec());
        assert_eq!(rows[1], vec!["HOST-1", "web-01", "Retail", "35.3", "", "Linux; x86", ""]);
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(export_file_name("problems_vfg", GENERATED), "problems_vfg_20260310_1200.csv");
    }
}

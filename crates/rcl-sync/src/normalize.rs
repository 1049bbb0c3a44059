//! Record Normalizer: schema checks, date parsing, retention window, text cleanup.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime};
use rcl_core::{CoreError, RawTable, Record};
use regex::Regex;
use serde::Serialize;
use strsim::jaro_winkler;
use tracing::info;

pub const CONFIRMED: &str = "Confirmed";

/// Formats tried in order before the generic fallbacks. `%Y` here must be four digits.
const PRIMARY_DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d", "%d-%m-%Y"];

const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%Y/%m/%d",
    "%m/%d/%y",
    "%m-%d-%y",
    "%d.%m.%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%Y%m%d",
];

const FALLBACK_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const PLACEHOLDERS: &[&str] = &["none", "nan", "n/a", "not applicable."];
const QUESTION_ONLY_PLACEHOLDERS: &[&str] = &["contact"];

static CONFIRMATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:confirmed\.?|confirmed via blueinsights\.|confirmed via mail\.|yes\.\s*confirmed\.)$",
    )
    .expect("confirmation pattern compiles")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub input_rows: usize,
    pub blank_response: usize,
    pub unparsable_date: usize,
    pub outside_retention: usize,
    pub placeholder: usize,
    pub confirmations_rewritten: usize,
    pub kept: usize,
}

#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub records: Vec<Record>,
    pub has_date_column: bool,
    pub stats: NormalizeStats,
}

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    question: usize,
    response: usize,
    date: usize,
    client: Option<usize>,
    rfp_type: Option<usize>,
    consultant: Option<usize>,
    sme: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    retention_months: u32,
    today: NaiveDate,
}

impl Normalizer {
    pub fn new(retention_months: u32, today: NaiveDate) -> Self {
        Self {
            retention_months,
            today,
        }
    }

    /// Oldest date still retained (inclusive).
    pub fn cutoff(&self) -> NaiveDate {
        self.today
            .checked_sub_months(Months::new(self.retention_months))
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn normalize(&self, table: &RawTable) -> Result<NormalizedBatch, CoreError> {
        let columns = table
            .columns
            .iter()
            .map(|c| c.trim().to_lowercase())
            .collect::<Vec<_>>();
        let map = resolve_columns(&columns)?;
        let cutoff = self.cutoff();

        let mut stats = NormalizeStats {
            input_rows: table.len(),
            ..NormalizeStats::default()
        };
        let mut records = Vec::new();

        for (row_idx, _) in table.rows.iter().enumerate() {
            let text = |idx: usize| table.cell(row_idx, idx).map(str::trim).unwrap_or_default();
            let optional = |idx: Option<usize>| idx.map(text).unwrap_or_default().to_string();

            let response = text(map.response);
            if response.is_empty() {
                stats.blank_response += 1;
                continue;
            }

            let Some(date) = parse_date(text(map.date)) else {
                stats.unparsable_date += 1;
                continue;
            };
            if date < cutoff {
                stats.outside_retention += 1;
                continue;
            }

            let question = text(map.question);
            if is_placeholder(question, true) || is_placeholder(response, false) {
                stats.placeholder += 1;
                continue;
            }

            let response = if CONFIRMATION.is_match(response) {
                stats.confirmations_rewritten += 1;
                CONFIRMED.to_string()
            } else {
                response.to_string()
            };

            let sme = optional(map.sme);
            records.push(Record {
                client: optional(map.client),
                rfp_type: optional(map.rfp_type),
                consultant: optional(map.consultant),
                date: Some(date),
                question: question.to_string(),
                response,
                sme: (!sme.is_empty()).then_some(sme),
                source_row: row_idx,
            });
        }

        stats.kept = records.len();
        info!(
            input_rows = stats.input_rows,
            blank_response = stats.blank_response,
            unparsable_date = stats.unparsable_date,
            outside_retention = stats.outside_retention,
            placeholder = stats.placeholder,
            kept = stats.kept,
            %cutoff,
            "records normalized"
        );
        Ok(NormalizedBatch {
            records,
            has_date_column: true,
            stats,
        })
    }
}

fn resolve_columns(columns: &[String]) -> Result<ColumnMap, CoreError> {
    let find = |name: &str| columns.iter().position(|c| c == name);

    let response = find("response").or_else(|| find("fixed answer")).ok_or_else(|| {
        let mut suggestions = near_miss_columns("response", columns);
        suggestions.extend(near_miss_columns("fixed answer", columns));
        suggestions.sort();
        suggestions.dedup();
        CoreError::Schema {
            message: "neither 'response' nor 'fixed answer' column found".into(),
            suggestions,
        }
    })?;

    let required = |name: &str| {
        find(name).ok_or_else(|| CoreError::Schema {
            message: format!(
                "'{name}' column not found; available columns: [{}]",
                columns.join(", ")
            ),
            suggestions: near_miss_columns(name, columns),
        })
    };
    let question = required("question")?;
    let date = required("date")?;

    Ok(ColumnMap {
        question,
        response,
        date,
        client: find("client name").or_else(|| find("client")),
        rfp_type: find("rfp type"),
        consultant: find("consultant"),
        sme: find("sme"),
    })
}

/// Columns that look like a typo or decorated variant of `target`.
pub fn near_miss_columns(target: &str, columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .filter(|c| !c.is_empty())
        .filter(|c| c.contains(target) || jaro_winkler(c, target) >= 0.85)
        .cloned()
        .collect()
}

fn is_placeholder(value: &str, is_question: bool) -> bool {
    let lower = value.to_lowercase();
    PLACEHOLDERS.contains(&lower.as_str())
        || (is_question && QUESTION_ONLY_PLACEHOLDERS.contains(&lower.as_str()))
        || value.is_empty()
}

/// Tries the primary formats in order, then generic fallbacks.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    PRIMARY_DATE_FORMATS
        .iter()
        .chain(FALLBACK_DATE_FORMATS)
        .find_map(|fmt| {
            NaiveDate::parse_from_str(text, fmt)
                .ok()
                .filter(has_full_year)
        })
        .or_else(|| {
            FALLBACK_DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
                .filter(has_full_year)
        })
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive()))
        .or_else(|| excel_serial_date(text))
}

/// chrono's `%Y` also accepts one to three digits; "03/04/25" must not become year 25.
fn has_full_year(date: &NaiveDate) -> bool {
    date.year() >= 1000
}

/// Spreadsheet day serials that slipped through as plain numbers.
fn excel_serial_date(text: &str) -> Option<NaiveDate> {
    let serial = text.parse::<f64>().ok()?;
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_days(chrono::Days::new(serial.trunc() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    fn table(columns: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| {
                    r.iter()
                        .map(|c| (!c.is_empty()).then(|| c.to_string()))
                        .collect()
                })
                .collect(),
        )
    }

    fn normalize(t: &RawTable) -> Result<NormalizedBatch, CoreError> {
        Normalizer::new(36, today()).normalize(t)
    }

    #[test]
    fn headers_are_case_and_space_insensitive() {
        let t = table(
            &["  Client Name ", "QUESTION", "Response", "Date", "SME"],
            &[&["  Acme ", " Q1 ", " A1 ", "01/15/2025", "Pat"]],
        );
        let batch = normalize(&t).expect("normalize");
        let r = &batch.records[0];
        assert_eq!(r.client, "Acme");
        assert_eq!(r.question, "Q1");
        assert_eq!(r.response, "A1");
        assert_eq!(r.date, NaiveDate::from_ymd_opt(2025, 1, 15));
        assert_eq!(r.sme.as_deref(), Some("Pat"));
    }

    #[test]
    fn fixed_answer_stands_in_for_response() {
        let t = table(&["question", "fixed answer", "date"], &[&["Q", "A", "2025-02-01"]]);
        assert_eq!(normalize(&t).unwrap().records[0].response, "A");
    }

    #[test]
    fn missing_response_column_is_a_schema_error() {
        let t = table(&["question", "responses", "date"], &[]);
        match normalize(&t) {
            Err(CoreError::Schema { suggestions, .. }) => {
                assert_eq!(suggestions, vec!["responses".to_string()]);
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn missing_date_column_suggests_near_misses() {
        let t = table(&["question", "response", "date submitted", "client"], &[]);
        match normalize(&t) {
            Err(CoreError::Schema { message, suggestions }) => {
                assert!(message.contains("'date'"));
                assert_eq!(suggestions, vec!["date submitted".to_string()]);
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn date_formats_are_tried_in_order() {
        assert_eq!(parse_date("03/04/2025"), NaiveDate::from_ymd_opt(2025, 3, 4));
        assert_eq!(parse_date("2025-03-04"), NaiveDate::from_ymd_opt(2025, 3, 4));
        assert_eq!(parse_date("25-12-2024"), NaiveDate::from_ymd_opt(2024, 12, 25));
        assert_eq!(
            parse_date("2024-06-30 00:00:00"),
            NaiveDate::from_ymd_opt(2024, 6, 30)
        );
        assert_eq!(parse_date("March 5, 2024"), NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(parse_date("45292"), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(parse_date("sometime last year"), None);
        assert_eq!(parse_date("03/04/25"), NaiveDate::from_ymd_opt(2025, 3, 4));
        assert_eq!(parse_date("05-06-24"), NaiveDate::from_ymd_opt(2024, 5, 6));
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn retention_cutoff_is_inclusive() {
        let normalizer = Normalizer::new(36, today());
        let cutoff = normalizer.cutoff();
        assert_eq!(cutoff, NaiveDate::from_ymd_opt(2023, 10, 17).unwrap());

        let inside = cutoff.succ_opt().unwrap().format("%Y-%m-%d").to_string();
        let edge = cutoff.format("%Y-%m-%d").to_string();
        let outside = cutoff.pred_opt().unwrap().format("%Y-%m-%d").to_string();
        let t = table(
            &["question", "response", "date"],
            &[
                &["inside", "A", inside.as_str()],
                &["edge", "A", edge.as_str()],
                &["outside", "A", outside.as_str()],
            ],
        );
        let batch = normalizer.normalize(&t).unwrap();
        let kept = batch.records.iter().map(|r| r.question.as_str()).collect::<Vec<_>>();
        assert_eq!(kept, vec!["inside", "edge"]);
        assert_eq!(batch.stats.outside_retention, 1);
    }

    #[test]
    fn two_digit_years_stay_inside_retention() {
        let t = table(
            &["question", "response", "date"],
            &[&["slash", "A", "03/04/25"], &["dash", "A", "05-06-24"]],
        );
        let batch = normalize(&t).unwrap();
        let dates = batch.records.iter().map(|r| r.date).collect::<Vec<_>>();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2025, 3, 4),
                NaiveDate::from_ymd_opt(2024, 5, 6)
            ]
        );
        assert_eq!(batch.stats.outside_retention, 0);
    }

    #[test]
    fn confirmation_phrases_collapse_to_token() {
        let t = table(
            &["question", "response", "date"],
            &[
                &["q1", "Confirmed via mail.", "2025-01-01"],
                &["q2", "CONFIRMED", "2025-01-01"],
                &["q3", "Yes. Confirmed.", "2025-01-01"],
                &["q4", "confirmed via BlueInsights.", "2025-01-01"],
                &["q5", "Confirmed, with caveats", "2025-01-01"],
            ],
        );
        let batch = normalize(&t).unwrap();
        let responses = batch.records.iter().map(|r| r.response.as_str()).collect::<Vec<_>>();
        assert_eq!(
            responses,
            vec!["Confirmed", "Confirmed", "Confirmed", "Confirmed", "Confirmed, with caveats"]
        );
        assert_eq!(batch.stats.confirmations_rewritten, 4);
    }

    #[test]
    fn placeholder_rows_are_dropped() {
        let t = table(
            &["question", "response", "date"],
            &[
                &["None", "A", "2025-01-01"],
                &["Q", "nan", "2025-01-01"],
                &["Q", "N/A", "2025-01-01"],
                &["Q", "Not applicable.", "2025-01-01"],
                &["Contact", "someone@example.com", "2025-01-01"],
                &["Q", "   ", "2025-01-01"],
                &["Q", "A", "not a date"],
                &["Q", "contact", "2025-01-01"],
            ],
        );
        let batch = normalize(&t).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].response, "contact");
        assert_eq!(batch.stats.placeholder, 5);
        assert_eq!(batch.stats.blank_response, 1);
        assert_eq!(batch.stats.unparsable_date, 1);
    }
}

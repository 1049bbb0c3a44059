//! Deduplicator: exact removal, same-question recency, longest-response tie-break.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rcl_core::{CanonicalRecord, CoreError, Record};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub input: usize,
    pub exact_duplicate_groups: usize,
    pub exact_duplicates_removed: usize,
    pub date_stage_skipped: bool,
    pub older_answers_removed: usize,
    pub shorter_answers_removed: usize,
    pub output: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pending,
    ExactDone,
    LatestDone,
    Done,
}

/// Runs the three dedup stages, refusing to run them out of order.
#[derive(Debug)]
pub struct DedupRun {
    has_date_column: bool,
    stage: Stage,
    records: Vec<Record>,
    stats: DedupStats,
}

impl DedupRun {
    pub fn new(records: Vec<Record>, has_date_column: bool) -> Self {
        let stats = DedupStats {
            input: records.len(),
            ..DedupStats::default()
        };
        Self {
            has_date_column,
            stage: Stage::Pending,
            records,
            stats,
        }
    }

    fn expect_stage(&self, expected: Stage, step: &str) -> Result<(), CoreError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(CoreError::InvalidPipelineState(format!(
                "{step} requires stage {expected:?}, found {:?}",
                self.stage
            )))
        }
    }

    /// Step 1: one row per identical (question, response) pair.
    pub fn drop_exact(&mut self) -> Result<&mut Self, CoreError> {
        self.expect_stage(Stage::Pending, "exact duplicate removal")?;
        let (kept, groups, removed) = drop_exact_duplicates(std::mem::take(&mut self.records));
        self.records = kept;
        self.stats.exact_duplicate_groups = groups;
        self.stats.exact_duplicates_removed = removed;
        self.stage = Stage::ExactDone;
        info!(
            duplicate_groups = groups,
            removed,
            remaining = self.records.len(),
            "exact duplicates removed"
        );
        Ok(self)
    }

    /// Step 2: keep only the most recent answers per question.
    pub fn keep_latest(&mut self) -> Result<&mut Self, CoreError> {
        self.expect_stage(Stage::ExactDone, "same-question conflict resolution")?;
        if self.has_date_column {
            let (kept, removed) = keep_latest_per_question(std::mem::take(&mut self.records));
            self.records = kept;
            self.stats.older_answers_removed = removed;
            info!(removed, remaining = self.records.len(), "older answers removed");
        } else {
            self.stats.date_stage_skipped = true;
            info!("no date column; same-question recency stage skipped");
        }
        self.stage = Stage::LatestDone;
        Ok(self)
    }

    /// Step 3: exactly one row per question, the longest response.
    pub fn keep_longest(&mut self) -> Result<&mut Self, CoreError> {
        self.expect_stage(Stage::LatestDone, "longest-response tie-break")?;
        let (kept, removed) = keep_longest_response(std::mem::take(&mut self.records));
        self.records = kept;
        self.stats.shorter_answers_removed = removed;
        self.stage = Stage::Done;
        info!(removed, remaining = self.records.len(), "shorter answers removed");
        Ok(self)
    }

    pub fn finish(mut self) -> Result<(Vec<Record>, DedupStats), CoreError> {
        self.expect_stage(Stage::Done, "dedup finish")?;
        self.records
            .sort_by(|a, b| (a.date, &a.question).cmp(&(b.date, &b.question)));
        self.stats.output = self.records.len();
        Ok((self.records, self.stats))
    }

    pub fn run_all(mut self) -> Result<(Vec<Record>, DedupStats), CoreError> {
        self.drop_exact()?.keep_latest()?.keep_longest()?;
        self.finish()
    }
}

/// Returns (kept, duplicate group count, rows removed). First occurrence wins.
pub fn drop_exact_duplicates(records: Vec<Record>) -> (Vec<Record>, usize, usize) {
    let mut seen: HashMap<(String, String), usize> = HashMap::new();
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        let pair = (record.question.clone(), record.response.clone());
        let count = seen.entry(pair).or_insert(0);
        *count += 1;
        if *count == 1 {
            kept.push(record);
        }
    }
    let groups = seen.values().filter(|c| **c > 1).count();
    let removed = seen.values().map(|c| c - 1).sum();
    (kept, groups, removed)
}

/// Keeps every row tied at its question's maximum date.
pub fn keep_latest_per_question(records: Vec<Record>) -> (Vec<Record>, usize) {
    let mut latest: HashMap<&str, Option<NaiveDate>> = HashMap::new();
    for record in &records {
        let entry = latest.entry(record.question.as_str()).or_insert(record.date);
        if record.date > *entry {
            *entry = record.date;
        }
    }
    let keep = records
        .iter()
        .map(|r| latest.get(r.question.as_str()).copied().flatten() == r.date)
        .collect::<Vec<_>>();

    let before = records.len();
    let kept = records
        .into_iter()
        .zip(keep)
        .filter_map(|(r, keep)| keep.then_some(r))
        .collect::<Vec<_>>();
    let removed = before - kept.len();
    (kept, removed)
}

/// One row per question: longest response by characters, first seen on ties.
pub fn keep_longest_response(records: Vec<Record>) -> (Vec<Record>, usize) {
    let mut best: HashMap<&str, (usize, usize)> = HashMap::new();
    for (idx, record) in records.iter().enumerate() {
        let len = record.response.chars().count();
        best.entry(record.question.as_str())
            .and_modify(|(best_idx, best_len)| {
                if len > *best_len {
                    *best_idx = idx;
                    *best_len = len;
                }
            })
            .or_insert((idx, len));
    }
    let winners = best.values().map(|(idx, _)| *idx).collect::<HashSet<_>>();

    let before = records.len();
    let kept = records
        .into_iter()
        .enumerate()
        .filter_map(|(idx, r)| winners.contains(&idx).then_some(r))
        .collect::<Vec<_>>();
    let removed = before - kept.len();
    (kept, removed)
}

/// Pair of surviving records whose questions look like the same question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReviewItem {
    pub key_hash_a: String,
    pub key_hash_b: String,
    pub question_a: String,
    pub question_b: String,
    pub score: f64,
}

pub fn normalize_question_fragment(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Advisory only: flags near-identical questions, never collapses them.
pub fn similarity_review(records: &[CanonicalRecord], threshold: f64) -> Vec<SimilarityReviewItem> {
    let normalized = records
        .iter()
        .map(|r| normalize_question_fragment(&r.record.question))
        .collect::<Vec<_>>();

    let mut items = Vec::new();
    for i in 0..records.len() {
        for j in (i + 1)..records.len() {
            let score = jaro_winkler(&normalized[i], &normalized[j]);
            if score >= threshold {
                items.push(SimilarityReviewItem {
                    key_hash_a: records[i].key_hash.clone(),
                    key_hash_b: records[j].key_hash.clone(),
                    question_a: records[i].record.question.clone(),
                    question_b: records[j].record.question.clone(),
                    score,
                });
            }
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcl_core::KeyDeriver;

    fn rec(question: &str, response: &str, date: &str, consultant: &str) -> Record {
        Record {
            client: "Acme".into(),
            rfp_type: "New".into(),
            consultant: consultant.into(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
            question: question.into(),
            response: response.into(),
            sme: None,
            source_row: 0,
        }
    }

    #[test]
    fn exact_duplicates_collapse_regardless_of_metadata() {
        let (kept, groups, removed) = drop_exact_duplicates(vec![
            rec("Q", "A", "2024-01-01", "Jane"),
            rec("Q", "A", "2024-01-01", "Raj"),
            rec("Q", "B", "2024-01-01", "Jane"),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].consultant, "Jane");
        assert_eq!((groups, removed), (1, 2 - 1));
    }

    #[test]
    fn latest_answer_wins_per_question() {
        let (kept, removed) = keep_latest_per_question(vec![
            rec("Q", "old", "2023-01-01", "Jane"),
            rec("Q", "new", "2024-01-01", "Jane"),
            rec("Other", "only", "2022-05-05", "Jane"),
        ]);
        let responses = kept.iter().map(|r| r.response.as_str()).collect::<Vec<_>>();
        assert_eq!(responses, vec!["new", "only"]);
        assert_eq!(removed, 1);
    }

    #[test]
    fn date_ties_are_left_for_the_length_stage() {
        let (kept, removed) = keep_latest_per_question(vec![
            rec("Q", "short", "2024-01-01", "Jane"),
            rec("Q", "much longer", "2024-01-01", "Raj"),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(removed, 0);
    }

    #[test]
    fn longest_response_wins_with_first_seen_tie_break() {
        let short = "s".repeat(50);
        let long = "l".repeat(500);
        let (kept, removed) = keep_longest_response(vec![
            rec("Q", &short, "2024-01-01", "Jane"),
            rec("Q", &long, "2024-01-01", "Jane"),
            rec("T", "abc", "2024-01-01", "first"),
            rec("T", "xyz", "2024-01-01", "second"),
        ]);
        assert_eq!(removed, 2);
        assert_eq!(kept[0].response, long);
        assert_eq!(kept[1].consultant, "first");
    }

    #[test]
    fn stages_refuse_to_run_out_of_order() {
        let mut run = DedupRun::new(vec![rec("Q", "A", "2024-01-01", "J")], true);
        assert!(matches!(
            run.keep_latest(),
            Err(CoreError::InvalidPipelineState(_))
        ));
        assert!(matches!(
            run.keep_longest(),
            Err(CoreError::InvalidPipelineState(_))
        ));

        let unfinished = DedupRun::new(vec![], true);
        assert!(matches!(
            unfinished.finish(),
            Err(CoreError::InvalidPipelineState(_))
        ));

        let mut twice = DedupRun::new(vec![], true);
        twice.drop_exact().unwrap();
        assert!(twice.drop_exact().is_err());
    }

    #[test]
    fn full_chain_leaves_one_row_per_question() {
        let (records, stats) = DedupRun::new(
            vec![
                rec("Q1", "A", "2023-01-01", "J"),
                rec("Q1", "A", "2023-01-01", "K"),
                rec("Q1", "Newer but short", "2024-02-01", "J"),
                rec("Q1", "Newer and much much longer", "2024-02-01", "K"),
                rec("Q2", "Only", "2024-03-01", "J"),
            ],
            true,
        )
        .run_all()
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].response, "Newer and much much longer");
        assert_eq!(records[1].question, "Q2");
        assert_eq!(stats.exact_duplicates_removed, 1);
        assert_eq!(stats.older_answers_removed, 1);
        assert_eq!(stats.shorter_answers_removed, 1);
        assert_eq!(stats.output, 2);
    }

    #[test]
    fn without_date_column_recency_is_skipped() {
        let (records, stats) = DedupRun::new(
            vec![
                rec("Q", "older but longer", "2020-01-01", "J"),
                rec("Q", "newer", "2024-01-01", "J"),
            ],
            false,
        )
        .run_all()
        .unwrap();
        assert!(stats.date_stage_skipped);
        assert_eq!(records[0].response, "older but longer");
    }

    #[test]
    fn similarity_review_flags_near_identical_questions() {
        let deriver = KeyDeriver::default();
        let records = vec![
            deriver.derive(rec("Do you support SSO?", "Yes", "2024-01-01", "J")),
            deriver.derive(rec("Do you support SSO ?", "Yes, SAML", "2024-01-01", "J")),
            deriver.derive(rec("What is your uptime SLA?", "99.9%", "2024-01-01", "J")),
        ];
        let items = similarity_review(&records, 0.92);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key_hash_a, records[0].key_hash);
        assert!(items[0].score > 0.99);
    }
}

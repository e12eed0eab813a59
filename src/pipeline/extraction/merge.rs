//! Select the best engine result and fold in unique lines from the others.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use super::scoring::ScoredResult;
use super::ExtractionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// Every engine finished before the deadline.
    Complete,
    /// Some engines were cut off; the text may be missing lines.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedLine {
    pub text: String,
    /// Engine that contributed this line.
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedText {
    pub primary_engine: String,
    pub lines: Vec<MergedLine>,
    /// Engines with at least one line in the text, primary first.
    pub contributing_engines: Vec<String>,
    pub status: MergeStatus,
}

impl MergedText {
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn line_texts(&self) -> Vec<String> {
        self.lines.iter().map(|l| l.text.clone()).collect()
    }

    /// Number of lines in the text that came from `engine`.
    pub fn lines_from(&self, engine: &str) -> usize {
        self.lines.iter().filter(|l| l.origin == engine).count()
    }

    /// Append the lines not already present, tagged with `engine`.
    /// Returns how many were added.
    pub fn absorb<'a>(&mut self, engine: &str, lines: impl IntoIterator<Item = &'a str>) -> usize {
        let mut seen: HashSet<String> = self.lines.iter().map(|l| line_key(&l.text)).collect();
        let mut added = 0;

        for line in lines {
            let line = line.trim();
            if line.is_empty() || !seen.insert(line_key(line)) {
                continue;
            }
            self.lines.push(MergedLine {
                text: line.to_string(),
                origin: engine.to_string(),
            });
            added += 1;
        }

        if added > 0 && !self.contributing_engines.iter().any(|e| e == engine) {
            self.contributing_engines.push(engine.to_string());
        }
        added
    }

    pub fn mark_partial(&mut self) {
        self.status = MergeStatus::Partial;
    }
}

/// Comparison key: lowercase with every whitespace character removed.
pub fn line_key(line: &str) -> String {
    line.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Ranking order: score descending, then priority rank, then engine name.
fn rank_order(a: &ScoredResult, b: &ScoredResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.priority_rank.cmp(&b.priority_rank))
        .then_with(|| a.result.engine_name().cmp(b.result.engine_name()))
}

/// Merge scored results into one text.
///
/// Whitespace-only results are discarded; if none remain the merge fails with
/// `NoResults`. The best-ranked result is primary and keeps all its lines.
/// Every other result scoring at least `inclusion_threshold` is visited in
/// engine-priority order and contributes the lines not already present.
pub fn merge(
    mut results: Vec<ScoredResult>,
    inclusion_threshold: f32,
) -> Result<MergedText, ExtractionError> {
    results.retain(|r| !r.result.is_blank());
    if results.is_empty() {
        return Err(ExtractionError::NoResults);
    }

    results.sort_by(rank_order);
    let primary = results.remove(0);
    let primary_engine = primary.result.engine_name().to_string();

    let mut merged = MergedText {
        primary_engine: primary_engine.clone(),
        lines: primary
            .result
            .lines()
            .map(|text| MergedLine {
                text: text.to_string(),
                origin: primary_engine.clone(),
            })
            .collect(),
        contributing_engines: vec![primary_engine.clone()],
        status: MergeStatus::Complete,
    };

    let mut secondaries: Vec<&ScoredResult> = results
        .iter()
        .filter(|r| r.score >= inclusion_threshold)
        .collect();
    secondaries.sort_by(|a, b| {
        a.priority_rank
            .cmp(&b.priority_rank)
            .then_with(|| a.result.engine_name().cmp(b.result.engine_name()))
    });

    for secondary in secondaries {
        let engine = secondary.result.engine_name();
        let added = merged.absorb(engine, secondary.result.lines());
        tracing::debug!(engine = %engine, added, score = secondary.score, "Merged secondary OCR result");
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::scoring::ResultScorer;
    use crate::pipeline::extraction::types::ExtractionResult;
    use crate::pipeline_config::{MergeConfig, ScoringConfig};

    fn scored(engine: &str, text: &str, score: f32, rank: usize) -> ScoredResult {
        ScoredResult {
            result: ExtractionResult::new(engine, text, score, None),
            score,
            priority_rank: rank,
        }
    }

    #[test]
    fn near_duplicate_lines_are_not_repeated() {
        let a = scored("tesseract", "Paracetamol 500mg twice daily", 0.70, 0);
        let b = scored("easyocr", "paracetamol  500mg twice  daily", 0.52, 2);
        let merged = merge(vec![a, b], 0.4).unwrap();
        assert_eq!(merged.primary_engine, "tesseract");
        assert_eq!(merged.text(), "Paracetamol 500mg twice daily");
        assert_eq!(merged.contributing_engines, vec!["tesseract"]);
    }

    #[test]
    fn blank_primary_candidate_is_discarded() {
        let a = scored("tesseract", "   \n ", 0.95, 0);
        let b = scored("easyocr", "ibuprofen 400mg", 0.30, 2);
        let merged = merge(vec![a, b], 0.4).unwrap();
        assert_eq!(merged.primary_engine, "easyocr");
        assert_eq!(merged.text(), "ibuprofen 400mg");
    }

    fn score_and_merge(outcomes: Vec<Option<ExtractionResult>>) -> MergedText {
        let merge_config = MergeConfig::default();
        let scorer = ResultScorer::new(ScoringConfig::default());
        let scored = scorer.score_all(outcomes.into_iter().flatten().collect(), &merge_config);
        merge(scored, merge_config.inclusion_threshold).unwrap()
    }

    #[test]
    fn scored_engines_keep_stronger_reading_as_primary() {
        let merged = score_and_merge(vec![
            Some(ExtractionResult::new("tesseract", "paracetamol 500mg twice daily", 0.9, None)),
            Some(ExtractionResult::new("easyocr", "paracetamol 500 mg twice daily", 0.6, None)),
            None,
        ]);
        assert_eq!(merged.primary_engine, "tesseract");
        assert_eq!(merged.text(), "paracetamol 500mg twice daily");
        assert_eq!(merged.lines_from("easyocr"), 0);
    }

    #[test]
    fn scored_empty_engine_loses_to_readable_one() {
        let merged = score_and_merge(vec![
            Some(ExtractionResult::new("tesseract", "", 0.0, None)),
            Some(ExtractionResult::new("easyocr", "ibuprofen 400mg", 0.8, None)),
        ]);
        assert_eq!(merged.primary_engine, "easyocr");
        assert_eq!(merged.text(), "ibuprofen 400mg");
    }

    #[test]
    fn all_blank_is_no_results() {
        let results = vec![scored("a", "", 0.9, 0), scored("b", " \t", 0.8, 1)];
        assert!(matches!(merge(results, 0.4), Err(ExtractionError::NoResults)));
        assert!(matches!(merge(vec![], 0.4), Err(ExtractionError::NoResults)));
    }

    #[test]
    fn secondary_lines_appended_with_origin() {
        let a = scored("tesseract", "Tab Amoxicillin 500mg\nTDS x 5 days", 0.8, 0);
        let b = scored("vision", "Tab Amoxicillin 500 mg\nSyp Ambroxol 5ml", 0.6, 4);
        let merged = merge(vec![b, a], 0.4).unwrap();
        assert_eq!(
            merged.line_texts(),
            vec!["Tab Amoxicillin 500mg", "TDS x 5 days", "Syp Ambroxol 5ml"]
        );
        assert_eq!(merged.lines[2].origin, "vision");
        assert_eq!(merged.lines_from("vision"), 1);
        assert_eq!(merged.contributing_engines, vec!["tesseract", "vision"]);
    }

    #[test]
    fn below_threshold_contributes_nothing() {
        let a = scored("tesseract", "Rx", 0.8, 0);
        let b = scored("vision", "Tab Zinc 20mg", 0.39, 4);
        let merged = merge(vec![a, b], 0.4).unwrap();
        assert_eq!(merged.text(), "Rx");
    }

    #[test]
    fn secondaries_follow_priority_not_score() {
        let primary = scored("tesseract", "Rx", 0.9, 0);
        let low_rank_high_score = scored("vision", "line from vision", 0.8, 4);
        let high_rank_low_score = scored("trocr", "line from trocr", 0.5, 1);
        let merged = merge(vec![primary, low_rank_high_score, high_rank_low_score], 0.4).unwrap();
        assert_eq!(merged.line_texts(), vec!["Rx", "line from trocr", "line from vision"]);
    }

    #[test]
    fn equal_scores_break_ties_by_priority() {
        let a = scored("vision", "from vision", 0.6, 4);
        let b = scored("tesseract", "from tesseract", 0.6, 0);
        assert_eq!(merge(vec![a, b], 0.4).unwrap().primary_engine, "tesseract");
    }

    #[test]
    fn equal_score_and_rank_break_ties_by_name() {
        let a = scored("zeta", "z", 0.6, 5);
        let b = scored("alpha", "a", 0.6, 5);
        assert_eq!(merge(vec![a, b], 0.4).unwrap().primary_engine, "alpha");
    }

    #[test]
    fn input_order_does_not_matter() {
        let inputs = || {
            vec![
                scored("tesseract", "Tab Cefixime 200mg\nBD", 0.7, 0),
                scored("trocr", "Tab Cefixime 200 mg\nBD x 5 days", 0.6, 1),
                scored("vision", "Cap Omeprazole 20mg\nBD", 0.65, 4),
            ]
        };
        let forward = merge(inputs(), 0.4).unwrap();
        let mut reversed_input = inputs();
        reversed_input.reverse();
        assert_eq!(forward, merge(reversed_input, 0.4).unwrap());
    }

    #[test]
    fn merge_is_idempotent() {
        let inputs = vec![
            scored("tesseract", "Tab Cefixime 200mg\nBD", 0.7, 0),
            scored("vision", "Cap Omeprazole 20mg\nBD", 0.65, 4),
        ];
        let first = merge(inputs.clone(), 0.4).unwrap();
        let second = merge(inputs, 0.4).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn reabsorbing_own_lines_adds_nothing() {
        let mut merged = merge(
            vec![
                scored("tesseract", "Tab Cefixime 200mg\nBD", 0.7, 0),
                scored("vision", "Cap Omeprazole 20mg", 0.65, 4),
            ],
            0.4,
        )
        .unwrap();
        let before = merged.clone();
        let own = merged.line_texts();
        assert_eq!(merged.absorb("vision", own.iter().map(String::as_str)), 0);
        assert_eq!(merged, before);
    }

    #[test]
    fn line_key_ignores_case_and_whitespace() {
        assert_eq!(line_key("Tab  Amoxicillin\t500 mg"), line_key("tab amoxicillin 500mg"));
        assert_ne!(line_key("500mg"), line_key("250mg"));
    }
}

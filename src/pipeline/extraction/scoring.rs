use serde::Serialize;

use super::lexicon::count_domain_terms;
use super::types::ExtractionResult;
use crate::pipeline_config::{MergeConfig, ScoringConfig};

/// An engine result with its quality score and fixed priority rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredResult {
    pub result: ExtractionResult,
    pub score: f32,
    /// Position in the configured engine priority list (0 = most trusted).
    pub priority_rank: usize,
}

/// Map the number of distinct domain terms onto the keyword component.
pub fn keyword_bucket(matches: usize) -> f32 {
    match matches {
        0 => 0.0,
        1..=2 => 0.60,
        3..=4 => 0.80,
        _ => 0.95,
    }
}

/// Weighted quality score. Pure: the same result always scores the same.
pub struct ResultScorer {
    config: ScoringConfig,
}

impl ResultScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// `w_conf * confidence + w_len * length + w_kw * keywords + w_lines * lines`,
    /// each component in [0, 1], clamped to [0, 1].
    pub fn score(&self, result: &ExtractionResult) -> f32 {
        let c = &self.config;
        let text = result.raw_text().trim();

        let length = ratio(text.chars().count(), c.reference_length);
        let lines = ratio(result.lines().count(), c.reference_lines);
        let keywords = keyword_bucket(count_domain_terms(text));

        let score = c.confidence_weight * result.confidence()
            + c.length_weight * length
            + c.keyword_weight * keywords
            + c.lines_weight * lines;

        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn score_all(&self, results: Vec<ExtractionResult>, merge: &MergeConfig) -> Vec<ScoredResult> {
        results
            .into_iter()
            .map(|result| {
                let score = self.score(&result);
                let priority_rank = merge.priority_rank(result.engine_name());
                tracing::debug!(
                    engine = %result.engine_name(),
                    score,
                    confidence = result.confidence(),
                    "Scored OCR result"
                );
                ScoredResult {
                    result,
                    score,
                    priority_rank,
                }
            })
            .collect()
    }
}

fn ratio(value: usize, reference: usize) -> f32 {
    if reference == 0 {
        return 0.0;
    }
    (value as f32 / reference as f32).min(1.0)
}

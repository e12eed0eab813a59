use super::types::{ExtractionResult, ExtractionWarning, RegionConfidence};

/// Confidence thresholds used by the pipeline and the report
pub mod thresholds {
    /// Below this: extraction likely failed. Show strong warning.
    pub const VERY_LOW: f32 = 0.30;

    /// Below this: significant uncertainty. Warn the reader.
    pub const LOW: f32 = 0.50;

    /// Below this: some uncertainty in individual words.
    pub const MODERATE: f32 = 0.70;

    /// Above this: high confidence. No special flagging.
    pub const HIGH: f32 = 0.85;

    /// Word-level confidence under which a word looks handwritten to a print engine.
    pub const HANDWRITTEN_WORD: f32 = 0.40;
}

/// Length-weighted confidence over every engine that produced text.
pub fn compute_overall_confidence(results: &[ExtractionResult]) -> f32 {
    let total_chars: usize = results.iter().map(|r| r.raw_text().len()).sum();
    if total_chars == 0 {
        return 0.0;
    }

    let weighted_sum: f32 = results
        .iter()
        .map(|r| r.confidence() * r.raw_text().len() as f32)
        .sum();

    weighted_sum / total_chars as f32
}

/// Inspect one engine's output and generate warnings
pub fn analyze_result_quality(result: &ExtractionResult) -> Vec<ExtractionWarning> {
    let mut warnings = Vec::new();
    if result.is_blank() {
        return warnings;
    }

    if result.confidence() < thresholds::LOW {
        warnings.push(ExtractionWarning::LowConfidence {
            engine: result.engine_name().to_string(),
            confidence: result.confidence(),
        });
    }

    // Signs of handwriting: majority of words below 0.40 confidence
    if let Some(regions) = result.regions() {
        let total_words = regions.len().max(1);
        let low_conf_words = regions
            .iter()
            .filter(|r| r.confidence < thresholds::HANDWRITTEN_WORD)
            .count();
        if low_conf_words as f64 / total_words as f64 > 0.50 {
            warnings.push(ExtractionWarning::HandwritingDetected {
                engine: result.engine_name().to_string(),
            });
        }
    }

    warnings
}

/// Regions worth highlighting for manual review
pub fn flag_low_confidence_regions(result: &ExtractionResult, threshold: f32) -> Vec<RegionConfidence> {
    result
        .regions()
        .unwrap_or_default()
        .iter()
        .filter(|r| r.confidence < threshold)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, confidence: f32) -> RegionConfidence {
        RegionConfidence {
            text: text.into(),
            confidence,
            bounding_box: None,
        }
    }

    #[test]
    fn overall_weighted_by_text_length() {
        let results = vec![
            ExtractionResult::new("tesseract", "Amoxicillin 500mg three times daily ".repeat(5), 0.85, None),
            ExtractionResult::new("vision", "Rx", 0.30, None),
        ];
        let conf = compute_overall_confidence(&results);
        assert!(conf > 0.80, "Expected > 0.80, got {conf}");
    }

    #[test]
    fn overall_zero_without_text() {
        assert_eq!(compute_overall_confidence(&[]), 0.0);
        let results = vec![ExtractionResult::new("a", "", 0.9, None)];
        assert_eq!(compute_overall_confidence(&results), 0.0);
    }

    #[test]
    fn low_confidence_warning_names_engine() {
        let result = ExtractionResult::new("tesseract", "blurry text", 0.25, None);
        let warnings = analyze_result_quality(&result);
        assert!(warnings.iter().any(|w| matches!(
            w,
            ExtractionWarning::LowConfidence { engine, .. } if engine == "tesseract"
        )));
    }

    #[test]
    fn handwriting_warning_on_many_low_confidence_words() {
        let regions = vec![
            word("a", 0.10),
            word("b", 0.15),
            word("c", 0.20),
            word("d", 0.60),
            word("e", 0.30),
        ];
        let result = ExtractionResult::new("tesseract", "a b c d e", 0.35, Some(regions));
        let warnings = analyze_result_quality(&result);
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ExtractionWarning::HandwritingDetected { .. })));
    }

    #[test]
    fn confident_print_has_no_warnings() {
        let regions = vec![word("Tab", 0.95), word("Cetirizine", 0.91)];
        let result = ExtractionResult::new("tesseract", "Tab Cetirizine", 0.93, Some(regions));
        assert!(analyze_result_quality(&result).is_empty());
    }

    #[test]
    fn blank_results_are_not_judged() {
        let result = ExtractionResult::new("tesseract", "  ", 0.0, None);
        assert!(analyze_result_quality(&result).is_empty());
    }

    #[test]
    fn flags_regions_under_threshold() {
        let regions = vec![word("Metformin", 0.9), word("5O0mg", 0.45)];
        let result = ExtractionResult::new("tesseract", "Metformin 5O0mg", 0.7, Some(regions));
        let flagged = flag_low_confidence_regions(&result, thresholds::MODERATE);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].text, "5O0mg");
    }
}

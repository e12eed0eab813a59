//! End-to-end prescription analysis: image in, `AnalysisReport` out.
//!
//! Pipeline flow:
//! 1. Preprocess on the blocking pool (undecodable input ends here with `error`)
//! 2. Run every registered engine in its own blocking task until the OCR deadline
//! 3. Score, select the primary result and merge unique lines from the others
//! 4. Correct near-miss drug names (optional)
//! 5. Structure with the LLM; on failure fall back to the regex heuristic
//!
//! Pipeline failures never surface as `Err`: they are folded into the report's
//! status and warnings, and any OCR text found is always returned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{self, JoinSet};
use tracing::Instrument;
use uuid::Uuid;

use super::extraction::confidence::{
    analyze_result_quality, compute_overall_confidence, flag_low_confidence_regions, thresholds,
};
use super::extraction::medical_correction::{correct_medical_terms, TermCorrection};
use super::extraction::{
    merge, EngineRegistry, ExtractionError, ExtractionResult, ExtractionWarning, ImagePreprocessor,
    MergedText, PreparedImage, PreprocessingPipeline, ResultScorer, ScoredResult,
};
use super::structuring::{
    build_llm_client, heuristic_medicines, Medicine, PrescriptionParser, StructuredBy,
    StructuringError,
};
use crate::pipeline_config::{MergeConfig, PipelineConfig};

/// Overall outcome, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Success,
    Warning,
    Partial,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineOutcome {
    Completed,
    Failed,
    TimedOut,
}

/// What one engine did for this image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSummary {
    pub name: String,
    pub outcome: EngineOutcome,
    pub confidence: Option<f32>,
    pub score: Option<f32>,
    pub lines_contributed: usize,
    pub primary: bool,
    /// Words the engine read with less than moderate confidence.
    pub uncertain_words: Vec<String>,
}

/// The JSON document returned for every analysis.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub analysis_id: Uuid,
    pub status: AnalysisStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ocr_text: String,
    pub text_lines: Vec<String>,
    pub medicines: Vec<Medicine>,
    pub warnings: Vec<String>,
    pub primary_engine: Option<String>,
    pub engines: Vec<EngineSummary>,
    pub corrections: Vec<TermCorrection>,
    pub ocr_complete: bool,
    pub structured_by: StructuredBy,
    pub generated_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl AnalysisReport {
    fn empty(analysis_id: Uuid) -> Self {
        Self {
            analysis_id,
            status: AnalysisStatus::Success,
            error: None,
            ocr_text: String::new(),
            text_lines: vec![],
            medicines: vec![],
            warnings: vec![],
            primary_engine: None,
            engines: vec![],
            corrections: vec![],
            ocr_complete: true,
            structured_by: StructuredBy::None,
            generated_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    fn escalate(&mut self, status: AnalysisStatus) {
        self.status = self.status.max(status);
    }

    fn warn(&mut self, warning: &ExtractionWarning) {
        self.warnings.push(warning.message());
    }
}

/// Outcome of the OCR fan-out.
struct EngineRun {
    results: Vec<ExtractionResult>,
    failed: Vec<String>,
    timed_out: Vec<String>,
}

/// Health snapshot for the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerStatus {
    pub engines: Vec<String>,
    pub llm_configured: bool,
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
}

/// Runs the whole pipeline for one image at a time; share it behind an `Arc`.
pub struct PrescriptionAnalyzer {
    preprocessor: Arc<dyn ImagePreprocessor>,
    registry: Arc<EngineRegistry>,
    scorer: ResultScorer,
    merge_config: MergeConfig,
    parser: Option<Arc<PrescriptionParser>>,
    ocr_deadline: Duration,
    correct_terms: bool,
    heuristic_fallback: bool,
}

impl PrescriptionAnalyzer {
    pub fn new(
        preprocessor: Arc<dyn ImagePreprocessor>,
        registry: Arc<EngineRegistry>,
        parser: Option<Arc<PrescriptionParser>>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            preprocessor,
            registry,
            scorer: ResultScorer::new(config.scoring.clone()),
            merge_config: config.merge.clone(),
            parser,
            ocr_deadline: Duration::from_millis(config.ocr_deadline_ms),
            correct_terms: config.llm.correct_terms,
            heuristic_fallback: config.llm.heuristic_fallback,
        }
    }

    /// Build every component from config.
    ///
    /// Probes engines and creates blocking HTTP clients: call outside the async runtime.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, StructuringError> {
        let preprocessor = Arc::new(PreprocessingPipeline::from_config(&config.preprocess));
        let registry = Arc::new(EngineRegistry::initialize(config));
        let parser = build_llm_client(&config.llm)?
            .map(|llm| Arc::new(PrescriptionParser::new(llm, &config.llm)));
        Ok(Self::new(preprocessor, registry, parser, config))
    }

    pub fn status(&self) -> AnalyzerStatus {
        AnalyzerStatus {
            engines: self.registry.names(),
            llm_configured: self.parser.is_some(),
            llm_provider: self.parser.as_ref().map(|p| p.provider().to_string()),
            llm_model: self.parser.as_ref().map(|p| p.model().to_string()),
        }
    }

    pub async fn analyze(&self, image_bytes: Vec<u8>, filename: Option<&str>) -> AnalysisReport {
        let analysis_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "analysis",
            id = %analysis_id,
            filename = filename.unwrap_or("-"),
            bytes = image_bytes.len()
        );
        let start = std::time::Instant::now();

        let mut report = self.run(analysis_id, image_bytes).instrument(span.clone()).await;
        report.elapsed_ms = start.elapsed().as_millis() as u64;

        span.in_scope(|| {
            tracing::info!(
                status = ?report.status,
                medicines = report.medicines.len(),
                lines = report.text_lines.len(),
                elapsed_ms = report.elapsed_ms,
                "Analysis finished"
            );
        });
        report
    }

    async fn run(&self, analysis_id: Uuid, image_bytes: Vec<u8>) -> AnalysisReport {
        let mut report = AnalysisReport::empty(analysis_id);

        let prepared = match self.preprocess(image_bytes).await {
            Ok(prepared) => Arc::new(prepared),
            Err(e) => {
                tracing::warn!(error = %e, "Image rejected");
                report.escalate(AnalysisStatus::Error);
                report.error = Some(e.to_string());
                return report;
            }
        };
        for warning in &prepared.warnings {
            report.warn(warning);
        }

        let run = self.run_engines(prepared).await;
        for result in &run.results {
            for warning in analyze_result_quality(result) {
                report.warn(&warning);
            }
        }
        for engine in &run.timed_out {
            report.warn(&ExtractionWarning::EngineTimedOut { engine: engine.clone() });
        }
        if !run.timed_out.is_empty() {
            report.ocr_complete = false;
            report.escalate(AnalysisStatus::Partial);
            report.warn(&ExtractionWarning::PartialExtraction {
                reason: format!(
                    "OCR stopped after {} ms; the text may be missing lines",
                    self.ocr_deadline.as_millis()
                ),
            });
        }

        let overall_confidence = compute_overall_confidence(&run.results);
        let scored = self.scorer.score_all(run.results, &self.merge_config);
        let merged = match merge(scored.clone(), self.merge_config.inclusion_threshold) {
            Ok(mut merged) => {
                if !run.timed_out.is_empty() {
                    merged.mark_partial();
                }
                Some(merged)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Merge produced no text");
                report.escalate(AnalysisStatus::Warning);
                report.warnings.push(e.to_string());
                None
            }
        };
        report.engines = engine_summaries(&scored, merged.as_ref(), &run.failed, &run.timed_out);

        let Some(merged) = merged else {
            return report;
        };
        report.primary_engine = Some(merged.primary_engine.clone());

        let text = merged.text();
        let text = if self.correct_terms {
            let (corrected, corrections) = correct_medical_terms(&text);
            report.corrections = corrections;
            corrected
        } else {
            text
        };
        report.text_lines = text.lines().map(str::to_string).collect();
        report.ocr_text = text;

        self.structure(&mut report, overall_confidence).await;
        report
    }

    async fn preprocess(&self, image_bytes: Vec<u8>) -> Result<PreparedImage, ExtractionError> {
        let preprocessor = Arc::clone(&self.preprocessor);
        tokio::task::spawn_blocking(move || preprocessor.preprocess(&image_bytes))
            .await
            .map_err(|e| ExtractionError::Preprocessing(format!("preprocessing task failed: {e}")))?
    }

    /// Fan out to every engine and collect what finishes before the deadline.
    async fn run_engines(&self, image: Arc<PreparedImage>) -> EngineRun {
        let deadline = tokio::time::Instant::now() + self.ocr_deadline;
        let mut pending = self.registry.names();
        let mut task_names: HashMap<task::Id, String> = HashMap::with_capacity(pending.len());
        let mut tasks = JoinSet::new();

        for engine in self.registry.engines() {
            let name = engine.name().to_string();
            let engine = Arc::clone(engine);
            let image = Arc::clone(&image);
            let handle = tasks.spawn_blocking(move || engine.extract(&image));
            task_names.insert(handle.id(), name);
        }

        let mut run = EngineRun {
            results: Vec::with_capacity(pending.len()),
            failed: vec![],
            timed_out: vec![],
        };

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(Ok((id, outcome)))) => {
                    let Some(name) = task_names.remove(&id) else { continue };
                    pending.retain(|n| n != &name);
                    match outcome {
                        Some(result) => run.results.push(result),
                        None => run.failed.push(name),
                    }
                }
                Ok(Some(Err(e))) => {
                    let Some(name) = task_names.remove(&e.id()) else { continue };
                    tracing::warn!(engine = %name, error = %e, "OCR task ended abnormally");
                    pending.retain(|n| n != &name);
                    run.failed.push(name);
                }
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    tracing::warn!(
                        deadline_ms = self.ocr_deadline.as_millis() as u64,
                        engines = ?pending,
                        "OCR deadline reached, abandoning engines"
                    );
                    run.timed_out = pending;
                    break;
                }
            }
        }

        run
    }

    /// Fill medicines and `structured_by`, falling back to the heuristic when the LLM fails.
    async fn structure(&self, report: &mut AnalysisReport, ocr_confidence: f32) {
        let failure = match &self.parser {
            None => "LLM structuring is disabled".to_string(),
            Some(parser) => {
                let budget = parser.time_budget();
                let parser = Arc::clone(parser);
                let text = report.ocr_text.clone();
                let task = tokio::task::spawn_blocking(move || parser.parse(&text, ocr_confidence));

                match tokio::time::timeout(budget, task).await {
                    Ok(Ok(Ok(parsed))) => {
                        report.structured_by = StructuredBy::Llm;
                        if parsed.medicines.is_empty() {
                            report.escalate(AnalysisStatus::Warning);
                            report.warnings.push("No medicines were identified in the text".into());
                        }
                        report.medicines = parsed.medicines;
                        return;
                    }
                    Ok(Ok(Err(StructuringError::InputTooShort))) => {
                        report.escalate(AnalysisStatus::Warning);
                        report
                            .warnings
                            .push("Too little text was read to identify medicines".into());
                        return;
                    }
                    Ok(Ok(Err(e))) => format!("LLM structuring failed: {e}"),
                    Ok(Err(e)) => format!("LLM structuring task failed: {e}"),
                    Err(_) => format!("LLM structuring timed out after {} s", budget.as_secs()),
                }
            }
        };

        tracing::warn!(reason = %failure, "Falling back from LLM structuring");
        report.escalate(AnalysisStatus::Partial);
        report.warnings.push(failure);

        if self.heuristic_fallback {
            let medicines = heuristic_medicines(&report.ocr_text);
            if !medicines.is_empty() {
                report.structured_by = StructuredBy::Heuristic;
                report.warnings.push(
                    "Medicines were extracted by pattern matching; please verify them".into(),
                );
                report.medicines = medicines;
            }
        }
    }
}

fn engine_summaries(
    scored: &[ScoredResult],
    merged: Option<&MergedText>,
    failed: &[String],
    timed_out: &[String],
) -> Vec<EngineSummary> {
    let completed = scored.iter().map(|s| {
        let name = s.result.engine_name();
        EngineSummary {
            name: name.to_string(),
            outcome: EngineOutcome::Completed,
            confidence: Some(s.result.confidence()),
            score: Some(s.score),
            lines_contributed: merged.map_or(0, |m| m.lines_from(name)),
            primary: merged.is_some_and(|m| m.primary_engine == name),
            uncertain_words: flag_low_confidence_regions(&s.result, thresholds::MODERATE)
                .into_iter()
                .map(|r| r.text)
                .collect(),
        }
    });
    let missing = |names: &[String], outcome: EngineOutcome| {
        names
            .iter()
            .map(|name| EngineSummary {
                name: name.clone(),
                outcome,
                confidence: None,
                score: None,
                lines_contributed: 0,
                primary: false,
                uncertain_words: vec![],
            })
            .collect::<Vec<_>>()
    };

    let mut summaries: Vec<EngineSummary> = completed.collect();
    summaries.extend(missing(failed, EngineOutcome::Failed));
    summaries.extend(missing(timed_out, EngineOutcome::TimedOut));
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::engines::MockOcrEngine;
    use crate::pipeline::extraction::{OcrEngine, RawRecognition};
    use crate::pipeline::structuring::{MockLlmClient, HEURISTIC_CONFIDENCE};
    use crate::pipeline_config::LlmConfig;
    use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};

    const LLM_REPLY: &str = r#"{"medicines": [
        {"name": "Paracetamol", "dosage": "500mg", "frequency": "TDS", "duration": "3 days", "confidence": 0.9}
    ]}"#;

    fn test_png() -> Vec<u8> {
        let mut img = GrayImage::from_pixel(120, 80, Luma([255u8]));
        for x in 20..100 {
            for y in 38..42 {
                img.put_pixel(x, y, Luma([0u8]));
            }
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut bytes, ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    fn config(deadline_ms: u64) -> PipelineConfig {
        PipelineConfig {
            ocr_deadline_ms: deadline_ms,
            ..PipelineConfig::default()
        }
    }

    fn analyzer(
        engines: Vec<MockOcrEngine>,
        llm: Option<MockLlmClient>,
        config: &PipelineConfig,
    ) -> PrescriptionAnalyzer {
        let engines: Vec<Arc<dyn OcrEngine>> = engines
            .into_iter()
            .map(|e| Arc::new(e) as Arc<dyn OcrEngine>)
            .collect();
        let registry = Arc::new(EngineRegistry::from_engines(engines, &config.merge));
        let parser = llm.map(|client| Arc::new(PrescriptionParser::new(Arc::new(client), &config.llm)));
        PrescriptionAnalyzer::new(
            Arc::new(PreprocessingPipeline::from_config(&config.preprocess)),
            registry,
            parser,
            config,
        )
    }

    #[tokio::test]
    async fn merges_engines_and_structures_with_llm() {
        let config = config(5_000);
        let analyzer = analyzer(
            vec![
                MockOcrEngine::new("tesseract", "Rx\nParacetamol 500mg\nTDS x 3 days", 0.85),
                MockOcrEngine::new("easyocr", "Rx\nparacetamol  500mg\nDr. Rao", 0.60),
            ],
            Some(MockLlmClient::new(LLM_REPLY)),
            &config,
        );

        let report = analyzer.analyze(test_png(), Some("rx.png")).await;

        assert_eq!(report.status, AnalysisStatus::Success);
        assert_eq!(report.primary_engine.as_deref(), Some("tesseract"));
        assert_eq!(
            report.text_lines,
            vec!["Rx", "Paracetamol 500mg", "TDS x 3 days", "Dr. Rao"]
        );
        assert_eq!(report.structured_by, StructuredBy::Llm);
        assert_eq!(report.medicines[0].name, "Paracetamol");
        assert!(report.ocr_complete);

        let easy = report.engines.iter().find(|e| e.name == "easyocr").unwrap();
        assert_eq!(easy.lines_contributed, 1);
        assert!(!easy.primary);
        assert!(easy.uncertain_words.contains(&"Dr.".to_string()));
        let tesseract = report.engines.iter().find(|e| e.name == "tesseract").unwrap();
        assert!(tesseract.primary);
        assert!(tesseract.uncertain_words.is_empty());
    }

    #[tokio::test]
    async fn undecodable_image_is_error() {
        let config = config(5_000);
        let analyzer = analyzer(
            vec![MockOcrEngine::new("tesseract", "Rx", 0.9)],
            Some(MockLlmClient::new(LLM_REPLY)),
            &config,
        );

        let report = analyzer.analyze(vec![0x42; 512], None).await;

        assert_eq!(report.status, AnalysisStatus::Error);
        assert!(report.error.unwrap().contains("decode"));
        assert!(report.ocr_text.is_empty());
        assert!(report.medicines.is_empty());
    }

    #[tokio::test]
    async fn no_text_is_warning() {
        let config = config(5_000);
        let analyzer = analyzer(
            vec![
                MockOcrEngine::new("tesseract", "   ", 0.9),
                MockOcrEngine::new("easyocr", "", 0.0).failing("model missing"),
            ],
            Some(MockLlmClient::new(LLM_REPLY)),
            &config,
        );

        let report = analyzer.analyze(test_png(), None).await;

        assert_eq!(report.status, AnalysisStatus::Warning);
        assert!(report.ocr_text.is_empty());
        assert_eq!(report.primary_engine, None);
        assert_eq!(report.structured_by, StructuredBy::None);
        let failed = report.engines.iter().find(|e| e.name == "easyocr").unwrap();
        assert_eq!(failed.outcome, EngineOutcome::Failed);
    }

    #[tokio::test]
    async fn deadline_cuts_slow_engine() {
        let config = config(300);
        let analyzer = analyzer(
            vec![
                MockOcrEngine::new("tesseract", "Paracetamol 500mg TDS", 0.8),
                MockOcrEngine::new("vision", "Ibuprofen 400mg", 0.7).with_delay(Duration::from_millis(1_500)),
            ],
            Some(MockLlmClient::new(LLM_REPLY)),
            &config,
        );

        let report = analyzer.analyze(test_png(), None).await;

        assert_eq!(report.status, AnalysisStatus::Partial);
        assert!(!report.ocr_complete);
        assert_eq!(report.ocr_text, "Paracetamol 500mg TDS");
        let vision = report.engines.iter().find(|e| e.name == "vision").unwrap();
        assert_eq!(vision.outcome, EngineOutcome::TimedOut);
        assert!(report.warnings.iter().any(|w| w.contains("did not finish in time")));
    }

    struct CrashingEngine;

    impl OcrEngine for CrashingEngine {
        fn name(&self) -> &str {
            "trocr"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn recognize(&self, _image: &PreparedImage) -> Result<RawRecognition, ExtractionError> {
            panic!("model weights corrupted");
        }
    }

    #[tokio::test]
    async fn crashed_engine_is_failed_not_timed_out() {
        let config = config(600);
        let engines: Vec<Arc<dyn OcrEngine>> = vec![
            Arc::new(MockOcrEngine::new("tesseract", "Paracetamol 500mg TDS", 0.8)),
            Arc::new(CrashingEngine),
            Arc::new(
                MockOcrEngine::new("vision", "Ibuprofen 400mg", 0.7).with_delay(Duration::from_millis(1_500)),
            ),
        ];
        let registry = Arc::new(EngineRegistry::from_engines(engines, &config.merge));
        let analyzer = PrescriptionAnalyzer::new(
            Arc::new(PreprocessingPipeline::from_config(&config.preprocess)),
            registry,
            Some(Arc::new(PrescriptionParser::new(
                Arc::new(MockLlmClient::new(LLM_REPLY)),
                &config.llm,
            ))),
            &config,
        );

        let report = analyzer.analyze(test_png(), None).await;

        let trocr = report.engines.iter().find(|e| e.name == "trocr").unwrap();
        assert_eq!(trocr.outcome, EngineOutcome::Failed);
        let vision = report.engines.iter().find(|e| e.name == "vision").unwrap();
        assert_eq!(vision.outcome, EngineOutcome::TimedOut);
        assert!(!report.warnings.iter().any(|w| w.contains("trocr") && w.contains("in time")));
    }

    #[tokio::test]
    async fn crashed_engine_alone_keeps_ocr_complete() {
        let config = config(5_000);
        let engines: Vec<Arc<dyn OcrEngine>> = vec![
            Arc::new(MockOcrEngine::new("tesseract", "Paracetamol 500mg TDS", 0.8)),
            Arc::new(CrashingEngine),
        ];
        let registry = Arc::new(EngineRegistry::from_engines(engines, &config.merge));
        let analyzer = PrescriptionAnalyzer::new(
            Arc::new(PreprocessingPipeline::from_config(&config.preprocess)),
            registry,
            Some(Arc::new(PrescriptionParser::new(
                Arc::new(MockLlmClient::new(LLM_REPLY)),
                &config.llm,
            ))),
            &config,
        );

        let report = analyzer.analyze(test_png(), None).await;

        assert!(report.ocr_complete);
        assert_eq!(report.status, AnalysisStatus::Success);
        let trocr = report.engines.iter().find(|e| e.name == "trocr").unwrap();
        assert_eq!(trocr.outcome, EngineOutcome::Failed);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_heuristic() {
        let config = PipelineConfig {
            llm: LlmConfig {
                max_retries: 1,
                retry_base_delay_ms: 1,
                ..LlmConfig::default()
            },
            ..config(5_000)
        };
        let analyzer = analyzer(
            vec![MockOcrEngine::new("tesseract", "Tab Amoxicillin 500mg\nTDS x 5 days", 0.8)],
            Some(MockLlmClient::unreachable()),
            &config,
        );

        let report = analyzer.analyze(test_png(), None).await;

        assert_eq!(report.status, AnalysisStatus::Partial);
        assert_eq!(report.ocr_text, "Tab Amoxicillin 500mg\nTDS x 5 days");
        assert_eq!(report.structured_by, StructuredBy::Heuristic);
        assert_eq!(report.medicines[0].name, "Amoxicillin");
        assert!((report.medicines[0].confidence - HEURISTIC_CONFIDENCE).abs() < f32::EPSILON);
        assert!(report.warnings.iter().any(|w| w.contains("LLM structuring failed")));
    }

    #[tokio::test]
    async fn llm_timeout_is_partial() {
        let config = PipelineConfig {
            llm: LlmConfig {
                timeout_secs: 0,
                max_retries: 0,
                heuristic_fallback: false,
                ..LlmConfig::default()
            },
            ..config(5_000)
        };
        let analyzer = analyzer(
            vec![MockOcrEngine::new("tesseract", "Tab Amoxicillin 500mg", 0.8)],
            Some(MockLlmClient::new(LLM_REPLY).with_delay(Duration::from_millis(500))),
            &config,
        );

        let report = analyzer.analyze(test_png(), None).await;

        assert_eq!(report.status, AnalysisStatus::Partial);
        assert_eq!(report.structured_by, StructuredBy::None);
        assert!(report.medicines.is_empty());
        assert_eq!(report.ocr_text, "Tab Amoxicillin 500mg");
    }

    #[tokio::test]
    async fn llm_without_medicines_is_warning() {
        let config = config(5_000);
        let analyzer = analyzer(
            vec![MockOcrEngine::new("tesseract", "Dr. Rao, General Physician", 0.9)],
            Some(MockLlmClient::new(r#"{"medicines": []}"#)),
            &config,
        );

        let report = analyzer.analyze(test_png(), None).await;

        assert_eq!(report.status, AnalysisStatus::Warning);
        assert_eq!(report.structured_by, StructuredBy::Llm);
        assert!(report.medicines.is_empty());
    }

    #[tokio::test]
    async fn disabled_llm_uses_heuristic() {
        let config = config(5_000);
        let analyzer = analyzer(
            vec![MockOcrEngine::new("tesseract", "Syp Ambroxol 5 ml BD", 0.8)],
            None,
            &config,
        );

        let report = analyzer.analyze(test_png(), None).await;

        assert_eq!(report.status, AnalysisStatus::Partial);
        assert_eq!(report.structured_by, StructuredBy::Heuristic);
        assert_eq!(report.medicines[0].name, "Ambroxol");
        assert!(!analyzer.status().llm_configured);
    }

    #[tokio::test]
    async fn misread_drug_name_corrected() {
        let config = config(5_000);
        let analyzer = analyzer(
            vec![MockOcrEngine::new("tesseract", "Tab Metfonnin 500mg BD", 0.8)],
            Some(MockLlmClient::new(LLM_REPLY)),
            &config,
        );

        let report = analyzer.analyze(test_png(), None).await;

        assert_eq!(report.ocr_text, "Tab Metformin 500mg BD");
        assert_eq!(report.corrections.len(), 1);
        assert_eq!(report.corrections[0].original, "Metfonnin");
    }

    #[test]
    fn status_severity_order() {
        assert!(AnalysisStatus::Error > AnalysisStatus::Partial);
        assert!(AnalysisStatus::Partial > AnalysisStatus::Warning);
        assert!(AnalysisStatus::Warning > AnalysisStatus::Success);
    }

    #[test]
    fn report_serializes_lowercase_status() {
        let report = AnalysisReport::empty(Uuid::new_v4());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["structured_by"], "none");
        assert!(json["medicines"].as_array().unwrap().is_empty());
        assert!(json.get("error").is_none());
    }
}

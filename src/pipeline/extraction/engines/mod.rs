pub mod mock;
pub mod remote;
pub mod tesseract;
pub mod vision;

pub use mock::MockOcrEngine;
pub use remote::RemoteOcrEngine;
pub use tesseract::{TesseractEngine, TESSERACT_ENGINE};
pub use vision::VisionLlmEngine;

use std::sync::Arc;

use super::types::OcrEngine;
use crate::pipeline::structuring::ollama::OllamaClient;
use crate::pipeline_config::{MergeConfig, PipelineConfig};

/// The set of usable engines, built and probed once at startup.
///
/// Engines are kept in priority order so every consumer iterates them the same way.
pub struct EngineRegistry {
    engines: Vec<Arc<dyn OcrEngine>>,
}

impl EngineRegistry {
    /// Construct every enabled adapter from config and keep the available ones.
    ///
    /// Performs blocking probes (process spawns, HTTP). Call outside the async runtime.
    pub fn initialize(config: &PipelineConfig) -> Self {
        let mut candidates: Vec<Arc<dyn OcrEngine>> = Vec::new();

        if config.engines.tesseract.enabled {
            candidates.push(Arc::new(TesseractEngine::new(&config.engines.tesseract)));
        }

        let vision = &config.engines.vision;
        if vision.enabled {
            match OllamaClient::new(&vision.base_url, &vision.model, vision.timeout_secs) {
                Ok(client) => candidates.push(Arc::new(VisionLlmEngine::new(Arc::new(client), vision))),
                Err(e) => tracing::warn!(engine = %vision.name, error = %e, "Cannot build vision client"),
            }
        }

        for remote in config.engines.remote.iter().filter(|r| r.enabled) {
            match RemoteOcrEngine::new(remote) {
                Ok(engine) => candidates.push(Arc::new(engine)),
                Err(e) => tracing::warn!(engine = %remote.name, error = %e, "Cannot build remote engine"),
            }
        }

        Self::from_engines(candidates, &config.merge)
    }

    /// Probe availability once, drop what is missing and order by priority.
    pub fn from_engines(candidates: Vec<Arc<dyn OcrEngine>>, merge: &MergeConfig) -> Self {
        let mut engines: Vec<Arc<dyn OcrEngine>> = candidates
            .into_iter()
            .filter(|engine| {
                let available = engine.is_available();
                if available {
                    tracing::info!(engine = %engine.name(), "OCR engine ready");
                } else {
                    tracing::warn!(engine = %engine.name(), "OCR engine unavailable, skipping");
                }
                available
            })
            .collect();

        engines.sort_by(|a, b| {
            merge
                .priority_rank(a.name())
                .cmp(&merge.priority_rank(b.name()))
                .then_with(|| a.name().cmp(b.name()))
        });

        if engines.is_empty() {
            tracing::warn!("No OCR engine available; every analysis will return no text");
        }

        Self { engines }
    }

    pub fn engines(&self) -> &[Arc<dyn OcrEngine>] {
        &self.engines
    }

    pub fn names(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

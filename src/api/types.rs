//! Shared state handed to every handler.

use std::sync::Arc;

use crate::pipeline::analyzer::PrescriptionAnalyzer;

/// Upload extensions the analyze endpoint accepts.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["bmp", "jpeg", "jpg", "png", "tif", "tiff"];

#[derive(Clone)]
pub struct ApiContext {
    pub analyzer: Arc<PrescriptionAnalyzer>,
    pub max_upload_bytes: usize,
}

impl ApiContext {
    pub fn new(analyzer: Arc<PrescriptionAnalyzer>, max_upload_bytes: usize) -> Self {
        Self {
            analyzer,
            max_upload_bytes,
        }
    }
}

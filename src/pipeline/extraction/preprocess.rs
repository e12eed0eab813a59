//! Image preprocessing for OCR engines.
//!
//! Each enhancement is an independent `PreprocessStep`. The pipeline runs them
//! in order over a grayscale image; a step that fails is logged and skipped, and
//! the next step receives the last good image. Only undecodable input aborts.
//!
//! Pipeline flow:
//! 1. Validate bytes (size bounds)
//! 2. Decode image
//! 3. Fix EXIF rotation
//! 4. Pre-downscale oversized photos
//! 5. Assess quality (read-only, produces warnings)
//! 6. Steps: denoise -> deskew -> local contrast -> adaptive binarization -> despeckle
//! 7. Encode PNG (processed grayscale + original color)

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, ImageOutputFormat, Luma};
use tracing::debug;

use super::types::ExtractionWarning;
use super::ExtractionError;
use crate::pipeline_config::PreprocessConfig;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Smallest byte count worth handing to the decoder.
const MIN_IMAGE_BYTES: usize = 32;

/// Gray level under which a pixel counts as ink.
const INK_THRESHOLD: u8 = 128;

/// Laplacian variance below this = blurry.
const BLUR_THRESHOLD: f32 = 100.0;

/// RMS contrast below this = poor contrast (near-uniform image).
const CONTRAST_THRESHOLD: f32 = 25.0;

/// Skew search range and resolution, in degrees.
const SKEW_SEARCH_RANGE_DEG: f32 = 10.0;
const SKEW_SEARCH_STEP_DEG: f32 = 0.25;

/// Upper bound on ink pixels sampled by the skew search.
const SKEW_SAMPLE_LIMIT: usize = 40_000;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Which rendition of the prepared image an engine wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageVariant {
    /// Enhanced, binarized grayscale. Best for classic OCR.
    #[default]
    Processed,
    /// Orientation-corrected color image. Best for neural/vision models.
    Original,
}

/// Image ready for the engines. Shared read-only between adapters.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    processed_png: Vec<u8>,
    original_png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    /// Names of the steps that ran successfully, in order.
    pub applied_steps: Vec<String>,
    pub warnings: Vec<ExtractionWarning>,
}

impl PreparedImage {
    /// Build from an already-processed grayscale image (no enhancement applied).
    pub fn from_gray(gray: GrayImage) -> Result<Self, ExtractionError> {
        let (width, height) = gray.dimensions();
        let dynamic = DynamicImage::ImageLuma8(gray);
        let png = encode_png(&dynamic)?;
        Ok(Self {
            processed_png: png.clone(),
            original_png: png,
            width,
            height,
            original_width: width,
            original_height: height,
            applied_steps: vec![],
            warnings: vec![],
        })
    }

    pub fn png_bytes(&self, variant: ImageVariant) -> &[u8] {
        match variant {
            ImageVariant::Processed => &self.processed_png,
            ImageVariant::Original => &self.original_png,
        }
    }
}

/// A single enhancement over grayscale pixels.
pub trait PreprocessStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, image: &GrayImage) -> Result<GrayImage, ExtractionError>;
}

/// Turns raw upload bytes into a `PreparedImage`.
pub trait ImagePreprocessor: Send + Sync {
    fn preprocess(&self, image_bytes: &[u8]) -> Result<PreparedImage, ExtractionError>;
}

/// Quality assessment report with numeric scores.
#[derive(Debug, Default)]
pub struct QualityReport {
    pub warnings: Vec<ExtractionWarning>,
    /// Page appears mostly blank (>95% near-white).
    pub is_blank: bool,
    /// Laplacian variance. Higher = sharper.
    pub blur_score: f32,
    /// Detected skew angle in degrees, if there is enough ink to tell.
    pub skew_angle: Option<f32>,
    /// RMS contrast (0-127.5).
    pub contrast_score: f32,
}

// ═══════════════════════════════════════════════════════════
// PreprocessingPipeline
// ═══════════════════════════════════════════════════════════

pub struct PreprocessingPipeline {
    steps: Vec<Box<dyn PreprocessStep>>,
    correct_orientation: bool,
    max_input_dimension: u32,
    max_image_bytes: usize,
    skew_warning_deg: f32,
}

impl PreprocessingPipeline {
    pub fn new(steps: Vec<Box<dyn PreprocessStep>>, config: &PreprocessConfig) -> Self {
        Self {
            steps,
            correct_orientation: config.correct_orientation,
            max_input_dimension: config.max_input_dimension,
            max_image_bytes: config.max_image_bytes,
            skew_warning_deg: config.skew_warning_deg,
        }
    }

    /// Standard step sequence, honoring the per-step switches in config.
    pub fn from_config(config: &PreprocessConfig) -> Self {
        let mut steps: Vec<Box<dyn PreprocessStep>> = Vec::new();
        if config.denoise {
            steps.push(Box::new(Denoise {
                noise_threshold: config.noise_threshold,
                radius: config.bilateral_radius,
                range_sigma: config.bilateral_range_sigma,
            }));
        }
        if config.deskew {
            steps.push(Box::new(Deskew {
                min_angle_deg: config.deskew_min_angle_deg,
            }));
        }
        if config.enhance_contrast {
            steps.push(Box::new(LocalContrast {
                grid: config.contrast_grid,
                clip_limit: config.contrast_clip_limit,
            }));
        }
        if config.binarize {
            steps.push(Box::new(AdaptiveBinarize {
                window: config.binarize_window,
                offset: config.binarize_offset,
            }));
        }
        if config.despeckle {
            steps.push(Box::new(Despeckle));
        }
        Self::new(steps, config)
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl ImagePreprocessor for PreprocessingPipeline {
    fn preprocess(&self, image_bytes: &[u8]) -> Result<PreparedImage, ExtractionError> {
        validate_image_bytes(image_bytes, self.max_image_bytes)?;

        let img = image::load_from_memory(image_bytes).map_err(|e| {
            ExtractionError::Preprocessing(format!("Failed to decode image: {e}"))
        })?;
        let (orig_w, orig_h) = img.dimensions();
        if orig_w == 0 || orig_h == 0 {
            return Err(ExtractionError::Preprocessing("Image has no pixels".into()));
        }

        let img = if self.correct_orientation {
            apply_orientation(img, read_exif_orientation(image_bytes))
        } else {
            img
        };
        let img = pre_downscale(img, self.max_input_dimension);
        let original_png = encode_png(&img)?;

        let gray = img.to_luma8();
        let report = assess_quality(&gray, self.skew_warning_deg);
        let mut warnings = report.warnings;

        let mut current = gray;
        let mut applied_steps = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            match step.apply(&current) {
                Ok(next) => {
                    current = next;
                    applied_steps.push(step.name().to_string());
                }
                Err(e) => {
                    tracing::warn!(
                        step = step.name(),
                        error = %e,
                        "Preprocessing step failed, keeping previous stage"
                    );
                    warnings.push(ExtractionWarning::PreprocessingStepSkipped {
                        step: step.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let (width, height) = current.dimensions();
        let processed_png = encode_png(&DynamicImage::ImageLuma8(current))?;

        debug!(
            original = format!("{orig_w}x{orig_h}"),
            output = format!("{width}x{height}"),
            steps = ?applied_steps,
            warnings = warnings.len(),
            "Image preprocessed for OCR"
        );

        Ok(PreparedImage {
            processed_png,
            original_png,
            width,
            height,
            original_width: orig_w,
            original_height: orig_h,
            applied_steps,
            warnings,
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Steps
// ═══════════════════════════════════════════════════════════

// ── Denoise ──────────────────────────────────────────────

/// Edge-preserving bilateral filter, applied only to noisy inputs.
/// Clean scans pass through untouched.
pub struct Denoise {
    pub noise_threshold: f32,
    pub radius: u32,
    pub range_sigma: f32,
}

impl PreprocessStep for Denoise {
    fn name(&self) -> &'static str {
        "denoise"
    }

    fn apply(&self, image: &GrayImage) -> Result<GrayImage, ExtractionError> {
        if self.range_sigma <= 0.0 {
            return Err(ExtractionError::Preprocessing(
                "bilateral range sigma must be positive".into(),
            ));
        }
        let noise_level = assess_noise_level(image);
        if noise_level < self.noise_threshold {
            debug!(noise_level, threshold = self.noise_threshold, "Clean image, skipping denoise");
            return Ok(image.clone());
        }
        debug!(noise_level, threshold = self.noise_threshold, "Noisy image, applying bilateral filter");
        Ok(bilateral_filter(image, self.radius, self.range_sigma))
    }
}

// ── Deskew ───────────────────────────────────────────────

/// Rotates the page level when the detected skew exceeds `min_angle_deg`.
pub struct Deskew {
    pub min_angle_deg: f32,
}

impl PreprocessStep for Deskew {
    fn name(&self) -> &'static str {
        "deskew"
    }

    fn apply(&self, image: &GrayImage) -> Result<GrayImage, ExtractionError> {
        match detect_skew_angle(image) {
            Some(angle) if angle.abs() > self.min_angle_deg => {
                debug!(angle, "Deskewing image");
                Ok(straighten(image, angle))
            }
            _ => Ok(image.clone()),
        }
    }
}

// ── LocalContrast ────────────────────────────────────────

/// Contrast-limited tiled histogram equalization with bilinear blending
/// between tiles.
pub struct LocalContrast {
    pub grid: u32,
    pub clip_limit: f32,
}

impl PreprocessStep for LocalContrast {
    fn name(&self) -> &'static str {
        "contrast"
    }

    fn apply(&self, image: &GrayImage) -> Result<GrayImage, ExtractionError> {
        if self.grid == 0 {
            return Err(ExtractionError::Preprocessing("contrast grid must be at least 1".into()));
        }
        let (w, h) = image.dimensions();
        if w < self.grid * 2 || h < self.grid * 2 {
            return Err(ExtractionError::Preprocessing(format!(
                "image {w}x{h} too small for a {0}x{0} equalization grid",
                self.grid
            )));
        }
        Ok(equalize_local(image, self.grid, self.clip_limit))
    }
}

// ── AdaptiveBinarize ─────────────────────────────────────

/// Local-mean thresholding: a pixel is ink when it is darker than the mean of
/// its `window`-sized neighbourhood by more than `offset`.
pub struct AdaptiveBinarize {
    pub window: u32,
    pub offset: f32,
}

impl PreprocessStep for AdaptiveBinarize {
    fn name(&self) -> &'static str {
        "binarize"
    }

    fn apply(&self, image: &GrayImage) -> Result<GrayImage, ExtractionError> {
        if self.window < 3 {
            return Err(ExtractionError::Preprocessing(
                "binarization window must be at least 3 pixels".into(),
            ));
        }
        Ok(adaptive_threshold(image, self.window, self.offset))
    }
}

// ── Despeckle ────────────────────────────────────────────

/// Light morphological cleanup on a binary image: isolated ink specks are
/// removed and single-pixel holes inside strokes are filled.
pub struct Despeckle;

impl PreprocessStep for Despeckle {
    fn name(&self) -> &'static str {
        "despeckle"
    }

    fn apply(&self, image: &GrayImage) -> Result<GrayImage, ExtractionError> {
        let (w, h) = image.dimensions();
        if w < 3 || h < 3 {
            return Err(ExtractionError::Preprocessing("image too small to despeckle".into()));
        }
        Ok(despeckle(image))
    }
}

// ═══════════════════════════════════════════════════════════
// Orientation
// ═══════════════════════════════════════════════════════════

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform to a `DynamicImage`.
///
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

// ═══════════════════════════════════════════════════════════
// Quality analysis (read-only)
// ═══════════════════════════════════════════════════════════

/// Blank page, blur, contrast and skew checks. Never blocks extraction.
pub fn assess_quality(gray: &GrayImage, skew_warning_deg: f32) -> QualityReport {
    let mut report = QualityReport::default();
    let pixel_count = (gray.width() as usize) * (gray.height() as usize);
    if pixel_count == 0 {
        return report;
    }

    let white = gray.pixels().filter(|p| p.0[0] > 240).count();
    if white as f32 / pixel_count as f32 > 0.95 {
        report.is_blank = true;
        report.warnings.push(ExtractionWarning::BlankPage);
    }

    report.blur_score = compute_laplacian_variance(gray);
    if report.blur_score < BLUR_THRESHOLD && !report.is_blank {
        report.warnings.push(ExtractionWarning::BlurryImage);
    }

    report.contrast_score = compute_contrast_score(gray);
    if report.contrast_score < CONTRAST_THRESHOLD && !report.is_blank {
        report.warnings.push(ExtractionWarning::PoorContrast);
    }

    report.skew_angle = detect_skew_angle(gray);
    if let Some(angle) = report.skew_angle {
        if angle.abs() >= skew_warning_deg {
            report
                .warnings
                .push(ExtractionWarning::SkewedDocument { angle_degrees: angle });
        }
    }

    report
}

/// Laplacian variance with a 3x3 `[0,1,0; 1,-4,1; 0,1,0]` kernel.
/// Blurry documents < 100, sharp text > 500.
pub fn compute_laplacian_variance(img: &GrayImage) -> f32 {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;
    let px = |x: u32, y: u32| img.get_pixel(x, y).0[0] as f64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let laplacian =
                px(x, y - 1) + px(x, y + 1) + px(x - 1, y) + px(x + 1, y) - 4.0 * px(x, y);
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    ((sum_sq / count as f64) - mean * mean).max(0.0) as f32
}

/// RMS contrast: standard deviation of gray levels.
pub fn compute_contrast_score(img: &GrayImage) -> f32 {
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for pixel in img.pixels() {
        let val = pixel.0[0] as f64;
        sum += val;
        sum_sq += val * val;
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }

    let mean = sum / count as f64;
    ((sum_sq / count as f64) - mean * mean).max(0.0).sqrt() as f32
}

/// Noise estimate: std-dev of the median block among the smoothest quarter of
/// 5x5 blocks. Clean scans: 2-8, degraded: 15-30, fax: 25-50.
pub fn assess_noise_level(img: &GrayImage) -> f32 {
    let (w, h) = img.dimensions();
    let block = 5u32;
    if w < block || h < block {
        return 0.0;
    }

    let mut variances = Vec::with_capacity(((w / block) * (h / block)) as usize);
    let mut y = 0;
    while y + block <= h {
        let mut x = 0;
        while x + block <= w {
            let mut sum = 0.0f64;
            let mut sum_sq = 0.0f64;
            for by in 0..block {
                for bx in 0..block {
                    let val = img.get_pixel(x + bx, y + by).0[0] as f64;
                    sum += val;
                    sum_sq += val * val;
                }
            }
            let n = (block * block) as f64;
            let mean = sum / n;
            variances.push(((sum_sq / n) - mean * mean).max(0.0) as f32);
            x += block;
        }
        y += block;
    }

    variances.sort_by(|a, b| a.total_cmp(b));
    let quartile = &variances[..(variances.len() / 4).max(1)];
    quartile[quartile.len() / 2].sqrt()
}

/// Detect skew with a rotated projection profile.
///
/// Ink pixels are projected onto the vertical axis of a frame rotated by each
/// candidate angle; the angle whose profile is most concentrated (largest sum
/// of squared bin counts) is the slope of the text lines. Positive angles mean
/// lines descend to the right. Returns `None` when there is too little ink.
pub fn detect_skew_angle(img: &GrayImage) -> Option<f32> {
    let (w, h) = img.dimensions();
    if w < 50 || h < 50 {
        return None;
    }

    let ink: Vec<(f32, f32)> = img
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] < INK_THRESHOLD)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect();
    let total = (w as usize) * (h as usize);
    if (ink.len() as f32 / total as f32) < 0.02 {
        return None;
    }
    let stride = (ink.len() / SKEW_SAMPLE_LIMIT).max(1);
    let sample: Vec<(f32, f32)> = ink.into_iter().step_by(stride).collect();

    let diag = ((w as f32).hypot(h as f32)).ceil() as usize;
    let mut bins = vec![0u32; diag * 2 + 1];

    let mut best_angle = 0.0f32;
    let mut best_score = f64::NEG_INFINITY;
    let steps = (SKEW_SEARCH_RANGE_DEG / SKEW_SEARCH_STEP_DEG) as i32;

    for i in -steps..=steps {
        let angle = i as f32 * SKEW_SEARCH_STEP_DEG;
        let (sin_a, cos_a) = angle.to_radians().sin_cos();
        bins.iter_mut().for_each(|b| *b = 0);

        for &(x, y) in &sample {
            let projected = y * cos_a - x * sin_a + diag as f32;
            let idx = (projected.round().max(0.0) as usize).min(bins.len() - 1);
            bins[idx] += 1;
        }

        let score: f64 = bins.iter().map(|&c| (c as f64) * (c as f64)).sum();
        // Ties go to the smaller rotation
        if score > best_score || (score == best_score && angle.abs() < best_angle.abs()) {
            best_score = score;
            best_angle = angle;
        }
    }

    Some(best_angle)
}

// ═══════════════════════════════════════════════════════════
// Pixel operations
// ═══════════════════════════════════════════════════════════

/// Bilateral filter over grayscale pixels with a precomputed range kernel.
pub fn bilateral_filter(img: &GrayImage, radius: u32, range_sigma: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut output = GrayImage::new(w, h);
    let two_sigma_sq = 2.0 * range_sigma * range_sigma;
    let range_weights: Vec<f32> = (0..256)
        .map(|d| (-((d * d) as f32) / two_sigma_sq).exp())
        .collect();

    for y in 0..h {
        for x in 0..w {
            let center = img.get_pixel(x, y).0[0];
            let mut sum = 0.0f32;
            let mut weight_sum = 0.0f32;

            for ny in y.saturating_sub(radius)..(y + radius + 1).min(h) {
                for nx in x.saturating_sub(radius)..(x + radius + 1).min(w) {
                    let value = img.get_pixel(nx, ny).0[0];
                    let weight = range_weights[value.abs_diff(center) as usize];
                    sum += value as f32 * weight;
                    weight_sum += weight;
                }
            }

            let out = if weight_sum > 0.0 {
                (sum / weight_sum).round().clamp(0.0, 255.0) as u8
            } else {
                center
            };
            output.put_pixel(x, y, Luma([out]));
        }
    }

    output
}

/// Rotate so that lines with slope `skew_deg` become horizontal.
/// Bilinear sampling around the image center; uncovered corners become white.
pub fn straighten(img: &GrayImage, skew_deg: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let (sin_a, cos_a) = skew_deg.to_radians().sin_cos();
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let mut output = GrayImage::from_pixel(w, h, Luma([255]));

    for y in 0..h {
        for x in 0..w {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let sx = cx + dx * cos_a - dy * sin_a;
            let sy = cy + dx * sin_a + dy * cos_a;
            if let Some(v) = sample_bilinear(img, sx, sy) {
                output.put_pixel(x, y, Luma([v]));
            }
        }
    }

    output
}

fn sample_bilinear(img: &GrayImage, x: f32, y: f32) -> Option<u8> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let p = |px: u32, py: u32| img.get_pixel(px, py).0[0] as f32;

    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    Some((top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8)
}

/// Contrast-limited local histogram equalization.
///
/// The image is split into at most `grid` x `grid` tiles. Each tile gets its own
/// clipped-histogram lookup table; every pixel blends the tables of the four
/// nearest tile centers so tile borders do not show.
pub fn equalize_local(img: &GrayImage, grid: u32, clip_limit: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let tile_w = (w + grid - 1) / grid;
    let tile_h = (h + grid - 1) / grid;
    let tiles_x = (w + tile_w - 1) / tile_w;
    let tiles_y = (h + tile_h - 1) / tile_h;

    let mut luts: Vec<[u8; 256]> = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            luts.push(tile_lut(img, x0, y0, x1, y1, clip_limit));
        }
    }

    let lut_at = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];
    let mut output = GrayImage::new(w, h);

    for y in 0..h {
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = fy.floor().clamp(0.0, (tiles_y - 1) as f32) as u32;
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let ay = (fy - ty0 as f32).clamp(0.0, 1.0);

        for x in 0..w {
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = fx.floor().clamp(0.0, (tiles_x - 1) as f32) as u32;
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let ax = (fx - tx0 as f32).clamp(0.0, 1.0);

            let v = img.get_pixel(x, y).0[0] as usize;
            let top = lut_at(tx0, ty0)[v] as f32 * (1.0 - ax) + lut_at(tx1, ty0)[v] as f32 * ax;
            let bottom = lut_at(tx0, ty1)[v] as f32 * (1.0 - ax) + lut_at(tx1, ty1)[v] as f32 * ax;
            let out = (top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8;
            output.put_pixel(x, y, Luma([out]));
        }
    }

    output
}

fn tile_lut(img: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[img.get_pixel(x, y).0[0] as usize] += 1;
        }
    }
    let count: u32 = hist.iter().sum();

    // Clip and spread the excess evenly over all bins
    let limit = ((clip_limit * count as f32 / 256.0).max(1.0)) as u32;
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let bonus = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += bonus + u32::from(i < remainder);
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    let mut cdf_min = None;
    for (i, &bin) in hist.iter().enumerate() {
        cdf += bin;
        let min = *cdf_min.get_or_insert(cdf);
        lut[i] = if count > min {
            (((cdf - min) as f32 / (count - min) as f32) * 255.0).round() as u8
        } else {
            i as u8
        };
    }
    lut
}

/// Binary threshold against the local mean, using an integral image.
pub fn adaptive_threshold(img: &GrayImage, window: u32, offset: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let stride = (w + 1) as usize;
    let mut integral = vec![0u64; stride * (h + 1) as usize];

    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += img.get_pixel(x, y).0[0] as u64;
            let idx = (y + 1) as usize * stride + (x + 1) as usize;
            integral[idx] = integral[idx - stride] + row_sum;
        }
    }

    let half = window / 2;
    let mut output = GrayImage::new(w, h);
    for y in 0..h {
        let y0 = y.saturating_sub(half) as usize;
        let y1 = (y + half + 1).min(h) as usize;
        for x in 0..w {
            let x0 = x.saturating_sub(half) as usize;
            let x1 = (x + half + 1).min(w) as usize;
            let area = ((x1 - x0) * (y1 - y0)) as f32;
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let mean = sum as f32 / area;
            let value = img.get_pixel(x, y).0[0] as f32;
            let out = if value <= mean - offset { 0 } else { 255 };
            output.put_pixel(x, y, Luma([out]));
        }
    }

    output
}

/// 8-neighbourhood cleanup of a binary image.
pub fn despeckle(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut output = img.clone();
    let is_ink = |x: u32, y: u32| img.get_pixel(x, y).0[0] < INK_THRESHOLD;

    for y in 0..h {
        for x in 0..w {
            let mut ink_neighbours = 0;
            for ny in y.saturating_sub(1)..(y + 2).min(h) {
                for nx in x.saturating_sub(1)..(x + 2).min(w) {
                    if (nx, ny) != (x, y) && is_ink(nx, ny) {
                        ink_neighbours += 1;
                    }
                }
            }
            if is_ink(x, y) && ink_neighbours == 0 {
                output.put_pixel(x, y, Luma([255]));
            } else if !is_ink(x, y) && ink_neighbours == 8 {
                output.put_pixel(x, y, Luma([0]));
            }
        }
    }

    output
}

// ═══════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════

/// Validate image bytes before decoding.
pub fn validate_image_bytes(bytes: &[u8], max_bytes: usize) -> Result<(), ExtractionError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(ExtractionError::Preprocessing(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > max_bytes {
        return Err(ExtractionError::Preprocessing(format!(
            "Image data exceeds {}MB limit",
            max_bytes / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Shrink photos whose longest edge exceeds `max_dim`, preserving aspect ratio.
fn pre_downscale(img: DynamicImage, max_dim: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w.max(h) <= max_dim {
        return img;
    }
    debug!(from = format!("{w}x{h}"), max_dim, "Pre-downscaling oversized image");
    img.resize(max_dim, max_dim, FilterType::Triangle)
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ExtractionError> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::Image(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

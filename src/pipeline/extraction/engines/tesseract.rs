use std::io::Write as _;
use std::process::Command;

use crate::pipeline::extraction::preprocess::{ImageVariant, PreparedImage};
use crate::pipeline::extraction::types::{BoundingBox, OcrEngine, RawRecognition, RegionConfidence};
use crate::pipeline::extraction::ExtractionError;
use crate::pipeline_config::TesseractConfig;

pub const TESSERACT_ENGINE: &str = "tesseract";

/// Tesseract via its command-line binary, reading TSV output.
pub struct TesseractEngine {
    binary: String,
    language: String,
    psm: u8,
}

impl TesseractEngine {
    pub fn new(config: &TesseractConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            language: config.language.clone(),
            psm: config.psm,
        }
    }

    fn run(&self, image_path: &std::path::Path) -> Result<String, ExtractionError> {
        let output = Command::new(&self.binary)
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .args(["--psm", &self.psm.to_string()])
            .arg("tsv")
            .output();

        match output {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(ExtractionError::failed(TESSERACT_ENGINE, stderr.trim()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ExtractionError::unavailable(
                TESSERACT_ENGINE,
                format!("{} not found (install tesseract-ocr)", self.binary),
            )),
            Err(e) => Err(ExtractionError::Io(e)),
        }
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        TESSERACT_ENGINE
    }

    fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn recognize(&self, image: &PreparedImage) -> Result<RawRecognition, ExtractionError> {
        let tmpdir = tempfile::Builder::new().prefix("rxscan-tesseract").tempdir()?;
        let input_path = tmpdir.path().join("input.png");
        let mut input_file = std::fs::File::create(&input_path)?;
        input_file.write_all(image.png_bytes(ImageVariant::Processed))?;
        input_file.flush()?;

        let tsv = self.run(&input_path)?;
        Ok(parse_tsv(&tsv))
    }
}

/// Parse Tesseract TSV output into words and reassembled lines.
///
/// TSV columns: level page_num block_num par_num line_num word_num left top
/// width height conf text. Level 5 rows are words; confidence is 0-100 and
/// -1 when Tesseract cannot assign one (mapped to 0). Words sharing
/// (page, block, paragraph, line) are joined into one text line. The overall
/// confidence is the mean word confidence.
pub fn parse_tsv(tsv: &str) -> RawRecognition {
    let mut words = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut current_key: Option<[&str; 4]> = None;

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        if fields[0].parse::<i32>().ok() != Some(5) {
            continue;
        }
        let conf: f32 = match fields[10].trim().parse() {
            Ok(c) => c,
            Err(_) => continue,
        };
        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }

        let key = [fields[1], fields[2], fields[3], fields[4]];
        match lines.last_mut() {
            Some(text) if current_key == Some(key) => {
                text.push(' ');
                text.push_str(word);
            }
            _ => {
                lines.push(word.to_string());
                current_key = Some(key);
            }
        }

        words.push(RegionConfidence {
            text: word.to_string(),
            confidence: if conf < 0.0 { 0.0 } else { conf / 100.0 },
            bounding_box: parse_bounding_box(fields[6], fields[7], fields[8], fields[9]),
        });
    }

    let confidence = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
    };

    RawRecognition {
        text: lines.join("\n"),
        confidence,
        regions: words,
    }
}

/// Returns None if any field fails to parse.
fn parse_bounding_box(left: &str, top: &str, width: &str, height: &str) -> Option<BoundingBox> {
    Some(BoundingBox {
        x: left.parse().ok()?,
        y: top.parse().ok()?,
        width: width.parse().ok()?,
        height: height.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut out = HEADER.to_string();
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    #[test]
    fn words_grouped_into_lines() {
        let input = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t",
            "4\t1\t1\t1\t1\t0\t10\t10\t300\t30\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t10\t60\t30\t96\tTab",
            "5\t1\t1\t1\t1\t2\t80\t10\t150\t30\t88\tAmoxicillin",
            "5\t1\t1\t1\t2\t1\t10\t50\t80\t30\t72\t500mg",
            "5\t1\t1\t1\t2\t2\t100\t50\t40\t30\t64\tTDS",
        ]);
        let parsed = parse_tsv(&input);
        assert_eq!(parsed.text, "Tab Amoxicillin\n500mg TDS");
        assert_eq!(parsed.regions.len(), 4);
        assert!((parsed.confidence - 0.80).abs() < 1e-5);
    }

    #[test]
    fn negative_confidence_maps_to_zero() {
        let parsed = parse_tsv(&tsv(&["5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t-1\tRx"]));
        assert_eq!(parsed.regions[0].confidence, 0.0);
        assert_eq!(parsed.confidence, 0.0);
    }

    #[test]
    fn bounding_box_from_columns() {
        let parsed = parse_tsv(&tsv(&["5\t1\t1\t1\t1\t1\t12\t34\t56\t78\t90\tOD"]));
        assert_eq!(
            parsed.regions[0].bounding_box,
            Some(BoundingBox { x: 12, y: 34, width: 56, height: 78 })
        );
    }

    #[test]
    fn malformed_rows_skipped() {
        let parsed = parse_tsv(&tsv(&[
            "5\t1\t1",
            "5\t1\t1\t1\t1\t1\t0\t0\t10\t10\tabc\tbad",
            "5\t1\t1\t1\t1\t2\t0\t0\t10\t10\t91\t  ",
            "5\t1\t1\t1\t1\t3\t0\t0\t10\t10\t91\tgood",
        ]));
        assert_eq!(parsed.text, "good");
    }

    #[test]
    fn decimal_confidences_accepted() {
        let parsed = parse_tsv(&tsv(&["5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t95.5\tBD"]));
        assert!((parsed.confidence - 0.955).abs() < 1e-5);
    }

    #[test]
    fn empty_output_is_blank() {
        let parsed = parse_tsv(HEADER);
        assert!(parsed.text.is_empty());
        assert!(parsed.regions.is_empty());
        assert_eq!(parsed.confidence, 0.0);
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let engine = TesseractEngine::new(&TesseractConfig {
            binary: "/nonexistent/tesseract-binary".into(),
            ..TesseractConfig::default()
        });
        assert!(!engine.is_available());
        let image = PreparedImage::from_gray(image::GrayImage::new(4, 4)).unwrap();
        assert!(matches!(
            engine.recognize(&image),
            Err(ExtractionError::EngineUnavailable { .. })
        ));
        assert!(engine.extract(&image).is_none());
    }
}

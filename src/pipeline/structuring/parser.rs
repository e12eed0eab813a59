use serde::Deserialize;
use serde_json::Value;

use super::types::Medicine;
use super::StructuringError;

/// Confidence given to a medicine when the model omits one.
const DEFAULT_MEDICINE_CONFIDENCE: f32 = 0.75;

/// Parse the LLM's answer into medicines.
///
/// Accepts a fenced ```json block or, failing that, the first balanced
/// `{...}` object in the response. Entries that are not objects or have no
/// name are skipped.
pub fn parse_prescription_response(response: &str) -> Result<Vec<Medicine>, StructuringError> {
    let json_str = extract_json_object(response)?;

    #[derive(Deserialize)]
    struct RawResponse {
        #[serde(default, alias = "medications")]
        medicines: Option<Vec<Value>>,
    }

    let raw: RawResponse =
        serde_json::from_str(json_str).map_err(|e| StructuringError::JsonParsing(e.to_string()))?;

    Ok(raw
        .medicines
        .unwrap_or_default()
        .iter()
        .filter_map(medicine_from_value)
        .collect())
}

/// Locate the JSON object in a model response.
pub fn extract_json_object(response: &str) -> Result<&str, StructuringError> {
    if let Some(fence) = response.find("```json") {
        let start = fence + "```json".len();
        let end = response[start..]
            .find("```")
            .ok_or_else(|| StructuringError::MalformedResponse("Unclosed JSON block".into()))?;
        return Ok(response[start..start + end].trim());
    }

    first_balanced_object(response)
        .ok_or_else(|| StructuringError::MalformedResponse("No JSON object found".into()))
}

/// First `{...}` span with balanced braces, ignoring braces inside strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn medicine_from_value(value: &Value) -> Option<Medicine> {
    let obj = value.as_object()?;
    let name = text_field(obj.get("name"))?;

    Some(Medicine {
        name,
        dosage: text_field(obj.get("dosage").or_else(|| obj.get("dose"))),
        frequency: text_field(obj.get("frequency")),
        duration: text_field(obj.get("duration")),
        instructions: text_field(obj.get("instructions")),
        confidence: confidence_field(obj.get("confidence")),
    })
}

/// Strings are trimmed, numbers stringified, null/empty/"null" become None.
fn text_field(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(text)
    }
}

/// Numbers clamp to [0, 1] (percentages are scaled); words map to fixed levels.
fn confidence_field(value: Option<&Value>) -> f32 {
    let confidence = match value {
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v > 1.0 && v <= 100.0 => (v / 100.0) as f32,
            Some(v) => v as f32,
            None => DEFAULT_MEDICINE_CONFIDENCE,
        },
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "high" => 0.9,
            "medium" | "moderate" => 0.6,
            "low" => 0.3,
            _ => DEFAULT_MEDICINE_CONFIDENCE,
        },
        _ => DEFAULT_MEDICINE_CONFIDENCE,
    };
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        DEFAULT_MEDICINE_CONFIDENCE
    }
}

//! Regex-based medicine extraction used when the LLM is unavailable.
//!
//! Finds lines naming a known drug or carrying a number+unit dose, and picks
//! up frequency and duration from the same line or the line below. Every
//! medicine found this way gets a low confidence so it is reviewed by a human.

use std::sync::LazyLock;

use regex::Regex;

use super::types::Medicine;
use crate::pipeline::extraction::lexicon::{DOSAGE_PATTERN, DOSAGE_TERMS, DRUG_NAMES};

pub const HEURISTIC_CONFIDENCE: f32 = 0.3;

static FREQUENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:[0-2½]-[0-2½]-[0-2½]|once daily|twice daily|thrice daily|three times daily|daily|at night|od|bd|bid|tds|tid|qid|hs|sos|prn)\b",
    )
    .unwrap()
});

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bx|\bfor)\s*(\d+\s*(?:days?|weeks?|months?))\b").unwrap()
});

/// Words that precede a medicine name but are not one.
const FORM_WORDS: &[&str] = &["cap", "inj", "oint", "susp", "syp", "tab"];

pub fn heuristic_medicines(text: &str) -> Vec<Medicine> {
    let mut medicines: Vec<Medicine> = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let frequency = FREQUENCY.find(line).map(|m| m.as_str().to_string());
        let duration = DURATION.captures(line).map(|c| c[1].to_string());

        match medicine_name(line) {
            Some(name) => {
                if medicines.iter().any(|m| m.name.eq_ignore_ascii_case(&name)) {
                    continue;
                }
                medicines.push(Medicine {
                    name,
                    dosage: DOSAGE_PATTERN.find(line).map(|m| m.as_str().to_string()),
                    frequency,
                    duration,
                    instructions: None,
                    confidence: HEURISTIC_CONFIDENCE,
                });
            }
            // A line with no medicine may continue the previous one ("TDS x 5 days")
            None => {
                if let Some(last) = medicines.last_mut() {
                    if last.frequency.is_none() {
                        last.frequency = frequency;
                    }
                    if last.duration.is_none() {
                        last.duration = duration;
                    }
                }
            }
        }
    }

    medicines
}

/// A known drug on the line, else the word just before a dose.
fn medicine_name(line: &str) -> Option<String> {
    let words: Vec<&str> = line
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|w| !w.is_empty())
        .collect();

    if let Some(known) = words
        .iter()
        .find(|w| DRUG_NAMES.binary_search(&w.to_lowercase().as_str()).is_ok())
    {
        return Some(known.to_string());
    }

    let dose = DOSAGE_PATTERN.find(line)?;
    line[..dose.start()]
        .split(|c: char| !(c.is_alphabetic() || c == '-'))
        .filter(|w| w.chars().count() >= 3 && is_name_like(w))
        .last()
        .map(str::to_string)
}

fn is_name_like(word: &str) -> bool {
    let lower = word.to_lowercase();
    word.chars().next().is_some_and(char::is_alphabetic)
        && !FORM_WORDS.contains(&lower.as_str())
        && DOSAGE_TERMS.binary_search(&lower.as_str()).is_err()
}

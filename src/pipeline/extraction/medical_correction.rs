//! Post-OCR drug name correction.
//!
//! Fuzzy-matches words against the drug vocabulary to fix common OCR slips
//! (`rn` read as `m`, a dropped double letter). Only corrects when the match is
//! close and unique: edit distance 1 for words of 5-6 characters, 2 for longer
//! words, and never for words under 5 characters.

use serde::Serialize;

use super::lexicon::DRUG_NAMES;

const MIN_WORD_CHARS: usize = 5;

/// One replacement made by the corrector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermCorrection {
    pub original: String,
    pub corrected: String,
}

/// Apply drug name correction to extracted text.
pub fn correct_medical_terms(text: &str) -> (String, Vec<TermCorrection>) {
    let mut result = String::with_capacity(text.len());
    let mut corrections = Vec::new();
    let mut word_buf = String::new();

    let mut flush = |word_buf: &mut String, result: &mut String| {
        if word_buf.is_empty() {
            return;
        }
        match try_correct_word(word_buf) {
            Some(fixed) => {
                result.push_str(&fixed);
                corrections.push(TermCorrection {
                    original: std::mem::take(word_buf),
                    corrected: fixed,
                });
            }
            None => result.push_str(word_buf),
        }
        word_buf.clear();
    };

    for ch in text.chars() {
        if ch.is_alphanumeric() {
            word_buf.push(ch);
        } else {
            flush(&mut word_buf, &mut result);
            result.push(ch);
        }
    }
    flush(&mut word_buf, &mut result);

    (result, corrections)
}

/// Corrected spelling for `word`, or `None` when it should stay as written.
fn try_correct_word(word: &str) -> Option<String> {
    let len = word.chars().count();
    if len < MIN_WORD_CHARS || word.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let lower = word.to_lowercase();
    if DRUG_NAMES.binary_search(&lower.as_str()).is_ok() {
        return None;
    }

    let max_distance = if len <= 6 { 1 } else { 2 };
    let mut best_term: Option<&str> = None;
    let mut best_distance = max_distance + 1;
    let mut ambiguous = false;

    for &term in DRUG_NAMES {
        // Terms differing in length by more than the budget can't match
        if len.abs_diff(term.chars().count()) > max_distance as usize {
            continue;
        }

        let dist = edit_distance(&lower, term);
        if dist < best_distance {
            best_distance = dist;
            best_term = Some(term);
            ambiguous = false;
        } else if dist == best_distance && best_term.is_some() {
            ambiguous = true;
        }
    }

    match best_term {
        Some(term) if !ambiguous => Some(preserve_case(word, term)),
        _ => None,
    }
}

/// Keep the original word's capitalization pattern when applying a correction.
fn preserve_case(original: &str, correction: &str) -> String {
    if original.chars().all(|c| c.is_uppercase() || !c.is_alphabetic()) {
        return correction.to_uppercase();
    }

    let first_upper = original.chars().next().is_some_and(|c| c.is_uppercase());
    if first_upper {
        let mut chars = correction.chars();
        match chars.next() {
            Some(c) => {
                let mut s = c.to_uppercase().to_string();
                s.extend(chars);
                s
            }
            None => correction.to_string(),
        }
    } else {
        correction.to_string()
    }
}

/// Levenshtein distance with two rolling rows.
fn edit_distance(a: &str, b: &str) -> u32 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let n = b_chars.len();

    if a_chars.is_empty() {
        return n as u32;
    }
    if n == 0 {
        return a_chars.len() as u32;
    }

    let mut prev: Vec<u32> = (0..=n as u32).collect();
    let mut curr = vec![0u32; n + 1];

    for (i, &a_ch) in a_chars.iter().enumerate() {
        curr[0] = (i + 1) as u32;
        for (j, &b_ch) in b_chars.iter().enumerate() {
            let cost = u32::from(a_ch != b_ch);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

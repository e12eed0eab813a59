//! Prescription vocabulary shared by the scorer and the term corrector.
//!
//! All lists are lowercase and sorted so lookups can binary search.

use std::sync::LazyLock;

use regex::Regex;

/// Generic drug names commonly seen on handwritten prescriptions.
pub const DRUG_NAMES: &[&str] = &[
    "aceclofenac", "albendazole", "allopurinol", "alprazolam", "amlodipine",
    "amoxicillin", "atenolol", "atorvastatin", "azithromycin", "bisoprolol",
    "budesonide", "calcium", "carvedilol", "cefixime", "cefuroxime",
    "cetirizine", "chlorpheniramine", "ciprofloxacin", "citalopram", "clavulanate",
    "clopidogrel", "codeine", "dexamethasone", "diclofenac", "dicyclomine",
    "digoxin", "domperidone", "doxycycline", "enalapril", "escitalopram",
    "esomeprazole", "famotidine", "fluconazole", "fluoxetine", "folic",
    "furosemide", "gabapentin", "glimepiride", "hydrochlorothiazide", "ibuprofen",
    "insulin", "levocetirizine", "levofloxacin", "levothyroxine", "linezolid",
    "lisinopril", "loratadine", "losartan", "metformin", "methylprednisolone",
    "metoprolol", "metronidazole", "montelukast", "naproxen", "nitrofurantoin",
    "norfloxacin", "ofloxacin", "omeprazole", "ondansetron", "pantoprazole",
    "paracetamol", "prednisolone", "prednisone", "pregabalin", "promethazine",
    "rabeprazole", "ramipril", "ranitidine", "rosuvastatin", "salbutamol",
    "sertraline", "simvastatin", "telmisartan", "tramadol", "warfarin",
];

/// Dosage forms and prescription vocabulary.
pub const DOSAGE_TERMS: &[&str] = &[
    "cap", "capsule", "capsules", "cream", "drops", "gel", "inhaler", "injection",
    "mcg", "mg", "ml", "ointment", "rx", "sachet", "suspension", "syrup", "tab",
    "tablet", "tablets",
];

/// Frequency and timing vocabulary, including Latin abbreviations.
pub const FREQUENCY_TERMS: &[&str] = &[
    "after", "bd", "before", "bid", "daily", "days", "food", "hs", "meals",
    "morning", "night", "od", "once", "prn", "qid", "sos", "tds", "thrice",
    "tid", "twice", "weeks",
];

/// Number plus dose unit, e.g. `500mg` or `2.5 ml`.
pub(crate) static DOSAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d+(?:\.\d+)?\s*(?:mg|mcg|µg|g|ml|iu|units?)\b").unwrap()
});

/// True when the lowercase token is any known prescription term.
pub fn is_domain_term(token: &str) -> bool {
    DRUG_NAMES.binary_search(&token).is_ok()
        || DOSAGE_TERMS.binary_search(&token).is_ok()
        || FREQUENCY_TERMS.binary_search(&token).is_ok()
}

/// Count distinct prescription terms present in the text.
///
/// A dose written as number + unit (`500mg`, `2.5 ml`) counts once on top of
/// the vocabulary hits, since OCR often glues the unit to the number.
pub fn count_domain_terms(text: &str) -> usize {
    let lower = text.to_lowercase();
    let mut seen: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && is_domain_term(t))
        .collect();
    seen.sort_unstable();
    seen.dedup();

    let dose_bonus = usize::from(DOSAGE_PATTERN.is_match(text));
    seen.len() + dose_bonus
}

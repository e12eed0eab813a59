/// Clean raw engine output before scoring.
///
/// Drops control characters and OCR noise glyphs, keeps the punctuation that
/// appears on prescriptions (doses, ratios, units, the ℞ sign), collapses runs
/// of blanks inside a line and removes empty lines.
pub fn sanitize_ocr_text(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            let kept: String = line.chars().filter(|c| is_prescription_char(*c)).collect();
            kept.split_whitespace().collect::<Vec<_>>().join(" ")
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_prescription_char(c: char) -> bool {
    c.is_alphanumeric()
        || c == ' '
        || c == '\t'
        || matches!(
            c,
            '.' | ','
                | ';'
                | ':'
                | '-'
                | '/'
                | '('
                | ')'
                | '['
                | ']'
                | '+'
                | '='
                | '%'
                | '#'
                | '&'
                | '\''
                | '"'
                | '?'
                | '*'
                | '_'
                | '°'
                | 'µ'
                | '½'
                | '¼'
                | '℞'
                | '\u{2013}' // en-dash
                | '\u{2019}' // right single quotation mark
        )
}

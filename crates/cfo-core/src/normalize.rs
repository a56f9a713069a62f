//! Text normalization shared by keyword matching, merchant comparison and
//! excluded-keyword filtering.

/// Tokens that carry no merchant information on card statements
const NOISE_TOKENS: &[&str] = &[
    "pos", "compra", "consumo", "sq", "tst", "dlc", "www", "com", "pe", "inc", "llc",
];

/// Map common Latin accented letters to their base letter
fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// Lowercase, fold diacritics, turn punctuation into spaces and collapse runs
///
/// Apostrophes are removed rather than spaced so `McDonald's` stays one word.
pub fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars().flat_map(char::to_lowercase) {
        let c = fold_char(c);
        if c == '\'' || c == '’' {
            continue;
        }
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.ends_with(' ') {
            out.push(' ');
        }
    }
    out.trim().to_string()
}

/// Normalized text with noise tokens removed
pub fn normalize_description(input: &str) -> String {
    normalize_text(input)
        .split(' ')
        .filter(|token| !token.is_empty() && !NOISE_TOKENS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized text with all spaces removed
pub fn compact(normalized: &str) -> String {
    normalized.chars().filter(|c| *c != ' ').collect()
}

/// Merchant identity used for new-merchant detection
///
/// Drops digits (store numbers, references) so `UBER *TRIP 4821` and
/// `UBER TRIP 1177` compare equal.
pub fn merchant_key(merchant: &str) -> String {
    normalize_description(merchant)
        .split(' ')
        .filter(|token| !token.chars().all(|c| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ")
}

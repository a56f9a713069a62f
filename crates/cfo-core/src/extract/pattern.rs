//! Deterministic line-pattern parser
//!
//! Recognizes three statement layouts:
//!
//! - `DATE DESCRIPTION AMOUNT [BALANCE...]`
//! - `DATE AMOUNT DESCRIPTION`
//! - `DDMon DDMon DESCRIPTION OPERATION AMOUNT`, the card layout where the
//!   second date is the posting date and OPERATION is CONSUMO, PAGO or CARGO
//!
//! Lines that do not start with a date are ignored. Lines that start with a
//! date but carry no recognizable amount are reported as malformed.

use std::sync::OnceLock;

use regex::Regex;

use super::fields::DAY_MONTH_PATTERN;
use super::LineDraft;

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let date = format!(
            r"\d{{4}}-\d{{2}}-\d{{2}}|\d{{4}}/\d{{2}}/\d{{2}}|\d{{1,2}}[/.\-]\d{{1,2}}[/.\-]\d{{2,4}}|{}",
            DAY_MONTH_PATTERN
        );
        Regex::new(&format!(
            r"^\s*(?P<date>{date})\s+(?:(?P<posted>{date})\s+)?(?P<rest>\S.*?)\s*$",
            date = date
        ))
        .expect("valid regex")
    })
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<sym>US\$|MX\$|R\$|S/\.?|[$€£¥₹])?(?P<num>\(?-?(?:\d{1,3}(?:[,.]\d{3})+|\d+)(?P<dec>[.,]\d{1,2})?\)?)-?€?$",
        )
        .expect("valid regex")
    })
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:US\$|MX\$|R\$|S/\.?|[$€£¥₹]|USD|PEN|EUR|GBP|JPY|BRL|INR|MXN)$")
            .expect("valid regex")
    })
}

/// Card operation keywords in the two-date layout
const OPERATIONS: &[&str] = &["CONSUMO", "PAGO", "CARGO"];

fn is_operation(token: &str) -> bool {
    OPERATIONS.contains(&token.to_uppercase().as_str())
}

/// Two-letter country code such as the `PE` in `RAPPI LIMA PE`
fn is_country_suffix(token: &str) -> bool {
    token.len() == 2 && token.chars().all(|c| c.is_ascii_uppercase())
}

/// A contiguous run of tokens forming one amount
#[derive(Debug, Clone, Copy)]
struct AmountSpan {
    start: usize,
    end: usize,
    marked: bool,
}

fn amount_spans(tokens: &[&str]) -> Vec<AmountSpan> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let Some(caps) = number_regex().captures(tokens[i]) else {
            i += 1;
            continue;
        };

        let mut span = AmountSpan {
            start: i,
            end: i + 1,
            marked: caps.name("sym").is_some(),
        };
        if i > 0 && marker_regex().is_match(tokens[i - 1]) {
            span.start = i - 1;
            span.marked = true;
        }
        if let Some(next) = tokens.get(span.end) {
            if marker_regex().is_match(next) {
                // `12,50 €` and `35.00 MXN`
                span.marked = true;
                span.end += 1;
            } else if *next == "CR" || *next == "-" {
                span.end += 1;
            }
        }

        // Bare integers are store numbers or references, not amounts, unless
        // they follow a card operation keyword
        let after_operation = i > 0 && is_operation(tokens[i - 1]);
        if span.marked || caps.name("dec").is_some() || after_operation {
            // A marker token may already belong to the previous span
            if spans
                .last()
                .is_some_and(|prev: &AmountSpan| prev.end > span.start)
            {
                span.start = i;
            }
            spans.push(span);
        }
        i = span.end.max(i + 1);
    }
    spans
}

/// Split the text after the date(s) into description and amount
fn split_rest(rest: &str) -> Option<(String, String)> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let spans = amount_spans(&tokens);
    let first = *spans.first()?;

    // DATE AMOUNT DESCRIPTION
    if first.start == 0 && first.end < tokens.len() {
        let description = tokens[first.end..].join(" ");
        return Some((description, tokens[first.start..first.end].join(" ")));
    }

    // DATE DESCRIPTION AMOUNT, with any further numeric columns (balance) after it
    let trailing = spans.iter().enumerate().find(|(idx, span)| {
        span.start > 0
            && spans[*idx..]
                .windows(2)
                .all(|pair| pair[0].end == pair[1].start)
            && spans.last().is_some_and(|last| last.end == tokens.len())
    });
    let chosen = match trailing {
        Some((_, span)) => *span,
        None => *spans.iter().find(|s| s.marked && s.start > 0)?,
    };

    let mut description: Vec<&str> = tokens[..chosen.start].to_vec();
    if trailing.is_none() {
        description.extend_from_slice(&tokens[chosen.end..]);
    }
    Some((
        description.join(" "),
        tokens[chosen.start..chosen.end].join(" "),
    ))
}

/// Strip a trailing operation keyword and the country code before it,
/// reporting whether the operation marks a credit
///
/// The raw line keeps the country code for currency detection.
fn strip_operation(description: &str) -> (String, bool) {
    let mut tokens: Vec<&str> = description.split_whitespace().collect();
    match tokens.last().map(|t| t.to_uppercase()) {
        Some(op) if OPERATIONS.contains(&op.as_str()) => {
            tokens.pop();
            if tokens.len() > 1 && tokens.last().is_some_and(|t| is_country_suffix(t)) {
                tokens.pop();
            }
            (tokens.join(" "), op == "PAGO")
        }
        _ => (description.to_string(), false),
    }
}

/// Parse every dated line of `text`
///
/// Returns the drafts in document order and the number of dated lines that
/// had no usable amount.
pub fn parse_lines(text: &str) -> (Vec<LineDraft>, usize) {
    let mut drafts = Vec::new();
    let mut malformed = 0;

    for line in text.lines() {
        let Some(caps) = line_regex().captures(line) else {
            continue;
        };

        let date = caps
            .name("posted")
            .or_else(|| caps.name("date"))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let rest = &caps["rest"];

        let Some((description, amount)) = split_rest(rest) else {
            malformed += 1;
            continue;
        };
        let (description, credit) = strip_operation(&description);

        drafts.push(LineDraft {
            date: date.to_string(),
            description,
            amount,
            currency: None,
            raw_line: line.trim().to_string(),
            credit,
        });
    }

    (drafts, malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(line: &str) -> LineDraft {
        let (drafts, malformed) = parse_lines(line);
        assert_eq!(malformed, 0, "line should parse: {}", line);
        assert_eq!(drafts.len(), 1);
        drafts.into_iter().next().unwrap()
    }

    #[test]
    fn test_date_description_amount() {
        let draft = single("2025-06-01 Coffee Shop $4.50");
        assert_eq!(draft.date, "2025-06-01");
        assert_eq!(draft.description, "Coffee Shop");
        assert_eq!(draft.amount, "$4.50");
        assert!(!draft.credit);
    }

    #[test]
    fn test_date_amount_description() {
        let draft = single("01/06/2025 S/. 120.00 Supermercado");
        assert_eq!(draft.date, "01/06/2025");
        assert_eq!(draft.description, "Supermercado");
        assert_eq!(draft.amount, "S/. 120.00");
    }

    #[test]
    fn test_balance_column_ignored() {
        let draft = single("2025-06-03  Book Store 123  12.00  1,488.00");
        assert_eq!(draft.description, "Book Store 123");
        assert_eq!(draft.amount, "12.00");
    }

    #[test]
    fn test_two_date_card_layout() {
        let draft = single("14Abr 15Abr RAPPI LIMA PE CONSUMO 45.90");
        assert_eq!(draft.date, "15Abr");
        assert_eq!(draft.description, "RAPPI LIMA");
        assert_eq!(draft.amount, "45.90");
        assert!(!draft.credit);

        let payment = single("20Abr 20Abr PAGO BANCA MOVIL PAGO 500.00");
        assert_eq!(payment.description, "PAGO BANCA MOVIL");
        assert!(payment.credit);
    }

    #[test]
    fn test_card_layout_whole_amounts() {
        let draft = single("14Abr 15Abr NETFLIX.COM PE CONSUMO 45");
        assert_eq!(draft.description, "NETFLIX.COM");
        assert_eq!(draft.amount, "45");

        let grouped = single("14Abr 15Abr WONG SUPERMERCADO CONSUMO 1,250");
        assert_eq!(grouped.description, "WONG SUPERMERCADO");
        assert_eq!(grouped.amount, "1,250");
    }

    #[test]
    fn test_country_suffix_kept_in_raw_line() {
        let draft = single("14Abr 15Abr STARBUCKS LIMA PE CONSUMO 12.30");
        assert_eq!(draft.description, "STARBUCKS LIMA");
        assert!(draft.raw_line.contains("LIMA PE CONSUMO"));

        // A lone two-letter description is the merchant, not a suffix
        let short = single("14Abr 15Abr OK CONSUMO 3.00");
        assert_eq!(short.description, "OK");
    }

    #[test]
    fn test_symbol_after_amount() {
        let draft = single("2025-06-09 Bookshop 12,50 €");
        assert_eq!(draft.description, "Bookshop");
        assert_eq!(draft.amount, "12,50 €");

        let code = single("2025-06-09 Taqueria 35.00 MXN");
        assert_eq!(code.amount, "35.00 MXN");
    }

    #[test]
    fn test_trailing_credit_marker() {
        let draft = single("2025-06-04 Refund Amazon 30.00 CR");
        assert_eq!(draft.amount, "30.00 CR");
    }

    #[test]
    fn test_csv_flattened_row() {
        let draft = single("2025-06-01  Coffee Shop  4.50");
        assert_eq!(draft.description, "Coffee Shop");
        assert_eq!(draft.amount, "4.50");
    }

    #[test]
    fn test_undated_lines_ignored() {
        let text = "ESTADO DE CUENTA\nFecha Descripcion Monto\n2025-06-01 Coffee Shop $4.50\nGracias";
        let (drafts, malformed) = parse_lines(text);
        assert_eq!(drafts.len(), 1);
        assert_eq!(malformed, 0);
    }

    #[test]
    fn test_dated_line_without_amount_is_malformed() {
        let (drafts, malformed) = parse_lines("2025-06-01 Opening note without amount");
        assert!(drafts.is_empty());
        assert_eq!(malformed, 1);
    }

    #[test]
    fn test_store_number_is_not_amount() {
        let draft = single("2025-06-02 STARBUCKS 4821 LIMA 12.30");
        assert_eq!(draft.description, "STARBUCKS 4821 LIMA");
        assert_eq!(draft.amount, "12.30");
    }
}

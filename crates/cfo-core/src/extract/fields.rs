//! Date and amount parsing for statement lines

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

/// Month abbreviations seen on Spanish and English statements
const MONTHS: &[(&str, u32)] = &[
    ("ene", 1),
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("abr", 4),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("ago", 8),
    ("aug", 8),
    ("set", 9),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dic", 12),
    ("dec", 12),
];

/// Pattern fragment matching a `DDMon` token such as `14Abr`, `3 JUN` or `05-Sept`
pub(crate) const DAY_MONTH_PATTERN: &str = concat!(
    r"\d{1,2}[ \-]?(?i:ene(?:ro)?|jan(?:uary)?|feb(?:rero|ruary)?|mar(?:zo|ch)?|",
    r"abr(?:il)?|apr(?:il)?|may(?:o)?|jun(?:io|e)?|jul(?:io|y)?|ago(?:sto)?|aug(?:ust)?|",
    r"set(?:iembre)?|sep(?:tiembre|tember|t)?|oct(?:ubre|ober)?|nov(?:iembre|ember)?|",
    r"dic(?:iembre)?|dec(?:ember)?)(?:\.|\b)"
);

fn day_month_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<day>\d{1,2})[ \-]?(?P<month>[a-zA-Z]{3})[a-zA-Z]*\.?$")
            .expect("valid regex")
    })
}

fn month_number(abbrev: &str) -> Option<u32> {
    let abbrev = abbrev.to_lowercase();
    MONTHS
        .iter()
        .find(|(name, _)| *name == abbrev)
        .map(|(_, month)| *month)
}

/// Parse a statement date
///
/// `default_year` completes `DDMon` dates, which carry no year.
pub fn parse_date(input: &str, day_first: bool, default_year: i32) -> Option<NaiveDate> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    // Timestamps like 2025-06-03T00:00:00
    let s = match s.split_once('T') {
        Some((date, _)) if date.len() == 10 && date.as_bytes()[4] == b'-' => date,
        _ => s,
    };

    let numeric_formats: &[&str] = if day_first {
        &[
            "%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%m/%d/%Y", "%Y%m%d",
            "%d/%m/%y", "%d-%m-%y",
        ]
    } else {
        &[
            "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%m-%d-%Y", "%m.%d.%Y", "%d/%m/%Y", "%Y%m%d",
            "%m/%d/%y", "%m-%d-%y",
        ]
    };

    for format in numeric_formats {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }

    let caps = day_month_regex().captures(s)?;
    let day: u32 = caps["day"].parse().ok()?;
    let month = month_number(&caps["month"])?;
    NaiveDate::from_ymd_opt(default_year, month, day)
}

/// Parse a statement amount into a signed value
///
/// Accepts currency symbols and codes, thousands separators in either
/// convention, a leading `-`, parentheses, and a trailing `-` or `CR` for
/// credits.
pub fn parse_amount(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let first = trimmed.find(|c: char| c.is_ascii_digit())?;
    let last = trimmed.rfind(|c: char| c.is_ascii_digit())?;
    let number = &trimmed[first..=last];
    if !number
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == ',' || c == ' ')
    {
        return None;
    }

    let prefix = &trimmed[..first];
    let suffix = trimmed[last + 1..].trim().to_uppercase();
    let negative = prefix.contains('-')
        || suffix.starts_with('-')
        || suffix.ends_with("CR")
        || (prefix.contains('(') && suffix.contains(')'));

    let digits: String = number.chars().filter(|c| *c != ' ').collect();
    let value: f64 = normalize_separators(&digits).parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Rewrite a digit string so `.` is the only decimal separator
fn normalize_separators(digits: &str) -> String {
    let last_dot = digits.rfind('.');
    let last_comma = digits.rfind(',');

    match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            if comma > dot {
                // 1.234,56
                digits.replace('.', "").replace(',', ".")
            } else {
                // 1,234.56
                digits.replace(',', "")
            }
        }
        (None, Some(comma)) => {
            let decimals = digits.len() - comma - 1;
            if digits.matches(',').count() == 1 && decimals <= 2 {
                digits.replace(',', ".")
            } else {
                digits.replace(',', "")
            }
        }
        (Some(dot), None) => {
            let decimals = digits.len() - dot - 1;
            let dots = digits.matches('.').count();
            if decimals == 3 && (dots > 1 || &digits[..dot] != "0") {
                // 1.234 and 1.234.567 use dots for thousands
                digits.replace('.', "")
            } else if dots > 1 {
                let (int, frac) = digits.split_at(dot);
                format!("{}{}", int.replace('.', ""), frac)
            } else {
                digits.to_string()
            }
        }
        (None, None) => digits.to_string(),
    }
}

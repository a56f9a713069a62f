//! Currency detection from amount text and statement lines
//!
//! Markers are checked in a fixed priority order: ISO codes, multi-character
//! symbols, currency words, single-character symbols, a bare `$`, then a
//! country suffix in front of a card operation keyword. The amount text is
//! scanned before the surrounding line.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::PipelineConfig;

/// Marker patterns in priority order, each mapped to an ISO code
fn marker_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        let rules: &[(&str, &str)] = &[
            // Explicit ISO codes
            (r"\bUSD\b", "USD"),
            (r"\bPEN\b", "PEN"),
            (r"\bEUR\b", "EUR"),
            (r"\bGBP\b", "GBP"),
            (r"\bJPY\b", "JPY"),
            (r"\bBRL\b", "BRL"),
            (r"\bINR\b", "INR"),
            (r"\bMXN\b", "MXN"),
            // Multi-character symbols
            (r"US\$", "USD"),
            (r"MX\$", "MXN"),
            (r"R\$", "BRL"),
            (r"(?:^|[^A-Za-z])S/\.?", "PEN"),
            // Currency words
            (r"(?i)\b(?:nuevos\s+)?soles\b", "PEN"),
            (r"(?i)\b(?:d[oó]lares|dollars?)\b", "USD"),
            (r"(?i)\beuros?\b", "EUR"),
            (r"(?i)\breais\b", "BRL"),
            (r"(?i)\brupees?\b", "INR"),
            // Single-character symbols
            ("€", "EUR"),
            ("£", "GBP"),
            ("¥", "JPY"),
            ("₹", "INR"),
            // Bare dollar sign
            (r"\$", "USD"),
            // Country suffix before a card operation keyword
            (r"\bPE\s+(?:CONSUMO|PAGO|CARGO)\b", "PEN"),
            (r"\b(?:US|CA)\s+(?:CONSUMO|PAGO|CARGO)\b", "USD"),
        ];
        rules
            .iter()
            .map(|(pattern, code)| (Regex::new(pattern).expect("valid regex"), *code))
            .collect()
    })
}

/// Resolves a currency code for each candidate
#[derive(Debug, Clone)]
pub struct CurrencyDetector {
    base: String,
    supported: Vec<String>,
}

impl CurrencyDetector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            base: config.base_currency.clone(),
            supported: config.supported_currencies.clone(),
        }
    }

    fn is_supported(&self, code: &str) -> bool {
        self.supported.iter().any(|c| c.eq_ignore_ascii_case(code))
    }

    /// First supported currency marker in `text`
    pub fn scan(&self, text: &str) -> Option<&'static str> {
        marker_rules()
            .iter()
            .find(|(re, code)| self.is_supported(code) && re.is_match(text))
            .map(|(_, code)| *code)
    }

    /// Currency for a candidate
    ///
    /// Markers in the amount text win over markers elsewhere on the line. A
    /// code reported by the intelligence service is used only when no marker
    /// is found and it is a supported code.
    pub fn resolve(&self, amount_text: &str, line: &str, reported: Option<&str>) -> String {
        if let Some(code) = self.scan(amount_text).or_else(|| self.scan(line)) {
            return code.to_string();
        }

        match reported.map(|c| c.trim().to_uppercase()) {
            Some(code) if self.is_supported(&code) => code,
            _ => self.base.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> CurrencyDetector {
        CurrencyDetector::new(&PipelineConfig::default())
    }

    #[test]
    fn test_symbols() {
        let d = detector();
        assert_eq!(d.resolve("$4.50", "2025-06-01 Coffee Shop $4.50", None), "USD");
        assert_eq!(d.resolve("S/. 120.00", "01/06/2025 S/. 120.00 Supermercado", None), "PEN");
        assert_eq!(d.resolve("€12,00", "", None), "EUR");
        assert_eq!(d.resolve("R$ 50,00", "", None), "BRL");
    }

    #[test]
    fn test_multi_char_symbol_beats_dollar() {
        let d = detector();
        assert_eq!(d.resolve("US$ 9.99", "", None), "USD");
        assert_eq!(d.resolve("MX$ 100.00", "", None), "MXN");
    }

    #[test]
    fn test_iso_code_beats_symbol() {
        assert_eq!(detector().resolve("$ 35.00 MXN", "", None), "MXN");
    }

    #[test]
    fn test_words_and_country_suffix() {
        let d = detector();
        assert_eq!(d.resolve("120.00", "Pago en soles", None), "PEN");
        assert_eq!(d.resolve("45.90", "14Abr 15Abr RAPPI LIMA PE CONSUMO 45.90", None), "PEN");
        assert_eq!(d.resolve("20.00", "14Abr 15Abr OPENAI SAN FRANCISCO US CONSUMO 20.00", None), "USD");
    }

    #[test]
    fn test_reported_code_only_without_marker() {
        let d = detector();
        assert_eq!(d.resolve("10.00", "Tienda", Some("pen")), "PEN");
        assert_eq!(d.resolve("$10.00", "Tienda", Some("PEN")), "USD");
        assert_eq!(d.resolve("10.00", "Tienda", Some("XYZ")), "USD");
    }

    #[test]
    fn test_unsupported_marker_ignored() {
        let config = PipelineConfig {
            supported_currencies: vec!["USD".into(), "EUR".into()],
            ..Default::default()
        };
        let d = CurrencyDetector::new(&config);
        assert_eq!(d.resolve("S/. 120.00", "", None), "USD");
    }
}

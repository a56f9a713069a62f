//! Document text extraction
//!
//! Converts an uploaded statement into plain text lines. Only text-bearing
//! documents are supported; image-only PDFs are rejected.

use tracing::warn;

use crate::error::{Error, Result};
use crate::models::DocumentFormat;

/// Extract plain text from raw document bytes
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String> {
    let text = match format {
        DocumentFormat::Pdf => read_pdf(bytes)?,
        DocumentFormat::Text => decode_text(bytes),
        DocumentFormat::Csv => flatten_csv(bytes)?,
    };

    let text = normalize_whitespace(&text);
    if text.trim().is_empty() {
        return Err(Error::Document(match format {
            DocumentFormat::Pdf => "PDF has no text layer (scanned documents are not supported)".into(),
            _ => "Document is empty".into(),
        }));
    }

    Ok(text)
}

/// pdf-extract panics on some malformed files; treat that as a read failure
fn read_pdf(bytes: &[u8]) -> Result<String> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(Error::Document(format!("Failed to read PDF: {}", e))),
        Err(_) => Err(Error::Document("Failed to read PDF: malformed document".into())),
    }
}

fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(e) => {
            warn!(valid_up_to = e.valid_up_to(), "Statement is not valid UTF-8, decoding lossily");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// One line per record, cells separated by two spaces
fn flatten_csv(bytes: &[u8]) -> Result<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut lines = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::Document(format!("Invalid CSV: {}", e)))?;
        let line = record
            .iter()
            .filter(|cell| !cell.is_empty())
            .collect::<Vec<_>>()
            .join("  ");
        if !line.is_empty() {
            lines.push(line);
        }
    }

    Ok(lines.join("\n"))
}

/// Unify line endings and drop trailing spaces and form feeds
fn normalize_whitespace(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace(['\r', '\u{c}'], "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

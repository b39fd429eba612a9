//! PDF text extraction worker
//!
//! Invoked once per file by the sync pass as `dropsearch-pdf <path>`. Always
//! prints a single JSON envelope on stdout:
//!
//! ```json
//! {"success": true, "text": "..."}
//! {"success": false, "error": "..."}
//! ```
//!
//! Exits with status 1 only for usage errors; extraction failures are
//! reported inside the envelope.

use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;

#[derive(Debug, Serialize, PartialEq)]
struct Envelope {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Envelope {
    fn from_extraction(result: Result<String, String>) -> Self {
        match result {
            Ok(raw) => {
                let text = collapse_whitespace(&raw);
                if text.is_empty() {
                    Self::failure("No text content found")
                } else {
                    Self {
                        success: true,
                        text: Some(text),
                        error: None,
                    }
                }
            }
            Err(e) => Self::failure(e),
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            text: None,
            error: Some(error.into()),
        }
    }
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract(path: &Path) -> Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    // pdf-extract panics on some malformed documents
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes))
        .map_err(|_| "PDF parser crashed on this document".to_string())?
        .map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [path] = args.as_slice() else {
        eprintln!("Usage: dropsearch-pdf <path/to/file.pdf>");
        return ExitCode::from(1);
    };

    std::panic::set_hook(Box::new(|_| {}));
    let envelope = Envelope::from_extraction(extract(Path::new(path)));

    match serde_json::to_string(&envelope) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to encode result: {}", e);
            ExitCode::from(1)
        }
    }
}

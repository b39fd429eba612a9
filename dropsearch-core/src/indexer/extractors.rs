//! Text extractors for staged files
//!
//! Dispatch is by file extension. Plain-text formats are read directly,
//! DOCX is unpacked in-process, and PDFs go to an external worker process
//! that answers with a JSON envelope on stdout.

use crate::config::ExtractionConfig;
use crate::error::{DropsearchError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Largest decompressed `word/document.xml` accepted from a DOCX
pub const MAX_DOCX_XML_BYTES: u64 = 64 * 1024 * 1024;

/// Extensions read as UTF-8 text
const PLAIN_TEXT_EXTENSIONS: &[&str] = &["txt", "md", "csv", "json", "log", "html", "htm", "xml", "rtf"];

/// Converts a staged file into indexable text
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from `path`. An empty string means "no content".
    async fn extract(&self, path: &Path) -> Result<String>;
}

/// Format handled by the extractor for a given path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Docx,
    Pdf,
    Unsupported,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => DocumentFormat::Pdf,
            "docx" => DocumentFormat::Docx,
            e if PLAIN_TEXT_EXTENSIONS.contains(&e) => DocumentFormat::PlainText,
            _ => DocumentFormat::Unsupported,
        }
    }
}

/// Structured reply of the PDF worker
#[derive(Debug, Deserialize)]
struct PdfEnvelope {
    success: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Extension-dispatching extractor used by the sync pass.
///
/// Every format runs under the same deadline; the PDF worker is killed when
/// it is exceeded.
pub struct ContentExtractor {
    pdf: PdfProcess,
    timeout: Duration,
    docx_limit: u64,
}

impl ContentExtractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            pdf: PdfProcess {
                program: PathBuf::from(&config.pdf_command),
                args: config.pdf_args.clone(),
            },
            timeout: Duration::from_secs(config.timeout_secs),
            docx_limit: MAX_DOCX_XML_BYTES,
        }
    }

    async fn dispatch(&self, path: &Path, format: DocumentFormat) -> Result<String> {
        match format {
            DocumentFormat::PlainText => {
                let bytes = tokio::fs::read(path).await?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            DocumentFormat::Docx => {
                let path = path.to_path_buf();
                let limit = self.docx_limit;
                tokio::task::spawn_blocking(move || extract_docx(&path, limit))
                    .await
                    .map_err(|e| DropsearchError::Extraction(format!("DOCX task failed: {}", e)))?
            }
            DocumentFormat::Pdf => self.pdf.run(path).await,
            DocumentFormat::Unsupported => Ok(String::new()),
        }
    }
}

#[async_trait]
impl TextExtractor for ContentExtractor {
    async fn extract(&self, path: &Path) -> Result<String> {
        let format = DocumentFormat::from_path(path);
        debug!(path = %path.display(), ?format, "Extracting text");

        match tokio::time::timeout(self.timeout, self.dispatch(path, format)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    path = %path.display(),
                    ?format,
                    timeout_secs = self.timeout.as_secs(),
                    "Extraction timed out"
                );
                Err(DropsearchError::Extraction(format!(
                    "extraction timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

/// One invocation of the PDF worker per file
struct PdfProcess {
    program: PathBuf,
    args: Vec<String>,
}

impl PdfProcess {
    async fn run(&self, path: &Path) -> Result<String> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DropsearchError::Extraction(format!(
                    "failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        // Dropping this future on timeout kills the child.
        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DropsearchError::Extraction(format!(
                "PDF worker exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_envelope(&output.stdout)
    }
}

fn parse_envelope(stdout: &[u8]) -> Result<String> {
    let envelope: PdfEnvelope = serde_json::from_slice(stdout)
        .map_err(|e| DropsearchError::Parse(format!("malformed PDF worker output: {}", e)))?;

    if envelope.success {
        Ok(envelope.text.unwrap_or_default())
    } else {
        Err(DropsearchError::Extraction(
            envelope
                .error
                .unwrap_or_else(|| "unknown error in PDF extraction".into()),
        ))
    }
}

/// Pull paragraph text out of `word/document.xml`
/// Reads at most `limit` decompressed bytes of the document body
fn extract_docx(path: &Path, limit: u64) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| DropsearchError::Extraction(format!("not a DOCX archive: {}", e)))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| DropsearchError::Extraction(format!("DOCX has no document body: {}", e)))?;

    let mut xml = Vec::new();
    entry.take(limit.saturating_add(1)).read_to_end(&mut xml)?;
    if xml.len() as u64 > limit {
        return Err(DropsearchError::Extraction(format!(
            "DOCX document body exceeds {} bytes",
            limit
        )));
    }

    Ok(docx_xml_to_text(&String::from_utf8_lossy(&xml)))
}

fn docx_xml_to_text(xml: &str) -> String {
    static PARAGRAPH: OnceLock<Regex> = OnceLock::new();
    static RUN_TEXT: OnceLock<Regex> = OnceLock::new();
    let paragraph = PARAGRAPH.get_or_init(|| Regex::new(r"(?s)<w:p[ >].*?</w:p>").expect("valid regex"));
    let run_text = RUN_TEXT.get_or_init(|| Regex::new(r"(?s)<w:t(?: [^>]*)?>(.*?)</w:t>").expect("valid regex"));

    paragraph
        .find_iter(xml)
        .map(|p| {
            run_text
                .captures_iter(p.as_str())
                .filter_map(|c| c.get(1))
                .map(|m| unescape_xml(m.as_str()))
                .collect::<String>()
        })
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

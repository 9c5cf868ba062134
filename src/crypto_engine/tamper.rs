//! Best-effort PDF tamper heuristics.
//!
//! This is an advisory signal only. It looks for traces that editing tools
//! leave behind and says nothing about cryptographic integrity; use
//! integrity tokens for that.

use serde::{Deserialize, Serialize};

/// Producer strings of common PDF editors.
const EDITOR_SIGNATURES: &[&str] = &[
    "Adobe Acrobat",
    "PDFescape",
    "Sejda",
    "Smallpdf",
    "iLovePDF",
    "PDF-XChange",
    "Foxit PhantomPDF",
    "Nitro Pro",
    "PDFelement",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TamperIndicator {
    EditorSignature { producer: String },
    /// More than one `%%EOF` marker: the file was saved incrementally.
    IncrementalUpdates { revisions: usize },
    ModifiedAfterCreation { created: String, modified: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperAdvisory {
    pub is_pdf: bool,
    pub suspicious: bool,
    pub indicators: Vec<TamperIndicator>,
}

pub fn analyze_pdf(bytes: &[u8]) -> TamperAdvisory {
    if !bytes.starts_with(b"%PDF-") {
        return TamperAdvisory {
            is_pdf: false,
            suspicious: false,
            indicators: Vec::new(),
        };
    }

    let text = String::from_utf8_lossy(bytes);
    let mut indicators = Vec::new();

    for producer in EDITOR_SIGNATURES {
        if text.contains(producer) {
            indicators.push(TamperIndicator::EditorSignature {
                producer: producer.to_string(),
            });
        }
    }

    let revisions = text.matches("%%EOF").count();
    if revisions > 1 {
        indicators.push(TamperIndicator::IncrementalUpdates { revisions });
    }

    if let (Some(created), Some(modified)) = (date_entry(&text, "/CreationDate"), date_entry(&text, "/ModDate")) {
        if created != modified {
            indicators.push(TamperIndicator::ModifiedAfterCreation { created, modified });
        }
    }

    TamperAdvisory {
        is_pdf: true,
        suspicious: !indicators.is_empty(),
        indicators,
    }
}

/// Value of a `/Key (D:...)` info dictionary entry.
fn date_entry(text: &str, key: &str) -> Option<String> {
    let start = text.find(key)? + key.len();
    let rest = text[start..].trim_start();
    let rest = rest.strip_prefix('(')?;
    let end = rest.find(')')?;
    Some(rest[..end].to_string())
}

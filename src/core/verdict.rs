//! Verdict classification and the report handed back to callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The classification result for a scanned artifact.
///
/// The set is closed: the service only ever reports these four values, and
/// an unrecognized wire value is treated as a protocol error during frame
/// parsing, never mapped to a fallback variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// The service does not know the artifact; for file submissions an
    /// upload may follow.
    Unknown,
    /// No malicious content found.
    Clean,
    /// Malicious content found.
    Malicious,
    /// Potentially unwanted program found.
    Pup,
}

impl Verdict {
    /// Returns `true` if the verdict is `Clean`.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    /// Returns `true` if the verdict is `Malicious`.
    pub fn is_malicious(&self) -> bool {
        matches!(self, Self::Malicious)
    }

    /// Returns `true` if the verdict is `Pup`.
    pub fn is_pup(&self) -> bool {
        matches!(self, Self::Pup)
    }

    /// Returns `true` if the verdict is `Unknown`.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Clean => write!(f, "Clean"),
            Self::Malicious => write!(f, "Malicious"),
            Self::Pup => write!(f, "Pup"),
        }
    }
}

/// The result of a verdict request, as returned to callers.
///
/// Carries the verdict itself plus whatever analysis metadata the service
/// attached to the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictReport {
    /// SHA-256 of the analyzed content, as reported by the service.
    pub sha256: String,

    /// The verdict for the content.
    pub verdict: Verdict,

    /// Name of the detected malware or PUP, if any.
    pub detection: Option<String>,

    /// File type as classified by the service, if reported.
    pub file_type: Option<String>,

    /// MIME type as classified by the service, if reported.
    pub mime_type: Option<String>,
}

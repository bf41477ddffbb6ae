//! Fundamental types shared across the library: errors, verdicts, and
//! SHA-256 identities.

mod error;
mod sha256;
mod verdict;

pub use error::{VerdictError, VerdictResult};
pub use sha256::Sha256;
pub use verdict::{Verdict, VerdictReport};

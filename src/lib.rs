// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::should_implement_trait)]

//! # PDF Seal
//!
//! Tamper-evident digital signatures for PDF files.
//!
//! ## Core Features
//!
//! ### Signing
//! - **Incremental Updates**: The original bytes are never rewritten; each signature is a new revision
//! - **Byte-Range Placeholders**: `/Contents` is reserved up front and the range around it is digested
//! - **Detached CMS**: `adbe.pkcs7.detached` and `ETSI.CAdES.detached` envelopes, RSA or ECDSA P-256
//! - **Timestamps**: RFC 3161 tokens on signatures, or `ETSI.RFC3161` document timestamps
//! - **External Signers**: Hand out the digest and inject the signature later, with a deadline
//! - **Certification**: DocMDP permissions, enforced before any byte is written
//!
//! ### Verification
//! - **Per Signature**: Each signature gets its own result; one bad signature never hides another
//! - **Two Verdicts**: Cryptographic validity and document integrity are reported separately
//! - **Structured Errors**: Every failure carries an [`ErrorKind`] for programmatic handling
//!
//! ## Quick Start
//!
//! ```ignore
//! use pdf_seal::signatures::{LocalKeySigner, PdfSigner, SignOptions, SignatureVerifier};
//! use std::sync::Arc;
//!
//! # fn main() -> pdf_seal::Result<()> {
//! let identity = LocalKeySigner::from_pem(&std::fs::read("cert.pem")?, &std::fs::read("key.pem")?)?;
//! let signer = PdfSigner::new(Arc::new(identity), SignOptions::default().with_reason("Approved"));
//! let signed = signer.sign(&std::fs::read("contract.pdf")?)?;
//! std::fs::write("contract-signed.pdf", &signed.bytes)?;
//!
//! for result in SignatureVerifier::new().verify_bytes(&signed.bytes)? {
//!     println!("{} {:?}", result.signature_id, result.status());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Error handling
pub mod error;

// Core PDF parsing
pub mod document;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod xref;
pub mod xref_reconstruction;

// Incremental writing
pub mod writer;

// Signing and verification
pub mod signatures;

// Configuration
pub mod config;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::SealConfig;
pub use document::{PdfDocument, SignatureDictionary};
pub use error::{Error, ErrorKind, Result};
pub use signatures::{
    PdfSigner, SignOptions, SignatureSubFilter, SignatureVerifier, SignerIdentity, VerificationResult,
    VerificationStatus,
};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        // VERSION is populated from CARGO_PKG_VERSION at compile time
        assert!(VERSION.starts_with("0."));
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "pdf_seal");
    }
}

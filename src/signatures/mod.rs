//! PDF digital signatures.
//!
//! Signing appends one incremental revision holding a signature dictionary whose
//! `/ByteRange` covers the whole file except the `/Contents` placeholder, then writes a
//! detached CMS envelope into that placeholder. Verification reverses the process for
//! every signature dictionary found.
//!
//! ## Signature formats
//!
//! - PKCS#7 detached signatures (`adbe.pkcs7.detached`)
//! - PAdES signatures (`ETSI.CAdES.detached`)
//! - RFC 3161 document timestamps (`ETSI.RFC3161`)
//!
//! Any other `/SubFilter` is reported as unsupported.
//!
//! ## Example
//!
//! ```ignore
//! use pdf_seal::signatures::{LocalKeySigner, PdfSigner, SignOptions, SignatureVerifier};
//! use std::sync::Arc;
//!
//! let identity = LocalKeySigner::from_pem(&cert_pem, &key_pem)?;
//! let signer = PdfSigner::new(Arc::new(identity), SignOptions::default().with_reason("Approved"));
//! let signed = signer.sign(&std::fs::read("document.pdf")?)?;
//!
//! for result in SignatureVerifier::new().verify_bytes(&signed.bytes)? {
//!     println!("{}: {:?}", result.signature_id, result.status());
//! }
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - ISO 32000-2:2020 Section 12.8 - Digital Signatures
//! - ETSI EN 319 142 - PAdES

mod algorithm;
mod byterange;
mod cms;
mod permissions;
mod signer;
mod timestamp;
mod types;
mod verifier;
mod writer;

pub use algorithm::{oids, KeyAlgorithm, SignatureAlgorithm};
pub use byterange::{placeholder, placeholder_len, ByteRange, SignableContent, BYTE_RANGE_SLOT};
pub use cms::{estimate_signature_size, CmsEnvelope, CmsSignatureBuilder, TIMESTAMP_ALLOWANCE};
pub use permissions::{
    apply_certification, certification_level, check_signable, docmdp_reference, AccessLevel, MdpPermission,
};
pub use signer::{LocalKeySigner, PdfSigner, SignedDocument, SignerIdentity};
#[cfg(feature = "tsa")]
pub use timestamp::HttpTimestampAuthority;
pub use timestamp::{
    build_request, parse_response, GenTime, LocalTimestampAuthority, MessageImprint, TimestampAuthority,
    TimestampToken, TstInfo,
};
pub use types::{
    DigestAlgorithm, SignOptions, SignatureDescriptor, SignatureInfo, SignatureSubFilter, VerificationError,
    VerificationResult, VerificationStatus, FILTER_ADOBE_PPKLITE,
};
pub use verifier::{extract_signature_info, SignatureVerifier};
pub use writer::{
    pdf_date, IncrementalSigner, PreparedSignature, ReservedSignature, SigningContinuation, SigningState,
};

//! Error types for PDF signing and verification.
//!
//! [`Error`] covers both the structural failures of the PDF read/write layer and the
//! signature taxonomy (permission, placeholder sizing, envelope, integrity, timeouts).
//! [`ErrorKind`] is the comparable projection that verification results carry.

use serde::Serialize;
use std::time::Duration;

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while reading, signing or verifying a PDF.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-', found '{0}'")]
    InvalidHeader(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table")]
    InvalidXref,

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unsupported feature
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Circular reference detected in object graph
    #[error("Circular reference detected: object {0}")]
    CircularReference(crate::object::ObjectRef),

    /// The document's modification permissions forbid the requested signature
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The requested placeholder cannot hold the signature this signer will produce
    #[error("Placeholder too small: {reserved} bytes reserved, at least {required} required")]
    PlaceholderTooSmall {
        /// Minimum number of bytes the signature needs
        required: usize,
        /// Bytes reserved by the caller
        reserved: usize,
    },

    /// The final signature does not fit the reserved placeholder
    #[error("Signature size mismatch: signature is {actual} bytes, placeholder holds {reserved}")]
    SignatureSizeMismatch {
        /// Encoded signature length in bytes
        actual: usize,
        /// Reserved placeholder length in bytes
        reserved: usize,
    },

    /// Filter or sub-filter outside the supported signature formats
    #[error("Unsupported signature format: filter '{filter}', sub-filter '{sub_filter}'")]
    UnsupportedSignatureFormat {
        /// Declared /Filter
        filter: String,
        /// Declared /SubFilter
        sub_filter: String,
    },

    /// Digest or signature algorithm that cannot be resolved
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The CMS structure could not be decoded or is missing required parts
    #[error("Malformed signature envelope: {0}")]
    MalformedEnvelope(String),

    /// The signature value does not verify against the signer's public key
    #[error("Invalid cryptographic signature: {0}")]
    InvalidCryptographicSignature(String),

    /// The signed digest does not match the document bytes
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// An external signer did not return a signature in time
    #[error("External signing timed out after {0:?}")]
    ExternalSigningTimeout(Duration),

    /// The timestamp authority could not produce a token
    #[error("Timestamp unavailable: {0}")]
    TimestampUnavailable(String),

    /// The signer capability failed or was misconfigured
    #[error("Signer error: {0}")]
    Signer(String),

    /// DER encoding or decoding failure
    #[error("DER error: {0}")]
    Der(#[from] der::Error),
}

impl Error {
    /// Project this error onto its comparable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::PlaceholderTooSmall { .. } => ErrorKind::PlaceholderTooSmall,
            Error::SignatureSizeMismatch { .. } => ErrorKind::SignatureSizeMismatch,
            Error::UnsupportedSignatureFormat { .. } | Error::UnsupportedAlgorithm(_) => {
                ErrorKind::UnsupportedSignatureFormat
            },
            Error::MalformedEnvelope(_) | Error::Der(_) => ErrorKind::MalformedEnvelope,
            Error::InvalidCryptographicSignature(_) => ErrorKind::InvalidCryptographicSignature,
            Error::IntegrityViolation(_) => ErrorKind::IntegrityViolation,
            Error::ExternalSigningTimeout(_) => ErrorKind::ExternalSigningTimeout,
            Error::TimestampUnavailable(_) => ErrorKind::TimestampUnavailable,
            _ => ErrorKind::Document,
        }
    }
}

/// Comparable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Modification permissions forbid the operation
    PermissionDenied,
    /// Size hint below the signer's minimum
    PlaceholderTooSmall,
    /// Signature larger than its placeholder
    SignatureSizeMismatch,
    /// Unknown filter, sub-filter or algorithm
    UnsupportedSignatureFormat,
    /// Undecodable or incomplete CMS structure
    MalformedEnvelope,
    /// Signature value does not verify
    InvalidCryptographicSignature,
    /// Digest mismatch or bad byte range
    IntegrityViolation,
    /// External signer missed its deadline
    ExternalSigningTimeout,
    /// Timestamp could not be obtained or validated (warning level)
    TimestampUnavailable,
    /// Structural, I/O or signer failure
    Document,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error() {
        let err = Error::ParseError {
            offset: 1234,
            reason: "invalid token".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("1234"));
        assert!(msg.contains("invalid token"));
    }

    #[test]
    fn test_object_not_found_error() {
        let err = Error::ObjectNotFound(10, 0);
        assert!(err.to_string().contains("10 0 R"));
        assert_eq!(err.kind(), ErrorKind::Document);
    }

    #[test]
    fn test_size_errors_report_both_sizes() {
        let err = Error::SignatureSizeMismatch {
            actual: 4096,
            reserved: 2048,
        };
        let msg = err.to_string();
        assert!(msg.contains("4096"));
        assert!(msg.contains("2048"));
        assert_eq!(err.kind(), ErrorKind::SignatureSizeMismatch);
    }

    #[test]
    fn test_taxonomy_kinds() {
        assert_eq!(
            Error::UnsupportedSignatureFormat {
                filter: "Adobe.PPKLite".into(),
                sub_filter: "adbe.x509.rsa_sha1".into(),
            }
            .kind(),
            ErrorKind::UnsupportedSignatureFormat
        );
        assert_eq!(
            Error::ExternalSigningTimeout(Duration::from_secs(1)).kind(),
            ErrorKind::ExternalSigningTimeout
        );
        assert_eq!(Error::PermissionDenied("x".into()).kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}

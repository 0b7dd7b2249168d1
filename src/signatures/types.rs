//! Digital signature types and data structures.

use super::byterange::ByteRange;
use super::permissions::MdpPermission;
use crate::error::{Error, ErrorKind, Result};
use chrono::{DateTime, Utc};
use der::asn1::ObjectIdentifier;
use serde::Serialize;

/// The only signature handler this crate reads or writes.
pub const FILTER_ADOBE_PPKLITE: &str = "Adobe.PPKLite";

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum DigestAlgorithm {
    /// SHA-1 (legacy, verification of old documents)
    Sha1,
    /// SHA-256
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Object identifier of this algorithm.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => super::algorithm::oids::SHA1,
            DigestAlgorithm::Sha256 => super::algorithm::oids::SHA256,
            DigestAlgorithm::Sha384 => super::algorithm::oids::SHA384,
            DigestAlgorithm::Sha512 => super::algorithm::oids::SHA512,
        }
    }

    /// Look up an algorithm by object identifier.
    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        [
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ]
        .into_iter()
        .find(|alg| alg.oid() == *oid)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("digest algorithm {}", oid)))
    }

    /// Display name, e.g. `SHA-256`.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('-', "").as_str() {
            "SHA1" => Ok(DigestAlgorithm::Sha1),
            "SHA256" => Ok(DigestAlgorithm::Sha256),
            "SHA384" => Ok(DigestAlgorithm::Sha384),
            "SHA512" => Ok(DigestAlgorithm::Sha512),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Supported signature formats. Anything else is rejected during classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SignatureSubFilter {
    /// `ETSI.CAdES.detached`: PAdES baseline signature
    CadesDetached,
    /// `adbe.pkcs7.detached`: PKCS#7 detached signature
    #[default]
    Pkcs7Detached,
    /// `ETSI.RFC3161`: document timestamp, the contents are a timestamp token
    Rfc3161,
}

impl SignatureSubFilter {
    /// PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::Rfc3161 => "ETSI.RFC3161",
        }
    }

    /// Parse a PDF name into a sub-filter.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name.trim() {
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "ETSI.RFC3161" => Some(SignatureSubFilter::Rfc3161),
            _ => None,
        }
    }

    /// Accept the `Adobe.PPKLite` filter with one of the supported sub-filters.
    pub fn classify(filter: &str, sub_filter: &str) -> Result<Self> {
        let unsupported = || Error::UnsupportedSignatureFormat {
            filter: filter.to_string(),
            sub_filter: sub_filter.to_string(),
        };
        if !filter.trim().eq_ignore_ascii_case(FILTER_ADOBE_PPKLITE) {
            return Err(unsupported());
        }
        Self::from_pdf_name(sub_filter).ok_or_else(unsupported)
    }

    /// Whether the signature is a document timestamp (`/Type /DocTimeStamp`).
    pub fn is_document_timestamp(&self) -> bool {
        matches!(self, SignatureSubFilter::Rfc3161)
    }
}

impl std::str::FromStr for SignatureSubFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cades" | "pades" => Ok(SignatureSubFilter::CadesDetached),
            "pkcs7" => Ok(SignatureSubFilter::Pkcs7Detached),
            "rfc3161" | "timestamp" => Ok(SignatureSubFilter::Rfc3161),
            _ => Self::from_pdf_name(s).ok_or_else(|| Error::UnsupportedSignatureFormat {
                filter: FILTER_ADOBE_PPKLITE.to_string(),
                sub_filter: s.to_string(),
            }),
        }
    }
}

/// Options for signing a PDF.
#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Signature sub-filter (format)
    pub sub_filter: SignatureSubFilter,
    /// Reason for signing
    pub reason: Option<String>,
    /// Location where the document was signed
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Name of the signer (if different from certificate CN)
    pub name: Option<String>,
    /// Certify the document with this modification permission
    pub certification: Option<MdpPermission>,
    /// Timestamp server URL
    pub timestamp_url: Option<String>,
    /// Bytes reserved for the signature; [`SealConfig::placeholder_size`](crate::config::SealConfig) when absent
    pub estimated_size: Option<usize>,
    /// Signing time; the current time when absent
    pub signing_time: Option<DateTime<Utc>>,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            sub_filter: SignatureSubFilter::default(),
            reason: None,
            location: None,
            contact_info: None,
            name: None,
            certification: None,
            timestamp_url: None,
            estimated_size: None,
            signing_time: None,
        }
    }
}

impl SignOptions {
    /// Set the signature format.
    pub fn with_sub_filter(mut self, sub_filter: SignatureSubFilter) -> Self {
        self.sub_filter = sub_filter;
        self
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Set the signer name written to `/Name`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Make this a certification signature.
    pub fn with_certification(mut self, level: MdpPermission) -> Self {
        self.certification = Some(level);
        self
    }

    /// Enable timestamping with the specified TSA URL.
    pub fn with_timestamp(mut self, tsa_url: impl Into<String>) -> Self {
        self.timestamp_url = Some(tsa_url.into());
        self
    }

    /// Set the number of bytes reserved for the signature.
    pub fn with_estimated_size(mut self, bytes: usize) -> Self {
        self.estimated_size = Some(bytes);
        self
    }

    /// Fix the signing time instead of using the clock.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = Some(time);
        self
    }
}

/// Metadata of one signature while it is being produced.
///
/// Owned by the signing pipeline and dropped once the signature has been injected.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureDescriptor {
    /// `/Name`
    pub name: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// `/M`
    pub sign_time: DateTime<Utc>,
    /// `/Filter`
    pub filter: String,
    /// `/SubFilter`
    pub sub_filter: SignatureSubFilter,
    /// Certification level, set through the permission guard
    pub certification: Option<MdpPermission>,
    /// `/ByteRange`, known once the layout is fixed
    pub byte_range: Option<ByteRange>,
    /// Raw bytes reserved in `/Contents`
    pub placeholder_size: usize,
}

impl SignatureDescriptor {
    /// Descriptor for a new signature of the given format, timed now.
    pub fn new(sub_filter: SignatureSubFilter) -> Self {
        Self {
            name: None,
            location: None,
            reason: None,
            contact_info: None,
            sign_time: Utc::now(),
            filter: FILTER_ADOBE_PPKLITE.to_string(),
            sub_filter,
            certification: None,
            byte_range: None,
            placeholder_size: 0,
        }
    }

    /// Descriptor carrying the metadata from `options`.
    ///
    /// Certification is not copied; it has to go through
    /// [`apply_certification`](super::permissions::apply_certification).
    pub fn from_options(options: &SignOptions) -> Self {
        Self {
            name: options.name.clone(),
            location: options.location.clone(),
            reason: options.reason.clone(),
            contact_info: options.contact_info.clone(),
            sign_time: options.signing_time.unwrap_or_else(Utc::now),
            ..Self::new(options.sub_filter)
        }
    }
}

/// Information about an existing signature in a PDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignatureInfo {
    /// `/Name`
    pub signer_name: Option<String>,
    /// `/M` as written in the document
    pub signing_time: Option<String>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// Declared `/SubFilter`
    pub sub_filter: Option<String>,
    /// Whether the byte range reaches the end of the file
    pub covers_whole_document: bool,
    /// `/ByteRange` as found
    pub byte_range: Vec<i64>,
    /// Signer certificate subject common name
    pub certificate_cn: Option<String>,
    /// Signer certificate subject
    pub certificate_subject: Option<String>,
    /// Signer certificate issuer
    pub certificate_issuer: Option<String>,
    /// Signer certificate serial number, hex
    pub certificate_serial: Option<String>,
    /// Certificate validity start (RFC 3339)
    pub valid_from: Option<String>,
    /// Certificate validity end (RFC 3339)
    pub valid_to: Option<String>,
}

/// One problem found while verifying a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationError {
    /// Classification
    pub kind: ErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl From<&Error> for VerificationError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<Error> for VerificationError {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

/// Result of verifying one signature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    /// Position in document order, starting at 0
    pub index: usize,
    /// Object holding the signature dictionary, e.g. `12 0 R`
    pub signature_id: String,
    /// Classified format, when recognized
    pub sub_filter: Option<SignatureSubFilter>,
    /// Digest algorithm declared by the signer
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// Signature information
    pub signature_info: SignatureInfo,
    /// Signature value verifies against the signer certificate
    pub cryptographic_valid: bool,
    /// Signed digest matches the bytes covered by the byte range
    pub integrity_valid: bool,
    /// A timestamp token is attached (or the signature is one)
    pub timestamp_present: bool,
    /// Whether the attached timestamp verified, when present
    pub timestamp_valid: Option<bool>,
    /// Errors for this signature only
    pub errors: Vec<VerificationError>,
    /// Warning-level findings
    pub warnings: Vec<VerificationError>,
}

impl VerificationResult {
    /// Empty result for the signature at `index`.
    pub fn new(index: usize, signature_id: impl Into<String>) -> Self {
        Self {
            index,
            signature_id: signature_id.into(),
            sub_filter: None,
            digest_algorithm: None,
            signature_info: SignatureInfo::default(),
            cryptographic_valid: false,
            integrity_valid: false,
            timestamp_present: false,
            timestamp_valid: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Record an error.
    pub fn push_error(&mut self, err: impl Into<VerificationError>) {
        self.errors.push(err.into());
    }

    /// Record a warning.
    pub fn push_warning(&mut self, err: impl Into<VerificationError>) {
        self.warnings.push(err.into());
    }

    /// Whether an error of `kind` was recorded.
    pub fn has_error(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    /// Overall status.
    pub fn status(&self) -> VerificationStatus {
        if self.has_error(ErrorKind::UnsupportedSignatureFormat) {
            return VerificationStatus::Unknown;
        }
        if !(self.cryptographic_valid && self.integrity_valid) || !self.errors.is_empty() {
            return VerificationStatus::Invalid;
        }
        if !self.signature_info.covers_whole_document || !self.warnings.is_empty() {
            return VerificationStatus::ValidWithWarnings;
        }
        VerificationStatus::Valid
    }
}

/// Verification status of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerificationStatus {
    /// Signature is valid and covers the whole file
    Valid,
    /// Signature or integrity check failed
    Invalid,
    /// Format not supported, validity unknown
    Unknown,
    /// Valid, but later revisions exist or a warning was raised
    ValidWithWarnings,
}

impl VerificationStatus {
    /// Check if the status indicates a valid signature.
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationStatus::Valid)
    }

    /// Check if the status indicates any form of validity (including warnings).
    pub fn is_ok(&self) -> bool {
        matches!(self, VerificationStatus::Valid | VerificationStatus::ValidWithWarnings)
    }
}

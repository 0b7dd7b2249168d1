//! PDF signature verification.
//!
//! Every signature dictionary is checked on its own, in document order. A failure in one
//! signature is recorded in its [`VerificationResult`] and never stops the others.
//!
//! Two questions are answered separately for each signature:
//!
//! - cryptographic validity: does the signature value verify against the embedded signer
//!   certificate?
//! - integrity: does the digest the signer committed to match the bytes the byte range
//!   covers today?

use super::byterange::{ByteRange, SignableContent};
use super::cms::CmsEnvelope;
use super::timestamp::TimestampToken;
use super::types::{SignatureInfo, SignatureSubFilter, VerificationResult};
use crate::config::SealConfig;
use crate::document::{PdfDocument, SignatureDictionary};
use crate::error::{Error, Result};
use chrono::DateTime;
use der::Encode;
use x509_parser::prelude::*;

/// Verifier for PDF digital signatures.
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    config: SealConfig,
}

impl SignatureVerifier {
    /// Create a new signature verifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`, e.g. to verify in parallel.
    pub fn with_config(config: SealConfig) -> Self {
        Self { config }
    }

    /// Parse `pdf` and verify all of its signatures.
    pub fn verify_bytes(&self, pdf: &[u8]) -> Result<Vec<VerificationResult>> {
        let document = PdfDocument::from_bytes(pdf.to_vec())?;
        self.verify(&document)
    }

    /// Verify every signature in `document`.
    ///
    /// Fails only when the document structure cannot be read. Results are in document order.
    pub fn verify(&self, document: &PdfDocument) -> Result<Vec<VerificationResult>> {
        let signatures = document.signature_dictionaries()?;
        log::info!("verifying {} signatures", signatures.len());

        let results = if self.config.parallel_verification && signatures.len() > 1 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = signatures
                    .iter()
                    .enumerate()
                    .map(|(index, signature)| scope.spawn(move || self.verify_signature(document, index, signature)))
                    .collect();
                handles
                    .into_iter()
                    .zip(signatures.iter())
                    .enumerate()
                    .map(|(index, (handle, signature))| {
                        handle.join().unwrap_or_else(|_| {
                            let mut result = VerificationResult::new(index, signature.object_ref.to_string());
                            result.push_error(Error::MalformedEnvelope("verification thread panicked".to_string()));
                            result
                        })
                    })
                    .collect()
            })
        } else {
            signatures
                .iter()
                .enumerate()
                .map(|(index, signature)| self.verify_signature(document, index, signature))
                .collect::<Vec<_>>()
        };

        for result in &results {
            log::debug!(
                "signature {} ({}): {:?}",
                result.index,
                result.signature_id,
                result.status()
            );
        }
        Ok(results)
    }

    /// Verify one signature dictionary. Every problem ends up in the returned result.
    pub fn verify_signature(
        &self,
        document: &PdfDocument,
        index: usize,
        signature: &SignatureDictionary,
    ) -> VerificationResult {
        let mut result = VerificationResult::new(index, signature.object_ref.to_string());
        result.signature_info = extract_signature_info(signature);

        let content = match signed_content(document, signature) {
            Ok((range, content)) => {
                result.signature_info.covers_whole_document = range.covers_to_end(document.len());
                Some(content)
            },
            Err(e) => {
                result.push_error(e);
                None
            },
        };

        let sub_filter = match SignatureSubFilter::classify(signature.filter(), signature.sub_filter()) {
            Ok(sub_filter) => sub_filter,
            Err(e) => {
                log::warn!("signature {}: {}", result.signature_id, e);
                result.push_error(e);
                return result;
            },
        };
        result.sub_filter = Some(sub_filter);

        let envelope = match signature
            .contents()
            .ok_or_else(|| Error::MalformedEnvelope("/Contents is not a string".to_string()))
            .and_then(CmsEnvelope::from_der)
        {
            Ok(envelope) => envelope,
            Err(e) => {
                result.push_error(e);
                return result;
            },
        };

        if sub_filter.is_document_timestamp() {
            verify_document_timestamp(&mut result, envelope, content.as_ref());
        } else {
            verify_detached(&mut result, &envelope, content.as_ref());
        }
        result
    }
}

/// Locate and validate the byte range, returning the bytes it covers.
fn signed_content<'a>(
    document: &'a PdfDocument,
    signature: &SignatureDictionary,
) -> Result<(ByteRange, SignableContent<'a>)> {
    let raw = signature
        .dict
        .get("ByteRange")
        .ok_or_else(|| Error::IntegrityViolation("missing /ByteRange".to_string()))?;
    let range = ByteRange::from_object(raw)?;
    range.validate(document.len(), signature.contents_span.as_ref())?;
    let content = range.signable(document.data())?;
    Ok((range, content))
}

/// Dictionary metadata, available even when nothing else verifies.
pub fn extract_signature_info(signature: &SignatureDictionary) -> SignatureInfo {
    let sub_filter = signature.sub_filter();
    SignatureInfo {
        signer_name: signature.text("Name"),
        signing_time: signature.text("M"),
        reason: signature.text("Reason"),
        location: signature.text("Location"),
        contact_info: signature.text("ContactInfo"),
        sub_filter: (!sub_filter.is_empty()).then(|| sub_filter.to_string()),
        byte_range: signature
            .dict
            .get("ByteRange")
            .and_then(|r| r.as_array())
            .map(|items| items.iter().filter_map(|i| i.as_integer()).collect())
            .unwrap_or_default(),
        ..SignatureInfo::default()
    }
}

fn rfc3339(timestamp: i64) -> Option<String> {
    DateTime::from_timestamp(timestamp, 0).map(|t| t.to_rfc3339())
}

/// Fill the certificate fields of `info` from the signer certificate.
fn describe_signer(info: &mut SignatureInfo, envelope: &CmsEnvelope) -> Result<()> {
    let der = envelope.signer_certificate()?.to_der()?;
    let (_, cert) = parse_x509_certificate(&der)
        .map_err(|e| Error::MalformedEnvelope(format!("signer certificate: {}", e)))?;
    info.certificate_cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    info.certificate_subject = Some(cert.subject().to_string());
    info.certificate_issuer = Some(cert.issuer().to_string());
    info.certificate_serial = Some(cert.raw_serial_as_string());
    info.valid_from = rfc3339(cert.validity().not_before.timestamp());
    info.valid_to = rfc3339(cert.validity().not_after.timestamp());
    Ok(())
}

fn verify_detached(result: &mut VerificationResult, envelope: &CmsEnvelope, content: Option<&SignableContent<'_>>) {
    if let Err(e) = describe_signer(&mut result.signature_info, envelope) {
        result.push_warning(e);
    }
    if let Err(e) = envelope.signed_attributes_der() {
        result.push_error(e);
        return;
    }
    let digest_algorithm = match envelope.digest_algorithm() {
        Ok(alg) => alg,
        Err(e) => {
            result.push_error(e);
            return;
        },
    };
    result.digest_algorithm = Some(digest_algorithm);

    match envelope.verify_signature() {
        Ok(algorithm) => {
            log::debug!("{}: {:?} signature verified", result.signature_id, algorithm);
            result.cryptographic_valid = true;
        },
        Err(e) => result.push_error(e),
    }

    if let Some(content) = content {
        match envelope.message_digest() {
            Ok(claimed) if claimed == content.digest(digest_algorithm) => result.integrity_valid = true,
            Ok(_) => result.push_error(Error::IntegrityViolation(
                "document bytes do not match the signed digest".to_string(),
            )),
            Err(e) => result.push_error(e),
        }
    }

    if let Some(token) = envelope.timestamp_token() {
        result.timestamp_present = true;
        let checked = token.and_then(|token| {
            token.verify()?;
            if !token.covers(envelope.signature_value()?) {
                return Err(Error::InvalidCryptographicSignature(
                    "timestamp does not cover the signature value".to_string(),
                ));
            }
            Ok(())
        });
        result.timestamp_valid = Some(checked.is_ok());
        if let Err(e) = checked {
            result.push_warning(Error::TimestampUnavailable(format!("embedded timestamp rejected: {}", e)));
        }
    }
}

fn verify_document_timestamp(
    result: &mut VerificationResult,
    envelope: CmsEnvelope,
    content: Option<&SignableContent<'_>>,
) {
    result.timestamp_present = true;
    if let Err(e) = describe_signer(&mut result.signature_info, &envelope) {
        result.push_warning(e);
    }
    let token = match TimestampToken::from_envelope(envelope) {
        Ok(token) => token,
        Err(e) => {
            result.push_error(e);
            return;
        },
    };
    let imprint_algorithm = match token.imprint_algorithm() {
        Ok(alg) => alg,
        Err(e) => {
            result.push_error(e);
            return;
        },
    };
    result.digest_algorithm = Some(imprint_algorithm);

    match token.verify() {
        Ok(()) => result.cryptographic_valid = true,
        Err(e) => result.push_error(e),
    }
    result.timestamp_valid = Some(result.cryptographic_valid);

    if let Some(content) = content {
        if content.digest(imprint_algorithm) == token.imprint() {
            result.integrity_valid = true;
        } else {
            result.push_error(Error::IntegrityViolation(
                "document bytes do not match the timestamped imprint".to_string(),
            ));
        }
    }
}

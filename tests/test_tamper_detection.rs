//! Integration tests for tamper evidence.
//!
//! Tests cover:
//! - Changing signed bytes breaks integrity but not the signature value
//! - Undersized placeholders
//! - Repeatable verification
//! - Multiple signatures verified independently
//! - DocMDP certification blocking later signatures
//! - Unknown signature formats

mod common;

use common::*;
use pdf_seal::signatures::{
    DigestAlgorithm, IncrementalSigner, LocalKeySigner, MdpPermission, PdfSigner, SignOptions, SignatureDescriptor,
    SignatureVerifier,
};
use pdf_seal::{Error, ErrorKind, PdfDocument, SealConfig, SignatureSubFilter, VerificationStatus};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// Length of the outer DER element at the start of `bytes`.
fn der_length(bytes: &[u8]) -> usize {
    match bytes[1] {
        short if short < 0x80 => 2 + short as usize,
        long => {
            let count = (long & 0x7F) as usize;
            let len = bytes[2..2 + count].iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
            2 + count + len
        },
    }
}

fn signed_pdf() -> Vec<u8> {
    sign_rsa(&minimal_pdf(), DigestAlgorithm::Sha256, SignOptions::default())
}

mod modification_tests {
    use super::*;
    use std::sync::OnceLock;

    /// A signed document and the `/Contents` gap its byte range leaves out.
    fn signed_fixture() -> &'static (Vec<u8>, std::ops::Range<usize>) {
        static FIXTURE: OnceLock<(Vec<u8>, std::ops::Range<usize>)> = OnceLock::new();
        FIXTURE.get_or_init(|| {
            let signed = signed_pdf();
            let results = SignatureVerifier::new().verify_bytes(&signed).unwrap();
            let range = &results[0].signature_info.byte_range;
            let gap = range[1] as usize..range[2] as usize;
            (signed, gap)
        })
    }

    /// Replacement for `byte` that keeps the token class, so most edits still parse.
    fn altered(byte: u8) -> u8 {
        match byte {
            b' ' => b'\n',
            b'\n' | b'\r' | b'\t' => b' ',
            b'0'..=b'8' => byte + 1,
            b'9' => b'0',
            b if b.is_ascii_alphabetic() => b ^ 0x20,
            b => b ^ 0x01,
        }
    }

    fn verify_with_edit(offset: usize) -> Option<Vec<pdf_seal::VerificationResult>> {
        let mut tampered = signed_fixture().0.clone();
        tampered[offset] = altered(tampered[offset]);
        SignatureVerifier::new().verify_bytes(&tampered).ok()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_any_signed_byte_change_breaks_integrity(index in any::<prop::sample::Index>()) {
            let (signed, gap) = signed_fixture();
            let position = index.index(signed.len() - gap.len());
            let offset = if position < gap.start { position } else { position + gap.len() };

            if let Some(results) = verify_with_edit(offset) {
                for result in &results {
                    prop_assert!(!result.integrity_valid, "edit at {} kept integrity", offset);
                    prop_assert_ne!(result.status(), VerificationStatus::Valid);
                }
            }
        }

        #[test]
        fn test_changed_page_text_breaks_integrity_only(offset in 0usize..PAGE_TEXT.len()) {
            prop_assume!(PAGE_TEXT.as_bytes()[offset].is_ascii_alphabetic());
            let mut signed = signed_pdf();
            let start = find(&signed, PAGE_TEXT.as_bytes()).unwrap();
            signed[start + offset] ^= 0x20;

            let results = SignatureVerifier::new().verify_bytes(&signed).unwrap();
            prop_assert_eq!(results.len(), 1);
            prop_assert!(results[0].cryptographic_valid);
            prop_assert!(!results[0].integrity_valid);
            prop_assert!(results[0].has_error(ErrorKind::IntegrityViolation));
            prop_assert_eq!(results[0].status(), VerificationStatus::Invalid);
        }
    }

    #[test]
    fn test_bytes_bordering_contents_are_signed() {
        let (signed, gap) = signed_fixture();
        assert_eq!(signed[gap.start], b'<');
        assert_eq!(signed[gap.end - 1], b'>');

        for offset in [gap.start - 1, gap.end] {
            let results = verify_with_edit(offset).expect("edited document still parses");
            assert_eq!(results.len(), 1, "edit at {}", offset);
            assert!(results[0].cryptographic_valid, "edit at {}", offset);
            assert!(!results[0].integrity_valid, "edit at {}", offset);
            assert!(results[0].has_error(ErrorKind::IntegrityViolation));
        }
    }

    #[test]
    fn test_changed_trailer_breaks_integrity() {
        let (signed, _) = signed_fixture();
        let offset = signed.windows(9).rposition(|w| w == b"startxref").unwrap() - 2;
        if let Some(results) = verify_with_edit(offset) {
            assert!(results.iter().all(|r| !r.integrity_valid));
        }
        let last = signed.len() - 1;
        let results = verify_with_edit(last).expect("trailing newline edit still parses");
        assert!(!results[0].integrity_valid);
    }

    #[test]
    fn test_changed_signature_value_breaks_crypto_only() {
        let signed = signed_pdf();
        let document = PdfDocument::from_bytes(signed.clone()).unwrap();
        let sig = document.signature_dictionaries().unwrap().remove(0);
        let span = sig.contents_span.clone().unwrap();
        let der_len = der_length(sig.contents().unwrap());

        // Last byte of the DER is the tail of the signature value.
        let mut tampered = signed;
        let hex_pos = span.start + 1 + 2 * (der_len - 1);
        tampered[hex_pos] = if tampered[hex_pos] == b'0' { b'1' } else { b'0' };

        let results = SignatureVerifier::new().verify_bytes(&tampered).unwrap();
        assert!(!results[0].cryptographic_valid);
        assert!(results[0].integrity_valid);
        assert!(results[0].has_error(ErrorKind::InvalidCryptographicSignature));
    }

    #[test]
    fn test_changed_byte_range_is_rejected() {
        let signed = signed_pdf();
        let start = find(&signed, b"/ByteRange [0 ").unwrap() + b"/ByteRange [".len();
        let mut tampered = signed;
        tampered[start] = b'5';

        let results = SignatureVerifier::new().verify_bytes(&tampered).unwrap();
        assert!(!results[0].integrity_valid);
        assert!(results[0].has_error(ErrorKind::IntegrityViolation));
    }

    #[test]
    fn test_verification_is_repeatable() {
        let mut signed = signed_pdf();
        let start = find(&signed, PAGE_TEXT.as_bytes()).unwrap();
        signed[start] = b'X';
        let document = PdfDocument::from_bytes(signed).unwrap();
        let verifier = SignatureVerifier::new();
        let first = verifier.verify(&document).unwrap();
        let second = verifier.verify(&document).unwrap();
        assert_eq!(first, second);
    }
}

mod placeholder_tests {
    use super::*;

    #[test]
    fn test_signature_larger_than_placeholder() {
        let document = PdfDocument::from_bytes(minimal_pdf()).unwrap();
        let prepared = IncrementalSigner::new(&document)
            .unwrap()
            .reserve_placeholder(SignatureDescriptor::new(SignatureSubFilter::Pkcs7Detached), 32)
            .unwrap()
            .compute_byte_range()
            .unwrap();
        let err = prepared.finalize_local(&[0x30; 33]).unwrap_err();
        assert!(matches!(err, Error::SignatureSizeMismatch { actual: 33, reserved: 32 }));
        assert_eq!(err.kind(), ErrorKind::SignatureSizeMismatch);
    }

    #[test]
    fn test_estimate_above_reservation_is_refused() {
        let signer = PdfSigner::new(
            Arc::new(rsa_signer(DigestAlgorithm::Sha256)),
            SignOptions::default().with_estimated_size(256),
        );
        let err = signer.sign(&minimal_pdf()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PlaceholderTooSmall);
    }

    #[test]
    fn test_expired_external_reservation() {
        let document = PdfDocument::from_bytes(minimal_pdf()).unwrap();
        let signer = PdfSigner::new(Arc::new(ec_signer(DigestAlgorithm::Sha256)), SignOptions::default())
            .with_config(SealConfig::default().with_external_signing_timeout(Duration::ZERO));
        let continuation = signer.prepare_external(&document).unwrap();
        assert!(continuation.is_expired());
        let err = continuation.complete(&[0x30, 0x00]).unwrap_err();
        assert!(matches!(err, Error::ExternalSigningTimeout(_)));
    }
}

mod multiple_signature_tests {
    use super::*;

    #[test]
    fn test_second_signature_is_independent() {
        let once = signed_pdf();
        let twice = sign_rsa(&once, DigestAlgorithm::Sha512, SignOptions::default().with_reason("Counter-signed"));

        let results = SignatureVerifier::new().verify_bytes(&twice).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].index, 0);
        assert_eq!(results[1].index, 1);
        assert_ne!(results[0].signature_id, results[1].signature_id);
        for result in &results {
            assert!(result.cryptographic_valid, "{:?}", result.errors);
            assert!(result.integrity_valid);
        }
        assert!(!results[0].signature_info.covers_whole_document);
        assert_eq!(results[0].status(), VerificationStatus::ValidWithWarnings);
        assert_eq!(results[1].status(), VerificationStatus::Valid);
        assert_eq!(results[1].signature_info.reason.as_deref(), Some("Counter-signed"));
    }

    #[test]
    fn test_corrupt_first_signature_leaves_second_valid() {
        let mut objects = page_objects();
        objects.push((
            6,
            "<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /ETSI.CAdES.detached /ByteRange [0 10 20 5] /Contents <30820000DEAD> >>"
                .to_string(),
        ));
        let signed = sign_rsa(&build_pdf(&objects), DigestAlgorithm::Sha256, SignOptions::default());

        let results = SignatureVerifier::new().verify_bytes(&signed).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].has_error(ErrorKind::MalformedEnvelope));
        assert_eq!(results[0].status(), VerificationStatus::Invalid);
        assert_eq!(results[1].status(), VerificationStatus::Valid, "{:?}", results[1].errors);
    }

    #[test]
    fn test_tampering_after_second_signature_hits_both() {
        let twice = sign_rsa(&signed_pdf(), DigestAlgorithm::Sha256, SignOptions::default());
        let mut tampered = twice;
        let start = find(&tampered, PAGE_TEXT.as_bytes()).unwrap();
        tampered[start] = b'X';

        let results = SignatureVerifier::new().verify_bytes(&tampered).unwrap();
        assert!(results.iter().all(|r| r.cryptographic_valid && !r.integrity_valid));
    }
}

mod permission_tests {
    use super::*;

    #[test]
    fn test_no_changes_certification_blocks_signing() {
        let certified = sign_rsa(
            &minimal_pdf(),
            DigestAlgorithm::Sha256,
            SignOptions::default().with_certification(MdpPermission::NoChanges),
        );
        let results = SignatureVerifier::new().verify_bytes(&certified).unwrap();
        assert_eq!(results[0].status(), VerificationStatus::Valid);

        let signer = PdfSigner::new(Arc::new(ec_signer(DigestAlgorithm::Sha256)), SignOptions::default());
        let err = signer.sign(&certified).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let document = PdfDocument::from_bytes(certified).unwrap();
        assert!(matches!(IncrementalSigner::new(&document), Err(Error::PermissionDenied(_))));
        assert!(matches!(signer.prepare_external(&document), Err(Error::PermissionDenied(_))));
    }

    #[test]
    fn test_form_fill_certification_allows_signing() {
        let certified = sign_rsa(
            &minimal_pdf(),
            DigestAlgorithm::Sha256,
            SignOptions::default().with_certification(MdpPermission::FillForms),
        );
        let twice = sign_rsa(&certified, DigestAlgorithm::Sha256, SignOptions::default());
        let results = SignatureVerifier::new().verify_bytes(&twice).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_certification_must_come_first() {
        let signer = PdfSigner::new(
            Arc::new(rsa_signer(DigestAlgorithm::Sha256)),
            SignOptions::default().with_certification(MdpPermission::FillForms),
        );
        let err = signer.sign(&signed_pdf()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }
}

mod format_tests {
    use super::*;

    fn with_foreign_signature(sub_filter: &str) -> Vec<u8> {
        let mut objects = page_objects();
        objects.push((
            6,
            format!(
                "<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /{} /ByteRange [0 10 20 5] /Contents <3000> >>",
                sub_filter
            ),
        ));
        build_pdf(&objects)
    }

    #[test]
    fn test_unknown_sub_filter_reported_per_signature() {
        let pdf = with_foreign_signature("adbe.x509.rsa_sha1");
        let signed = sign_rsa(&pdf, DigestAlgorithm::Sha256, SignOptions::default());

        let results = SignatureVerifier::new().verify_bytes(&signed).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].has_error(ErrorKind::UnsupportedSignatureFormat));
        assert_eq!(results[0].status(), VerificationStatus::Unknown);
        assert_eq!(results[1].status(), VerificationStatus::Valid, "{:?}", results[1].errors);
    }

    #[test]
    fn test_sha1_pkcs7_sub_filter_is_unsupported() {
        let results = SignatureVerifier::new()
            .verify_bytes(&with_foreign_signature("adbe.pkcs7.sha1"))
            .unwrap();
        assert!(results[0].has_error(ErrorKind::UnsupportedSignatureFormat));
    }

    #[test]
    fn test_pem_identity_signs() {
        let cert_pem = pem_block("CERTIFICATE", RSA_CERT);
        let key_pem = pem_block("PRIVATE KEY", RSA_KEY);
        let identity = LocalKeySigner::from_pem(cert_pem.as_bytes(), key_pem.as_bytes()).unwrap();
        let signed = PdfSigner::new(Arc::new(identity), SignOptions::default())
            .sign(&minimal_pdf())
            .unwrap();
        let results = SignatureVerifier::new().verify_bytes(&signed.bytes).unwrap();
        assert!(results[0].status().is_valid());
    }

    fn pem_block(label: &'static str, der: &[u8]) -> String {
        use pkcs8::der::pem::{encode_string, LineEnding};
        encode_string(label, LineEnding::LF, der).unwrap()
    }
}

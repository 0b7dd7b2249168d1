//! Shared helpers for the integration tests.
#![allow(dead_code)]

use pdf_seal::signatures::{DigestAlgorithm, LocalKeySigner, PdfSigner, SignOptions};
use std::collections::BTreeMap;
use std::sync::Arc;
use x509_cert::der::Decode;
use x509_cert::Certificate;

pub const RSA_KEY: &[u8] = include_bytes!("../fixtures/rsa_key.der");
pub const RSA_CERT: &[u8] = include_bytes!("../fixtures/rsa_cert.der");
pub const EC_KEY: &[u8] = include_bytes!("../fixtures/ec_key.der");
pub const EC_CERT: &[u8] = include_bytes!("../fixtures/ec_cert.der");
pub const COMPRESSED_XREF_PDF: &[u8] = include_bytes!("../fixtures/compressed_xref.pdf");

/// Text drawn on the single page of [`minimal_pdf`].
pub const PAGE_TEXT: &str = "Certificate of Completion";

/// Assemble a PDF with a classic xref table from object bodies.
pub fn build_pdf(objects: &[(u32, String)]) -> Vec<u8> {
    let mut out = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = BTreeMap::new();
    for (id, body) in objects {
        offsets.insert(*id, out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", id, body).as_bytes());
    }
    let size = offsets.keys().max().map_or(1, |max| max + 1);
    let xref = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", size).as_bytes());
    for id in 1..size {
        match offsets.get(&id) {
            Some(offset) => out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes()),
            None => out.extend_from_slice(b"0000000000 65535 f \n"),
        }
    }
    out.extend_from_slice(format!("trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n", size, xref).as_bytes());
    out
}

/// Objects 1 to 5 of a one-page document.
pub fn page_objects() -> Vec<(u32, String)> {
    let content = format!("BT /F1 24 Tf 72 700 Td ({}) Tj ET", PAGE_TEXT);
    vec![
        (1, "<< /Type /Catalog /Pages 2 0 R >>".to_string()),
        (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string()),
        (
            3,
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>"
                .to_string(),
        ),
        (4, format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content)),
        (5, "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string()),
    ]
}

/// Unsigned one-page PDF.
pub fn minimal_pdf() -> Vec<u8> {
    build_pdf(&page_objects())
}

fn certificate(der: &[u8]) -> Certificate {
    Certificate::from_der(der).expect("fixture certificate")
}

pub fn rsa_signer(digest: DigestAlgorithm) -> LocalKeySigner {
    LocalKeySigner::from_pkcs8_der(RSA_KEY, vec![certificate(RSA_CERT)])
        .expect("fixture RSA key")
        .with_digest_algorithm(digest)
}

pub fn ec_signer(digest: DigestAlgorithm) -> LocalKeySigner {
    LocalKeySigner::from_pkcs8_der(EC_KEY, vec![certificate(EC_CERT)])
        .expect("fixture EC key")
        .with_digest_algorithm(digest)
}

/// Sign `pdf` with the RSA fixture and `options`, panicking on failure.
pub fn sign_rsa(pdf: &[u8], digest: DigestAlgorithm, options: SignOptions) -> Vec<u8> {
    PdfSigner::new(Arc::new(rsa_signer(digest)), options)
        .sign(pdf)
        .expect("signing failed")
        .bytes
}

/// Position of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

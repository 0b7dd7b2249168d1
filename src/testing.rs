//! Fixtures shared by unit tests.

use crate::signatures::{DigestAlgorithm, LocalKeySigner};
use der::Decode;
use std::collections::BTreeMap;

pub(crate) const RSA_KEY: &[u8] = include_bytes!("../tests/fixtures/rsa_key.der");
pub(crate) const RSA_CERT: &[u8] = include_bytes!("../tests/fixtures/rsa_cert.der");
pub(crate) const EC_KEY: &[u8] = include_bytes!("../tests/fixtures/ec_key.der");
pub(crate) const EC_CERT: &[u8] = include_bytes!("../tests/fixtures/ec_cert.der");

/// Assemble a PDF from object bodies, computing the xref offsets.
pub(crate) fn build_pdf(objects: &[(u32, String)], root: u32) -> Vec<u8> {
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
    out.extend_from_slice(
        format!("trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF\n", size, root, xref).as_bytes(),
    );
    out
}

/// Content stream object body with a correct `/Length`.
pub(crate) fn stream_body(content: &str) -> String {
    format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content)
}

/// One page with a content stream and a font: objects 1 to 5.
pub(crate) fn minimal_objects() -> Vec<(u32, String)> {
    vec![
        (1, "<< /Type /Catalog /Pages 2 0 R >>".to_string()),
        (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string()),
        (
            3,
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>"
                .to_string(),
        ),
        (4, stream_body("BT /F1 24 Tf 72 700 Td (Certificate of Completion) Tj ET")),
        (5, "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string()),
    ]
}

/// Single-page PDF 1.7 with a classic xref table.
pub(crate) fn minimal_pdf() -> Vec<u8> {
    build_pdf(&minimal_objects(), 1)
}

fn certificate(der: &[u8]) -> x509_cert::Certificate {
    x509_cert::Certificate::from_der(der).expect("fixture certificate")
}

/// RSA-2048 signer over the self-signed fixture certificate.
pub(crate) fn rsa_signer(digest: DigestAlgorithm) -> LocalKeySigner {
    LocalKeySigner::from_pkcs8_der(RSA_KEY, vec![certificate(RSA_CERT)])
        .expect("fixture RSA key")
        .with_digest_algorithm(digest)
}

/// P-256 signer over the self-signed fixture certificate.
pub(crate) fn ec_signer() -> LocalKeySigner {
    LocalKeySigner::from_pkcs8_der(EC_KEY, vec![certificate(EC_CERT)]).expect("fixture EC key")
}

//! Signing a PDF end to end.
//!
//! [`PdfSigner`] drives the incremental writer: it checks permissions, reserves the
//! placeholder, digests the byte range, builds the CMS envelope through a
//! [`SignerIdentity`] and injects the result. Private keys never leave the identity.

use super::algorithm::{pkcs1v15_scheme, KeyAlgorithm, SignatureAlgorithm};
use super::byterange::ByteRange;
use super::cms::{estimate_signature_size, CmsSignatureBuilder};
use super::permissions::{apply_certification, check_signable};
use super::timestamp::TimestampAuthority;
use super::types::{DigestAlgorithm, SignOptions, SignatureDescriptor};
use super::writer::{IncrementalSigner, SigningContinuation};
use crate::config::SealConfig;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use der::{Decode, Encode};
use pkcs1::DecodeRsaPrivateKey;
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use signature::hazmat::PrehashSigner;
use std::sync::Arc;
use x509_cert::Certificate;

/// Something that can produce signatures for a certificate.
///
/// Implementations may keep the key in memory, in a token or behind a remote service;
/// the signing pipeline only ever sees certificates and signature bytes.
pub trait SignerIdentity: Send + Sync {
    /// Certificates to embed, signer first.
    fn certificate_chain(&self) -> &[Certificate];

    /// Kind of key behind the identity.
    fn key_algorithm(&self) -> KeyAlgorithm;

    /// Digest algorithm the identity signs with.
    fn digest_algorithm(&self) -> DigestAlgorithm;

    /// Sign `message`. The identity hashes it with [`Self::digest_algorithm`].
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// The signer's own certificate.
    fn signing_certificate(&self) -> Result<&Certificate> {
        self.certificate_chain()
            .first()
            .ok_or_else(|| Error::Signer("empty certificate chain".to_string()))
    }
}

enum PrivateKey {
    Rsa(RsaPrivateKey),
    EcdsaP256(p256::ecdsa::SigningKey),
}

/// [`SignerIdentity`] holding an RSA or P-256 private key in memory.
pub struct LocalKeySigner {
    key: PrivateKey,
    chain: Vec<Certificate>,
    digest: DigestAlgorithm,
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("key", &self.key_algorithm())
            .field("private_key", &"[REDACTED]")
            .field("chain", &format!("{} certificates", self.chain.len()))
            .field("digest", &self.digest)
            .finish()
    }
}

impl LocalKeySigner {
    /// Load a PKCS#8 private key (RSA or P-256) for the leaf of `chain`.
    pub fn from_pkcs8_der(key: &[u8], chain: Vec<Certificate>) -> Result<Self> {
        let key = match RsaPrivateKey::from_pkcs8_der(key) {
            Ok(rsa) => PrivateKey::Rsa(rsa),
            Err(rsa_err) => match p256::ecdsa::SigningKey::from_pkcs8_der(key) {
                Ok(ec) => PrivateKey::EcdsaP256(ec),
                Err(ec_err) => {
                    return Err(Error::Signer(format!(
                        "unsupported PKCS#8 key (RSA: {}; P-256: {})",
                        rsa_err, ec_err
                    )))
                },
            },
        };
        Self::with_key(key, chain)
    }

    /// Load a PKCS#1 RSA private key for the leaf of `chain`.
    pub fn from_pkcs1_der(key: &[u8], chain: Vec<Certificate>) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs1_der(key).map_err(|e| Error::Signer(format!("PKCS#1 key: {}", e)))?;
        Self::with_key(PrivateKey::Rsa(key), chain)
    }

    /// Load certificates and a key from PEM text. Certificates keep their order.
    pub fn from_pem(certificates: &[u8], key: &[u8]) -> Result<Self> {
        let mut chain = Vec::new();
        for pem in x509_parser::pem::Pem::iter_from_buffer(certificates) {
            let pem = pem.map_err(|e| Error::Signer(format!("certificate PEM: {}", e)))?;
            if pem.label == "CERTIFICATE" {
                chain.push(Certificate::from_der(&pem.contents)?);
            }
        }
        for pem in x509_parser::pem::Pem::iter_from_buffer(key) {
            let pem = pem.map_err(|e| Error::Signer(format!("key PEM: {}", e)))?;
            match pem.label.as_str() {
                "PRIVATE KEY" => return Self::from_pkcs8_der(&pem.contents, chain),
                "RSA PRIVATE KEY" => return Self::from_pkcs1_der(&pem.contents, chain),
                other => log::debug!("skipping PEM block '{}'", other),
            }
        }
        Err(Error::Signer("no PRIVATE KEY or RSA PRIVATE KEY block found".to_string()))
    }

    fn with_key(key: PrivateKey, chain: Vec<Certificate>) -> Result<Self> {
        let leaf = chain
            .first()
            .ok_or_else(|| Error::Signer("empty certificate chain".to_string()))?;
        let spki = leaf.tbs_certificate.subject_public_key_info.to_der()?;
        let matches = match &key {
            PrivateKey::Rsa(rsa) => RsaPublicKey::from_public_key_der(&spki)
                .map(|public| public == rsa.to_public_key())
                .unwrap_or(false),
            PrivateKey::EcdsaP256(ec) => p256::ecdsa::VerifyingKey::from_public_key_der(&spki)
                .map(|public| &public == ec.verifying_key())
                .unwrap_or(false),
        };
        if !matches {
            return Err(Error::Signer("private key does not match the signing certificate".to_string()));
        }
        Ok(Self {
            key,
            chain,
            digest: DigestAlgorithm::Sha256,
        })
    }

    /// Sign with `digest` instead of SHA-256.
    pub fn with_digest_algorithm(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    /// Signature algorithm this signer produces.
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::for_key(self.key_algorithm(), self.digest)
    }
}

impl SignerIdentity for LocalKeySigner {
    fn certificate_chain(&self) -> &[Certificate] {
        &self.chain
    }

    fn key_algorithm(&self) -> KeyAlgorithm {
        match self.key {
            PrivateKey::Rsa(_) => KeyAlgorithm::Rsa,
            PrivateKey::EcdsaP256(_) => KeyAlgorithm::EcdsaP256,
        }
    }

    fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let hashed = self.digest.digest(message);
        match &self.key {
            PrivateKey::Rsa(key) => key
                .sign(pkcs1v15_scheme(self.digest), &hashed)
                .map_err(|e| Error::Signer(format!("RSA signing: {}", e))),
            PrivateKey::EcdsaP256(key) => {
                let signature: p256::ecdsa::Signature = key
                    .sign_prehash(&hashed)
                    .map_err(|e| Error::Signer(format!("ECDSA signing: {}", e)))?;
                Ok(signature.to_der().as_bytes().to_vec())
            },
        }
    }
}

/// Output of [`PdfSigner::sign`].
#[derive(Debug)]
pub struct SignedDocument {
    /// The original bytes followed by the signing revision
    pub bytes: Vec<u8>,
    /// Byte range covered by the new signature
    pub byte_range: ByteRange,
    /// Non-fatal problems, such as an unreachable timestamp authority
    pub warnings: Vec<Error>,
}

/// Signs PDF documents with one identity and one set of options.
pub struct PdfSigner {
    identity: Arc<dyn SignerIdentity>,
    options: SignOptions,
    config: SealConfig,
    timestamp_authority: Option<Arc<dyn TimestampAuthority>>,
}

impl std::fmt::Debug for PdfSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfSigner")
            .field("options", &self.options)
            .field("config", &self.config)
            .field("timestamp_authority", &self.timestamp_authority.is_some())
            .finish_non_exhaustive()
    }
}

impl PdfSigner {
    /// Create a signer for `identity` with the given options.
    pub fn new(identity: Arc<dyn SignerIdentity>, options: SignOptions) -> Self {
        Self {
            identity,
            options,
            config: SealConfig::default(),
            timestamp_authority: None,
        }
    }

    /// Use `config` for timeouts.
    pub fn with_config(mut self, config: SealConfig) -> Self {
        self.config = config;
        self
    }

    /// Timestamp through `authority` instead of the URL in the options.
    pub fn with_timestamp_authority(mut self, authority: Arc<dyn TimestampAuthority>) -> Self {
        self.timestamp_authority = Some(authority);
        self
    }

    /// Get the signing options.
    pub fn options(&self) -> &SignOptions {
        &self.options
    }

    /// Parse `pdf` and sign it.
    pub fn sign(&self, pdf: &[u8]) -> Result<SignedDocument> {
        let document = PdfDocument::from_bytes(pdf.to_vec())?;
        self.sign_document(&document)
    }

    /// Append a signature to `document`. The document itself is left untouched.
    pub fn sign_document(&self, document: &PdfDocument) -> Result<SignedDocument> {
        let mut warnings = Vec::new();
        let sub_filter = self.options.sub_filter;
        let digest_algorithm = self.identity.digest_algorithm();
        let descriptor = self.descriptor(document)?;

        let authority = match self.timestamp_authority() {
            Ok(authority) => authority,
            Err(e) => {
                log::warn!("continuing without timestamp: {}", e);
                warnings.push(e);
                None
            },
        };
        if sub_filter.is_document_timestamp() && authority.is_none() {
            return Err(Error::TimestampUnavailable(
                "a document timestamp needs a timestamp authority".to_string(),
            ));
        }

        let reserved = self.placeholder_size();
        let required = estimate_signature_size(self.identity.as_ref(), authority.is_some());
        if reserved < required {
            return Err(Error::PlaceholderTooSmall { required, reserved });
        }

        let prepared = IncrementalSigner::new(document)?
            .reserve_placeholder(descriptor, reserved)?
            .compute_byte_range()?;
        let digest = prepared.digest(digest_algorithm)?;
        let byte_range = prepared.byte_range();

        let signature = match (&authority, sub_filter.is_document_timestamp()) {
            (Some(authority), true) => authority.timestamp(digest_algorithm, &digest)?,
            _ => {
                let mut envelope = CmsSignatureBuilder::new(sub_filter)
                    .with_signing_time(prepared.descriptor().sign_time)
                    .build(digest_algorithm, &digest, self.identity.as_ref())?;
                if let Some(authority) = &authority {
                    if let Err(e) = CmsSignatureBuilder::attach_timestamp(&mut envelope, authority.as_ref()) {
                        log::warn!("continuing without timestamp: {}", e);
                        warnings.push(e);
                    }
                }
                envelope.to_der()?
            },
        };

        let bytes = prepared.finalize_local(&signature)?;
        log::info!(
            "signed document ({}, {}): {} -> {} bytes, {} warnings",
            sub_filter.as_pdf_name(),
            digest_algorithm.name(),
            document.len(),
            bytes.len(),
            warnings.len()
        );
        Ok(SignedDocument {
            bytes,
            byte_range,
            warnings,
        })
    }

    /// Reserve a signature in `document` for an external signer.
    ///
    /// The continuation expires after [`SealConfig::external_signing_timeout`].
    pub fn prepare_external(&self, document: &PdfDocument) -> Result<SigningContinuation> {
        let descriptor = self.descriptor(document)?;
        let prepared = IncrementalSigner::new(document)?
            .reserve_placeholder(descriptor, self.placeholder_size())?
            .compute_byte_range()?;
        Ok(prepared.finalize_external(self.config.external_signing_timeout))
    }

    /// Bytes reserved in `/Contents`: the options win over the config.
    pub fn placeholder_size(&self) -> usize {
        self.options.estimated_size.unwrap_or(self.config.placeholder_size)
    }

    fn descriptor(&self, document: &PdfDocument) -> Result<SignatureDescriptor> {
        check_signable(document)?;
        let mut descriptor = SignatureDescriptor::from_options(&self.options);
        if let Some(level) = self.options.certification {
            apply_certification(document, &mut descriptor, level)?;
        }
        Ok(descriptor)
    }

    /// The explicit authority, else an HTTP client for `timestamp_url`.
    fn timestamp_authority(&self) -> Result<Option<Arc<dyn TimestampAuthority>>> {
        if let Some(authority) = &self.timestamp_authority {
            return Ok(Some(Arc::clone(authority)));
        }
        let Some(url) = self.options.timestamp_url.as_ref() else {
            return Ok(None);
        };
        #[cfg(feature = "tsa")]
        {
            Ok(Some(Arc::new(super::timestamp::HttpTimestampAuthority::new(
                url.clone(),
                self.config.timestamp_timeout,
            ))))
        }
        #[cfg(not(feature = "tsa"))]
        {
            Err(Error::TimestampUnavailable(format!("{}: built without the tsa feature", url)))
        }
    }
}

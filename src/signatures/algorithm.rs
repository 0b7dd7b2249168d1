//! Digest computation and signature algorithm resolution.
//!
//! The mapping from (digest, key type) to a concrete signature algorithm is a pure
//! function so that signing and verification agree on it without shared state.

use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use der::asn1::{Null, ObjectIdentifier};
use der::{Any, Decode, Encode};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::hazmat::PrehashVerifier;
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

/// Object identifiers used by the signature layer.
pub mod oids {
    use der::asn1::ObjectIdentifier;

    /// id-sha1
    pub const SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
    /// id-sha256
    pub const SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
    /// id-sha384
    pub const SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
    /// id-sha512
    pub const SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

    /// rsaEncryption
    pub const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
    /// sha1WithRSAEncryption
    pub const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
    /// sha256WithRSAEncryption
    pub const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
    /// sha384WithRSAEncryption
    pub const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
    /// sha512WithRSAEncryption
    pub const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");

    /// id-ecPublicKey
    pub const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
    /// secp256r1
    pub const SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
    /// ecdsa-with-SHA1
    pub const ECDSA_WITH_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.1");
    /// ecdsa-with-SHA256
    pub const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
    /// ecdsa-with-SHA384
    pub const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
    /// ecdsa-with-SHA512
    pub const ECDSA_WITH_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");
}

fn hash_chunks<'a, D: Digest>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut hasher = D::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize().to_vec()
}

impl DigestAlgorithm {
    /// Digest of `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        self.digest_chunks([data])
    }

    /// Digest of the concatenation of `chunks`, without materializing it.
    pub fn digest_chunks<'a>(&self, chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => hash_chunks::<Sha1>(chunks),
            DigestAlgorithm::Sha256 => hash_chunks::<Sha256>(chunks),
            DigestAlgorithm::Sha384 => hash_chunks::<Sha384>(chunks),
            DigestAlgorithm::Sha512 => hash_chunks::<Sha512>(chunks),
        }
    }

    /// `AlgorithmIdentifier` with NULL parameters.
    pub fn algorithm_identifier(&self) -> Result<AlgorithmIdentifierOwned> {
        Ok(AlgorithmIdentifierOwned {
            oid: self.oid(),
            parameters: Some(Any::encode_from(&Null)?),
        })
    }
}

/// Public key types a signer can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KeyAlgorithm {
    /// RSA, any modulus size
    Rsa,
    /// ECDSA over NIST P-256
    EcdsaP256,
}

impl KeyAlgorithm {
    /// Key type declared by a certificate's public key info.
    pub fn from_spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        let oid = spki.algorithm.oid;
        if oid == oids::RSA_ENCRYPTION {
            return Ok(KeyAlgorithm::Rsa);
        }
        if oid == oids::EC_PUBLIC_KEY {
            let curve = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|p| p.to_der().ok())
                .and_then(|der| ObjectIdentifier::from_der(&der).ok());
            return match curve {
                Some(curve) if curve == oids::SECP256R1 => Ok(KeyAlgorithm::EcdsaP256),
                Some(curve) => Err(Error::UnsupportedAlgorithm(format!("elliptic curve {}", curve))),
                None => Err(Error::UnsupportedAlgorithm("EC key without named curve".to_string())),
            };
        }
        Err(Error::UnsupportedAlgorithm(format!("public key algorithm {}", oid)))
    }
}

/// Concrete signature algorithm: key scheme plus digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SignatureAlgorithm {
    /// RSASSA-PKCS1-v1_5
    RsaPkcs1v15(DigestAlgorithm),
    /// ECDSA on P-256, DER-encoded signature values
    EcdsaP256(DigestAlgorithm),
}

impl SignatureAlgorithm {
    /// Algorithm a key of type `key` uses with `digest`.
    pub fn for_key(key: KeyAlgorithm, digest: DigestAlgorithm) -> Self {
        match key {
            KeyAlgorithm::Rsa => SignatureAlgorithm::RsaPkcs1v15(digest),
            KeyAlgorithm::EcdsaP256 => SignatureAlgorithm::EcdsaP256(digest),
        }
    }

    /// Algorithm named by a SignerInfo, given its declared digest algorithm.
    ///
    /// Bare key OIDs (`rsaEncryption`, `id-ecPublicKey`) take the declared digest. Combined
    /// OIDs must agree with it.
    pub fn resolve(digest: DigestAlgorithm, signature_oid: &ObjectIdentifier) -> Result<Self> {
        const TABLE: [(ObjectIdentifier, KeyAlgorithm, Option<DigestAlgorithm>); 10] = [
            (oids::RSA_ENCRYPTION, KeyAlgorithm::Rsa, None),
            (oids::SHA1_WITH_RSA, KeyAlgorithm::Rsa, Some(DigestAlgorithm::Sha1)),
            (oids::SHA256_WITH_RSA, KeyAlgorithm::Rsa, Some(DigestAlgorithm::Sha256)),
            (oids::SHA384_WITH_RSA, KeyAlgorithm::Rsa, Some(DigestAlgorithm::Sha384)),
            (oids::SHA512_WITH_RSA, KeyAlgorithm::Rsa, Some(DigestAlgorithm::Sha512)),
            (oids::EC_PUBLIC_KEY, KeyAlgorithm::EcdsaP256, None),
            (oids::ECDSA_WITH_SHA1, KeyAlgorithm::EcdsaP256, Some(DigestAlgorithm::Sha1)),
            (oids::ECDSA_WITH_SHA256, KeyAlgorithm::EcdsaP256, Some(DigestAlgorithm::Sha256)),
            (oids::ECDSA_WITH_SHA384, KeyAlgorithm::EcdsaP256, Some(DigestAlgorithm::Sha384)),
            (oids::ECDSA_WITH_SHA512, KeyAlgorithm::EcdsaP256, Some(DigestAlgorithm::Sha512)),
        ];
        let (_, key, embedded) = TABLE
            .iter()
            .find(|(oid, _, _)| oid == signature_oid)
            .copied()
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("signature algorithm {}", signature_oid)))?;
        match embedded {
            Some(embedded) if embedded != digest => Err(Error::UnsupportedAlgorithm(format!(
                "signature algorithm {} does not match digest {}",
                signature_oid,
                digest.name()
            ))),
            _ => Ok(Self::for_key(key, digest)),
        }
    }

    /// Digest half of the algorithm.
    pub fn digest(&self) -> DigestAlgorithm {
        match self {
            SignatureAlgorithm::RsaPkcs1v15(d) | SignatureAlgorithm::EcdsaP256(d) => *d,
        }
    }

    /// Key half of the algorithm.
    pub fn key_algorithm(&self) -> KeyAlgorithm {
        match self {
            SignatureAlgorithm::RsaPkcs1v15(_) => KeyAlgorithm::Rsa,
            SignatureAlgorithm::EcdsaP256(_) => KeyAlgorithm::EcdsaP256,
        }
    }

    /// Combined OID, e.g. `sha256WithRSAEncryption`.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            SignatureAlgorithm::RsaPkcs1v15(d) => match d {
                DigestAlgorithm::Sha1 => oids::SHA1_WITH_RSA,
                DigestAlgorithm::Sha256 => oids::SHA256_WITH_RSA,
                DigestAlgorithm::Sha384 => oids::SHA384_WITH_RSA,
                DigestAlgorithm::Sha512 => oids::SHA512_WITH_RSA,
            },
            SignatureAlgorithm::EcdsaP256(d) => match d {
                DigestAlgorithm::Sha1 => oids::ECDSA_WITH_SHA1,
                DigestAlgorithm::Sha256 => oids::ECDSA_WITH_SHA256,
                DigestAlgorithm::Sha384 => oids::ECDSA_WITH_SHA384,
                DigestAlgorithm::Sha512 => oids::ECDSA_WITH_SHA512,
            },
        }
    }

    /// `AlgorithmIdentifier` for a SignerInfo: `rsaEncryption` with NULL parameters for RSA,
    /// the combined `ecdsa-with-SHAx` OID without parameters for ECDSA.
    pub fn algorithm_identifier(&self) -> Result<AlgorithmIdentifierOwned> {
        Ok(match self {
            SignatureAlgorithm::RsaPkcs1v15(_) => AlgorithmIdentifierOwned {
                oid: oids::RSA_ENCRYPTION,
                parameters: Some(Any::encode_from(&Null)?),
            },
            SignatureAlgorithm::EcdsaP256(_) => AlgorithmIdentifierOwned {
                oid: self.oid(),
                parameters: None,
            },
        })
    }

    /// Check `signature` over `message` against the public key in `spki`.
    pub fn verify(&self, spki: &SubjectPublicKeyInfoOwned, message: &[u8], signature: &[u8]) -> Result<()> {
        let key_algorithm = KeyAlgorithm::from_spki(spki)?;
        if key_algorithm != self.key_algorithm() {
            return Err(Error::InvalidCryptographicSignature(format!(
                "certificate holds a {:?} key, signature uses {:?}",
                key_algorithm,
                self.key_algorithm()
            )));
        }
        let spki_der = spki.to_der()?;
        let hashed = self.digest().digest(message);
        match self {
            SignatureAlgorithm::RsaPkcs1v15(digest) => {
                let key = RsaPublicKey::from_public_key_der(&spki_der)
                    .map_err(|e| Error::MalformedEnvelope(format!("RSA public key: {}", e)))?;
                key.verify(pkcs1v15_scheme(*digest), &hashed, signature)
                    .map_err(|e| Error::InvalidCryptographicSignature(e.to_string()))
            },
            SignatureAlgorithm::EcdsaP256(_) => {
                let key = p256::ecdsa::VerifyingKey::from_public_key_der(&spki_der)
                    .map_err(|e| Error::MalformedEnvelope(format!("P-256 public key: {}", e)))?;
                let sig = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|e| Error::InvalidCryptographicSignature(format!("ECDSA signature encoding: {}", e)))?;
                key.verify_prehash(&hashed, &sig)
                    .map_err(|e| Error::InvalidCryptographicSignature(e.to_string()))
            },
        }
    }
}

/// PKCS#1 v1.5 padding scheme with the DigestInfo prefix for `digest`.
pub(crate) fn pkcs1v15_scheme(digest: DigestAlgorithm) -> Pkcs1v15Sign {
    match digest {
        DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
        DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_lengths() {
        for alg in [
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            assert_eq!(alg.digest(b"abc").len(), alg.output_len());
        }
    }

    #[test]
    fn test_chunked_digest_matches_contiguous() {
        let alg = DigestAlgorithm::Sha384;
        assert_eq!(alg.digest_chunks([&b"hello "[..], &b"world"[..]]), alg.digest(b"hello world"));
    }

    #[test]
    fn test_sha256_known_vector() {
        let digest = DigestAlgorithm::Sha256.digest(b"abc");
        assert_eq!(
            crate::writer::hex_upper(&digest),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
    }

    #[test]
    fn test_mapping_is_total_over_digest_and_key() {
        for key in [KeyAlgorithm::Rsa, KeyAlgorithm::EcdsaP256] {
            for digest in [DigestAlgorithm::Sha256, DigestAlgorithm::Sha384, DigestAlgorithm::Sha512] {
                let alg = SignatureAlgorithm::for_key(key, digest);
                assert_eq!(alg.digest(), digest);
                assert_eq!(alg.key_algorithm(), key);
                assert_eq!(SignatureAlgorithm::resolve(digest, &alg.oid()).unwrap(), alg);
            }
        }
    }

    #[test]
    fn test_resolve_bare_key_oids() {
        assert_eq!(
            SignatureAlgorithm::resolve(DigestAlgorithm::Sha512, &oids::RSA_ENCRYPTION).unwrap(),
            SignatureAlgorithm::RsaPkcs1v15(DigestAlgorithm::Sha512)
        );
        assert_eq!(
            SignatureAlgorithm::resolve(DigestAlgorithm::Sha384, &oids::EC_PUBLIC_KEY).unwrap(),
            SignatureAlgorithm::EcdsaP256(DigestAlgorithm::Sha384)
        );
    }

    #[test]
    fn test_resolve_rejects_mismatch_and_unknown() {
        assert!(matches!(
            SignatureAlgorithm::resolve(DigestAlgorithm::Sha256, &oids::SHA512_WITH_RSA),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        let ed25519 = ObjectIdentifier::new_unwrap("1.3.101.112");
        assert!(matches!(
            SignatureAlgorithm::resolve(DigestAlgorithm::Sha256, &ed25519),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_key_algorithm_from_certificates() {
        let rsa = x509_cert::Certificate::from_der(include_bytes!("../../tests/fixtures/rsa_cert.der")).unwrap();
        let ec = x509_cert::Certificate::from_der(include_bytes!("../../tests/fixtures/ec_cert.der")).unwrap();
        assert_eq!(
            KeyAlgorithm::from_spki(&rsa.tbs_certificate.subject_public_key_info).unwrap(),
            KeyAlgorithm::Rsa
        );
        assert_eq!(
            KeyAlgorithm::from_spki(&ec.tbs_certificate.subject_public_key_info).unwrap(),
            KeyAlgorithm::EcdsaP256
        );
    }
}

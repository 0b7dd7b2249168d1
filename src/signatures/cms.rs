//! Detached CMS (PKCS#7) signatures.
//!
//! [`CmsSignatureBuilder`] produces the `SignedData` envelope embedded in `/Contents`;
//! [`CmsEnvelope`] is the parsed form the verifier works on. Encoding and decoding are
//! delegated to the `cms` and `der` crates.

use super::algorithm::SignatureAlgorithm;
use super::signer::SignerIdentity;
use super::timestamp::{TimestampAuthority, TimestampToken};
use super::types::{DigestAlgorithm, SignatureSubFilter};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::asn1::{GeneralizedTime, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Any, Decode, DecodeOwned, Encode, Sequence, SliceReader};
use x509_cert::attr::Attribute;
use x509_cert::time::Time;
use x509_cert::Certificate;

/// id-data
pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
/// id-signedData
pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
/// id-contentType
pub const ID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
/// id-messageDigest
pub const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
/// id-signingTime
pub const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
/// id-aa-timeStampToken
pub const ID_AA_TIMESTAMP_TOKEN: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");
/// id-aa-signingCertificateV2
pub const ID_AA_SIGNING_CERTIFICATE_V2: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.47");
/// id-ct-TSTInfo
pub const ID_CT_TST_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");
/// id-ce-subjectKeyIdentifier
const ID_CE_SUBJECT_KEY_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");

/// Signed attributes, content info wrapper, algorithm identifiers and SignerInfo framing.
const ENVELOPE_OVERHEAD: usize = 1536;
/// Room for a timestamp token, which carries the TSA's own certificate chain.
pub const TIMESTAMP_ALLOWANCE: usize = 8192;

/// ESSCertIDv2 with the default SHA-256 hash algorithm left out.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct EssCertIdV2 {
    cert_hash: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SigningCertificateV2 {
    certs: Vec<EssCertIdV2>,
}

/// Smallest placeholder that will hold a signature from `identity`.
pub fn estimate_signature_size(identity: &dyn SignerIdentity, with_timestamp: bool) -> usize {
    let chain: usize = identity
        .certificate_chain()
        .iter()
        .map(|c| c.to_der().map(|d| d.len()).unwrap_or(4096))
        .sum();
    let signature = identity
        .certificate_chain()
        .first()
        .map(|c| c.tbs_certificate.subject_public_key_info.subject_public_key.raw_bytes().len())
        .unwrap_or(512);
    let timestamp = if with_timestamp { TIMESTAMP_ALLOWANCE } else { 0 };
    chain + signature + ENVELOPE_OVERHEAD + timestamp
}

/// Single-valued attribute. `value` may be a CHOICE such as `Time`, so it is encoded
/// whole and re-read as `Any`.
fn attribute(oid: ObjectIdentifier, value: &impl Encode) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![Any::from_der(&value.to_der()?)?])?,
    })
}

fn decode_any<T: DecodeOwned>(any: &Any) -> Result<T> {
    Ok(T::from_der(&any.to_der()?)?)
}

fn to_der_time(time: &DateTime<Utc>) -> Result<Time> {
    let secs = u64::try_from(time.timestamp())
        .map_err(|_| Error::Signer(format!("signing time {} predates 1970", time)))?;
    let dt = der::DateTime::from_unix_duration(std::time::Duration::from_secs(secs))?;
    if dt.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_date_time(dt)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(dt)))
    }
}

fn from_der_time(time: &Time) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(time.to_unix_duration().as_secs()).ok()?;
    DateTime::from_timestamp(secs, 0)
}

/// Builds detached `SignedData` envelopes.
#[derive(Debug, Clone)]
pub struct CmsSignatureBuilder {
    sub_filter: SignatureSubFilter,
    signing_time: DateTime<Utc>,
}

impl CmsSignatureBuilder {
    /// Builder for `sub_filter`, timed now.
    pub fn new(sub_filter: SignatureSubFilter) -> Self {
        Self {
            sub_filter,
            signing_time: Utc::now(),
        }
    }

    /// Use a fixed signing time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = time;
        self
    }

    /// Build a detached signature over content whose digest is `digest`.
    ///
    /// The signer signs the DER encoding of the signed attributes, which carry `digest` as
    /// the message-digest attribute.
    pub fn build(
        &self,
        digest_algorithm: DigestAlgorithm,
        digest: &[u8],
        identity: &dyn SignerIdentity,
    ) -> Result<CmsEnvelope> {
        self.sign(ID_DATA, None, digest_algorithm, digest, identity)
    }

    /// Build an envelope that encapsulates `content` of type `content_type`.
    pub fn build_encapsulated(
        &self,
        content_type: ObjectIdentifier,
        content: &[u8],
        identity: &dyn SignerIdentity,
    ) -> Result<CmsEnvelope> {
        let digest_algorithm = identity.digest_algorithm();
        let digest = digest_algorithm.digest(content);
        self.sign(content_type, Some(content), digest_algorithm, &digest, identity)
    }

    fn sign(
        &self,
        content_type: ObjectIdentifier,
        content: Option<&[u8]>,
        digest_algorithm: DigestAlgorithm,
        digest: &[u8],
        identity: &dyn SignerIdentity,
    ) -> Result<CmsEnvelope> {
        if digest_algorithm != identity.digest_algorithm() {
            return Err(Error::Signer(format!(
                "digest computed with {} but signer uses {}",
                digest_algorithm.name(),
                identity.digest_algorithm().name()
            )));
        }
        if digest.len() != digest_algorithm.output_len() {
            return Err(Error::Signer(format!(
                "{} digest must be {} bytes, got {}",
                digest_algorithm.name(),
                digest_algorithm.output_len(),
                digest.len()
            )));
        }
        let leaf = identity.signing_certificate()?;
        let algorithm = SignatureAlgorithm::for_key(identity.key_algorithm(), digest_algorithm);

        let mut attributes = vec![
            attribute(ID_CONTENT_TYPE, &content_type)?,
            attribute(ID_SIGNING_TIME, &to_der_time(&self.signing_time)?)?,
            attribute(ID_MESSAGE_DIGEST, &OctetString::new(digest.to_vec())?)?,
        ];
        if self.sub_filter == SignatureSubFilter::CadesDetached {
            let cert_hash = DigestAlgorithm::Sha256.digest(&leaf.to_der()?);
            let signing_certificate = SigningCertificateV2 {
                certs: vec![EssCertIdV2 {
                    cert_hash: OctetString::new(cert_hash)?,
                }],
            };
            attributes.push(attribute(ID_AA_SIGNING_CERTIFICATE_V2, &signing_certificate)?);
        }
        let signed_attrs = SetOfVec::try_from(attributes)?;
        let signature = identity.sign(&signed_attrs.to_der()?)?;

        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: leaf.tbs_certificate.issuer.clone(),
                serial_number: leaf.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: digest_algorithm.algorithm_identifier()?,
            signed_attrs: Some(signed_attrs),
            signature_algorithm: algorithm.algorithm_identifier()?,
            signature: OctetString::new(signature)?,
            unsigned_attrs: None,
        };

        let certificates = identity
            .certificate_chain()
            .iter()
            .cloned()
            .map(CertificateChoices::Certificate)
            .collect::<Vec<_>>();
        let econtent = match content {
            Some(content) => Some(Any::encode_from(&OctetString::new(content.to_vec())?)?),
            None => None,
        };
        let signed_data = SignedData {
            version: if content_type == ID_DATA { CmsVersion::V1 } else { CmsVersion::V3 },
            digest_algorithms: SetOfVec::try_from(vec![digest_algorithm.algorithm_identifier()?])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: content_type,
                econtent,
            },
            certificates: Some(CertificateSet(SetOfVec::try_from(certificates)?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
        };
        log::debug!(
            "built {} envelope: {:?}, {} certificates",
            self.sub_filter.as_pdf_name(),
            algorithm,
            identity.certificate_chain().len()
        );
        Ok(CmsEnvelope { signed_data })
    }

    /// Timestamp the signature value and store the token as an unsigned attribute.
    pub fn attach_timestamp(envelope: &mut CmsEnvelope, authority: &dyn TimestampAuthority) -> Result<()> {
        let algorithm = envelope.digest_algorithm()?;
        let imprint = algorithm.digest(envelope.signature_value()?);
        let token = authority.timestamp(algorithm, &imprint)?;
        let token = Any::from_der(&token).map_err(|e| Error::TimestampUnavailable(format!("token encoding: {}", e)))?;

        let mut signers: Vec<SignerInfo> = envelope.signed_data.signer_infos.0.iter().cloned().collect();
        let signer = signers
            .first_mut()
            .ok_or_else(|| Error::MalformedEnvelope("no signer to timestamp".to_string()))?;
        let mut unsigned: Vec<Attribute> = signer
            .unsigned_attrs
            .as_ref()
            .map(|attrs| attrs.iter().filter(|a| a.oid != ID_AA_TIMESTAMP_TOKEN).cloned().collect())
            .unwrap_or_default();
        unsigned.push(Attribute {
            oid: ID_AA_TIMESTAMP_TOKEN,
            values: SetOfVec::try_from(vec![token])?,
        });
        signer.unsigned_attrs = Some(SetOfVec::try_from(unsigned)?);
        envelope.signed_data.signer_infos = SignerInfos(SetOfVec::try_from(signers)?);
        log::debug!("timestamp token attached");
        Ok(())
    }
}

/// Parsed `SignedData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmsEnvelope {
    signed_data: SignedData,
}

impl CmsEnvelope {
    /// Wrap an existing `SignedData`.
    pub fn new(signed_data: SignedData) -> Self {
        Self { signed_data }
    }

    /// Decode a `ContentInfo`. Bytes after the structure (placeholder padding) are ignored.
    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let malformed = |e: der::Error| Error::MalformedEnvelope(e.to_string());
        let mut reader = SliceReader::new(bytes).map_err(malformed)?;
        let content_info = ContentInfo::decode(&mut reader).map_err(malformed)?;
        if content_info.content_type != ID_SIGNED_DATA {
            return Err(Error::MalformedEnvelope(format!(
                "content type {} is not signedData",
                content_info.content_type
            )));
        }
        let signed_data = decode_any::<SignedData>(&content_info.content)
            .map_err(|e| Error::MalformedEnvelope(format!("SignedData: {}", e)))?;
        Ok(Self { signed_data })
    }

    /// DER encoding of the `ContentInfo`.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        let content_info = ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&self.signed_data)?,
        };
        Ok(content_info.to_der()?)
    }

    /// The decoded structure.
    pub fn signed_data(&self) -> &SignedData {
        &self.signed_data
    }

    /// First signer. Further signers are ignored.
    pub fn signer(&self) -> Result<&SignerInfo> {
        self.signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .ok_or_else(|| Error::MalformedEnvelope("no SignerInfo".to_string()))
    }

    /// Embedded certificates.
    pub fn certificates(&self) -> Vec<&Certificate> {
        self.signed_data
            .certificates
            .iter()
            .flat_map(|set| set.0.iter())
            .filter_map(|choice| match choice {
                CertificateChoices::Certificate(cert) => Some(cert),
                _ => None,
            })
            .collect()
    }

    /// Certificate that matches the first signer's identifier.
    pub fn signer_certificate(&self) -> Result<&Certificate> {
        let signer = self.signer()?;
        let found = match &signer.sid {
            SignerIdentifier::IssuerAndSerialNumber(id) => self.certificates().into_iter().find(|c| {
                c.tbs_certificate.issuer == id.issuer && c.tbs_certificate.serial_number == id.serial_number
            }),
            SignerIdentifier::SubjectKeyIdentifier(ski) => self
                .certificates()
                .into_iter()
                .find(|c| subject_key_identifier(c).as_ref() == Some(&ski.0)),
        };
        found.ok_or_else(|| Error::MalformedEnvelope("signer certificate not embedded".to_string()))
    }

    /// Digest algorithm declared by the first signer.
    pub fn digest_algorithm(&self) -> Result<DigestAlgorithm> {
        DigestAlgorithm::from_oid(&self.signer()?.digest_alg.oid)
    }

    /// Signature algorithm of the first signer, resolved against its digest algorithm.
    pub fn signature_algorithm(&self) -> Result<SignatureAlgorithm> {
        let signer = self.signer()?;
        SignatureAlgorithm::resolve(self.digest_algorithm()?, &signer.signature_algorithm.oid)
    }

    /// Raw signature value.
    pub fn signature_value(&self) -> Result<&[u8]> {
        Ok(self.signer()?.signature.as_bytes())
    }

    /// DER of the signed attributes as a SET, the bytes the signature covers.
    pub fn signed_attributes_der(&self) -> Result<Vec<u8>> {
        let attrs = self
            .signer()?
            .signed_attrs
            .as_ref()
            .ok_or_else(|| Error::MalformedEnvelope("signer has no signed attributes".to_string()))?;
        Ok(attrs.to_der()?)
    }

    fn signed_attribute(&self, oid: ObjectIdentifier) -> Result<Option<&Any>> {
        let attrs = self
            .signer()?
            .signed_attrs
            .as_ref()
            .ok_or_else(|| Error::MalformedEnvelope("signer has no signed attributes".to_string()))?;
        Ok(attrs.iter().find(|a| a.oid == oid).and_then(|a| a.values.iter().next()))
    }

    /// The message-digest signed attribute.
    pub fn message_digest(&self) -> Result<Vec<u8>> {
        let value = self
            .signed_attribute(ID_MESSAGE_DIGEST)?
            .ok_or_else(|| Error::MalformedEnvelope("message-digest attribute missing".to_string()))?;
        let digest = decode_any::<OctetString>(value)
            .map_err(|e| Error::MalformedEnvelope(format!("message-digest attribute: {}", e)))?;
        Ok(digest.into_bytes())
    }

    /// The signing-time signed attribute, if present and readable.
    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        let value = self.signed_attribute(ID_SIGNING_TIME).ok()??;
        let time = decode_any::<Time>(value).ok()?;
        from_der_time(&time)
    }

    /// Check the first signer's signature over its signed attributes.
    pub fn verify_signature(&self) -> Result<SignatureAlgorithm> {
        let message = self.signed_attributes_der()?;
        let algorithm = self.signature_algorithm()?;
        let certificate = self.signer_certificate()?;
        algorithm.verify(
            &certificate.tbs_certificate.subject_public_key_info,
            &message,
            self.signature_value()?,
        )?;
        Ok(algorithm)
    }

    /// Encapsulated content type.
    pub fn content_type(&self) -> ObjectIdentifier {
        self.signed_data.encap_content_info.econtent_type
    }

    /// Encapsulated content bytes, absent for detached signatures.
    pub fn encapsulated_content(&self) -> Result<Option<Vec<u8>>> {
        match &self.signed_data.encap_content_info.econtent {
            Some(any) => {
                let octets = decode_any::<OctetString>(any)
                    .map_err(|e| Error::MalformedEnvelope(format!("encapsulated content: {}", e)))?;
                Ok(Some(octets.into_bytes()))
            },
            None => Ok(None),
        }
    }

    /// Timestamp token stored as an unsigned attribute of the first signer.
    pub fn timestamp_token(&self) -> Option<Result<TimestampToken>> {
        let signer = self.signer().ok()?;
        let attr = signer.unsigned_attrs.as_ref()?.iter().find(|a| a.oid == ID_AA_TIMESTAMP_TOKEN)?;
        let value = attr.values.iter().next()?;
        Some(value.to_der().map_err(Error::from).and_then(|der| TimestampToken::from_der(&der)))
    }
}

fn subject_key_identifier(cert: &Certificate) -> Option<OctetString> {
    cert.tbs_certificate
        .extensions
        .as_ref()?
        .iter()
        .find(|ext| ext.extn_id == ID_CE_SUBJECT_KEY_IDENTIFIER)
        .and_then(|ext| OctetString::from_der(ext.extn_value.as_bytes()).ok())
}

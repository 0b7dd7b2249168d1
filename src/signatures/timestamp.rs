//! RFC 3161 trusted timestamps.
//!
//! A timestamp token is a CMS `SignedData` whose encapsulated content is a `TSTInfo`
//! binding a message imprint to a time. Tokens are used two ways: as an unsigned
//! attribute over a signature value, and as the whole signature for `ETSI.RFC3161`
//! document timestamps.

use super::cms::{CmsEnvelope, CmsSignatureBuilder, ID_CT_TST_INFO};
use super::signer::SignerIdentity;
use super::types::{DigestAlgorithm, SignatureSubFilter};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use cms::content_info::ContentInfo;
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, DecodeValue, Encode, EncodeValue, FixedTag, Header, Length, Reader, Sequence, Tag, Writer};
use spki::AlgorithmIdentifierOwned;
use std::sync::Arc;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::Extensions;
use x509_cert::serial_number::SerialNumber;

/// Policy OID used by [`LocalTimestampAuthority`] unless configured otherwise.
pub const DEFAULT_TSA_POLICY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.601.10.3.1");

fn default_false() -> bool {
    false
}

/// `genTime` of a `TSTInfo`.
///
/// Unlike DER `GeneralizedTime` this accepts a fractional-seconds part
/// (`YYYYMMDDHHMMSS[.f+]Z`), which RFC 3161 allows and many TSAs emit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GenTime(String);

impl GenTime {
    /// Whole-second time from `time`.
    pub fn from_date_time(time: DateTime<Utc>) -> Self {
        Self(time.format("%Y%m%d%H%M%SZ").to_string())
    }

    /// Encoded form, as sent by the TSA.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parsed time, keeping any fraction down to nanoseconds.
    pub fn to_date_time(&self) -> Option<DateTime<Utc>> {
        parse_gen_time(&self.0)
    }
}

fn parse_gen_time(text: &str) -> Option<DateTime<Utc>> {
    let body = text.strip_suffix('Z')?;
    let (whole, fraction) = match body.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (body, None),
    };
    if whole.len() != 14 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut time = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S").ok()?.and_utc();
    if let Some(fraction) = fraction {
        // DER forbids an empty fraction and trailing zeros.
        if fraction.is_empty() || fraction.ends_with('0') || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let nanos: String = fraction.chars().chain(std::iter::repeat('0')).take(9).collect();
        time += chrono::Duration::nanoseconds(nanos.parse().ok()?);
    }
    Some(time)
}

impl<'a> DecodeValue<'a> for GenTime {
    fn decode_value<R: Reader<'a>>(reader: &mut R, header: Header) -> der::Result<Self> {
        let bytes = reader.read_vec(header.length)?;
        let text = String::from_utf8(bytes).map_err(|_| Self::TAG.value_error())?;
        if parse_gen_time(&text).is_none() {
            return Err(Self::TAG.value_error());
        }
        Ok(Self(text))
    }
}

impl EncodeValue for GenTime {
    fn value_len(&self) -> der::Result<Length> {
        Length::try_from(self.0.len())
    }

    fn encode_value(&self, writer: &mut impl Writer) -> der::Result<()> {
        writer.write(self.0.as_bytes())
    }
}

impl FixedTag for GenTime {
    const TAG: Tag = Tag::GeneralizedTime;
}

/// `MessageImprint`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MessageImprint {
    /// Digest algorithm
    pub hash_algorithm: AlgorithmIdentifierOwned,
    /// Digest value
    pub hashed_message: OctetString,
}

/// `TimeStampReq`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampReq {
    /// Always 1
    pub version: u8,
    /// What to timestamp
    pub message_imprint: MessageImprint,
    /// Requested policy
    #[asn1(optional = "true")]
    pub req_policy: Option<ObjectIdentifier>,
    /// Replay protection
    #[asn1(optional = "true")]
    pub nonce: Option<u64>,
    /// Ask for the TSA certificate in the token
    #[asn1(default = "default_false")]
    pub cert_req: bool,
    /// Request extensions
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub extensions: Option<Extensions>,
}

/// `PKIStatusInfo`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiStatusInfo {
    /// 0 granted, 1 granted with modifications, 2 and above rejected
    pub status: u32,
    /// Free text from the TSA
    #[asn1(optional = "true")]
    pub status_string: Option<Vec<String>>,
    /// Failure bits
    #[asn1(optional = "true")]
    pub fail_info: Option<der::asn1::BitString>,
}

impl PkiStatusInfo {
    /// Whether a token was issued.
    pub fn is_granted(&self) -> bool {
        self.status <= 1
    }
}

/// `TimeStampResp`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampResp {
    /// Outcome
    pub status: PkiStatusInfo,
    /// The token, present when granted
    #[asn1(optional = "true")]
    pub time_stamp_token: Option<ContentInfo>,
}

/// `Accuracy`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Accuracy {
    /// Seconds
    #[asn1(optional = "true")]
    pub seconds: Option<u32>,
    /// Milliseconds
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub millis: Option<u16>,
    /// Microseconds
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub micros: Option<u16>,
}

/// `TSTInfo`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TstInfo {
    /// Always 1
    pub version: u8,
    /// TSA policy
    pub policy: ObjectIdentifier,
    /// Timestamped digest
    pub message_imprint: MessageImprint,
    /// Unique per token
    pub serial_number: SerialNumber,
    /// Time of issue
    pub gen_time: GenTime,
    /// Clock accuracy
    #[asn1(optional = "true")]
    pub accuracy: Option<Accuracy>,
    /// Whether tokens from this TSA are strictly ordered
    #[asn1(default = "default_false")]
    pub ordering: bool,
    /// Echo of the request nonce
    #[asn1(optional = "true")]
    pub nonce: Option<u64>,
    /// TSA name
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub tsa: Option<GeneralName>,
    /// Extensions
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub extensions: Option<Extensions>,
}

impl MessageImprint {
    /// Imprint of `digest` computed with `algorithm`.
    pub fn new(algorithm: DigestAlgorithm, digest: &[u8]) -> Result<Self> {
        Ok(Self {
            hash_algorithm: algorithm.algorithm_identifier()?,
            hashed_message: OctetString::new(digest.to_vec())?,
        })
    }

    /// Whether this imprint is `digest` under `algorithm`.
    pub fn matches(&self, algorithm: DigestAlgorithm, digest: &[u8]) -> bool {
        self.hash_algorithm.oid == algorithm.oid() && self.hashed_message.as_bytes() == digest
    }
}

/// Source of timestamp tokens.
pub trait TimestampAuthority: Send + Sync {
    /// DER-encoded token (`ContentInfo`) over `digest`, computed with `algorithm`.
    fn timestamp(&self, algorithm: DigestAlgorithm, digest: &[u8]) -> Result<Vec<u8>>;
}

/// Random nonce with the top bit clear, so it encodes as a positive INTEGER of at most 8 bytes.
#[cfg_attr(not(feature = "tsa"), allow(dead_code))]
fn random_nonce() -> u64 {
    let (high, _) = uuid::Uuid::new_v4().as_u64_pair();
    high & (u64::MAX >> 1)
}

/// Build the DER of a `TimeStampReq` with `certReq` set.
pub fn build_request(algorithm: DigestAlgorithm, digest: &[u8], nonce: u64) -> Result<Vec<u8>> {
    let request = TimeStampReq {
        version: 1,
        message_imprint: MessageImprint::new(algorithm, digest)?,
        req_policy: None,
        nonce: Some(nonce),
        cert_req: true,
        extensions: None,
    };
    Ok(request.to_der()?)
}

/// Validate a `TimeStampResp` against the request and return the token DER.
pub fn parse_response(body: &[u8], algorithm: DigestAlgorithm, digest: &[u8], nonce: u64) -> Result<Vec<u8>> {
    let response = TimeStampResp::from_der(body)
        .map_err(|e| Error::TimestampUnavailable(format!("undecodable response: {}", e)))?;
    if !response.status.is_granted() {
        let text = response.status.status_string.unwrap_or_default().join("; ");
        return Err(Error::TimestampUnavailable(format!(
            "request rejected with status {}: {}",
            response.status.status, text
        )));
    }
    let token = response
        .time_stamp_token
        .ok_or_else(|| Error::TimestampUnavailable("granted response without token".to_string()))?;
    let token_der = token.to_der()?;
    let parsed = TimestampToken::from_der(&token_der)
        .map_err(|e| Error::TimestampUnavailable(format!("unreadable token: {}", e)))?;
    if parsed.info().nonce != Some(nonce) {
        return Err(Error::TimestampUnavailable("nonce mismatch".to_string()));
    }
    if !parsed.info().message_imprint.matches(algorithm, digest) {
        return Err(Error::TimestampUnavailable("message imprint mismatch".to_string()));
    }
    Ok(token_der)
}

/// RFC 3161 client over HTTP.
#[cfg(feature = "tsa")]
#[derive(Debug, Clone)]
pub struct HttpTimestampAuthority {
    url: String,
    timeout: std::time::Duration,
}

#[cfg(feature = "tsa")]
impl HttpTimestampAuthority {
    /// Client for the TSA at `url`.
    pub fn new(url: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    /// TSA endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(feature = "tsa")]
impl TimestampAuthority for HttpTimestampAuthority {
    fn timestamp(&self, algorithm: DigestAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        let unavailable = |e: reqwest::Error| Error::TimestampUnavailable(format!("{}: {}", self.url, e));
        let nonce = random_nonce();
        let request = build_request(algorithm, digest, nonce)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(unavailable)?;
        log::debug!("requesting timestamp from {}", self.url);
        let response = client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/timestamp-query")
            .body(request)
            .send()
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(Error::TimestampUnavailable(format!(
                "{} answered HTTP {}",
                self.url,
                response.status()
            )));
        }
        let body = response.bytes().map_err(unavailable)?;
        parse_response(&body, algorithm, digest, nonce)
    }
}

/// In-process TSA that signs tokens with any [`SignerIdentity`].
pub struct LocalTimestampAuthority {
    identity: Arc<dyn SignerIdentity>,
    policy: ObjectIdentifier,
}

impl std::fmt::Debug for LocalTimestampAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTimestampAuthority")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl LocalTimestampAuthority {
    /// TSA signing with `identity` under the default policy.
    pub fn new(identity: Arc<dyn SignerIdentity>) -> Self {
        Self {
            identity,
            policy: DEFAULT_TSA_POLICY,
        }
    }

    /// Use a different policy OID.
    pub fn with_policy(mut self, policy: ObjectIdentifier) -> Self {
        self.policy = policy;
        self
    }

    fn issue(&self, imprint: MessageImprint, nonce: Option<u64>) -> Result<Vec<u8>> {
        let now = Utc::now();
        let info = TstInfo {
            version: 1,
            policy: self.policy,
            message_imprint: imprint,
            serial_number: SerialNumber::new(&uuid::Uuid::new_v4().as_bytes()[..15])?,
            gen_time: GenTime::from_date_time(now),
            accuracy: None,
            ordering: false,
            nonce,
            tsa: None,
            extensions: None,
        };
        let envelope = CmsSignatureBuilder::new(SignatureSubFilter::Rfc3161)
            .with_signing_time(now)
            .build_encapsulated(ID_CT_TST_INFO, &info.to_der()?, self.identity.as_ref())?;
        envelope.to_der()
    }

    /// Answer a DER `TimeStampReq` with a DER `TimeStampResp`.
    pub fn respond(&self, request: &[u8]) -> Result<Vec<u8>> {
        let request = TimeStampReq::from_der(request)?;
        let token = self.issue(request.message_imprint, request.nonce)?;
        let response = TimeStampResp {
            status: PkiStatusInfo {
                status: 0,
                status_string: None,
                fail_info: None,
            },
            time_stamp_token: Some(ContentInfo::from_der(&token)?),
        };
        Ok(response.to_der()?)
    }
}

impl TimestampAuthority for LocalTimestampAuthority {
    fn timestamp(&self, algorithm: DigestAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        self.issue(MessageImprint::new(algorithm, digest)?, None)
    }
}

/// Parsed timestamp token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampToken {
    envelope: CmsEnvelope,
    info: TstInfo,
    info_der: Vec<u8>,
}

impl TimestampToken {
    /// Decode a token (`ContentInfo`). Trailing padding is ignored.
    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        Self::from_envelope(CmsEnvelope::from_der(bytes)?)
    }

    /// Interpret an already decoded envelope as a token.
    pub fn from_envelope(envelope: CmsEnvelope) -> Result<Self> {
        if envelope.content_type() != ID_CT_TST_INFO {
            return Err(Error::MalformedEnvelope(format!(
                "content type {} is not TSTInfo",
                envelope.content_type()
            )));
        }
        let info_der = envelope
            .encapsulated_content()?
            .ok_or_else(|| Error::MalformedEnvelope("timestamp token without TSTInfo".to_string()))?;
        let info = TstInfo::from_der(&info_der)
            .map_err(|e| Error::MalformedEnvelope(format!("TSTInfo: {}", e)))?;
        Ok(Self {
            envelope,
            info,
            info_der,
        })
    }

    /// The decoded `TSTInfo`.
    pub fn info(&self) -> &TstInfo {
        &self.info
    }

    /// The token's own envelope.
    pub fn envelope(&self) -> &CmsEnvelope {
        &self.envelope
    }

    /// Digest algorithm of the imprint.
    pub fn imprint_algorithm(&self) -> Result<DigestAlgorithm> {
        DigestAlgorithm::from_oid(&self.info.message_imprint.hash_algorithm.oid)
    }

    /// Digest value of the imprint.
    pub fn imprint(&self) -> &[u8] {
        self.info.message_imprint.hashed_message.as_bytes()
    }

    /// Time of issue.
    pub fn gen_time(&self) -> Option<DateTime<Utc>> {
        self.info.gen_time.to_date_time()
    }

    /// Whether the token timestamps `data`.
    pub fn covers(&self, data: &[u8]) -> bool {
        match self.imprint_algorithm() {
            Ok(alg) => alg.digest(data) == self.imprint(),
            Err(_) => false,
        }
    }

    /// Check the TSA signature and that it covers this `TSTInfo`.
    pub fn verify(&self) -> Result<()> {
        self.envelope.verify_signature()?;
        let algorithm = self.envelope.digest_algorithm()?;
        if algorithm.digest(&self.info_der) != self.envelope.message_digest()? {
            return Err(Error::InvalidCryptographicSignature(
                "timestamp token digest does not match its TSTInfo".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ec_signer, rsa_signer};

    fn authority() -> LocalTimestampAuthority {
        LocalTimestampAuthority::new(Arc::new(rsa_signer(DigestAlgorithm::Sha256)))
    }

    #[test]
    fn test_local_token_verifies() {
        let digest = DigestAlgorithm::Sha256.digest(b"signature value");
        let der = authority().timestamp(DigestAlgorithm::Sha256, &digest).unwrap();
        let token = TimestampToken::from_der(&der).unwrap();
        token.verify().unwrap();
        assert_eq!(token.imprint_algorithm().unwrap(), DigestAlgorithm::Sha256);
        assert_eq!(token.imprint(), digest.as_slice());
        assert!(token.covers(b"signature value"));
        assert!(!token.covers(b"something else"));
        assert!(token.gen_time().is_some());
        assert_eq!(token.info().policy, DEFAULT_TSA_POLICY);
    }

    #[test]
    fn test_request_response_round() {
        let digest = DigestAlgorithm::Sha512.digest(b"document");
        let request = build_request(DigestAlgorithm::Sha512, &digest, 42).unwrap();
        let response = LocalTimestampAuthority::new(Arc::new(ec_signer())).respond(&request).unwrap();
        let token = parse_response(&response, DigestAlgorithm::Sha512, &digest, 42).unwrap();
        assert_eq!(TimestampToken::from_der(&token).unwrap().info().nonce, Some(42));
    }

    #[test]
    fn test_nonce_and_imprint_checked() {
        let digest = DigestAlgorithm::Sha256.digest(b"document");
        let request = build_request(DigestAlgorithm::Sha256, &digest, 7).unwrap();
        let response = authority().respond(&request).unwrap();
        assert!(matches!(
            parse_response(&response, DigestAlgorithm::Sha256, &digest, 8),
            Err(Error::TimestampUnavailable(_))
        ));
        let other = DigestAlgorithm::Sha256.digest(b"other");
        assert!(matches!(
            parse_response(&response, DigestAlgorithm::Sha256, &other, 7),
            Err(Error::TimestampUnavailable(_))
        ));
    }

    fn tst_info(gen_time: &str, digest: &[u8]) -> TstInfo {
        TstInfo {
            version: 1,
            policy: DEFAULT_TSA_POLICY,
            message_imprint: MessageImprint::new(DigestAlgorithm::Sha256, digest).unwrap(),
            serial_number: SerialNumber::new(&[1, 2, 3]).unwrap(),
            gen_time: GenTime(gen_time.to_string()),
            accuracy: None,
            ordering: false,
            nonce: Some(9),
            tsa: None,
            extensions: None,
        }
    }

    #[test]
    fn test_fractional_gen_time_decodes() {
        let der = tst_info("20240101120000.5Z", &[0; 32]).to_der().unwrap();
        let info = TstInfo::from_der(&der).unwrap();
        assert_eq!(info.gen_time.as_str(), "20240101120000.5Z");
        let expected = DateTime::parse_from_rfc3339("2024-01-01T12:00:00.5Z").unwrap();
        assert_eq!(info.gen_time.to_date_time(), Some(expected.with_timezone(&Utc)));

        let whole = TstInfo::from_der(&tst_info("20240101120000Z", &[0; 32]).to_der().unwrap()).unwrap();
        assert_eq!(whole.gen_time.to_date_time().map(|t| t.timestamp_subsec_nanos()), Some(0));
    }

    #[test]
    fn test_malformed_gen_time_is_rejected() {
        for text in ["20240101120000.50Z", "20240101120000.Z", "20240101120000", "2024010112Z"] {
            let der = tst_info(text, &[0; 32]).to_der().unwrap();
            assert!(TstInfo::from_der(&der).is_err(), "{}", text);
        }
    }

    #[test]
    fn test_token_with_fractional_gen_time_verifies() {
        let digest = DigestAlgorithm::Sha256.digest(b"signature value");
        let info = tst_info("20240101120000.125Z", &digest);
        let signer = rsa_signer(DigestAlgorithm::Sha256);
        let der = CmsSignatureBuilder::new(SignatureSubFilter::Rfc3161)
            .build_encapsulated(ID_CT_TST_INFO, &info.to_der().unwrap(), &signer)
            .unwrap()
            .to_der()
            .unwrap();
        let token = TimestampToken::from_der(&der).unwrap();
        token.verify().unwrap();
        assert!(token.covers(b"signature value"));
        assert_eq!(token.gen_time().map(|t| t.timestamp_subsec_millis()), Some(125));
    }

    #[test]
    fn test_rejected_status() {
        let response = TimeStampResp {
            status: PkiStatusInfo {
                status: 2,
                status_string: Some(vec!["bad alg".to_string()]),
                fail_info: None,
            },
            time_stamp_token: None,
        }
        .to_der()
        .unwrap();
        let err = parse_response(&response, DigestAlgorithm::Sha256, &[0; 32], 1).unwrap_err();
        assert!(err.to_string().contains("bad alg"));
    }

    #[test]
    fn test_plain_signature_is_not_a_token() {
        let signer = rsa_signer(DigestAlgorithm::Sha256);
        let digest = DigestAlgorithm::Sha256.digest(b"x");
        let der = CmsSignatureBuilder::new(SignatureSubFilter::Pkcs7Detached)
            .build(DigestAlgorithm::Sha256, &digest, &signer)
            .unwrap()
            .to_der()
            .unwrap();
        assert!(matches!(TimestampToken::from_der(&der), Err(Error::MalformedEnvelope(_))));
    }

    #[test]
    fn test_random_nonce_is_positive() {
        for _ in 0..16 {
            assert_eq!(random_nonce() >> 63, 0);
        }
    }
}

//! Byte-range incremental signing.
//!
//! Signing happens in strictly ordered steps, each consuming the previous state:
//!
//! ```text
//! IncrementalSigner --reserve_placeholder--> ReservedSignature
//!     --compute_byte_range--> PreparedSignature
//!     --finalize_local--> signed bytes
//!     --finalize_external--> SigningContinuation --complete--> signed bytes
//! ```
//!
//! The source document is only borrowed. Nothing is durable until a finalize step
//! returns the new bytes, so every failure leaves the caller's input untouched.

use super::byterange::{placeholder, placeholder_len, ByteRange, SignableContent, BYTE_RANGE_SLOT};
use super::permissions::{check_signable, docmdp_reference};
use super::types::{DigestAlgorithm, SignatureDescriptor};
use crate::document::{locate_dict_value, PdfDocument};
use crate::error::{Error, Result};
use crate::object::{encode_text_string, Object, ObjectRef};
use crate::writer::{hex_upper, IncrementalUpdate, ObjectSerializer};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::time::{Duration, Instant};

/// Widget annotation flags: Print (4) and Locked (128).
const WIDGET_FLAGS: i64 = 132;
/// `/SigFlags`: SignaturesExist (1) and AppendOnly (2).
const SIG_FLAGS: i64 = 3;

/// Stage of the signing pipeline, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    /// Nothing written yet
    Unsigned,
    /// Signature dictionary and placeholder appended
    PlaceholderReserved,
    /// Byte range fixed, content available for digesting
    ContentExposed,
    /// Waiting for an external signer
    AwaitingExternalSignature,
    /// Signature injected
    Signed,
}

/// Format a time as a PDF date string.
pub fn pdf_date(time: &DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

/// Entry point: a document that is about to receive a signature.
#[derive(Debug)]
pub struct IncrementalSigner<'a> {
    document: &'a PdfDocument,
}

impl<'a> IncrementalSigner<'a> {
    /// Start signing `document`. Fails if its permissions forbid another signature.
    pub fn new(document: &'a PdfDocument) -> Result<Self> {
        check_signable(document)?;
        Ok(Self { document })
    }

    /// Current state.
    pub fn state(&self) -> SigningState {
        SigningState::Unsigned
    }

    /// Append the signature dictionary, its field and a zero-filled `/Contents`
    /// placeholder of `size_hint` bytes. The byte range is left as a fixed-width slot.
    pub fn reserve_placeholder(
        self,
        mut descriptor: SignatureDescriptor,
        size_hint: usize,
    ) -> Result<ReservedSignature<'a>> {
        if size_hint == 0 {
            return Err(Error::PlaceholderTooSmall {
                required: 1,
                reserved: 0,
            });
        }
        let document = self.document;
        let mut update = IncrementalUpdate::new(document)?;
        let (root_ref, mut catalog) = document.catalog()?;
        let (page_ref, mut page) = document.first_page()?;

        let sig_ref = update.allocate();
        let field_ref = update.allocate();
        descriptor.placeholder_size = size_hint;
        update.put_raw(sig_ref, signature_dictionary(&descriptor, size_hint));

        // AcroForm: update in place when it is indirect, otherwise inline in the catalog.
        let acroform_entry = catalog.get("AcroForm").cloned();
        let mut acroform = match &acroform_entry {
            Some(entry) => document.resolve_dict(entry)?,
            None => HashMap::new(),
        };
        let mut fields = match acroform.get("Fields") {
            Some(f) => document.resolve(f)?.as_array().cloned().unwrap_or_default(),
            None => Vec::new(),
        };
        let field_name = unused_field_name(document, &fields);
        fields.push(Object::Reference(field_ref));
        acroform.insert("Fields".to_string(), Object::Array(fields));
        acroform.insert("SigFlags".to_string(), Object::Integer(SIG_FLAGS));
        match acroform_entry.as_ref().and_then(|e| e.as_reference()) {
            Some(acroform_ref) => update.put_object(acroform_ref, &Object::Dictionary(acroform)),
            None => {
                catalog.insert("AcroForm".to_string(), Object::Dictionary(acroform));
            },
        }

        let mut field = HashMap::new();
        field.insert("Type".to_string(), Object::Name("Annot".into()));
        field.insert("Subtype".to_string(), Object::Name("Widget".into()));
        field.insert("FT".to_string(), Object::Name("Sig".into()));
        field.insert("T".to_string(), Object::String(field_name.into_bytes()));
        field.insert("V".to_string(), Object::Reference(sig_ref));
        field.insert(
            "Rect".to_string(),
            Object::Array(vec![Object::Integer(0); 4]),
        );
        field.insert("F".to_string(), Object::Integer(WIDGET_FLAGS));
        field.insert("P".to_string(), Object::Reference(page_ref));
        update.put_object(field_ref, &Object::Dictionary(field));

        let annots_entry = page.get("Annots").cloned();
        let mut annots = match &annots_entry {
            Some(a) => document.resolve(a)?.as_array().cloned().unwrap_or_default(),
            None => Vec::new(),
        };
        annots.push(Object::Reference(field_ref));
        match annots_entry.as_ref().and_then(|a| a.as_reference()) {
            Some(annots_ref) => update.put_object(annots_ref, &Object::Array(annots)),
            None => {
                page.insert("Annots".to_string(), Object::Array(annots));
                update.put_object(page_ref, &Object::Dictionary(page));
            },
        }

        if descriptor.certification.is_some() {
            // Keep other permission handlers such as /UR3.
            let perms_entry = catalog.get("Perms").cloned();
            let mut perms = match &perms_entry {
                Some(entry) => document.resolve_dict(entry)?,
                None => HashMap::new(),
            };
            perms.insert("DocMDP".to_string(), Object::Reference(sig_ref));
            match perms_entry.as_ref().and_then(|e| e.as_reference()) {
                Some(perms_ref) => update.put_object(perms_ref, &Object::Dictionary(perms)),
                None => {
                    catalog.insert("Perms".to_string(), Object::Dictionary(perms));
                },
            }
        }
        update.put_object(root_ref, &Object::Dictionary(catalog));

        log::debug!(
            "{:?}: signature {} with {} byte placeholder, field {}",
            SigningState::PlaceholderReserved,
            sig_ref,
            size_hint,
            field_ref
        );
        Ok(ReservedSignature {
            update,
            descriptor,
            sig_ref,
        })
    }
}

/// First `SignatureN` not already used as a `/T` among `fields`.
fn unused_field_name(document: &PdfDocument, fields: &[Object]) -> String {
    let taken: HashSet<Vec<u8>> = fields
        .iter()
        .filter_map(|f| document.resolve_dict(f).ok())
        .filter_map(|f| f.get("T").and_then(|t| t.as_string()).map(<[u8]>::to_vec))
        .collect();
    let mut n = fields.len() + 1;
    loop {
        let name = format!("Signature{}", n);
        if !taken.contains(name.as_bytes()) {
            return name;
        }
        n += 1;
    }
}

/// Signature dictionary body. `/ByteRange` and `/Contents` come last so their offsets
/// do not depend on the metadata values.
fn signature_dictionary(descriptor: &SignatureDescriptor, size_hint: usize) -> Vec<u8> {
    let mut dict = HashMap::new();
    let sig_type = if descriptor.sub_filter.is_document_timestamp() {
        "DocTimeStamp"
    } else {
        "Sig"
    };
    dict.insert("Type".to_string(), Object::Name(sig_type.into()));
    dict.insert("Filter".to_string(), Object::Name(descriptor.filter.clone()));
    dict.insert(
        "SubFilter".to_string(),
        Object::Name(descriptor.sub_filter.as_pdf_name().into()),
    );
    dict.insert(
        "M".to_string(),
        Object::String(pdf_date(&descriptor.sign_time).into_bytes()),
    );
    for (key, value) in [
        ("Name", &descriptor.name),
        ("Location", &descriptor.location),
        ("Reason", &descriptor.reason),
        ("ContactInfo", &descriptor.contact_info),
    ] {
        if let Some(value) = value {
            dict.insert(key.to_string(), Object::String(encode_text_string(value)));
        }
    }
    if let Some(level) = descriptor.certification {
        dict.insert("Reference".to_string(), docmdp_reference(level));
    }

    let mut body = b"<<".to_vec();
    ObjectSerializer::compact().write_dictionary_entries(&mut body, &dict);
    body.extend_from_slice(b" /ByteRange ");
    body.extend_from_slice(BYTE_RANGE_SLOT.as_bytes());
    body.extend_from_slice(b" /Contents ");
    body.extend_from_slice(&placeholder(size_hint));
    body.extend_from_slice(b" >>");
    body
}

/// Placeholder appended, layout not yet fixed.
#[derive(Debug)]
pub struct ReservedSignature<'a> {
    update: IncrementalUpdate<'a>,
    descriptor: SignatureDescriptor,
    sig_ref: ObjectRef,
}

impl<'a> ReservedSignature<'a> {
    /// Current state.
    pub fn state(&self) -> SigningState {
        SigningState::PlaceholderReserved
    }

    /// Object number of the signature dictionary.
    pub fn signature_ref(&self) -> ObjectRef {
        self.sig_ref
    }

    /// Serialize the update, find the placeholder and write the byte range into its slot.
    ///
    /// After this call no byte may be inserted or removed.
    pub fn compute_byte_range(self) -> Result<PreparedSignature> {
        let serialized = self.update.serialize()?;
        let mut bytes = serialized.bytes;
        let sig_start = serialized
            .objects
            .get(&self.sig_ref.id)
            .map(|span| span.start)
            .ok_or(Error::ObjectNotFound(self.sig_ref.id, self.sig_ref.gen))?;

        let contents = locate_dict_value(&bytes, sig_start, "Contents")
            .ok_or_else(|| Error::InvalidPdf("signature placeholder not found".to_string()))?;
        let slot = locate_dict_value(&bytes, sig_start, "ByteRange")
            .ok_or_else(|| Error::InvalidPdf("byte range slot not found".to_string()))?;
        if contents.len() != placeholder_len(self.descriptor.placeholder_size) {
            return Err(Error::InvalidPdf(format!(
                "placeholder spans {} bytes, expected {}",
                contents.len(),
                placeholder_len(self.descriptor.placeholder_size)
            )));
        }

        let range = ByteRange::around(bytes.len(), contents.clone());
        let text = range.to_slot()?;
        if text.len() != slot.len() {
            return Err(Error::InvalidPdf("byte range slot changed width".to_string()));
        }
        bytes[slot].copy_from_slice(text.as_bytes());

        let mut descriptor = self.descriptor;
        descriptor.byte_range = Some(range);
        log::debug!(
            "{:?}: byte range {} around placeholder {:?}",
            SigningState::ContentExposed,
            range.to_pdf_array(),
            contents
        );
        Ok(PreparedSignature {
            bytes,
            contents,
            range,
            descriptor,
        })
    }
}

/// Byte range fixed; the signable content can be digested.
#[derive(Debug)]
pub struct PreparedSignature {
    bytes: Vec<u8>,
    contents: Range<usize>,
    range: ByteRange,
    descriptor: SignatureDescriptor,
}

impl PreparedSignature {
    /// Current state.
    pub fn state(&self) -> SigningState {
        SigningState::ContentExposed
    }

    /// The two spans outside the placeholder.
    pub fn expose_signable_content(&self) -> Result<SignableContent<'_>> {
        self.range.signable(&self.bytes)
    }

    /// Digest of the signable content.
    pub fn digest(&self, algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        Ok(self.expose_signable_content()?.digest(algorithm))
    }

    /// The byte range written into the document.
    pub fn byte_range(&self) -> ByteRange {
        self.range
    }

    /// Span of the `<…>` placeholder in the output.
    pub fn placeholder(&self) -> Range<usize> {
        self.contents.clone()
    }

    /// Metadata of the signature being produced.
    pub fn descriptor(&self) -> &SignatureDescriptor {
        &self.descriptor
    }

    /// Inject `signature` (DER bytes) and return the signed document.
    pub fn finalize_local(self, signature: &[u8]) -> Result<Vec<u8>> {
        let mut bytes = self.bytes;
        inject(&mut bytes, &self.contents, signature)?;
        log::debug!("{:?}: {} signature bytes injected", SigningState::Signed, signature.len());
        Ok(bytes)
    }

    /// Hand the signable content to an external signer, bounded by `timeout`.
    pub fn finalize_external(self, timeout: Duration) -> SigningContinuation {
        log::debug!(
            "{:?}: reservation expires in {:?}",
            SigningState::AwaitingExternalSignature,
            timeout
        );
        SigningContinuation {
            bytes: self.bytes,
            contents: self.contents,
            range: self.range,
            descriptor: self.descriptor,
            timeout,
            deadline: Instant::now() + timeout,
        }
    }
}

/// Write `signature` as uppercase hex into the placeholder at `contents`, zero padded.
fn inject(bytes: &mut [u8], contents: &Range<usize>, signature: &[u8]) -> Result<()> {
    let reserved = contents.len().saturating_sub(2) / 2;
    if signature.len() > reserved {
        return Err(Error::SignatureSizeMismatch {
            actual: signature.len(),
            reserved,
        });
    }
    let hex = hex_upper(signature);
    let start = contents.start + 1;
    bytes[start..start + hex.len()].copy_from_slice(hex.as_bytes());
    Ok(())
}

/// A reservation waiting for an externally produced signature.
///
/// Dropping or cancelling it discards the prepared bytes; the source document was
/// never modified.
#[derive(Debug)]
pub struct SigningContinuation {
    bytes: Vec<u8>,
    contents: Range<usize>,
    range: ByteRange,
    descriptor: SignatureDescriptor,
    timeout: Duration,
    deadline: Instant,
}

impl SigningContinuation {
    /// Current state.
    pub fn state(&self) -> SigningState {
        SigningState::AwaitingExternalSignature
    }

    /// Content the external signer has to cover.
    pub fn content(&self) -> Result<SignableContent<'_>> {
        self.range.signable(&self.bytes)
    }

    /// Digest of the content.
    pub fn digest(&self, algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        Ok(self.content()?.digest(algorithm))
    }

    /// Span of the reserved placeholder.
    pub fn placeholder(&self) -> Range<usize> {
        self.contents.clone()
    }

    /// Raw bytes available for the signature.
    pub fn reserved_size(&self) -> usize {
        self.descriptor.placeholder_size
    }

    /// Metadata of the signature being produced.
    pub fn descriptor(&self) -> &SignatureDescriptor {
        &self.descriptor
    }

    /// When the reservation expires.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Inject the externally produced signature.
    pub fn complete(self, signature: &[u8]) -> Result<Vec<u8>> {
        if self.is_expired() {
            log::warn!("external signature arrived after {:?}", self.timeout);
            return Err(Error::ExternalSigningTimeout(self.timeout));
        }
        let mut bytes = self.bytes;
        inject(&mut bytes, &self.contents, signature)?;
        log::debug!("{:?}: external signature injected", SigningState::Signed);
        Ok(bytes)
    }

    /// Abandon the reservation.
    pub fn cancel(self) {
        log::debug!("external signing cancelled, {} prepared bytes discarded", self.bytes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::{certification_level, MdpPermission, SignatureSubFilter};
    use crate::testing::{build_pdf, minimal_objects, minimal_pdf};

    fn prepare(size: usize) -> (Vec<u8>, PreparedSignature) {
        let original = minimal_pdf();
        let doc = PdfDocument::from_bytes(original.clone()).unwrap();
        let mut descriptor = SignatureDescriptor::new(SignatureSubFilter::CadesDetached);
        descriptor.reason = Some("Issued".into());
        let prepared = IncrementalSigner::new(&doc)
            .unwrap()
            .reserve_placeholder(descriptor, size)
            .unwrap()
            .compute_byte_range()
            .unwrap();
        (original, prepared)
    }

    #[test]
    fn test_pdf_date() {
        let time = DateTime::parse_from_rfc3339("2024-03-05T14:07:09Z").unwrap().with_timezone(&Utc);
        assert_eq!(pdf_date(&time), "D:20240305140709+00'00'");
    }

    #[test]
    fn test_byte_range_excludes_exactly_the_placeholder() {
        let (original, prepared) = prepare(64);
        let range = prepared.byte_range();
        let gap = prepared.placeholder();
        assert_eq!(range.offset1, 0);
        assert_eq!(range.gap(), gap);
        assert_eq!(gap.len(), placeholder_len(64));
        let content = prepared.expose_signable_content().unwrap();
        assert_eq!(content.len() + gap.len(), range.end());
        assert!(content.first.starts_with(&original));
        assert_eq!(content.first.last(), Some(&b' '));
        assert_eq!(content.second.first(), Some(&b' '));
    }

    #[test]
    fn test_finalize_local_pads_and_reparses() {
        let (_, prepared) = prepare(16);
        let placeholder_span = prepared.placeholder();
        let range = prepared.byte_range();
        let signed = prepared.finalize_local(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(
            &signed[placeholder_span.clone()],
            b"<DEADBEEF000000000000000000000000>"
        );
        assert!(range.covers_to_end(signed.len()));

        let doc = PdfDocument::from_bytes(signed).unwrap();
        let sigs = doc.signature_dictionaries().unwrap();
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].contents_span.as_ref(), Some(&placeholder_span));
        assert_eq!(
            ByteRange::from_object(&sigs[0].dict["ByteRange"]).unwrap(),
            range
        );
        assert_eq!(sigs[0].text("Reason").as_deref(), Some("Issued"));
        let (_, catalog) = doc.catalog().unwrap();
        let acroform = doc.resolve_dict(&catalog["AcroForm"]).unwrap();
        assert_eq!(acroform.get("SigFlags").and_then(|f| f.as_integer()), Some(3));
        let (_, page) = doc.first_page().unwrap();
        assert_eq!(page.get("Annots").and_then(|a| a.as_array()).map(|a| a.len()), Some(1));
    }

    #[test]
    fn test_oversized_signature_is_rejected() {
        let (_, prepared) = prepare(4);
        let err = prepared.finalize_local(&[1, 2, 3, 4, 5]).unwrap_err();
        assert!(matches!(
            err,
            Error::SignatureSizeMismatch {
                actual: 5,
                reserved: 4
            }
        ));
    }

    #[test]
    fn test_zero_placeholder_rejected() {
        let doc = PdfDocument::from_bytes(minimal_pdf()).unwrap();
        let descriptor = SignatureDescriptor::new(SignatureSubFilter::Pkcs7Detached);
        let err = IncrementalSigner::new(&doc).unwrap().reserve_placeholder(descriptor, 0).unwrap_err();
        assert!(matches!(err, Error::PlaceholderTooSmall { .. }));
    }

    #[test]
    fn test_external_completion_and_timeout() {
        let (_, prepared) = prepare(8);
        let expected = prepared.digest(DigestAlgorithm::Sha256).unwrap();
        let continuation = prepared.finalize_external(Duration::from_secs(60));
        assert_eq!(continuation.state(), SigningState::AwaitingExternalSignature);
        assert_eq!(continuation.digest(DigestAlgorithm::Sha256).unwrap(), expected);
        assert!(continuation.complete(&[0xAB]).is_ok());

        let (_, prepared) = prepare(8);
        let expired = prepared.finalize_external(Duration::ZERO);
        assert!(expired.is_expired());
        assert!(matches!(
            expired.complete(&[0xAB]),
            Err(Error::ExternalSigningTimeout(_))
        ));
    }

    fn reserve_on(objects: Vec<(u32, String)>, descriptor: SignatureDescriptor) -> PdfDocument {
        let doc = PdfDocument::from_bytes(build_pdf(&objects, 1)).unwrap();
        let signed = IncrementalSigner::new(&doc)
            .unwrap()
            .reserve_placeholder(descriptor, 8)
            .unwrap()
            .compute_byte_range()
            .unwrap()
            .finalize_local(&[0x30])
            .unwrap();
        PdfDocument::from_bytes(signed).unwrap()
    }

    #[test]
    fn test_field_name_skips_names_in_use() {
        let mut objects = minimal_objects();
        objects[0].1 = "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [6 0 R] >> >>".to_string();
        objects.push((6, "<< /FT /Tx /T (Signature2) >>".to_string()));
        let doc = reserve_on(objects, SignatureDescriptor::new(SignatureSubFilter::Pkcs7Detached));

        let (_, catalog) = doc.catalog().unwrap();
        let acroform = doc.resolve_dict(&catalog["AcroForm"]).unwrap();
        let fields = acroform["Fields"].as_array().unwrap();
        assert_eq!(fields.len(), 2);
        let names: Vec<String> = fields
            .iter()
            .map(|f| doc.resolve_dict(f).unwrap()["T"].as_text().unwrap())
            .collect();
        assert_eq!(names, ["Signature2", "Signature3"]);
    }

    #[test]
    fn test_certification_keeps_existing_perms() {
        let mut objects = minimal_objects();
        objects[0].1 = "<< /Type /Catalog /Pages 2 0 R /Perms << /UR3 6 0 R >> >>".to_string();
        objects.push((6, "<< /Type /Sig /Filter /Adobe.PPKLite >>".to_string()));
        let mut descriptor = SignatureDescriptor::new(SignatureSubFilter::CadesDetached);
        descriptor.certification = Some(MdpPermission::FillForms);
        let doc = reserve_on(objects, descriptor);

        let (_, catalog) = doc.catalog().unwrap();
        let perms = doc.resolve_dict(&catalog["Perms"]).unwrap();
        assert_eq!(perms.get("UR3").and_then(|r| r.as_reference()), Some(ObjectRef::new(6, 0)));
        assert!(perms.contains_key("DocMDP"));
        assert_eq!(certification_level(&doc).unwrap(), Some(MdpPermission::FillForms));
    }

    #[test]
    fn test_document_timestamp_dictionary_type() {
        let mut descriptor = SignatureDescriptor::new(SignatureSubFilter::Rfc3161);
        descriptor.name = Some("TSA".into());
        let body = String::from_utf8(signature_dictionary(&descriptor, 2)).unwrap();
        assert!(body.contains("/Type /DocTimeStamp"));
        assert!(body.contains("/SubFilter /ETSI.RFC3161"));
        assert!(body.ends_with(&format!(" /ByteRange {} /Contents <0000> >>", BYTE_RANGE_SLOT)));
    }
}

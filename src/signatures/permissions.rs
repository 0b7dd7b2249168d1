//! Modification permissions (DocMDP).
//!
//! A certification signature records a permission level in its `/Reference` entry and the
//! catalog points at it through `/Perms /DocMDP`. Level 1 forbids any further change,
//! including additional signatures.

use super::types::SignatureDescriptor;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::Object;
use serde::Serialize;
use std::collections::HashMap;

/// DocMDP `/P` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MdpPermission {
    /// No changes allowed
    NoChanges = 1,
    /// Form filling and signing allowed
    FillForms = 2,
    /// Form filling, signing and annotation allowed
    FillFormsAndAnnotate = 3,
}

impl MdpPermission {
    /// Interpret a `/P` value. Anything outside 1..=3 means the default level 2.
    pub fn from_p(value: i64) -> Self {
        match value {
            1 => MdpPermission::NoChanges,
            3 => MdpPermission::FillFormsAndAnnotate,
            _ => MdpPermission::FillForms,
        }
    }

    /// The `/P` value.
    pub fn value(&self) -> i64 {
        *self as i64
    }
}

impl std::str::FromStr for MdpPermission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1" => Ok(MdpPermission::NoChanges),
            "2" => Ok(MdpPermission::FillForms),
            "3" => Ok(MdpPermission::FillFormsAndAnnotate),
            other => Err(Error::InvalidPdf(format!("DocMDP level must be 1, 2 or 3, got '{}'", other))),
        }
    }
}

/// Modification access of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccessLevel {
    /// Not certified
    Unrestricted,
    /// Certified with the given permission
    Restricted(MdpPermission),
}

impl AccessLevel {
    /// Whether another signature may be added.
    pub fn allows_signing(&self) -> bool {
        !matches!(self, AccessLevel::Restricted(MdpPermission::NoChanges))
    }
}

/// Permission recorded by the document's certification signature, if it has one.
pub fn certification_level(document: &PdfDocument) -> Result<Option<MdpPermission>> {
    let (_, catalog) = document.catalog()?;
    let Some(perms) = catalog.get("Perms") else {
        return Ok(None);
    };
    let perms = document.resolve_dict(perms)?;
    let Some(docmdp) = perms.get("DocMDP") else {
        return Ok(None);
    };
    let signature = document.resolve_dict(docmdp)?;

    let references = match signature.get("Reference") {
        Some(r) => document.resolve(r)?,
        None => return Ok(Some(MdpPermission::FillForms)),
    };
    for reference in references.as_array().map(|a| a.as_slice()).unwrap_or_default() {
        let Ok(reference) = document.resolve_dict(reference) else {
            continue;
        };
        if reference.get("TransformMethod").and_then(|m| m.as_name()) != Some("DocMDP") {
            continue;
        }
        let p = match reference.get("TransformParams") {
            Some(params) => document
                .resolve_dict(params)?
                .get("P")
                .and_then(|p| p.as_integer())
                .unwrap_or(2),
            None => 2,
        };
        return Ok(Some(MdpPermission::from_p(p)));
    }
    Ok(Some(MdpPermission::FillForms))
}

/// Access level of `document`; fails when it forbids adding a signature.
pub fn check_signable(document: &PdfDocument) -> Result<AccessLevel> {
    let level = match certification_level(document)? {
        Some(p) => AccessLevel::Restricted(p),
        None => AccessLevel::Unrestricted,
    };
    log::debug!("document access level: {:?}", level);
    if !level.allows_signing() {
        return Err(Error::PermissionDenied(
            "document is certified with no changes permitted".to_string(),
        ));
    }
    Ok(level)
}

/// Mark `descriptor` as a certification signature with permission `level`.
///
/// Only the first signature of a document may certify it.
pub fn apply_certification(
    document: &PdfDocument,
    descriptor: &mut SignatureDescriptor,
    level: MdpPermission,
) -> Result<()> {
    if let Some(existing) = certification_level(document)? {
        return Err(Error::PermissionDenied(format!(
            "document is already certified (P={})",
            existing.value()
        )));
    }
    let existing = document.signature_dictionaries()?.len();
    if existing > 0 {
        return Err(Error::PermissionDenied(format!(
            "certification must be the first signature, document already has {}",
            existing
        )));
    }
    if descriptor.sub_filter.is_document_timestamp() {
        return Err(Error::Unsupported("certifying with a document timestamp".to_string()));
    }
    descriptor.certification = Some(level);
    Ok(())
}

/// `/Reference` array of a certification signature dictionary.
pub fn docmdp_reference(level: MdpPermission) -> Object {
    let mut params = HashMap::new();
    params.insert("Type".to_string(), Object::Name("TransformParams".into()));
    params.insert("P".to_string(), Object::Integer(level.value()));
    params.insert("V".to_string(), Object::Name("1.2".into()));

    let mut sig_ref = HashMap::new();
    sig_ref.insert("Type".to_string(), Object::Name("SigRef".into()));
    sig_ref.insert("TransformMethod".to_string(), Object::Name("DocMDP".into()));
    sig_ref.insert("DigestMethod".to_string(), Object::Name("SHA1".into()));
    sig_ref.insert("TransformParams".to_string(), Object::Dictionary(params));

    Object::Array(vec![Object::Dictionary(sig_ref)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::SignatureSubFilter;
    use crate::testing::{build_pdf, minimal_objects, minimal_pdf};

    fn certified_pdf(reference: &str) -> Vec<u8> {
        let mut objects = minimal_objects();
        objects[0] = (1, "<< /Type /Catalog /Pages 2 0 R /Perms << /DocMDP 6 0 R >> >>".to_string());
        objects.push((
            6,
            format!(
                "<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /adbe.pkcs7.detached /ByteRange [0 1 2 3] /Contents <00> {} >>",
                reference
            ),
        ));
        build_pdf(&objects, 1)
    }

    #[test]
    fn test_unrestricted_by_default() {
        let doc = PdfDocument::from_bytes(minimal_pdf()).unwrap();
        assert_eq!(certification_level(&doc).unwrap(), None);
        assert_eq!(check_signable(&doc).unwrap(), AccessLevel::Unrestricted);
    }

    #[test]
    fn test_no_changes_denies_signing() {
        let doc = PdfDocument::from_bytes(certified_pdf(
            "/Reference [<< /Type /SigRef /TransformMethod /DocMDP /TransformParams << /P 1 /V /1.2 >> >>]",
        ))
        .unwrap();
        assert_eq!(certification_level(&doc).unwrap(), Some(MdpPermission::NoChanges));
        assert!(matches!(check_signable(&doc), Err(Error::PermissionDenied(_))));
    }

    #[test]
    fn test_fill_forms_allows_signing() {
        let doc = PdfDocument::from_bytes(certified_pdf(
            "/Reference [<< /TransformMethod /DocMDP /TransformParams << /P 2 >> >>]",
        ))
        .unwrap();
        assert_eq!(
            check_signable(&doc).unwrap(),
            AccessLevel::Restricted(MdpPermission::FillForms)
        );
    }

    #[test]
    fn test_missing_p_defaults_to_two() {
        let doc = PdfDocument::from_bytes(certified_pdf("/Reference [<< /TransformMethod /DocMDP >>]")).unwrap();
        assert_eq!(certification_level(&doc).unwrap(), Some(MdpPermission::FillForms));
        assert_eq!(MdpPermission::from_p(7), MdpPermission::FillForms);
    }

    #[test]
    fn test_recertification_rejected() {
        let doc = PdfDocument::from_bytes(certified_pdf(
            "/Reference [<< /TransformMethod /DocMDP /TransformParams << /P 3 >> >>]",
        ))
        .unwrap();
        let mut descriptor = SignatureDescriptor::new(SignatureSubFilter::Pkcs7Detached);
        let err = apply_certification(&doc, &mut descriptor, MdpPermission::NoChanges).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert_eq!(descriptor.certification, None);
    }

    #[test]
    fn test_certification_requires_first_signature() {
        let mut objects = minimal_objects();
        objects.push((
            6,
            "<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /adbe.pkcs7.detached /ByteRange [0 1 2 3] /Contents <00> >>"
                .to_string(),
        ));
        let doc = PdfDocument::from_bytes(build_pdf(&objects, 1)).unwrap();
        let mut descriptor = SignatureDescriptor::new(SignatureSubFilter::CadesDetached);
        assert!(matches!(
            apply_certification(&doc, &mut descriptor, MdpPermission::FillForms),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_apply_certification_sets_level() {
        let doc = PdfDocument::from_bytes(minimal_pdf()).unwrap();
        let mut descriptor = SignatureDescriptor::new(SignatureSubFilter::CadesDetached);
        apply_certification(&doc, &mut descriptor, MdpPermission::NoChanges).unwrap();
        assert_eq!(descriptor.certification, Some(MdpPermission::NoChanges));
    }

    #[test]
    fn test_docmdp_reference_shape() {
        let reference = docmdp_reference(MdpPermission::FillFormsAndAnnotate);
        let entry = reference.as_array().and_then(|a| a.first()).and_then(|e| e.as_dict()).unwrap();
        assert_eq!(entry.get("TransformMethod").and_then(|m| m.as_name()), Some("DocMDP"));
        let params = entry.get("TransformParams").and_then(|p| p.as_dict()).unwrap();
        assert_eq!(params.get("P").and_then(|p| p.as_integer()), Some(3));
    }
}

//! Read-only view of a PDF file.
//!
//! [`PdfDocument`] owns the raw bytes (as [`bytes::Bytes`], so clones are cheap) plus the
//! merged cross-reference table. Nothing in it is mutated after [`PdfDocument::from_bytes`]
//! returns, which makes it safe to share between verification threads.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::{Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::{parse_indirect_object_at, parse_object};
use crate::xref::{find_xref_offset, parse_xref_chain, CrossRefTable, XRefEntry};
use crate::xref_reconstruction::reconstruct_xref;
use bytes::Bytes;
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

const MAX_RESOLVE_DEPTH: usize = 32;
const MAX_PAGE_TREE_DEPTH: usize = 64;

/// A signature dictionary found in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureDictionary {
    /// Indirect object holding the dictionary
    pub object_ref: ObjectRef,
    /// Byte offset of the object header
    pub offset: usize,
    /// Parsed dictionary entries
    pub dict: HashMap<String, Object>,
    /// Raw span of the `/Contents` hex string, delimiters included
    pub contents_span: Option<Range<usize>>,
}

impl SignatureDictionary {
    /// `/Filter` name, empty when absent.
    pub fn filter(&self) -> &str {
        self.dict.get("Filter").and_then(|f| f.as_name()).unwrap_or("")
    }

    /// `/SubFilter` name, empty when absent.
    pub fn sub_filter(&self) -> &str {
        self.dict.get("SubFilter").and_then(|f| f.as_name()).unwrap_or("")
    }

    /// Decoded `/Contents` bytes.
    pub fn contents(&self) -> Option<&[u8]> {
        self.dict.get("Contents").and_then(|c| c.as_string())
    }

    /// Text value of an optional string entry such as `/Reason`.
    pub fn text(&self, key: &str) -> Option<String> {
        self.dict.get(key).and_then(|v| v.as_text())
    }
}

/// Parsed PDF file.
pub struct PdfDocument {
    data: Bytes,
    version: (u8, u8),
    xref: CrossRefTable,
    trailer: HashMap<String, Object>,
    startxref: Option<usize>,
    compressed: HashMap<u32, Object>,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("len", &self.data.len())
            .field("version", &self.version)
            .field("objects", &self.xref.len())
            .field("startxref", &self.startxref)
            .finish()
    }
}

impl PdfDocument {
    /// Read and parse a file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(data)
    }

    /// Parse a document held in memory.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data: Bytes = data.into();
        let version = parse_header(&data)?;

        let (xref, startxref) = match find_xref_offset(&data).and_then(|off| {
            let table = parse_xref_chain(&data, off)?;
            Ok((table, off))
        }) {
            Ok((table, off)) if table.trailer().is_some_and(|t| t.contains_key("Root")) => (table, Some(off)),
            Ok(_) => (reconstruct_xref(&data)?, None),
            Err(e) => {
                log::warn!("cross-reference parsing failed ({}), falling back to a scan", e);
                (reconstruct_xref(&data)?, None)
            },
        };
        let trailer = xref.trailer().cloned().unwrap_or_default();

        let mut doc = Self {
            data,
            version,
            xref,
            trailer,
            startxref,
            compressed: HashMap::new(),
        };
        doc.load_object_streams();
        log::debug!("opened {:?}", doc);
        Ok(doc)
    }

    fn load_object_streams(&mut self) {
        let mut stream_ids: Vec<u32> = self
            .xref
            .entries()
            .filter_map(|(_, e)| match e {
                XRefEntry::Compressed { stream_id, .. } => Some(*stream_id),
                _ => None,
            })
            .collect();
        stream_ids.sort_unstable();
        stream_ids.dedup();

        for stream_id in stream_ids {
            let loaded = self
                .load_uncompressed(stream_id)
                .and_then(|(_, obj)| parse_object_stream(&obj));
            match loaded {
                Ok(objects) => {
                    for (id, obj) in objects {
                        let belongs_here = matches!(
                            self.xref.get(id),
                            Some(XRefEntry::Compressed { stream_id: s, .. }) if *s == stream_id
                        );
                        if belongs_here {
                            self.compressed.insert(id, obj);
                        }
                    }
                },
                Err(e) => log::warn!("object stream {} unreadable: {}", stream_id, e),
            }
        }
    }

    /// Raw file bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the raw file bytes.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// File length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the file is empty (never true for a parsed document).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Header version, e.g. `(1, 7)`.
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Trailer dictionary of the newest revision.
    pub fn trailer(&self) -> &HashMap<String, Object> {
        &self.trailer
    }

    /// Merged cross-reference table.
    pub fn xref(&self) -> &CrossRefTable {
        &self.xref
    }

    /// Offset of the newest cross-reference section, if the file had a usable one.
    pub fn startxref(&self) -> Option<usize> {
        self.startxref
    }

    /// Whether any object lives in, or is, an object stream.
    pub fn has_object_streams(&self) -> bool {
        self.xref.entries().any(|(id, entry)| match entry {
            XRefEntry::Compressed { .. } => true,
            XRefEntry::Uncompressed { .. } => self.load_uncompressed(id).is_ok_and(|(_, obj)| {
                obj.as_dict().and_then(|d| d.get("Type")).and_then(|t| t.as_name()) == Some("ObjStm")
            }),
            XRefEntry::Free => false,
        })
    }

    /// Whether the trailer declares encryption.
    pub fn is_encrypted(&self) -> bool {
        self.trailer.contains_key("Encrypt")
    }

    /// One past the highest object number in use.
    pub fn next_object_number(&self) -> u32 {
        let from_size = self
            .trailer
            .get("Size")
            .and_then(|s| s.as_integer())
            .unwrap_or(0)
            .max(0) as u32;
        let from_xref = self.xref.entries().map(|(id, _)| id + 1).max().unwrap_or(1);
        from_size.max(from_xref).max(1)
    }

    fn load_uncompressed(&self, id: u32) -> Result<(ObjectRef, Object)> {
        match self.xref.get(id) {
            Some(XRefEntry::Uncompressed { offset, .. }) => {
                let (found, obj) = parse_indirect_object_at(&self.data, *offset)?;
                if found.id != id {
                    return Err(Error::ParseError {
                        offset: *offset,
                        reason: format!("expected object {}, found {}", id, found),
                    });
                }
                Ok((found, obj))
            },
            _ => Err(Error::ObjectNotFound(id, 0)),
        }
    }

    /// Load an indirect object.
    pub fn get_object(&self, obj_ref: ObjectRef) -> Result<Object> {
        match self.xref.get(obj_ref.id) {
            Some(XRefEntry::Uncompressed { .. }) => self.load_uncompressed(obj_ref.id).map(|(_, obj)| obj),
            Some(XRefEntry::Compressed { .. }) => self
                .compressed
                .get(&obj_ref.id)
                .cloned()
                .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen)),
            Some(XRefEntry::Free) | None => Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen)),
        }
    }

    /// Follow references until a direct object is reached.
    pub fn resolve(&self, obj: &Object) -> Result<Object> {
        let mut current = obj.clone();
        for _ in 0..MAX_RESOLVE_DEPTH {
            match current {
                Object::Reference(r) => current = self.get_object(r)?,
                other => return Ok(other),
            }
        }
        match obj {
            Object::Reference(r) => Err(Error::CircularReference(*r)),
            other => Ok(other.clone()),
        }
    }

    /// Resolve and require a dictionary (stream dictionaries qualify).
    pub fn resolve_dict(&self, obj: &Object) -> Result<HashMap<String, Object>> {
        let resolved = self.resolve(obj)?;
        resolved.expect_dict().cloned()
    }

    /// Reference and dictionary of the document catalog.
    pub fn catalog(&self) -> Result<(ObjectRef, HashMap<String, Object>)> {
        let root = self
            .trailer
            .get("Root")
            .and_then(|r| r.as_reference())
            .ok_or_else(|| Error::InvalidPdf("trailer has no /Root reference".to_string()))?;
        let dict = self.resolve_dict(&Object::Reference(root))?;
        Ok((root, dict))
    }

    /// Reference and dictionary of the first page.
    pub fn first_page(&self) -> Result<(ObjectRef, HashMap<String, Object>)> {
        let (_, catalog) = self.catalog()?;
        let mut node = catalog
            .get("Pages")
            .and_then(|p| p.as_reference())
            .ok_or_else(|| Error::InvalidPdf("catalog has no /Pages reference".to_string()))?;

        for _ in 0..MAX_PAGE_TREE_DEPTH {
            let dict = self.resolve_dict(&Object::Reference(node))?;
            let is_leaf = dict.get("Type").and_then(|t| t.as_name()) == Some("Page") || !dict.contains_key("Kids");
            if is_leaf {
                return Ok((node, dict));
            }
            let kids = self.resolve(dict.get("Kids").unwrap_or(&Object::Null))?;
            node = kids
                .as_array()
                .and_then(|k| k.first())
                .and_then(|k| k.as_reference())
                .ok_or_else(|| Error::InvalidPdf("page tree node without kids".to_string()))?;
        }
        Err(Error::CircularReference(node))
    }

    /// Every signature dictionary in the file, in file-offset order.
    ///
    /// A signature dictionary is any uncompressed dictionary carrying both `/ByteRange`
    /// and `/Contents`; signed content cannot live inside an object stream.
    pub fn signature_dictionaries(&self) -> Result<Vec<SignatureDictionary>> {
        let mut candidates: Vec<(u32, usize)> = self
            .xref
            .entries()
            .filter_map(|(id, e)| match e {
                XRefEntry::Uncompressed { offset, .. } => Some((id, *offset)),
                _ => None,
            })
            .collect();
        candidates.sort_by_key(|(_, offset)| *offset);

        let mut found = Vec::new();
        for (id, offset) in candidates {
            let (object_ref, obj) = match self.load_uncompressed(id) {
                Ok(loaded) => loaded,
                Err(e) => {
                    log::debug!("skipping unreadable object {}: {}", id, e);
                    continue;
                },
            };
            let Object::Dictionary(dict) = obj else {
                continue;
            };
            if !(dict.contains_key("ByteRange") && dict.contains_key("Contents")) {
                continue;
            }
            let contents_span = locate_dict_value(&self.data, offset, "Contents");
            found.push(SignatureDictionary {
                object_ref,
                offset,
                dict,
                contents_span,
            });
        }
        log::debug!("found {} signature dictionaries", found.len());
        Ok(found)
    }
}

fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let pos = window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or_else(|| Error::InvalidHeader(String::from_utf8_lossy(&window[..window.len().min(16)]).into_owned()))?;
    let digits = &window[pos + 5..];
    let major = digits.first().filter(|d| d.is_ascii_digit()).map(|d| d - b'0');
    let minor = digits.get(2).filter(|d| d.is_ascii_digit()).map(|d| d - b'0');
    Ok((major.unwrap_or(1), minor.unwrap_or(4)))
}

/// Byte span of the value stored under `key` in the dictionary of the indirect object
/// at `offset`. Only top-level keys are considered.
pub fn locate_dict_value(data: &[u8], offset: usize, key: &str) -> Option<Range<usize>> {
    let mut rest = data.get(offset..)?;
    for expected in [Token::Integer(0), Token::Integer(0), Token::ObjStart, Token::DictStart] {
        let (after, tok) = token(rest).ok()?;
        let matches = match (&expected, &tok) {
            (Token::Integer(_), Token::Integer(_)) => true,
            (a, b) => a == b,
        };
        if !matches {
            return None;
        }
        rest = after;
    }

    loop {
        let (after_key, tok) = token(rest).ok()?;
        let name = match tok {
            Token::Name(name) => name,
            _ => return None,
        };
        let (value_start, _) = crate::lexer::skip_ws(after_key).ok()?;
        let (after_value, _) = parse_object(value_start).ok()?;
        if name == key {
            let start = data.len() - value_start.len();
            let end = data.len() - after_value.len();
            return Some(start..end);
        }
        rest = after_value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::minimal_pdf;

    #[test]
    fn test_open_minimal_document() {
        let doc = PdfDocument::from_bytes(minimal_pdf()).unwrap();
        assert_eq!(doc.version(), (1, 7));
        let (root, catalog) = doc.catalog().unwrap();
        assert_eq!(root, ObjectRef::new(1, 0));
        assert_eq!(catalog.get("Type").and_then(|t| t.as_name()), Some("Catalog"));
        let (page_ref, page) = doc.first_page().unwrap();
        assert_eq!(page_ref, ObjectRef::new(3, 0));
        assert_eq!(page.get("Type").and_then(|t| t.as_name()), Some("Page"));
        assert_eq!(doc.next_object_number(), 6);
        assert!(doc.signature_dictionaries().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_pdf() {
        assert!(matches!(
            PdfDocument::from_bytes(b"GIF89a....".to_vec()),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_broken_startxref_falls_back_to_scan() {
        let mut data = minimal_pdf();
        let pos = data.windows(9).rposition(|w| w == b"startxref").unwrap();
        data.truncate(pos);
        data.extend_from_slice(b"startxref\n999999\n%%EOF\n");
        let doc = PdfDocument::from_bytes(data).unwrap();
        assert!(doc.startxref().is_none());
        assert!(doc.catalog().is_ok());
    }

    #[test]
    fn test_locate_dict_value() {
        let data = b"9 0 obj\n<< /Reason (/Contents <00>) /Contents <ABCD> /M (D:2024) >>\nendobj";
        let span = locate_dict_value(data, 0, "Contents").unwrap();
        assert_eq!(&data[span], b"<ABCD>");
        assert!(locate_dict_value(data, 0, "ByteRange").is_none());
    }

    #[test]
    fn test_missing_reference() {
        let doc = PdfDocument::from_bytes(minimal_pdf()).unwrap();
        let missing = doc.resolve(&Object::Reference(ObjectRef::new(99, 0)));
        assert!(matches!(missing, Err(Error::ObjectNotFound(99, 0))));
    }
}

//! Incremental updates.
//!
//! New and replaced objects are appended after the original bytes, followed by a classic
//! cross-reference section and a trailer whose `/Prev` points at the previous section.
//! The original bytes are copied verbatim, so offsets inside earlier revisions (and the
//! byte ranges of earlier signatures) stay valid.

use super::ObjectSerializer;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Object, ObjectRef};
use crate::xref::XRefEntry;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

/// Pending incremental update against one document.
#[derive(Debug)]
pub struct IncrementalUpdate<'a> {
    document: &'a PdfDocument,
    objects: BTreeMap<u32, (ObjectRef, Vec<u8>)>,
    next_id: u32,
    serializer: ObjectSerializer,
}

/// Serialized update: full output bytes plus where each appended object landed.
#[derive(Debug, Clone)]
pub struct SerializedUpdate {
    /// Original bytes followed by the update
    pub bytes: Vec<u8>,
    /// Span of each appended `N G obj ... endobj`, keyed by object number
    pub objects: HashMap<u32, Range<usize>>,
    /// Offset of the appended cross-reference section
    pub xref_offset: usize,
}

impl<'a> IncrementalUpdate<'a> {
    /// Start an update. Encrypted documents are rejected, as are damaged documents with
    /// object streams.
    pub fn new(document: &'a PdfDocument) -> Result<Self> {
        if document.is_encrypted() {
            return Err(Error::Unsupported("incremental update of an encrypted document".to_string()));
        }
        // Without a previous section to chain to, compressed objects would drop out of
        // the new revision.
        if document.startxref().is_none() && document.has_object_streams() {
            return Err(Error::Unsupported(
                "incremental update of a damaged document that uses object streams".to_string(),
            ));
        }
        Ok(Self {
            document,
            objects: BTreeMap::new(),
            next_id: document.next_object_number(),
            serializer: ObjectSerializer::compact(),
        })
    }

    /// Document this update applies to.
    pub fn document(&self) -> &'a PdfDocument {
        self.document
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let obj_ref = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        obj_ref
    }

    /// Add or replace an object.
    pub fn put_object(&mut self, obj_ref: ObjectRef, obj: &Object) {
        let body = self.serializer.serialize(obj);
        self.put_raw(obj_ref, body);
    }

    /// Add or replace an object from pre-serialized body bytes (without the `obj` wrapper).
    pub fn put_raw(&mut self, obj_ref: ObjectRef, body: Vec<u8>) {
        self.objects.insert(obj_ref.id, (obj_ref, body));
    }

    /// Number of objects in the update.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing has been added yet.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Serialize the original bytes plus this update.
    pub fn serialize(&self) -> Result<SerializedUpdate> {
        let original = self.document.data();
        let mut out = Vec::with_capacity(original.len() + 4096);
        out.extend_from_slice(original);
        if !out.ends_with(b"\n") && !out.ends_with(b"\r") {
            out.push(b'\n');
        }

        let mut entries: BTreeMap<u32, (usize, u16)> = BTreeMap::new();
        let mut spans = HashMap::with_capacity(self.objects.len());

        // A reconstructed document has no usable previous section, so carry its entries.
        let prev = self.document.startxref();
        if prev.is_none() {
            for (id, entry) in self.document.xref().entries() {
                if let XRefEntry::Uncompressed { offset, generation } = entry {
                    entries.insert(id, (*offset, *generation));
                }
            }
        }

        for (id, (obj_ref, body)) in &self.objects {
            let start = out.len();
            out.extend_from_slice(format!("{} {} obj\n", obj_ref.id, obj_ref.gen).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
            entries.insert(*id, (start, obj_ref.gen));
            spans.insert(*id, start..out.len());
        }

        let xref_offset = out.len();
        out.extend_from_slice(b"xref\n");
        if prev.is_none() {
            out.extend_from_slice(b"0 1\n0000000000 65535 f \n");
        }
        for run in contiguous_runs(&entries) {
            out.extend_from_slice(format!("{} {}\n", run[0].0, run.len()).as_bytes());
            for (_, (offset, gen)) in run {
                out.extend_from_slice(format!("{:010} {:05} n \n", offset, gen).as_bytes());
            }
        }

        out.extend_from_slice(b"trailer\n");
        let trailer = self.trailer(prev)?;
        self.serializer.write_object(&mut out, &trailer);
        out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        log::debug!(
            "incremental update: {} objects, xref at {}, {} -> {} bytes",
            self.objects.len(),
            xref_offset,
            original.len(),
            out.len()
        );
        Ok(SerializedUpdate {
            bytes: out,
            objects: spans,
            xref_offset,
        })
    }

    fn trailer(&self, prev: Option<usize>) -> Result<Object> {
        let source = self.document.trailer();
        let root = source
            .get("Root")
            .cloned()
            .ok_or_else(|| Error::InvalidPdf("trailer has no /Root".to_string()))?;

        let mut trailer = HashMap::new();
        trailer.insert("Size".to_string(), Object::Integer(self.next_id as i64));
        trailer.insert("Root".to_string(), root);
        for key in ["Info", "ID"] {
            if let Some(value) = source.get(key) {
                trailer.insert(key.to_string(), value.clone());
            }
        }
        if let Some(prev) = prev {
            trailer.insert("Prev".to_string(), Object::Integer(prev as i64));
        }
        Ok(Object::Dictionary(trailer))
    }
}

fn contiguous_runs(entries: &BTreeMap<u32, (usize, u16)>) -> Vec<Vec<(u32, (usize, u16))>> {
    let mut runs: Vec<Vec<(u32, (usize, u16))>> = Vec::new();
    for (id, entry) in entries {
        match runs.last_mut() {
            Some(run) if run.last().is_some_and(|(last, _)| last + 1 == *id) => run.push((*id, *entry)),
            _ => runs.push(vec![(*id, *entry)]),
        }
    }
    runs
}

//! ByteRange handling for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the signature value begins
//! - `offset2` = byte offset where the signature value ends
//! - `length2` = remaining bytes to end of file
//!
//! The signature value is a hex-encoded string within `<` and `>` delimiters.

use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::object::Object;
use std::ops::Range;

/// Fixed-width `/ByteRange` value written before offsets are known.
///
/// Ten digits per offset is enough for any file below 10 GB; the final value is
/// space-padded to this width so no byte moves.
pub const BYTE_RANGE_SLOT: &str = "[0 0000000000 0000000000 0000000000]";

/// Length of the hex placeholder for `size` raw signature bytes, angle brackets included.
pub fn placeholder_len(size: usize) -> usize {
    size * 2 + 2
}

/// Zero-filled `<00…>` placeholder for `size` raw signature bytes.
pub fn placeholder(size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(placeholder_len(size));
    out.push(b'<');
    out.resize(size * 2 + 1, b'0');
    out.push(b'>');
    out
}

/// The four-integer descriptor of the signed spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// Start of the first span (always 0 for a well-formed range)
    pub offset1: usize,
    /// Length of the first span
    pub length1: usize,
    /// Start of the second span
    pub offset2: usize,
    /// Length of the second span
    pub length2: usize,
}

impl ByteRange {
    /// Range covering a file of `file_len` bytes minus the `/Contents` string at `contents`.
    pub fn around(file_len: usize, contents: Range<usize>) -> Self {
        Self {
            offset1: 0,
            length1: contents.start,
            offset2: contents.end,
            length2: file_len.saturating_sub(contents.end),
        }
    }

    /// Parse a `/ByteRange` array. It must hold exactly four non-negative integers.
    pub fn from_object(obj: &Object) -> Result<Self> {
        let values = obj
            .as_array()
            .ok_or_else(|| Error::IntegrityViolation(format!("/ByteRange is a {}", obj.type_name())))?;
        if values.len() != 4 {
            return Err(Error::IntegrityViolation(format!(
                "/ByteRange has {} entries, expected 4",
                values.len()
            )));
        }
        let mut parsed = [0usize; 4];
        for (slot, value) in parsed.iter_mut().zip(values) {
            let n = value
                .as_integer()
                .ok_or_else(|| Error::IntegrityViolation("/ByteRange entry is not an integer".to_string()))?;
            *slot = usize::try_from(n)
                .map_err(|_| Error::IntegrityViolation(format!("/ByteRange entry {} is negative", n)))?;
        }
        Ok(Self::from_array(parsed))
    }

    /// Build from `[offset1, length1, offset2, length2]`.
    pub fn from_array(values: [usize; 4]) -> Self {
        Self {
            offset1: values[0],
            length1: values[1],
            offset2: values[2],
            length2: values[3],
        }
    }

    /// `[offset1, length1, offset2, length2]`
    pub fn to_array(&self) -> [usize; 4] {
        [self.offset1, self.length1, self.offset2, self.length2]
    }

    /// The values as PDF integers.
    pub fn to_object(&self) -> Object {
        Object::Array(self.to_array().iter().map(|v| Object::Integer(*v as i64)).collect())
    }

    /// Format as a PDF array string.
    pub fn to_pdf_array(&self) -> String {
        format!("[{} {} {} {}]", self.offset1, self.length1, self.offset2, self.length2)
    }

    /// The array padded with spaces to the width of [`BYTE_RANGE_SLOT`].
    pub fn to_slot(&self) -> Result<String> {
        let text = self.to_pdf_array();
        if text.len() > BYTE_RANGE_SLOT.len() {
            return Err(Error::InvalidPdf(format!(
                "byte range {} does not fit the reserved slot",
                text
            )));
        }
        Ok(format!("{:<width$}", text, width = BYTE_RANGE_SLOT.len()))
    }

    /// End of the second span.
    pub fn end(&self) -> usize {
        self.offset2 + self.length2
    }

    /// Whether the second span reaches the end of a file of `file_len` bytes.
    pub fn covers_to_end(&self, file_len: usize) -> bool {
        self.end() == file_len
    }

    /// The excluded gap between the two spans.
    pub fn gap(&self) -> Range<usize> {
        self.offset1 + self.length1..self.offset2
    }

    /// Check the range against a file of `file_len` bytes and, when known, the span of the
    /// `/Contents` string it is meant to exclude.
    pub fn validate(&self, file_len: usize, contents_span: Option<&Range<usize>>) -> Result<()> {
        if self.offset1 != 0 {
            return Err(Error::IntegrityViolation(format!(
                "byte range starts at {}, not 0",
                self.offset1
            )));
        }
        if self.length1 > self.offset2 {
            return Err(Error::IntegrityViolation(format!(
                "byte range spans overlap: first ends at {}, second starts at {}",
                self.length1, self.offset2
            )));
        }
        let end = self
            .offset2
            .checked_add(self.length2)
            .ok_or_else(|| Error::IntegrityViolation("byte range overflows".to_string()))?;
        if end > file_len {
            return Err(Error::IntegrityViolation(format!(
                "byte range ends at {}, beyond the file length {}",
                end, file_len
            )));
        }
        if let Some(span) = contents_span {
            if self.gap() != *span {
                return Err(Error::IntegrityViolation(format!(
                    "byte range excludes {:?}, but /Contents occupies {:?}",
                    self.gap(),
                    span
                )));
            }
        }
        Ok(())
    }

    /// Borrow the signed spans of `data`.
    pub fn signable<'a>(&self, data: &'a [u8]) -> Result<SignableContent<'a>> {
        let first = data.get(self.offset1..self.offset1 + self.length1);
        let second = data.get(self.offset2..self.end());
        match (first, second) {
            (Some(first), Some(second)) => Ok(SignableContent { first, second }),
            _ => Err(Error::IntegrityViolation(format!(
                "byte range {} exceeds file size {}",
                self.to_pdf_array(),
                data.len()
            ))),
        }
    }
}

/// Two-segment view of the bytes a signature covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignableContent<'a> {
    /// Bytes before the signature value
    pub first: &'a [u8],
    /// Bytes after the signature value
    pub second: &'a [u8],
}

impl SignableContent<'_> {
    /// Digest of both segments in order.
    pub fn digest(&self, algorithm: DigestAlgorithm) -> Vec<u8> {
        algorithm.digest_chunks([self.first, self.second])
    }

    /// Total signed length.
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    /// Whether both segments are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenated copy of the signed bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(self.first);
        out.extend_from_slice(self.second);
        out
    }
}

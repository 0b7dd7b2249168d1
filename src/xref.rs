//! Cross-reference parsing.
//!
//! Maps object numbers to byte offsets (or object-stream slots). Both classic `xref`
//! tables and PDF 1.5 cross-reference streams are read, and `/Prev` chains are followed
//! so that every incremental update contributes its entries. Newer sections win.

use crate::error::{Error, Result};
use crate::lexer::{skip_ws, token, Token};
use crate::object::Object;
use crate::parser::{parse_indirect_object_at, parse_object};
use std::collections::{HashMap, HashSet};

/// Location of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Free slot
    Free,
    /// Object stored at a byte offset
    Uncompressed {
        /// Byte offset of `N G obj`
        offset: usize,
        /// Generation number
        generation: u16,
    },
    /// Object stored inside an object stream
    Compressed {
        /// Object number of the containing `/ObjStm`
        stream_id: u32,
        /// Index within the stream
        index: u32,
    },
}

/// Merged cross-reference information for a whole file.
#[derive(Debug, Clone, Default)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    trailer: Option<HashMap<String, Object>>,
}

impl CrossRefTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any previous one.
    pub fn add_entry(&mut self, object_number: u32, entry: XRefEntry) {
        self.entries.insert(object_number, entry);
    }

    /// Look up an entry.
    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(&object_number)
    }

    /// All entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &XRefEntry)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Trailer dictionary of the newest section.
    pub fn trailer(&self) -> Option<&HashMap<String, Object>> {
        self.trailer.as_ref()
    }

    /// Replace the trailer.
    pub fn set_trailer(&mut self, trailer: HashMap<String, Object>) {
        self.trailer = Some(trailer);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fill in entries from an older section. Entries already present are kept.
    fn merge_older(&mut self, older: CrossRefTable) {
        for (id, entry) in older.entries {
            self.entries.entry(id).or_insert(entry);
        }
        if self.trailer.is_none() {
            self.trailer = older.trailer;
        }
    }
}

/// Find the offset named by the last `startxref` in the file.
pub fn find_xref_offset(data: &[u8]) -> Result<usize> {
    // startxref lives in the last few hundred bytes; search a generous tail.
    let tail_start = data.len().saturating_sub(4096);
    let tail = &data[tail_start..];
    let pos = tail
        .windows(b"startxref".len())
        .rposition(|w| w == b"startxref")
        .ok_or(Error::InvalidXref)?;
    let after = &tail[pos + b"startxref".len()..];
    match token(after) {
        Ok((_, Token::Integer(offset))) if offset >= 0 && (offset as usize) < data.len() => {
            Ok(offset as usize)
        },
        _ => Err(Error::InvalidXref),
    }
}

/// Parse the cross-reference section at `offset` and every section reachable through `/Prev`.
pub fn parse_xref_chain(data: &[u8], offset: usize) -> Result<CrossRefTable> {
    let mut merged = CrossRefTable::new();
    let mut visited = HashSet::new();
    let mut next = Some(offset);

    while let Some(offset) = next.take() {
        if !visited.insert(offset) {
            log::warn!("xref /Prev loop at offset {}", offset);
            break;
        }
        let section = parse_xref_section(data, offset)?;
        let trailer = section.trailer().cloned().unwrap_or_default();

        // Hybrid files point at an xref stream holding the compressed entries.
        let mut section = section;
        if let Some(stm) = trailer.get("XRefStm").and_then(|o| o.as_integer()) {
            if stm >= 0 && visited.insert(stm as usize) {
                match parse_xref_stream(data, stm as usize) {
                    Ok(stream) => {
                        // The classic part lists compressed objects as free.
                        for (id, entry) in stream.entries {
                            match section.entries.get(&id) {
                                None | Some(XRefEntry::Free) => {
                                    section.entries.insert(id, entry);
                                },
                                Some(_) => {},
                            }
                        }
                    },
                    Err(e) => log::warn!("ignoring unreadable /XRefStm at {}: {}", stm, e),
                }
            }
        }

        merged.merge_older(section);
        next = trailer
            .get("Prev")
            .and_then(|p| p.as_integer())
            .filter(|p| *p >= 0)
            .map(|p| p as usize);
    }

    Ok(merged)
}

/// Parse one section, classic or stream, without following `/Prev`.
pub fn parse_xref_section(data: &[u8], offset: usize) -> Result<CrossRefTable> {
    let slice = data.get(offset..).ok_or(Error::InvalidXref)?;
    let (slice, _) = skip_ws(slice).map_err(|_| Error::InvalidXref)?;
    if slice.starts_with(b"xref") {
        parse_traditional_xref(slice)
    } else {
        parse_xref_stream(data, offset)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.data.len() && crate::lexer::is_whitespace(self.data[self.pos]) {
            self.pos += 1;
        }
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    fn word(&mut self) -> Option<&'a [u8]> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.data.len()
            && !crate::lexer::is_whitespace(self.data[self.pos])
            && !crate::lexer::is_delimiter(self.data[self.pos])
        {
            self.pos += 1;
        }
        (self.pos > start).then(|| &self.data[start..self.pos])
    }

    fn number(&mut self) -> Option<u64> {
        let word = self.word()?;
        std::str::from_utf8(word).ok()?.parse().ok()
    }
}

fn parse_traditional_xref(section: &[u8]) -> Result<CrossRefTable> {
    let mut table = CrossRefTable::new();
    let mut cursor = Cursor {
        data: section,
        pos: b"xref".len(),
    };

    loop {
        cursor.skip_ws();
        if cursor.rest().starts_with(b"trailer") {
            cursor.pos += b"trailer".len();
            break;
        }
        let (Some(start), Some(count)) = (cursor.number(), cursor.number()) else {
            return Err(Error::InvalidXref);
        };
        if count > 10_000_000 {
            return Err(Error::InvalidXref);
        }
        for i in 0..count {
            let offset = cursor.number().ok_or(Error::InvalidXref)?;
            let generation = cursor.number().ok_or(Error::InvalidXref)?;
            let kind = cursor.word().ok_or(Error::InvalidXref)?;
            let id = (start + i) as u32;
            let entry = match kind {
                b"n" => XRefEntry::Uncompressed {
                    offset: offset as usize,
                    generation: generation.min(u16::MAX as u64) as u16,
                },
                b"f" => XRefEntry::Free,
                _ => return Err(Error::InvalidXref),
            };
            table.add_entry(id, entry);
        }
    }

    let (_, trailer) = parse_object(cursor.rest()).map_err(|_| Error::InvalidXref)?;
    match trailer {
        Object::Dictionary(dict) => table.set_trailer(dict),
        _ => return Err(Error::InvalidXref),
    }
    Ok(table)
}

fn parse_xref_stream(data: &[u8], offset: usize) -> Result<CrossRefTable> {
    let (_, obj) = parse_indirect_object_at(data, offset)?;
    let dict = match &obj {
        Object::Stream { dict, .. } if dict.get("Type").and_then(|t| t.as_name()) == Some("XRef") => {
            dict.clone()
        },
        _ => return Err(Error::InvalidXref),
    };
    let decoded = obj.decode_stream_data()?;

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|w| w.as_array())
        .ok_or(Error::InvalidXref)?
        .iter()
        .map(|w| w.as_integer().unwrap_or(0).max(0) as usize)
        .collect();
    if widths.len() != 3 || widths.iter().any(|w| *w > 8) {
        return Err(Error::InvalidXref);
    }
    let size = dict.get("Size").and_then(|s| s.as_integer()).unwrap_or(0).max(0) as u64;
    let index: Vec<u64> = match dict.get("Index").and_then(|i| i.as_array()) {
        Some(arr) => arr.iter().map(|v| v.as_integer().unwrap_or(0).max(0) as u64).collect(),
        None => vec![0, size],
    };

    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(Error::InvalidXref);
    }
    let mut rows = decoded.chunks_exact(row_len);
    let mut table = CrossRefTable::new();

    for pair in index.chunks(2) {
        let (start, count) = match pair {
            [start, count] => (*start, *count),
            _ => break,
        };
        for id in start..start + count {
            let Some(row) = rows.next() else {
                log::warn!("xref stream at {} shorter than its /Index", offset);
                break;
            };
            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            // Type defaults to 1 when its field width is zero.
            let kind = if widths[0] == 0 { 1 } else { read_be(f1) };
            let entry = match kind {
                0 => XRefEntry::Free,
                1 => XRefEntry::Uncompressed {
                    offset: read_be(f2) as usize,
                    generation: read_be(f3).min(u16::MAX as u64) as u16,
                },
                2 => XRefEntry::Compressed {
                    stream_id: read_be(f2) as u32,
                    index: read_be(f3) as u32,
                },
                _ => continue,
            };
            table.add_entry(id as u32, entry);
        }
    }

    table.set_trailer(dict);
    Ok(table)
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSIC: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n\
xref\n0 2\n0000000000 65535 f \n0000000009 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\n\
startxref\n45\n%%EOF\n";

    #[test]
    fn test_find_xref_offset() {
        assert_eq!(find_xref_offset(CLASSIC).unwrap(), 45);
        assert!(find_xref_offset(b"%PDF-1.4\nno xref here").is_err());
    }

    #[test]
    fn test_parse_classic_section() {
        let table = parse_xref_chain(CLASSIC, 45).unwrap();
        assert_eq!(table.get(0), Some(&XRefEntry::Free));
        assert_eq!(
            table.get(1),
            Some(&XRefEntry::Uncompressed {
                offset: 9,
                generation: 0
            })
        );
        let trailer = table.trailer().unwrap();
        assert_eq!(trailer.get("Size").and_then(|s| s.as_integer()), Some(2));
    }

    #[test]
    fn test_prev_chain_newer_entries_win() {
        let mut data = CLASSIC.to_vec();
        let obj_offset = data.len();
        data.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Version /1.7 >>\nendobj\n");
        let xref_offset = data.len();
        data.extend_from_slice(
            format!(
                "xref\n1 1\n{:010} 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R /Prev 45 >>\nstartxref\n{}\n%%EOF\n",
                obj_offset, xref_offset
            )
            .as_bytes(),
        );
        assert_eq!(find_xref_offset(&data).unwrap(), xref_offset);
        let table = parse_xref_chain(&data, xref_offset).unwrap();
        assert_eq!(
            table.get(1),
            Some(&XRefEntry::Uncompressed {
                offset: obj_offset,
                generation: 0
            })
        );
        assert_eq!(table.get(0), Some(&XRefEntry::Free));
        assert!(table.trailer().unwrap().contains_key("Prev"));
    }

    #[test]
    fn test_malformed_entry_is_rejected() {
        let data = b"xref\n0 1\n0000000000 65535 x \ntrailer\n<< >>\n";
        assert!(parse_xref_section(data, 0).is_err());
    }

    #[test]
    fn test_read_be() {
        assert_eq!(read_be(&[0x01, 0x02]), 0x0102);
        assert_eq!(read_be(&[]), 0);
    }
}

//! Cross-reference reconstruction for damaged files.
//!
//! Scans the whole file for `N G obj` headers. Later definitions of the same object
//! number win, which matches incremental-update semantics.

use crate::error::{Error, Result};
use crate::object::{Object, ObjectRef};
use crate::parser::{parse_indirect_object_at, parse_object};
use crate::xref::{CrossRefTable, XRefEntry};
use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    static ref RE_OBJ_HEADER: regex::bytes::Regex =
        regex::bytes::Regex::new(r"(?-u)(?:^|[\r\n\s])(\d{1,10})\s+(\d{1,5})\s+obj\b").unwrap();
    static ref RE_TRAILER: regex::bytes::Regex = regex::bytes::Regex::new(r"trailer\s*<<").unwrap();
}

/// Rebuild the cross-reference table and trailer by scanning `data`.
pub fn reconstruct_xref(data: &[u8]) -> Result<CrossRefTable> {
    log::warn!("reconstructing cross-reference table by scanning {} bytes", data.len());

    let mut table = CrossRefTable::new();
    for capture in RE_OBJ_HEADER.captures_iter(data) {
        let (Some(id), Some(gen)) = (capture.get(1), capture.get(2)) else {
            continue;
        };
        let parse = |m: regex::bytes::Match<'_>| -> Option<u64> {
            std::str::from_utf8(m.as_bytes()).ok()?.parse().ok()
        };
        let (Some(id_num), Some(gen_num)) = (parse(id), parse(gen)) else {
            continue;
        };
        table.add_entry(
            id_num as u32,
            XRefEntry::Uncompressed {
                offset: id.start(),
                generation: gen_num.min(u16::MAX as u64) as u16,
            },
        );
    }

    if table.is_empty() {
        return Err(Error::InvalidPdf("no objects found while scanning file".to_string()));
    }

    let trailer = match find_last_trailer(data) {
        Some(trailer) if trailer.contains_key("Root") => trailer,
        _ => minimal_trailer(data, &table)?,
    };
    table.set_trailer(trailer);
    log::debug!("reconstructed {} cross-reference entries", table.len());
    Ok(table)
}

fn find_last_trailer(data: &[u8]) -> Option<HashMap<String, Object>> {
    let found = RE_TRAILER.find_iter(data).last()?;
    let dict_start = found.end() - 2;
    match parse_object(&data[dict_start..]) {
        Ok((_, Object::Dictionary(dict))) => Some(dict),
        _ => None,
    }
}

fn minimal_trailer(data: &[u8], table: &CrossRefTable) -> Result<HashMap<String, Object>> {
    let mut max_id = 0u32;
    let mut root = None;
    for (id, entry) in table.entries() {
        max_id = max_id.max(id);
        if let XRefEntry::Uncompressed { offset, generation } = entry {
            if let Ok((_, obj)) = parse_indirect_object_at(data, *offset) {
                let is_catalog =
                    obj.as_dict().and_then(|d| d.get("Type")).and_then(|t| t.as_name()) == Some("Catalog");
                if is_catalog {
                    root = Some(ObjectRef::new(id, *generation));
                }
            }
        }
    }
    let root = root.ok_or_else(|| Error::InvalidPdf("no catalog found while scanning file".to_string()))?;

    let mut trailer = HashMap::new();
    trailer.insert("Root".to_string(), Object::Reference(root));
    trailer.insert("Size".to_string(), Object::Integer(max_id as i64 + 1));
    Ok(trailer)
}

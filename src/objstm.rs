//! Object stream parsing (`/Type /ObjStm`, PDF 1.5+).
//!
//! The decoded stream starts with `/N` pairs of `object-number offset`, followed by the
//! object bodies; offsets are relative to `/First`.

use crate::error::{Error, Result};
use crate::object::Object;
use crate::parser::parse_object;
use std::collections::HashMap;

/// Parse an object stream into its member objects, keyed by object number.
pub fn parse_object_stream(stream_obj: &Object) -> Result<HashMap<u32, Object>> {
    let dict = match stream_obj {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: other.type_name().to_string(),
            })
        },
    };
    if dict.get("Type").and_then(|t| t.as_name()) != Some("ObjStm") {
        return Err(Error::InvalidPdf("object stream without /Type /ObjStm".to_string()));
    }
    let count = dict
        .get("N")
        .and_then(|n| n.as_integer())
        .filter(|n| *n >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream without valid /N".to_string()))? as usize;
    let first = dict
        .get("First")
        .and_then(|n| n.as_integer())
        .filter(|n| *n >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream without valid /First".to_string()))?
        as usize;

    let data = stream_obj.decode_stream_data()?;
    if first > data.len() {
        return Err(Error::InvalidPdf(format!(
            "object stream /First {} beyond decoded length {}",
            first,
            data.len()
        )));
    }

    let pairs = parse_header(&data[..first], count)?;
    let mut objects = HashMap::with_capacity(pairs.len());
    for (id, relative) in pairs {
        let Some(body) = data.get(first + relative..) else {
            log::warn!("object {} points past the end of its object stream", id);
            continue;
        };
        match parse_object(body) {
            Ok((_, obj)) => {
                objects.insert(id, obj);
            },
            Err(e) => log::warn!("object {} in object stream failed to parse: {:?}", id, e),
        }
    }
    Ok(objects)
}

fn parse_header(header: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
    let numbers: Vec<usize> = header
        .split(|c| crate::lexer::is_whitespace(*c))
        .filter(|w| !w.is_empty())
        .map(|w| {
            std::str::from_utf8(w)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::InvalidPdf("non-numeric object stream header".to_string()))
        })
        .collect::<Result<_>>()?;
    if numbers.len() < count * 2 {
        return Err(Error::InvalidPdf(format!(
            "object stream header has {} numbers, expected {}",
            numbers.len(),
            count * 2
        )));
    }
    Ok(numbers
        .chunks_exact(2)
        .take(count)
        .map(|pair| (pair[0] as u32, pair[1]))
        .collect())
}

//! PDF writing primitives used by the signing pipeline.
//!
//! - [`ObjectSerializer`] turns [`Object`](crate::object::Object)s into bytes.
//! - [`IncrementalUpdate`] appends objects, an xref section and a trailer to an existing file.

mod incremental;
mod object_serializer;

pub use incremental::{IncrementalUpdate, SerializedUpdate};
pub use object_serializer::{hex_upper, ObjectSerializer};

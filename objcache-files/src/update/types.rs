use std::io::Cursor;

use objcache_files_derive_parseable::{Emit, Parse};

use crate::ParserError;
use crate::common::reader::Parseable;
use crate::common::types::{C3Vector, C4Quaternion};
use crate::common::writer::Emittable;

/// The spatial part at the very front of a packed object update. Whatever follows it belongs to the
/// network layer and is never looked at by the cache.
#[derive(Debug, Copy, Clone, Default, PartialEq, Parse, Emit)]
pub struct ObjectUpdatePreamble {
    /// 0 for root objects
    pub parent_id: u32,
    /// Region local for roots, parent local for children
    pub position: C3Vector,
    pub scale: C3Vector,
    pub rotation: C4Quaternion,
}

impl ObjectUpdatePreamble {
    pub const SIZE: usize = 4 + 3 * 4 + 3 * 4 + 4 * 4;

    pub fn parse_from(payload: &[u8]) -> Result<ObjectUpdatePreamble, ParserError> {
        if payload.len() < Self::SIZE {
            return Err(ParserError::FormatError {
                reason: "Payload shorter than the object update preamble",
            });
        }
        Self::parse(&mut Cursor::new(payload))
    }

    /// Builds a complete payload: this preamble followed by `body`.
    pub fn pack(&self, body: &[u8]) -> Result<Vec<u8>, ParserError> {
        let mut payload = Vec::with_capacity(Self::SIZE + body.len());
        self.emit(&mut payload)?;
        payload.extend_from_slice(body);
        Ok(payload)
    }
}

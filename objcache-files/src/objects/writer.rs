use std::io::Write;

use crate::ParserError;
use crate::common::types::CacheId;
use crate::common::writer::Emittable;
use crate::objects::types::{CachedObject, MAX_PAYLOAD_SIZE, ObjectCacheFile};

pub struct ObjectCacheWriter {}

impl ObjectCacheWriter {
    pub fn write_asset<W: Write>(wtr: &mut W, file: &ObjectCacheFile) -> Result<(), ParserError> {
        Self::write_objects(wtr, &file.cache_id, file.objects.iter(), file.objects.len())
    }

    /// Streams `count` objects; lets callers write straight out of their own tables without building an
    /// intermediate `ObjectCacheFile`.
    pub fn write_objects<'a, W: Write, I: Iterator<Item = &'a CachedObject>>(
        wtr: &mut W,
        cache_id: &CacheId,
        objects: I,
        count: usize,
    ) -> Result<(), ParserError> {
        let count = u32::try_from(count).map_err(|_| ParserError::FormatError {
            reason: "Too many records for a single cache file",
        })?;

        cache_id.emit(wtr)?;
        count.emit(wtr)?;

        let mut written = 0u32;
        for object in objects {
            let header = object.header();
            if header.payload_size == 0 || header.payload_size > MAX_PAYLOAD_SIZE {
                return Err(ParserError::BogusRecordSize {
                    local_id: header.local_id,
                    size: header.payload_size,
                });
            }

            header.emit(wtr)?;
            wtr.write_all(&object.payload)?;
            written += 1;
        }

        if written != count {
            return Err(ParserError::FormatError {
                reason: "Record count does not match the announced count",
            });
        }

        wtr.flush()?;
        Ok(())
    }
}

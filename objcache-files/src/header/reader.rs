use std::io::{Read, Write};

use crate::ParserError;
use crate::common::reader::{Parseable, read_chunk_array};
use crate::common::writer::Emittable;
use crate::header::types::{CacheHeader, HEADER_MAGIC, HeaderEntry, OBJECT_CACHE_VERSION};

pub struct CacheHeaderReader {}

impl CacheHeaderReader {
    pub fn parse_asset<R: Read>(rdr: &mut R) -> Result<CacheHeader, ParserError> {
        let magic = match u32::parse(rdr) {
            Err(err) if err.is_eof() => return Err(ParserError::EmptySource),
            res => res?,
        };
        if magic != HEADER_MAGIC {
            return Err(ParserError::InvalidMagicValue { magic });
        }

        let version = u32::parse(rdr)?;
        if version != OBJECT_CACHE_VERSION {
            return Err(ParserError::UnsupportedVersion {
                version,
                expected: OBJECT_CACHE_VERSION,
            });
        }

        let entries = read_chunk_array::<HeaderEntry, _>(rdr)?;
        Ok(CacheHeader { version, entries })
    }

    pub fn write_asset<W: Write>(wtr: &mut W, header: &CacheHeader) -> Result<(), ParserError> {
        HEADER_MAGIC.emit(wtr)?;
        header.version.emit(wtr)?;
        for entry in &header.entries {
            entry.emit(wtr)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

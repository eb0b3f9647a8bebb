use std::io::{Read, Write};

use crate::ParserError;
use crate::common::reader::{Parseable, read_blob};
use crate::common::types::CacheId;
use crate::common::writer::{Emittable, write_blob};
use crate::extras::types::{ExtrasFile, MAX_OVERRIDE_SIZE};

pub struct ExtrasReader {}

impl ExtrasReader {
    pub fn parse_asset<R: Read>(rdr: &mut R) -> Result<ExtrasFile, ParserError> {
        let cache_id = match CacheId::parse(rdr) {
            Err(err) if err.is_eof() => return Err(ParserError::EmptySource),
            res => res?,
        };

        let count = u32::parse(rdr)?;
        let mut overrides = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let local_id = u32::parse(rdr)?;
            let data = read_blob(rdr, MAX_OVERRIDE_SIZE)?;
            overrides.push((local_id, data));
        }

        Ok(ExtrasFile { cache_id, overrides })
    }

    pub fn write_asset<W: Write>(wtr: &mut W, file: &ExtrasFile) -> Result<(), ParserError> {
        file.cache_id.emit(wtr)?;
        (file.overrides.len() as u32).emit(wtr)?;
        for (local_id, data) in &file.overrides {
            local_id.emit(wtr)?;
            write_blob(wtr, data)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

use std::io::Read;

use log::warn;

use crate::ParserError;
use crate::common::reader::Parseable;
use crate::common::types::CacheId;
use crate::objects::types::{CachedObject, CachedObjectHeader, MAX_PAYLOAD_SIZE, ObjectCacheFile};

pub struct ObjectCacheReader {}

impl ObjectCacheReader {
    /// Parses only the leading cache id, which is enough to decide whether the file is worth reading.
    pub fn parse_cache_id<R: Read>(rdr: &mut R) -> Result<CacheId, ParserError> {
        CacheId::parse(rdr)
    }

    pub fn parse_asset<R: Read>(rdr: &mut R) -> Result<ObjectCacheFile, ParserError> {
        let cache_id = match CacheId::parse(rdr) {
            Err(err) if err.is_eof() => return Err(ParserError::EmptySource),
            res => res?,
        };
        Self::parse_objects(rdr, cache_id)
    }

    /// Continues after the cache id has already been consumed.
    pub fn parse_objects<R: Read>(rdr: &mut R, cache_id: CacheId) -> Result<ObjectCacheFile, ParserError> {
        let count = u32::parse(rdr)?;
        let mut objects = Vec::with_capacity(count.min(4096) as usize);

        for _ in 0..count {
            let header = match CachedObjectHeader::parse(rdr) {
                // A file that stops cleanly between two records lost its tail, what we have is still good.
                Err(err) if err.is_eof() && !objects.is_empty() => {
                    warn!(
                        "Object cache file ends after {} of {} records, keeping those",
                        objects.len(),
                        count
                    );
                    break;
                }
                res => res?,
            };

            if header.local_id == 0 {
                return Err(ParserError::FormatError {
                    reason: "Record with local id 0",
                });
            }

            if header.payload_size == 0 || header.payload_size > MAX_PAYLOAD_SIZE {
                // We will not bother seeking, the rest of this file is likely bogus as well.
                return Err(ParserError::BogusRecordSize {
                    local_id: header.local_id,
                    size: header.payload_size,
                });
            }

            let mut payload = vec![0; header.payload_size as usize];
            rdr.read_exact(&mut payload)?;

            objects.push(CachedObject {
                local_id: header.local_id,
                crc: header.crc,
                hit_count: header.hit_count,
                dupe_count: header.dupe_count,
                crc_change_count: header.crc_change_count,
                payload,
            });
        }

        Ok(ObjectCacheFile { cache_id, objects })
    }
}

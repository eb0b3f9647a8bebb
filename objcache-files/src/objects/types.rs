use objcache_files_derive_parseable::{Emit, Parse};

use crate::common::types::CacheId;

/// Payloads outside of 1..=MAX_PAYLOAD_SIZE are treated as corruption.
pub const MAX_PAYLOAD_SIZE: u32 = 10000;

/// The fixed part in front of every cached object's payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Parse, Emit)]
pub struct CachedObjectHeader {
    pub local_id: u32,
    pub crc: u32,
    pub hit_count: u32,
    pub dupe_count: u32,
    pub crc_change_count: u32,
    pub payload_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedObject {
    pub local_id: u32,
    pub crc: u32,
    pub hit_count: u32,
    pub dupe_count: u32,
    pub crc_change_count: u32,
    /// The serialized object update, opaque to the cache.
    pub payload: Vec<u8>,
}

impl CachedObject {
    pub fn header(&self) -> CachedObjectHeader {
        CachedObjectHeader {
            local_id: self.local_id,
            crc: self.crc,
            hit_count: self.hit_count,
            dupe_count: self.dupe_count,
            crc_change_count: self.crc_change_count,
            payload_size: self.payload.len() as u32,
        }
    }
}

/// objects_<x>_<y>.slc
#[derive(Debug, Clone, Default)]
pub struct ObjectCacheFile {
    pub cache_id: CacheId,
    pub objects: Vec<CachedObject>,
}

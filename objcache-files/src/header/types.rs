use objcache_files_derive_parseable::{Emit, Parse};

/// Bumped whenever any of the cache file layouts change; a mismatch wipes the whole cache directory.
pub const OBJECT_CACHE_VERSION: u32 = 10002;

pub const HEADER_MAGIC: u32 = u32::from_be_bytes(*b"OCHD");

#[derive(Debug, Copy, Clone, PartialEq, Eq, Parse, Emit)]
pub struct HeaderEntry {
    pub region_handle: u64,
    /// Unix seconds of the last save of this region
    pub last_access: u32,
}

/// object.cache: the list of regions that currently own a cache file.
#[derive(Debug, Clone)]
pub struct CacheHeader {
    pub version: u32,
    pub entries: Vec<HeaderEntry>,
}

impl Default for CacheHeader {
    fn default() -> Self {
        CacheHeader {
            version: OBJECT_CACHE_VERSION,
            entries: vec![],
        }
    }
}

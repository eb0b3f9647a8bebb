use crate::common::types::CacheId;

/// Longest material override record we are willing to load.
pub const MAX_OVERRIDE_SIZE: u32 = 64 * 1024;

/// objects_<x>_<y>_extras.slc: per-object material overrides, keyed by local id. The records themselves
/// are opaque and passed through unchanged.
#[derive(Debug, Clone, Default)]
pub struct ExtrasFile {
    pub cache_id: CacheId,
    pub overrides: Vec<(u32, Vec<u8>)>,
}

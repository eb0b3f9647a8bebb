use crate::cache::payload::{ExtentsDecoder, PackedUpdateDecoder};
use crate::region::region_cache::histogram;
use anyhow::Context;
use log::{debug, info, warn};
use objcache_files::objects::reader::ObjectCacheReader;
use objcache_files::objects::types::ObjectCacheFile;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub fn read_cache_file(path: &Path) -> anyhow::Result<ObjectCacheFile> {
    let file = File::open(path).with_context(|| format!("Opening {}", path.display()))?;
    ObjectCacheReader::parse_asset(&mut BufReader::new(file)).with_context(|| format!("Parsing {}", path.display()))
}

/// Logs every record of an object cache file, and how often they were hit and changed.
pub fn inspect_file(path: &Path) -> anyhow::Result<()> {
    let cache = read_cache_file(path)?;
    info!("{}: cache id {}, {} objects", path.display(), cache.cache_id, cache.objects.len());

    let mut undecodable = 0;
    for object in &cache.objects {
        match PackedUpdateDecoder.decode(&object.payload) {
            Ok(extents) => debug!(
                "  #{:<8} crc {:08x} hits {:>4} dupes {:>4} changes {:>4} {:>5} bytes, parent {}, at {}",
                object.local_id,
                object.crc,
                object.hit_count,
                object.dupe_count,
                object.crc_change_count,
                object.payload.len(),
                extents.parent_id,
                extents.position
            ),
            Err(err) => {
                undecodable += 1;
                debug!("  #{:<8} crc {:08x} not decodable: {}", object.local_id, object.crc, err);
            }
        }
    }

    if undecodable > 0 {
        warn!("{} payloads don't start with a packed update", undecodable);
    }

    let roots = cache
        .objects
        .iter()
        .filter_map(|object| PackedUpdateDecoder.decode(&object.payload).ok())
        .filter(|extents| extents.parent_id == 0)
        .count();
    info!("  roots: {}", roots);
    info!(
        "  hits    [0, 1, 2..4, 5+]: {:?}",
        histogram(cache.objects.iter().map(|object| object.hit_count))
    );
    info!(
        "  changes [0, 1, 2..4, 5+]: {:?}",
        histogram(cache.objects.iter().map(|object| object.crc_change_count))
    );
    Ok(())
}

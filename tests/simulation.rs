mod common;

use common::*;
use glam::Vec3;
use objcache::demos::simulation::{SimulationOptions, run};

#[test]
fn second_session_is_served_from_disk() -> anyhow::Result<()> {
    let dir = TempCacheDir::new("simulation");
    let settings = disk_settings(&dir);
    let options = SimulationOptions {
        objects: 300,
        frames: 60,
        seed: 11,
        region_handle: REGION_HANDLE,
        camera: Vec3::new(128.0, 128.0, 40.0),
    };

    let (first, second) = run(&settings, &options)?;

    assert_eq!(first.requested_objects, 0);
    assert_eq!(first.stats.additions, 300);
    assert!(first.live_entities > 0);

    assert_eq!(second.cached_entries, 300);
    assert_eq!(second.stats.hits + second.stats.crc_misses + second.stats.full_misses, 300);
    assert_eq!(second.requested_objects as u32, second.stats.crc_misses + second.stats.full_misses);
    assert!(second.hit_rate() > 0.7, "hit rate {}", second.hit_rate());
    assert!(second.live_entities > 0);
    Ok(())
}

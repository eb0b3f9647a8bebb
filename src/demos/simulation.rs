use crate::cache::entry::{LocalId, NO_UPDATE_FLAGS};
use crate::cache::payload::pack_update;
use crate::cache::store::ObjectCacheStore;
use crate::entity::entity_tracker::EntityTracker;
use crate::region::camera::CameraState;
use crate::region::handshake::HandshakeReplyFlags;
use crate::region::region_cache::{OutboundMessage, ProbeResult, RegionCache, RegionCacheStats};
use crate::settings::CacheSettings;
use anyhow::{Context, bail};
use glam::Vec3;
use itertools::Itertools;
use log::{debug, info};
use objcache_files::common::types::CacheId;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const REGION_NAME: &str = "Simulated Region";
const FRAME_BUDGET: Duration = Duration::from_millis(4);
const ORBIT_RADIUS: f32 = 48.0;
const CHANGED_OBJECTS_SHARE: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub objects: u32,
    pub frames: u32,
    pub seed: u64,
    pub region_handle: u64,
    pub camera: Vec3,
}

/// One object as the server knows it.
#[derive(Debug, Clone)]
pub struct SyntheticObject {
    pub local_id: LocalId,
    pub crc: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub stats: RegionCacheStats,
    pub live_entities: u32,
    pub cached_entries: usize,
    pub requested_objects: usize,
}

impl SessionReport {
    /// Share of the server's objects that did not have to be sent in full.
    pub fn hit_rate(&self) -> f32 {
        let probes = self.stats.hits + self.stats.crc_misses + self.stats.full_misses;
        if probes == 0 {
            return 0.0;
        }
        self.stats.hits as f32 / probes as f32
    }
}

/// A region full of linksets, in the order the server would stream them: children of a linkset ahead
/// of their root, so the cache has to park them.
pub fn generate_region(rng: &mut StdRng, object_count: u32) -> anyhow::Result<Vec<SyntheticObject>> {
    let mut linksets = vec![];
    let mut next_id: LocalId = 1;

    while next_id <= object_count {
        let root_id = next_id;
        next_id += 1;

        let root_position = Vec3::new(
            rng.random_range(4.0..252.0),
            rng.random_range(4.0..252.0),
            rng.random_range(20.0..60.0),
        );
        let root_scale = Vec3::new(
            rng.random_range(0.2..6.0),
            rng.random_range(0.2..6.0),
            rng.random_range(0.2..4.0),
        );

        let mut linkset = vec![];
        let child_count = rng.random_range(0..=4u32).min(object_count.saturating_sub(next_id - 1));
        for _ in 0..child_count {
            let offset = Vec3::new(
                rng.random_range(-5.0..5.0),
                rng.random_range(-5.0..5.0),
                rng.random_range(-2.0..2.0),
            );
            let scale = Vec3::splat(rng.random_range(0.1..1.5));
            linkset.push(synthetic_object(rng, next_id, root_id, offset, scale)?);
            next_id += 1;
        }
        linkset.push(synthetic_object(rng, root_id, 0, root_position, root_scale)?);
        linksets.push(linkset);
    }

    linksets.shuffle(rng);
    Ok(linksets.into_iter().flatten().collect_vec())
}

fn synthetic_object(
    rng: &mut StdRng,
    local_id: LocalId,
    parent_id: LocalId,
    position: Vec3,
    scale: Vec3,
) -> anyhow::Result<SyntheticObject> {
    let body = (0..rng.random_range(8..96)).map(|_| rng.random::<u8>()).collect_vec();
    Ok(SyntheticObject {
        local_id,
        crc: rng.random(),
        payload: pack_update(parent_id, position, scale, &body)?,
    })
}

/// The server changed some of its objects between two sessions.
pub fn mutate_region(rng: &mut StdRng, objects: &mut [SyntheticObject]) -> usize {
    let mut changed = 0;
    for object in objects.iter_mut() {
        if rng.random_bool(CHANGED_OBJECTS_SHARE) {
            object.crc = object.crc.wrapping_add(1);
            changed += 1;
        }
    }
    changed
}

/// Runs two sessions against the same synthetic region. The second one starts from what the first one
/// saved to disk.
pub fn run(settings: &CacheSettings, options: &SimulationOptions) -> anyhow::Result<(SessionReport, SessionReport)> {
    if options.objects == 0 {
        bail!("A simulated region needs at least one object");
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut objects = generate_region(&mut rng, options.objects).context("Generating the synthetic region")?;
    let cache_id = CacheId::from(((options.region_handle as u128) << 64) | options.seed as u128);
    info!(
        "Simulating {} objects in region {:#x} (seed {})",
        objects.len(),
        options.region_handle,
        options.seed
    );

    let first = run_session(settings, options, cache_id, &objects)?;
    log_report("First session", &first);

    let changed = mutate_region(&mut rng, &mut objects);
    debug!("{} objects changed on the server in between", changed);

    let second = run_session(settings, options, cache_id, &objects)?;
    log_report("Second session", &second);
    Ok((first, second))
}

fn log_report(title: &str, report: &SessionReport) {
    info!(
        "{}: {} live entities, {} cached entries, {} objects requested, hit rate {:.1}%",
        title,
        report.live_entities,
        report.cached_entries,
        report.requested_objects,
        report.hit_rate() * 100.0
    );
}

/// One login: handshake, object stream, a camera orbiting the region for a number of frames, logout.
pub fn run_session(
    settings: &CacheSettings,
    options: &SimulationOptions,
    cache_id: CacheId,
    objects: &[SyntheticObject],
) -> anyhow::Result<SessionReport> {
    let store = Arc::new(Mutex::new(ObjectCacheStore::open(settings)));
    let mut region = RegionCache::new(options.region_handle, REGION_NAME, settings, EntityTracker::new())
        .with_store(store);

    region.on_region_handshake(cache_id);
    region.wait_for_cache();

    let flags = region
        .drain_outbound()
        .into_iter()
        .find_map(|message| match message {
            OutboundMessage::HandshakeReply { flags } => Some(flags),
            _ => None,
        })
        .context("The region never replied to the handshake")?;

    let by_id: HashMap<LocalId, &SyntheticObject> = objects.iter().map(|object| (object.local_id, object)).collect();
    let mut requested_objects = 0;

    if flags.contains(HandshakeReplyFlags::CACHE_FILE_IS_EMPTY) {
        for object in objects {
            region.apply_full_update(object.local_id, object.crc, object.payload.clone(), NO_UPDATE_FLAGS);
        }
    } else {
        let misses = objects
            .iter()
            .filter(|object| region.probe(object.local_id, object.crc, NO_UPDATE_FLAGS) != ProbeResult::Hit)
            .count();
        debug!("{} of {} compressed updates missed", misses, objects.len());

        region.request_cache_misses();
        for message in region.drain_outbound() {
            let OutboundMessage::RequestObjects { requests } = message else {
                continue;
            };
            requested_objects += requests.len();
            for request in requests {
                if let Some(object) = by_id.get(&request.local_id) {
                    region.apply_full_update(object.local_id, object.crc, object.payload.clone(), NO_UPDATE_FLAGS);
                }
            }
        }
    }

    let params = *region.params();
    let target = Vec3::new(128.0, 128.0, 30.0);
    for frame in 0..options.frames {
        let angle = frame as f32 / options.frames.max(1) as f32 * TAU;
        let origin = options.camera + Vec3::new(angle.cos(), angle.sin(), 0.0) * ORBIT_RADIUS;
        let camera = CameraState::look_at(origin, target, 60f32.to_radians(), 16.0 / 9.0, params.draw_distance, 720);
        region.idle_update(&camera, FRAME_BUDGET);
    }

    let corrections = region.verify_entry_states();
    if corrections > 0 {
        bail!("{} objects ended up in an inconsistent state", corrections);
    }

    region.dump_cache();
    let report = SessionReport {
        stats: region.stats(),
        live_entities: region.scene().live_count(),
        cached_entries: region.len(),
        requested_objects,
    };
    region.shutdown(true);
    Ok(report)
}

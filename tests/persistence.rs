mod common;

use common::*;
use glam::Vec3;
use itertools::Itertools;
use objcache::cache::entry::NO_UPDATE_FLAGS;
use objcache::cache::store::{KeepUnconfirmed, LoadOutcome, ObjectCacheStore, RegionKey, object_file_name};
use objcache::region::handshake::HandshakeReplyFlags;
use objcache::region::region_cache::{OutboundMessage, ProbeResult, RegionCache};
use objcache::settings::CacheSettings;
use objcache_files::common::types::CacheId;
use std::sync::{Arc, Mutex};

fn cache_id() -> CacheId {
    CacheId::from(0x0123_4567_89ab_cdef_0011_2233_4455_6677u128)
}

fn open_region(
    settings: &CacheSettings,
    store: &Arc<Mutex<ObjectCacheStore>>,
    handle: u64,
    cache_id: CacheId,
) -> RegionCache<RecordingScene> {
    let (scene, _log) = RecordingScene::new();
    let mut region = RegionCache::new(handle, format!("Region {:#x}", handle), settings, scene).with_store(store.clone());
    region.on_region_handshake(cache_id);
    region.wait_for_cache();
    region
}

fn reply_flags(region: &mut RegionCache<RecordingScene>) -> Vec<HandshakeReplyFlags> {
    region
        .drain_outbound()
        .into_iter()
        .filter_map(|message| match message {
            OutboundMessage::HandshakeReply { flags } => Some(flags),
            _ => None,
        })
        .collect_vec()
}

/// Ten roots, each with one child, saved by a first session.
fn populate(settings: &CacheSettings) -> Vec<(u32, u32)> {
    let store = Arc::new(Mutex::new(ObjectCacheStore::open(settings)));
    let mut region = open_region(settings, &store, REGION_HANDLE, cache_id());

    for index in 0..10u32 {
        let root = index * 2 + 1;
        region.apply_full_update(root + 1, 500 + root, child_payload(root), NO_UPDATE_FLAGS);
        let position = Vec3::new(20.0 * index as f32 + 10.0, 50.0, 20.0);
        region.apply_full_update(root, 100 + root, root_payload(position), NO_UPDATE_FLAGS);
    }
    let mut pairs = (1..=20u32)
        .map(|local_id| (local_id, region.entry(local_id).unwrap().crc))
        .collect_vec();
    pairs.sort();

    region.shutdown(false);
    pairs
}

#[test]
fn saved_entries_load_again() {
    let dir = TempCacheDir::new("round-trip");
    let settings = disk_settings(&dir);
    let pairs = populate(&settings);

    let store = Arc::new(Mutex::new(ObjectCacheStore::open(&settings)));
    assert!(store.lock().unwrap().contains_region(REGION_HANDLE));
    let mut region = open_region(&settings, &store, REGION_HANDLE, cache_id());

    let loaded = (1..=20u32)
        .filter_map(|local_id| region.entry(local_id).map(|entry| (local_id, entry.crc)))
        .collect_vec();
    assert_eq!(loaded, pairs);

    // nothing is indexed before the server confirmed it
    assert!(region.entry(1).is_some_and(|entry| !entry.confirmed));
    assert_eq!(region.indexed_count(), 0);
    assert_eq!(region.probe(1, 101, NO_UPDATE_FLAGS), ProbeResult::Hit);
    assert!(region.is_indexed(1));
    assert_eq!(reply_flags(&mut region), vec![HandshakeReplyFlags::SEND_ALL_CACHEABLE_OBJECTS]);
}

#[test]
fn overrides_travel_with_their_entries() {
    let dir = TempCacheDir::new("overrides");
    let settings = disk_settings(&dir);

    let store = Arc::new(Mutex::new(ObjectCacheStore::open(&settings)));
    let mut region = open_region(&settings, &store, REGION_HANDLE, cache_id());
    region.apply_full_update(1, 1, root_payload(Vec3::splat(30.0)), NO_UPDATE_FLAGS);
    region.cache_override(1, vec![9, 8, 7]);
    // nothing to attach it to, not saved
    region.cache_override(2, vec![1]);
    region.shutdown(false);

    let mut region = open_region(&settings, &store, REGION_HANDLE, cache_id());
    assert_eq!(region.override_of(1), Some(&[9u8, 8, 7][..]));
    assert_eq!(region.override_of(2), None);
    assert_eq!(region.len(), 1);
    region.probe(1, 1, NO_UPDATE_FLAGS);
}

#[test]
fn unconfirmed_entries_are_dropped_on_exit() {
    let dir = TempCacheDir::new("removal");
    let settings = disk_settings(&dir);
    populate(&settings);

    let store = Arc::new(Mutex::new(ObjectCacheStore::open(&settings)));
    let mut region = open_region(&settings, &store, REGION_HANDLE, cache_id());
    for local_id in 1..=4u32 {
        let crc = region.entry(local_id).unwrap().crc;
        assert_eq!(region.probe(local_id, crc, NO_UPDATE_FLAGS), ProbeResult::Hit);
    }
    region.shutdown(true);

    let region = open_region(&settings, &store, REGION_HANDLE, cache_id());
    assert_eq!(region.len(), 4);
    assert!((1..=4).all(|local_id| region.entry(local_id).is_some()));
}

#[test]
fn removal_policy_is_pluggable() {
    let dir = TempCacheDir::new("keep-unconfirmed");
    let settings = disk_settings(&dir);
    populate(&settings);

    let store = Arc::new(Mutex::new(
        ObjectCacheStore::open(&settings).with_removal_policy(Box::new(KeepUnconfirmed)),
    ));
    let mut region = open_region(&settings, &store, REGION_HANDLE, cache_id());
    region.probe(1, 101, NO_UPDATE_FLAGS);
    region.shutdown(true);

    let region = open_region(&settings, &store, REGION_HANDLE, cache_id());
    assert_eq!(region.len(), 20);
}

#[test]
fn a_region_nobody_saw_keeps_its_file() {
    let dir = TempCacheDir::new("unseen");
    let settings = disk_settings(&dir);
    populate(&settings);

    let store = Arc::new(Mutex::new(ObjectCacheStore::open(&settings)));
    let region = open_region(&settings, &store, REGION_HANDLE, cache_id());
    region.shutdown(true);

    let region = open_region(&settings, &store, REGION_HANDLE, cache_id());
    assert_eq!(region.len(), 20);
}

#[test]
fn handshake_reply_flags() {
    let dir = TempCacheDir::new("handshake");
    let settings = disk_settings(&dir);
    let store = Arc::new(Mutex::new(ObjectCacheStore::open(&settings)));

    let mut region = open_region(&settings, &store, REGION_HANDLE, cache_id());
    assert!(region.is_cache_ready());
    assert_eq!(
        reply_flags(&mut region),
        vec![HandshakeReplyFlags::SEND_ALL_CACHEABLE_OBJECTS | HandshakeReplyFlags::CACHE_FILE_IS_EMPTY]
    );

    // handshakes after the load are answered right away
    region.apply_full_update(1, 1, root_payload(Vec3::splat(30.0)), NO_UPDATE_FLAGS);
    region.on_region_handshake(cache_id());
    assert_eq!(reply_flags(&mut region), vec![HandshakeReplyFlags::SEND_ALL_CACHEABLE_OBJECTS]);

    let ready = std::rc::Rc::new(std::cell::Cell::new(false));
    let flag = ready.clone();
    region.on_cache_ready(Box::new(move || flag.set(true)));
    assert!(ready.get());
}

#[test]
fn changed_cache_id_discards_the_file() {
    let dir = TempCacheDir::new("mismatch");
    let settings = disk_settings(&dir);
    populate(&settings);

    let store = Arc::new(Mutex::new(ObjectCacheStore::open(&settings)));
    let mut region = open_region(&settings, &store, REGION_HANDLE, CacheId::from(42u128));

    assert!(region.is_empty());
    assert_eq!(
        reply_flags(&mut region),
        vec![HandshakeReplyFlags::SEND_ALL_CACHEABLE_OBJECTS | HandshakeReplyFlags::CACHE_FILE_IS_EMPTY]
    );
    assert!(!dir.path.join(object_file_name(REGION_HANDLE)).exists());
    assert!(!store.lock().unwrap().contains_region(REGION_HANDLE));
}

#[test]
fn corrupt_file_starts_cold() -> anyhow::Result<()> {
    let dir = TempCacheDir::new("corrupt");
    let settings = disk_settings(&dir);
    populate(&settings);

    // valid cache id and count, then a record claiming a 20000 byte payload
    let mut bytes = cache_id().0.to_vec();
    bytes.extend_from_slice(&1u32.to_le_bytes());
    for value in [1u32, 1, 0, 0, 0, 20000] {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    let path = dir.path.join(object_file_name(REGION_HANDLE));
    std::fs::write(&path, bytes)?;

    let store = Arc::new(Mutex::new(ObjectCacheStore::open(&settings)));
    let mut region = open_region(&settings, &store, REGION_HANDLE, cache_id());
    assert!(region.is_empty());
    assert!(!path.exists());
    assert!(!store.lock().unwrap().contains_region(REGION_HANDLE));

    // the region works like any cold one
    region.apply_full_update(1, 1, root_payload(Vec3::splat(30.0)), NO_UPDATE_FLAGS);
    region.shutdown(false);
    assert!(path.exists());
    Ok(())
}

#[test]
fn least_recently_used_regions_are_purged() {
    let dir = TempCacheDir::new("lru");
    let settings = CacheSettings {
        cache_size: 16,
        ..disk_settings(&dir)
    };
    let store = Arc::new(Mutex::new(ObjectCacheStore::open(&settings)));

    let handles = (1..=17u64).map(|index| (index * 256) << 32).collect_vec();
    for &handle in &handles {
        let mut region = open_region(&settings, &store, handle, cache_id());
        region.apply_full_update(1, 1, root_payload(Vec3::splat(30.0)), NO_UPDATE_FLAGS);
        region.shutdown(false);
    }

    let store = store.lock().unwrap();
    assert_eq!(store.region_count(), 16);
    assert!(!store.contains_region(handles[0]));
    assert!(!dir.path.join(object_file_name(handles[0])).exists());
    assert!(store.contains_region(handles[16]));
    assert!(dir.path.join(object_file_name(handles[16])).exists());
}

#[test]
fn late_results_are_discarded() {
    let dir = TempCacheDir::new("late");
    let settings = disk_settings(&dir);
    populate(&settings);

    let store = Arc::new(Mutex::new(ObjectCacheStore::open(&settings)));
    let key = RegionKey {
        handle: REGION_HANDLE,
        name: "Late".to_string(),
        cache_id: cache_id(),
    };

    // the region died before the worker answered
    drop(store.lock().unwrap().request_load(key.clone()));
    let (scene, _log) = RecordingScene::new();
    let mut region = RegionCache::new(REGION_HANDLE, "Short lived", &settings, scene).with_store(store.clone());
    region.on_region_handshake(cache_id());
    drop(region);

    // the worker is still around, the file untouched
    let pending = store.lock().unwrap().request_load(key);
    let loaded = pending.wait();
    assert_eq!(loaded.outcome, LoadOutcome::Loaded);
    assert_eq!(loaded.entries.len(), 20);
}

#[test]
fn disabled_cache_never_touches_the_disk() {
    let dir = TempCacheDir::new("disabled");
    let settings = CacheSettings {
        cache_enabled: false,
        ..disk_settings(&dir)
    };
    let store = Arc::new(Mutex::new(ObjectCacheStore::open(&settings)));
    let mut region = open_region(&settings, &store, REGION_HANDLE, cache_id());
    region.apply_full_update(1, 1, root_payload(Vec3::splat(30.0)), NO_UPDATE_FLAGS);
    region.shutdown(false);

    assert!(!dir.path.exists());
}

#![allow(dead_code)]

use glam::Vec3;
use objcache::cache::entry::{CacheEntry, DrawableHandle, LocalId};
use objcache::cache::payload::pack_update;
use objcache::region::camera::CameraState;
use objcache::region::region_cache::RegionCache;
use objcache::region::scene::{Materialized, SceneBridge};
use objcache::settings::CacheSettings;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;

pub const REGION_HANDLE: u64 = (256_000u64 << 32) | 512_000;

/// What the cache asked of the renderer.
#[derive(Debug, Default)]
pub struct SceneLog {
    pub materialized: Vec<LocalId>,
    pub released: Vec<LocalId>,
    /// Every handle passed to `release`, including ones handed out by the test itself
    pub released_handles: Vec<u64>,
    pub flags: Vec<(LocalId, u32)>,
    pub live: HashMap<u64, LocalId>,
}

impl SceneLog {
    pub fn is_live(&self, local_id: LocalId) -> bool {
        self.live.values().any(|&id| id == local_id)
    }

    pub fn handle_of(&self, local_id: LocalId) -> Option<DrawableHandle> {
        self.live
            .iter()
            .find(|(_, id)| **id == local_id)
            .map(|(handle, _)| DrawableHandle(*handle))
    }
}

/// Hands out handles counting up from 1. With `deferred` set, creation is reported as pending and the
/// test has to call `on_drawable_created` itself.
#[derive(Default)]
pub struct RecordingScene {
    pub log: Rc<RefCell<SceneLog>>,
    pub deferred: bool,
    pub interacting: HashSet<LocalId>,
    next_handle: u64,
}

impl RecordingScene {
    pub fn new() -> (Self, Rc<RefCell<SceneLog>>) {
        let scene = RecordingScene::default();
        let log = scene.log.clone();
        (scene, log)
    }
}

impl SceneBridge for RecordingScene {
    fn materialize(&mut self, entry: &CacheEntry) -> Materialized {
        let mut log = self.log.borrow_mut();
        log.materialized.push(entry.local_id);
        if self.deferred {
            return Materialized::Pending;
        }

        self.next_handle += 1;
        log.live.insert(self.next_handle, entry.local_id);
        Materialized::Ready(DrawableHandle(self.next_handle))
    }

    fn release(&mut self, handle: DrawableHandle) {
        let mut log = self.log.borrow_mut();
        log.released_handles.push(handle.0);
        if let Some(local_id) = log.live.remove(&handle.0) {
            log.released.push(local_id);
        }
    }

    fn load_flags(&mut self, handle: DrawableHandle, flags: u32) {
        let mut log = self.log.borrow_mut();
        if let Some(&local_id) = log.live.get(&handle.0) {
            log.flags.push((local_id, flags));
        }
    }

    fn is_interacting(&self, handle: DrawableHandle) -> bool {
        self.log
            .borrow()
            .live
            .get(&handle.0)
            .is_some_and(|local_id| self.interacting.contains(local_id))
    }
}

pub fn payload(parent_id: LocalId, position: Vec3, scale: Vec3) -> Vec<u8> {
    pack_update(parent_id, position, scale, &[0xAB; 24]).expect("packing a finite update")
}

pub fn root_payload(position: Vec3) -> Vec<u8> {
    payload(0, position, Vec3::ONE)
}

pub fn child_payload(parent_id: LocalId) -> Vec<u8> {
    payload(parent_id, Vec3::new(2.0, 0.0, 0.0), Vec3::splat(0.5))
}

/// Settings without a disk cache and without a per-frame limit.
pub fn memory_settings() -> CacheSettings {
    CacheSettings {
        cache_enabled: false,
        creation_throttle: -1,
        ..CacheSettings::default()
    }
}

pub fn disk_settings(dir: &TempCacheDir) -> CacheSettings {
    CacheSettings {
        cache_dir: dir.path.to_string_lossy().to_string(),
        creation_throttle: -1,
        ..CacheSettings::default()
    }
}

pub fn memory_region(settings: &CacheSettings) -> (RegionCache<RecordingScene>, Rc<RefCell<SceneLog>>) {
    let (scene, log) = RecordingScene::new();
    let mut region = RegionCache::new(REGION_HANDLE, "Test Region", settings, scene);
    region.load();
    (region, log)
}

/// Sees everything around the origin, the pixel ratio of a 720p viewport at 60 degrees.
pub fn camera_at(origin: Vec3) -> CameraState {
    CameraState::omnidirectional(origin, 623.5)
}

/// A unique directory below the system temp directory, removed on drop.
pub struct TempCacheDir {
    pub path: PathBuf,
}

impl TempCacheDir {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("objcache-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        TempCacheDir { path }
    }
}

impl Drop for TempCacheDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

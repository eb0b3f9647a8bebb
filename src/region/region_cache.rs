use crate::cache::entry::{CacheEntry, DrawableHandle, EntryState, LocalId};
use crate::cache::orphans::OrphanIndex;
use crate::cache::payload::{ExtentsDecoder, PackedUpdateDecoder};
use crate::cache::spatial::{Octree, SpatialIndex};
use crate::cache::store::{LoadOutcome, LoadedRegionCache, ObjectCacheStore, PendingLoad, RegionKey, RemovalContext};
use crate::region::handshake::{HandshakeGate, HandshakeReplyFlags};
use crate::region::misses::{CacheMissList, CacheMissRequest, CacheMissType};
use crate::region::scene::{Materialized, SceneBridge};
use crate::region::scheduler::VisibilityScheduler;
use crate::settings::{CacheSettings, SceneLoadParameters};
use glam::Vec3;
use itertools::Itertools;
use log::{debug, info, trace, warn};
use objcache_files::common::types::CacheId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

const REGION_WIDTH: f32 = 256.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Hit,
    CrcMiss,
    FullMiss,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheUpdateResult {
    Added,
    /// Same crc as the cached entry, nothing was rewritten
    Duplicate,
    Changed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EvictMode {
    /// Hand the entry (and its linkset) to the renderer first, which tears it down on its own terms.
    ForRendering,
    Discard,
}

/// Messages the region wants to send to the server. The network layer drains them every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    HandshakeReply { flags: HandshakeReplyFlags },
    RequestObjects { requests: Vec<CacheMissRequest> },
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RegionCacheStats {
    pub hits: u32,
    pub crc_misses: u32,
    pub full_misses: u32,
    pub dupes: u32,
    pub changes: u32,
    pub additions: u32,
    pub promotions: u32,
    pub decays: u32,
    pub evictions: u32,
}

fn lock_store(store: &Mutex<ObjectCacheStore>) -> MutexGuard<'_, ObjectCacheStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a region knows about its objects: the entry table, the orphans, the index over inactive
/// entries and the per-frame scheduler. All of it is mutated from the thread owning the region only.
pub struct RegionCache<S: SceneBridge> {
    pub(super) key: RegionKey,
    miss_batch_size: usize,
    pub(super) entries: HashMap<LocalId, CacheEntry>,
    overrides: HashMap<LocalId, Vec<u8>>,
    orphans: OrphanIndex,
    pub(super) spatial: Box<dyn SpatialIndex>,
    decoder: Box<dyn ExtentsDecoder>,
    pub(super) scheduler: VisibilityScheduler,
    non_cacheable_created: HashSet<LocalId>,
    /// Discarded while the renderer was still creating them, their drawable is released on arrival.
    discarded_waiting: HashSet<LocalId>,
    misses: CacheMissList,
    outbound: Vec<OutboundMessage>,
    handshake: HandshakeGate,
    store: Option<Arc<Mutex<ObjectCacheStore>>>,
    pending_load: Option<PendingLoad>,
    load_requested: bool,
    dirty: bool,
    created_at: Instant,
    pub(super) dead: bool,
    pub(super) stats: RegionCacheStats,
    pub(super) scene: S,
}

impl<S: SceneBridge> RegionCache<S> {
    pub fn new(handle: u64, name: impl Into<String>, settings: &CacheSettings, scene: S) -> Self {
        RegionCache {
            key: RegionKey {
                handle,
                name: name.into(),
                cache_id: CacheId::NULL,
            },
            miss_batch_size: settings.miss_batch_size.max(1),
            entries: HashMap::new(),
            overrides: HashMap::new(),
            orphans: OrphanIndex::default(),
            spatial: Box::new(Octree::for_region(REGION_WIDTH)),
            decoder: Box::new(PackedUpdateDecoder),
            scheduler: VisibilityScheduler::new(settings.derive()),
            non_cacheable_created: HashSet::new(),
            discarded_waiting: HashSet::new(),
            misses: CacheMissList::default(),
            outbound: vec![],
            handshake: HandshakeGate::default(),
            store: None,
            pending_load: None,
            load_requested: false,
            dirty: false,
            created_at: Instant::now(),
            dead: false,
            stats: RegionCacheStats::default(),
            scene,
        }
    }

    pub fn with_store(mut self, store: Arc<Mutex<ObjectCacheStore>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_spatial_index(mut self, mut spatial: Box<dyn SpatialIndex>) -> Self {
        spatial.clear();
        self.spatial = spatial;
        for local_id in self.entries.keys().copied().collect_vec() {
            self.reindex(local_id);
        }
        self
    }

    pub fn with_decoder(mut self, decoder: Box<dyn ExtentsDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn key(&self) -> &RegionKey {
        &self.key
    }

    pub fn params(&self) -> &SceneLoadParameters {
        self.scheduler.params()
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn stats(&self) -> RegionCacheStats {
        self.stats
    }

    pub fn entry(&self, local_id: LocalId) -> Option<&CacheEntry> {
        self.entries.get(&local_id)
    }

    pub fn state_of(&self, local_id: LocalId) -> Option<EntryState> {
        self.entries.get(&local_id).map(|entry| entry.state)
    }

    pub fn children_of(&self, local_id: LocalId) -> Vec<LocalId> {
        self.entries
            .get(&local_id)
            .map(|entry| entry.children.iter().copied().collect_vec())
            .unwrap_or_default()
    }

    pub fn is_indexed(&self, local_id: LocalId) -> bool {
        self.spatial.contains(local_id)
    }

    pub fn indexed_count(&self) -> usize {
        self.spatial.len()
    }

    pub fn orphans(&self) -> &OrphanIndex {
        &self.orphans
    }

    pub fn override_of(&self, local_id: LocalId) -> Option<&[u8]> {
        self.overrides.get(&local_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn pending_misses(&self) -> usize {
        self.misses.len()
    }

    pub fn scheduler(&self) -> &VisibilityScheduler {
        &self.scheduler
    }

    // region handshake

    /// The server greets us with the cache id of the region. The first handshake kicks off the load,
    /// replies are held back until it completes.
    pub fn on_region_handshake(&mut self, cache_id: CacheId) {
        if self.key.cache_id != cache_id {
            if self.load_requested {
                info!("Cache id of {} changed to {}", self.key.name, cache_id);
                self.dirty = true;
            }
            self.key.cache_id = cache_id;
        }

        self.load();
        if self.handshake.handshake_received() {
            self.send_handshake_reply();
        }
    }

    pub fn is_cache_ready(&self) -> bool {
        self.handshake.is_ready()
    }

    /// Runs once the cache is loaded, immediately if it already is.
    pub fn on_cache_ready(&mut self, callback: Box<dyn FnOnce()>) {
        self.handshake.on_ready(callback);
    }

    /// Starts loading the cache of this region. Only the first call does anything.
    pub fn load(&mut self) {
        if self.load_requested || self.dead {
            return;
        }
        self.load_requested = true;
        self.handshake.begin_loading();

        match &self.store {
            Some(store) => {
                self.pending_load = Some(lock_store(store).request_load(self.key.clone()));
                self.poll_cache_load();
            }
            None => self.finish_load(None),
        }
    }

    /// Picks up the result of the disk worker. Returns whether the load completed with this call.
    pub fn poll_cache_load(&mut self) -> bool {
        let Some(loaded) = self.pending_load.as_ref().and_then(PendingLoad::poll) else {
            return false;
        };
        self.pending_load = None;
        self.finish_load(Some(loaded));
        true
    }

    /// Blocks until the cache load completed.
    pub fn wait_for_cache(&mut self) {
        if let Some(pending) = self.pending_load.take() {
            self.finish_load(Some(pending.wait()));
        }
    }

    fn finish_load(&mut self, loaded: Option<LoadedRegionCache>) {
        let loaded_count = match loaded {
            Some(loaded) if loaded.key.cache_id != self.key.cache_id => {
                debug!("Dropping a cache of {} loaded for an outdated cache id", self.key.name);
                0
            }
            Some(loaded) => {
                if matches!(loaded.outcome, LoadOutcome::Corrupt | LoadOutcome::Mismatch)
                    && let Some(store) = &self.store
                {
                    lock_store(store).forget_region(self.key.handle);
                }

                let count = loaded.entries.len();
                // whatever arrived over the network in the meantime is newer
                for (local_id, entry) in loaded.entries {
                    self.entries.entry(local_id).or_insert(entry);
                }
                for (local_id, data) in loaded.overrides {
                    self.overrides.entry(local_id).or_insert(data);
                }
                count
            }
            None => 0,
        };

        if loaded_count == 0 {
            self.dirty = true;
        }
        debug!("Cache of {} ready with {} entries", self.key.name, self.entries.len());

        if self.handshake.complete() {
            self.send_handshake_reply();
        }
    }

    fn send_handshake_reply(&mut self) {
        let flags = HandshakeReplyFlags::for_cache(self.entries.len());
        trace!("Handshake reply for {}: {:?}", self.key.name, flags);
        self.outbound.push(OutboundMessage::HandshakeReply { flags });
    }

    // network facing api

    /// A compressed update only carries id and crc; tells whether the cached payload is still current.
    pub fn probe(&mut self, local_id: LocalId, crc: u32, flags: u32) -> ProbeResult {
        let Some(entry) = self.entries.get_mut(&local_id) else {
            self.record_miss(local_id, CacheMissType::Full);
            return ProbeResult::FullMiss;
        };

        if entry.crc != crc {
            self.record_miss(local_id, CacheMissType::Crc);
            return ProbeResult::CrcMiss;
        }

        entry.record_hit();
        entry.set_update_flags(flags);
        self.stats.hits += 1;

        if entry.state == EntryState::Active
            && let Some(handle) = entry.drawable
        {
            self.scene.load_flags(handle, flags);
        } else if !entry.confirmed {
            entry.confirmed = true;
            if !self.decode_bounding_info(local_id) {
                // unusable payload from disk, the server has to send it again
                self.remove_entry(local_id);
                self.stats.hits -= 1;
                self.record_miss(local_id, CacheMissType::Full);
                return ProbeResult::FullMiss;
            }
        }

        ProbeResult::Hit
    }

    fn record_miss(&mut self, local_id: LocalId, miss_type: CacheMissType) {
        match miss_type {
            CacheMissType::Full => self.stats.full_misses += 1,
            CacheMissType::Crc => self.stats.crc_misses += 1,
        }
        self.misses.add(local_id, miss_type);
    }

    /// A full update: stores the payload unless the crc says it is unchanged.
    pub fn apply_full_update(&mut self, local_id: LocalId, crc: u32, payload: Vec<u8>, flags: u32) -> CacheUpdateResult {
        let result = match self.entries.get_mut(&local_id) {
            Some(entry) if entry.crc == crc => {
                entry.record_dupe();
                entry.set_update_flags(flags);
                self.stats.dupes += 1;

                if entry.state == EntryState::Active
                    && let Some(handle) = entry.drawable
                {
                    self.scene.load_flags(handle, flags);
                }
                if entry.confirmed {
                    return CacheUpdateResult::Duplicate;
                }
                entry.confirmed = true;
                CacheUpdateResult::Duplicate
            }
            Some(entry) => {
                entry.replace_payload(crc, payload);
                entry.set_update_flags(flags);
                entry.confirmed = true;
                self.stats.changes += 1;
                CacheUpdateResult::Changed
            }
            None => {
                let mut entry = CacheEntry::new(local_id, crc, payload);
                entry.set_update_flags(flags);
                self.entries.insert(local_id, entry);
                self.stats.additions += 1;
                CacheUpdateResult::Added
            }
        };

        if result != CacheUpdateResult::Duplicate {
            self.dirty = true;
        }
        self.decode_bounding_info(local_id);
        if result == CacheUpdateResult::Changed {
            self.reconcile_children(local_id);
        }
        result
    }

    /// Material overrides travel next to the entries and are persisted untouched.
    pub fn cache_override(&mut self, local_id: LocalId, data: Vec<u8>) {
        if self.overrides.get(&local_id) != Some(&data) {
            self.overrides.insert(local_id, data);
            self.dirty = true;
        }
    }

    /// Turns all misses into request messages, at most `miss_batch_size` ids each.
    pub fn request_cache_misses(&mut self) {
        if self.misses.is_empty() {
            return;
        }

        let batches = self.misses.drain_batches(self.miss_batch_size);
        trace!("Requesting missed objects of {} in {} message(s)", self.key.name, batches.len());
        self.outbound
            .extend(batches.into_iter().map(|requests| OutboundMessage::RequestObjects { requests }));
        self.dirty = true;
    }

    pub fn drain_outbound(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.outbound)
    }

    /// The server removed an object (or the renderer wants it for good).
    pub fn evict(&mut self, local_id: LocalId, mode: EvictMode) {
        let Some(entry) = self.entries.get(&local_id) else {
            return;
        };

        if mode == EvictMode::ForRendering && !entry.state.is_live() {
            self.materialize_entry(local_id);
        }

        let parent_id = self.entries.get(&local_id).map(|entry| entry.parent_id).unwrap_or_default();
        self.detach_from_parent(local_id, parent_id);

        let Some(entry) = self.remove_entry(local_id) else {
            return;
        };
        self.stats.evictions += 1;

        match mode {
            EvictMode::ForRendering => {
                for child in entry.children {
                    self.evict(child, EvictMode::ForRendering);
                }
            }
            EvictMode::Discard => {
                if let Some(handle) = entry.drawable {
                    self.scene.release(handle);
                } else if entry.state == EntryState::Waiting {
                    self.discarded_waiting.insert(local_id);
                }
                // parked, in case the parent is sent again
                for child in entry.children {
                    if self.state_of(child).is_some_and(|state| state != EntryState::Inactive) {
                        self.deactivate(child, true);
                    }
                    if self.entries.contains_key(&child) {
                        self.orphans.push(local_id, child);
                    }
                }
            }
        }
    }

    /// Removes an entry from every structure. Its children are left alone.
    fn remove_entry(&mut self, local_id: LocalId) -> Option<CacheEntry> {
        self.spatial.remove(local_id);
        self.scheduler.forget(local_id);
        self.overrides.remove(&local_id);
        let entry = self.entries.remove(&local_id)?;
        self.dirty = true;
        Some(entry)
    }

    /// An object that was created live without ever being cached. Its children don't wait for it.
    pub fn mark_non_cacheable_created(&mut self, local_id: LocalId) {
        self.non_cacheable_created.insert(local_id);
        for child in self.orphans.take(local_id).unwrap_or_default() {
            self.queue_child(child);
        }
    }

    /// The non-cacheable object is gone. Its children go back to waiting for it.
    pub fn forget_non_cacheable(&mut self, local_id: LocalId) {
        if !self.non_cacheable_created.remove(&local_id) {
            return;
        }

        let children = self
            .entries
            .values()
            .filter(|entry| entry.parent_id == local_id)
            .map(|entry| entry.local_id)
            .sorted()
            .collect_vec();
        for child in children {
            if self.state_of(child).is_some_and(|state| state != EntryState::Inactive) {
                self.deactivate(child, true);
            }
            self.orphans.push(local_id, child);
        }
    }

    // renderer facing api

    /// Late answer to [`Materialized::Pending`].
    pub fn on_drawable_created(&mut self, local_id: LocalId, handle: DrawableHandle) {
        let discarded = self.discarded_waiting.remove(&local_id);
        match self.state_of(local_id) {
            Some(EntryState::Waiting) => self.activate(local_id, handle),
            Some(state) => {
                debug!("Object {} got its drawable while {:?}, releasing it", local_id, state);
                self.scene.release(handle);
            }
            None if discarded => {
                debug!("Object {} was discarded before its drawable arrived, releasing it", local_id);
                self.scene.release(handle);
            }
            // evicted for rendering, the renderer owns it
            None => trace!("Drawable for unknown object {}", local_id),
        }
    }

    /// The renderer destroyed the live object on its own.
    pub fn on_entry_became_dead(&mut self, local_id: LocalId) {
        if self.state_of(local_id).is_some_and(|state| state != EntryState::Inactive) {
            self.deactivate(local_id, false);
        }
    }

    // state transitions

    pub(super) fn queue_entry(&mut self, local_id: LocalId) {
        let Some(entry) = self.entries.get_mut(&local_id) else {
            return;
        };
        entry.state = EntryState::Queued;
        self.spatial.remove(local_id);
        self.scheduler.queued.insert(local_id);
    }

    /// Children of live parents are shown with them, regardless of their own contribution.
    fn queue_child(&mut self, local_id: LocalId) {
        let eligible = self
            .entries
            .get(&local_id)
            .is_some_and(|entry| entry.state == EntryState::Inactive && entry.confirmed && entry.bounds.is_some());
        if eligible {
            self.queue_entry(local_id);
        }
    }

    pub(super) fn materialize_entry(&mut self, local_id: LocalId) {
        let Some(entry) = self.entries.get_mut(&local_id) else {
            return;
        };
        entry.state = EntryState::Waiting;
        self.spatial.remove(local_id);
        self.scheduler.queued.remove(&local_id);
        self.scheduler.waiting.insert(local_id);
        self.stats.promotions += 1;

        let materialized = match self.entries.get(&local_id) {
            Some(entry) => self.scene.materialize(entry),
            None => return,
        };

        match materialized {
            Materialized::Ready(handle) => self.activate(local_id, handle),
            Materialized::Pending => {}
            Materialized::Failed => {
                debug!("Renderer refused object {} of {}", local_id, self.key.name);
                self.deactivate(local_id, false);
            }
        }
    }

    fn activate(&mut self, local_id: LocalId, handle: DrawableHandle) {
        let frame = self.scheduler.current_frame();
        let Some(entry) = self.entries.get_mut(&local_id) else {
            return;
        };
        entry.drawable = Some(handle);
        entry.state = EntryState::Active;
        entry.queued_passes = 0;
        entry.activation_frame = frame;
        entry.last_visible_frame = frame;
        let children = entry.children.iter().copied().collect_vec();

        self.spatial.remove(local_id);
        self.scheduler.queued.remove(&local_id);
        self.scheduler.waiting.remove(&local_id);
        self.scheduler.active.insert(local_id);

        for child in children {
            self.queue_child(child);
        }
    }

    /// Back to Inactive, together with everything attached to it. `release` says whether the renderer
    /// still has to be told to drop the live objects.
    pub(super) fn deactivate(&mut self, local_id: LocalId, release: bool) {
        let Some(entry) = self.entries.get_mut(&local_id) else {
            self.scheduler.forget(local_id);
            return;
        };
        let handle = entry.drawable.take();
        entry.state = EntryState::Inactive;
        entry.queued_passes = 0;
        entry.contribution_frame = None;
        let children = entry.children.iter().copied().collect_vec();

        self.scheduler.forget(local_id);
        if release && let Some(handle) = handle {
            self.scene.release(handle);
        }

        for child in children {
            if self.state_of(child).is_some_and(|state| state != EntryState::Inactive) {
                self.deactivate(child, release);
            }
        }

        self.reindex(local_id);
    }

    /// Puts an entry into the spatial index, or takes it out, depending on whether it qualifies.
    fn reindex(&mut self, local_id: LocalId) {
        let extents = self.entries.get(&local_id).and_then(|entry| {
            let qualifies = entry.state == EntryState::Inactive && entry.is_root() && entry.confirmed;
            entry.bounds.filter(|_| qualifies).map(|bounds| bounds.extents)
        });

        match extents {
            Some(extents) => self.spatial.update(local_id, extents),
            None => {
                self.spatial.remove(local_id);
            }
        }
    }

    // bounds and hierarchy

    /// Decodes parent and extents from the payload and files the entry accordingly. Returns false if the
    /// payload can't be decoded.
    fn decode_bounding_info(&mut self, local_id: LocalId) -> bool {
        let Some(entry) = self.entries.get(&local_id) else {
            return false;
        };
        let extents = match self.decoder.decode(&entry.payload) {
            Ok(extents) => extents,
            Err(err) => {
                warn!("Can't decode object {} of {}: {}", local_id, self.key.name, err);
                return false;
            }
        };

        let old_parent = entry.parent_id;
        let was_attached = old_parent != 0
            && self
                .entries
                .get(&old_parent)
                .is_some_and(|parent| parent.children.contains(&local_id));

        if extents.parent_id != old_parent {
            self.detach_from_parent(local_id, old_parent);
            if let Some(entry) = self.entries.get_mut(&local_id) {
                entry.parent_id = extents.parent_id;
            }
            // a live object only stays live under a live parent
            if self.state_of(local_id).is_some_and(|state| state != EntryState::Inactive)
                && !self.is_live_parent(extents.parent_id)
            {
                self.deactivate(local_id, true);
            }
        }

        self.set_bounds(local_id, extents.position, extents.scale);
        if let Some(entry) = self.entries.get(&local_id)
            && entry.state.is_live()
            && let Some(handle) = entry.drawable
        {
            self.scene.refresh(handle, entry);
        }

        if extents.parent_id != 0 {
            if extents.parent_id == old_parent && was_attached {
                self.refresh_parent_bounds(extents.parent_id);
            } else {
                self.attach_to_parent(local_id, extents.parent_id);
            }
        }

        self.resolve_orphans(local_id);
        self.reindex(local_id);
        true
    }

    /// Own bounds plus those of all children.
    fn set_bounds(&mut self, local_id: LocalId, position: Vec3, scale: Vec3) {
        let Some(entry) = self.entries.get(&local_id) else {
            return;
        };
        let child_extents = entry
            .children
            .iter()
            .filter_map(|child| self.entries.get(child)?.bounds)
            .map(|bounds| bounds.extents)
            .collect_vec();

        if let Some(entry) = self.entries.get_mut(&local_id) {
            entry.set_bounding_info(position, scale);
            for extents in &child_extents {
                entry.include_child_extents(extents);
            }
        }
    }

    /// Recomputes the bounds of a parent after its child set or a child changed, up to the root.
    fn refresh_parent_bounds(&mut self, parent_id: LocalId) {
        let mut current = parent_id;
        // guards against cyclic parent ids
        for _ in 0..64 {
            let Some(bounds) = self.entries.get(&current).and_then(|entry| entry.bounds) else {
                return;
            };
            self.set_bounds(current, bounds.position, bounds.scale);
            self.reindex(current);

            match self.entries.get(&current).map(|entry| entry.parent_id) {
                Some(next) if next != 0 => current = next,
                _ => return,
            }
        }
        warn!("Parent chain of object {} in {} is too deep", parent_id, self.key.name);
    }

    /// Whether children of `parent_id` may be live. Roots have no such parent.
    fn is_live_parent(&self, parent_id: LocalId) -> bool {
        if parent_id == 0 {
            return false;
        }
        match self.entries.get(&parent_id) {
            Some(parent) => parent.confirmed && parent.state.is_live(),
            None => self.non_cacheable_created.contains(&parent_id),
        }
    }

    fn attach_to_parent(&mut self, local_id: LocalId, parent_id: LocalId) {
        let parent_state = self
            .entries
            .get(&parent_id)
            .filter(|parent| parent.confirmed)
            .map(|parent| parent.state);

        let Some(parent_state) = parent_state else {
            if self.non_cacheable_created.contains(&parent_id) {
                self.queue_child(local_id);
            } else {
                trace!("Object {} waits for its parent {}", local_id, parent_id);
                self.orphans.push(parent_id, local_id);
            }
            return;
        };

        if let Some(parent) = self.entries.get_mut(&parent_id) {
            parent.children.insert(local_id);
        }
        self.orphans.remove_child(parent_id, local_id);
        self.refresh_parent_bounds(parent_id);
        if parent_state.is_live() {
            self.queue_child(local_id);
        }
    }

    fn detach_from_parent(&mut self, local_id: LocalId, parent_id: LocalId) {
        if parent_id == 0 {
            return;
        }
        self.orphans.remove_child(parent_id, local_id);

        let Some(parent) = self.entries.get_mut(&parent_id) else {
            return;
        };
        if !parent.children.remove(&local_id) {
            return;
        }
        let parent_live = parent.state.is_live();
        self.refresh_parent_bounds(parent_id);

        // only queued because of the parent
        if parent_live && self.state_of(local_id) == Some(EntryState::Queued) {
            if let Some(entry) = self.entries.get_mut(&local_id) {
                entry.state = EntryState::Inactive;
            }
            self.scheduler.forget(local_id);
        }
    }

    /// Moves the children waiting for `parent_id` into its child set, recursively.
    fn resolve_orphans(&mut self, parent_id: LocalId) {
        let Some(children) = self.orphans.take(parent_id) else {
            return;
        };

        let mut adopted = 0;
        for child in children {
            if self.entries.get(&child).map(|entry| entry.parent_id) != Some(parent_id) {
                continue;
            }
            let Some(parent) = self.entries.get_mut(&parent_id) else {
                return;
            };
            parent.children.insert(child);
            let parent_live = parent.state.is_live();
            adopted += 1;

            if parent_live {
                self.queue_child(child);
            }
            self.resolve_orphans(child);
        }

        if adopted > 0 {
            trace!("Object {} adopted {} orphans", parent_id, adopted);
            self.refresh_parent_bounds(parent_id);
        }
    }

    /// Drops children that no longer name this entry as their parent and files them anew.
    fn reconcile_children(&mut self, local_id: LocalId) {
        let stale = self
            .children_of(local_id)
            .into_iter()
            .filter(|child| self.entries.get(child).is_none_or(|entry| entry.parent_id != local_id))
            .collect_vec();

        for child in stale {
            self.detach_from_parent(child, local_id);
            self.decode_bounding_info(child);
        }
    }

    // consistency, telemetry and teardown

    /// Checks that the index, the scheduler sets and the entry states agree, forcing them back into
    /// agreement if they don't. Returns the number of corrections.
    pub fn verify_entry_states(&mut self) -> usize {
        let mut corrections = 0;

        for local_id in self.spatial.ids() {
            let valid = self.entries.get(&local_id).is_some_and(|entry| {
                entry.state == EntryState::Inactive && entry.is_root() && entry.confirmed && entry.bounds.is_some()
            });
            if !valid {
                debug_assert!(false, "object {} must not be indexed", local_id);
                self.spatial.remove(local_id);
                corrections += 1;
            }
        }

        for local_id in self.entries.keys().copied().sorted().collect_vec() {
            let orphaned_live_child = self.entries.get(&local_id).is_some_and(|entry| {
                !entry.is_root() && entry.state != EntryState::Inactive && !self.is_live_parent(entry.parent_id)
            });
            let Some(entry) = self.entries.get_mut(&local_id) else {
                continue;
            };
            let consistent = !orphaned_live_child
                && match entry.state {
                    EntryState::Inactive => !self.scheduler.is_scheduled(local_id) && entry.drawable.is_none(),
                    EntryState::Queued => self.scheduler.queued.contains(&local_id),
                    EntryState::Waiting => self.scheduler.waiting.contains(&local_id),
                    EntryState::Active => self.scheduler.active.contains(&local_id) && entry.drawable.is_some(),
                };
            if !consistent {
                debug_assert!(false, "object {} is inconsistent in {:?}", local_id, entry.state);
                let handle = entry.drawable.take();
                entry.state = EntryState::Inactive;
                self.scheduler.forget(local_id);
                if let Some(handle) = handle {
                    self.scene.release(handle);
                }
                self.reindex(local_id);
                corrections += 1;
            }
        }

        if corrections > 0 {
            warn!("Corrected {} inconsistent objects in {}", corrections, self.key.name);
        }
        corrections
    }

    /// Logs how often entries were hit and changed.
    pub fn dump_cache(&self) {
        let hits = histogram(self.entries.values().map(|entry| entry.hit_count));
        let changes = histogram(self.entries.values().map(|entry| entry.crc_change_count));
        info!(
            "Object cache of {}: {} entries, {} indexed, {} active, {} orphans",
            self.key.name,
            self.entries.len(),
            self.spatial.len(),
            self.scheduler.active_count(),
            self.orphans.orphan_count()
        );
        info!("  hits    [0, 1, 2..4, 5+]: {:?}", hits);
        info!("  changes [0, 1, 2..4, 5+]: {:?}", changes);
        info!("  {:?}", self.stats);
    }

    fn save(&mut self, app_exiting: bool) {
        let Some(store) = self.store.clone() else {
            return;
        };
        if !self.handshake.is_ready() {
            debug!("Cache of {} never finished loading, not saving it", self.key.name);
            return;
        }

        let context = RemovalContext {
            region_age: self.created_at.elapsed(),
            app_exiting,
        };
        lock_store(&store).save(&self.key, &mut self.entries, &mut self.overrides, self.dirty, context);
        self.dirty = false;
    }

    fn teardown(&mut self, app_exiting: bool) {
        if self.dead {
            return;
        }
        self.dead = true;

        // the worker's answer now has nowhere to go
        self.pending_load = None;
        self.handshake.cancel();
        self.discarded_waiting.clear();

        let stale = self.orphans.clear();
        if stale > 0 {
            debug!("{} objects of {} never saw their parent", stale, self.key.name);
        }

        for entry in self.entries.values_mut() {
            if let Some(handle) = entry.drawable.take() {
                self.scene.release(handle);
            }
            entry.state = EntryState::Inactive;
        }
        self.scheduler.clear();
        self.spatial.clear();

        self.save(app_exiting);
    }

    /// Tears the region down and writes its cache back.
    pub fn shutdown(mut self, app_exiting: bool) {
        self.teardown(app_exiting);
    }
}

impl<S: SceneBridge> Drop for RegionCache<S> {
    fn drop(&mut self) {
        self.teardown(false);
    }
}

pub(crate) fn histogram(values: impl Iterator<Item = u32>) -> [usize; 4] {
    let mut bins = [0; 4];
    for value in values {
        let bin = match value {
            0 => 0,
            1 => 1,
            2..=4 => 2,
            _ => 3,
        };
        bins[bin] += 1;
    }
    bins
}

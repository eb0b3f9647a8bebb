use crate::cache::entry::{EntryState, LARGE_SCENE_CONTRIBUTION, LocalId};
use crate::region::camera::CameraState;
use crate::region::region_cache::RegionCache;
use crate::region::scene::SceneBridge;
use crate::settings::{CreationThrottle, SceneLoadParameters};
use glam::Vec3;
use itertools::Itertools;
use log::trace;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::time::{Duration, Instant};

/// Share of the frame budget the decay pass may use.
const DECAY_TIME_SHARE: f32 = 0.4;
/// Active entries looked at per frame by the decay pass.
const MAX_DECAY_CHECKS: usize = 64;
/// Contributions are recomputed when the camera moved further than this (squared meters)...
const ACCUMULATION_MIN_DISTANCE_SQUARED: f32 = 10.0;
/// ...or when this many frames passed since the last accumulation.
const ACCUMULATION_MIN_FRAMES: u32 = 5;

/// Per region bookkeeping of the per-frame load/unload decisions. The entry states themselves live on
/// the entries; these sets only mirror them for cheap iteration.
#[derive(Debug)]
pub struct VisibilityScheduler {
    params: SceneLoadParameters,
    throttle: CreationThrottle,
    current_frame: u32,
    last_accumulation: Option<(u32, Vec3)>,
    front_cull: bool,
    pub(super) active: BTreeSet<LocalId>,
    pub(super) waiting: BTreeSet<LocalId>,
    pub(super) queued: BTreeSet<LocalId>,
    decay_cursor: Option<LocalId>,
    /// One bit per frame, set when the decay pass killed something
    invisibility_history: u32,
    last_camera_origin: Option<Vec3>,
}

impl VisibilityScheduler {
    pub fn new(params: SceneLoadParameters) -> Self {
        VisibilityScheduler {
            params,
            throttle: params.creation_throttle,
            current_frame: 0,
            last_accumulation: None,
            front_cull: false,
            active: BTreeSet::new(),
            waiting: BTreeSet::new(),
            queued: BTreeSet::new(),
            decay_cursor: None,
            invisibility_history: 0,
            last_camera_origin: None,
        }
    }

    pub fn params(&self) -> &SceneLoadParameters {
        &self.params
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    pub fn throttle(&self) -> CreationThrottle {
        self.throttle
    }

    pub fn pause(&mut self) {
        self.throttle = CreationThrottle::Paused;
    }

    /// Back to the configured throttle; a configured pause is lifted to unlimited.
    pub fn resume(&mut self) {
        self.throttle = match self.params.creation_throttle {
            CreationThrottle::Paused => CreationThrottle::Unlimited,
            throttle => throttle,
        };
    }

    /// Starts a new frame, returns whether the camera moved since the last one.
    fn begin_frame(&mut self, origin: Vec3) -> bool {
        self.current_frame = self.current_frame.wrapping_add(1);
        let moved = self.last_camera_origin.is_none_or(|last| last.distance_squared(origin) > 1e-4);
        self.last_camera_origin = Some(origin);
        moved
    }

    fn needs_accumulation(&self, origin: Vec3) -> bool {
        match self.last_accumulation {
            None => true,
            Some((frame, last_origin)) => {
                self.current_frame.wrapping_sub(frame) >= ACCUMULATION_MIN_FRAMES
                    || last_origin.distance_squared(origin) > ACCUMULATION_MIN_DISTANCE_SQUARED
            }
        }
    }

    /// Alternates between the front and the rear cull on every full accumulation.
    fn start_accumulation(&mut self, origin: Vec3) -> bool {
        self.last_accumulation = Some((self.current_frame, origin));
        self.front_cull = !self.front_cull;
        self.front_cull
    }

    /// The next slice of active entries for the decay pass, continuing where the last frame stopped.
    fn decay_batch(&self, limit: usize) -> Vec<LocalId> {
        match self.decay_cursor {
            None => self.active.iter().copied().take(limit).collect_vec(),
            Some(cursor) => self
                .active
                .range((Excluded(cursor), Unbounded))
                .chain(self.active.range(..=cursor))
                .copied()
                .take(limit)
                .collect_vec(),
        }
    }

    pub fn is_scheduled(&self, local_id: LocalId) -> bool {
        self.active.contains(&local_id) || self.waiting.contains(&local_id) || self.queued.contains(&local_id)
    }

    /// Drops an entry from every set.
    pub fn forget(&mut self, local_id: LocalId) {
        self.active.remove(&local_id);
        self.waiting.remove(&local_id);
        self.queued.remove(&local_id);
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.waiting.clear();
        self.queued.clear();
        self.decay_cursor = None;
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }
}

/// Higher compares greater: larger contribution, then closer, then longer queued, then lower id.
#[derive(Debug, Copy, Clone)]
pub(super) struct PromotionCandidate {
    pub contribution: f32,
    pub distance: f32,
    pub queued_passes: u32,
    pub local_id: LocalId,
}

impl Ord for PromotionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.contribution
            .total_cmp(&other.contribution)
            .then_with(|| other.distance.total_cmp(&self.distance))
            .then_with(|| self.queued_passes.cmp(&other.queued_passes))
            .then_with(|| other.local_id.cmp(&self.local_id))
    }
}

impl PartialOrd for PromotionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PromotionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PromotionCandidate {}

impl<S: SceneBridge> RegionCache<S> {
    /// The per-frame pass: decay, then visibility accumulation, then promotion. Runs before the
    /// renderer's own frame work.
    pub fn idle_update(&mut self, camera: &CameraState, max_time: Duration) {
        let started = Instant::now();
        self.poll_cache_load();
        if self.dead {
            return;
        }
        // misses collected since the last frame go out now
        self.request_cache_misses();

        let camera_moved = self.scheduler.begin_frame(camera.origin);
        if self.scheduler.throttle == CreationThrottle::Paused {
            trace!("Object creation paused in {}", self.key.name);
            return;
        }

        self.kill_invisible_objects(camera, max_time.mul_f32(DECAY_TIME_SHARE), camera_moved);
        let candidates = self.update_visible_entries(camera);
        self.create_visible_objects(candidates, max_time.saturating_sub(started.elapsed()));
    }

    pub fn pause_creation(&mut self) {
        self.scheduler.pause();
    }

    pub fn resume_creation(&mut self) {
        self.scheduler.resume();
    }

    fn kill_invisible_objects(&mut self, camera: &CameraState, budget: Duration, camera_moved: bool) {
        if self.scheduler.active.is_empty() {
            return;
        }

        let started = Instant::now();
        let limit = if !camera_moved && self.scheduler.invisibility_history == 0 {
            MAX_DECAY_CHECKS / 2
        } else {
            MAX_DECAY_CHECKS
        };

        let frame = self.scheduler.current_frame;
        let mut killed = 0;
        for local_id in self.scheduler.decay_batch(limit) {
            self.scheduler.decay_cursor = Some(local_id);

            let Some(entry) = self.entries.get(&local_id) else {
                self.scheduler.forget(local_id);
                continue;
            };
            // children go away with their root
            if !entry.is_root() || entry.state != EntryState::Active || entry.activation_frame == frame {
                continue;
            }

            if !self.is_any_visible(local_id, camera) && self.kill_object(local_id) {
                killed += 1;
            }

            if started.elapsed() > budget {
                break;
            }
        }

        self.scheduler.invisibility_history = (self.scheduler.invisibility_history << 1) | u32::from(killed > 0);
        if killed > 0 {
            trace!("Decayed {} objects in {}", killed, self.key.name);
            self.stats.decays += killed;
        }
    }

    /// Whether the camera or the renderer has seen the entry within the last `min_frame_range` frames.
    /// Marks the entry visible if it is in view now.
    fn is_any_visible(&mut self, local_id: LocalId, camera: &CameraState) -> bool {
        let frame = self.scheduler.current_frame;
        let params = self.scheduler.params;
        let Some(entry) = self.entries.get_mut(&local_id) else {
            return false;
        };

        let renderer_saw_it = entry
            .drawable
            .is_some_and(|handle| self.scene.is_recently_visible(handle));
        let in_view = entry.bounds.is_none_or(|bounds| {
            let center = bounds.center();
            let radius = bounds.radius();
            let distance = center.distance(camera.origin);
            distance < params.rear_far_radius + radius
                || (distance < params.draw_distance + radius && camera.frustum.intersects_sphere(center, radius))
        });

        if renderer_saw_it || in_view {
            entry.last_visible_frame = frame;
            return true;
        }

        entry.last_visible_frame.saturating_add(params.min_frame_range) > frame
    }

    /// Deactivates an entry unless it or anything linked below it is still of interest, in which case
    /// the whole linkset stays.
    fn kill_object(&mut self, local_id: LocalId) -> bool {
        let frame = self.scheduler.current_frame;
        let Some(entry) = self.entries.get(&local_id) else {
            return false;
        };

        let interacting = entry.drawable.is_some_and(|handle| self.scene.is_interacting(handle));
        if interacting || self.descendant_keeps_alive(local_id) {
            if let Some(entry) = self.entries.get_mut(&local_id) {
                entry.last_visible_frame = frame;
            }
            return false;
        }

        self.deactivate(local_id, true);
        true
    }

    fn descendant_keeps_alive(&self, local_id: LocalId) -> bool {
        let mut pending = self.children_of(local_id);
        let mut seen = HashSet::new();
        while let Some(child) = pending.pop() {
            if !seen.insert(child) {
                continue;
            }
            let Some(entry) = self.entries.get(&child) else {
                continue;
            };
            if entry
                .drawable
                .is_some_and(|handle| self.scene.is_interacting(handle) || self.scene.is_recently_visible(handle))
            {
                return true;
            }
            pending.extend(entry.children.iter().copied());
        }
        false
    }

    /// Distance of the linkset an entry belongs to. Child positions are relative to their parent, so
    /// the topmost cached ancestor stands in for them.
    fn linkset_distance(&self, local_id: LocalId, origin: Vec3) -> f32 {
        let mut current = local_id;
        for _ in 0..64 {
            match self.entries.get(&current).map(|entry| entry.parent_id) {
                Some(parent_id) if parent_id != 0 && self.entries.contains_key(&parent_id) => current = parent_id,
                _ => break,
            }
        }
        self.entries
            .get(&current)
            .map_or(f32::MAX, |entry| entry.distance_to(origin))
    }

    /// Collects this frame's promotion candidates: everything left queued from earlier passes, plus the
    /// indexed entries whose contribution beats the current threshold.
    fn update_visible_entries(&mut self, camera: &CameraState) -> BinaryHeap<PromotionCandidate> {
        let mut candidates = BinaryHeap::new();

        for local_id in self.scheduler.queued.iter().copied().collect_vec() {
            match self.entries.get(&local_id) {
                Some(entry) if entry.state == EntryState::Queued => candidates.push(PromotionCandidate {
                    contribution: LARGE_SCENE_CONTRIBUTION,
                    distance: self.linkset_distance(local_id, camera.origin),
                    queued_passes: entry.queued_passes,
                    local_id,
                }),
                _ => {
                    self.scheduler.queued.remove(&local_id);
                }
            }
        }

        let frame = self.scheduler.current_frame;
        let params = self.scheduler.params;
        let full_pass = self.scheduler.needs_accumulation(camera.origin);
        let front_cull = if full_pass {
            self.scheduler.start_accumulation(camera.origin)
        } else {
            self.scheduler.front_cull
        };
        let threshold = params.contribution_threshold(front_cull, camera.pixel_meter_ratio);
        let max_distance = params.distance_threshold(front_cull);

        let mut hits = vec![];
        if front_cull {
            self.spatial.query_frustum(&camera.frustum, &mut hits);
        } else {
            self.spatial.query_sphere(camera.origin, params.rear_far_radius, &mut hits);
        }

        for local_id in hits {
            let Some(entry) = self.entries.get_mut(&local_id) else {
                debug_assert!(false, "indexed entry {} is unknown", local_id);
                self.spatial.remove(local_id);
                continue;
            };
            if entry.state != EntryState::Inactive || !entry.is_root() {
                debug_assert!(false, "indexed entry {} is {:?}", local_id, entry.state);
                self.spatial.remove(local_id);
                continue;
            }

            if !full_pass && entry.contribution_frame.is_some() {
                continue;
            }

            let contribution = entry.calc_scene_contribution(camera.origin, params.near_radius, max_distance, frame);
            if contribution > threshold {
                let distance = entry.distance_to(camera.origin);
                let queued_passes = entry.queued_passes;
                self.queue_entry(local_id);
                candidates.push(PromotionCandidate {
                    contribution,
                    distance,
                    queued_passes,
                    local_id,
                });
            }
        }

        candidates
    }

    /// Materializes the best candidates until the throttle or the time budget is used up. At least one
    /// candidate is promoted per frame. The rest stays queued.
    fn create_visible_objects(&mut self, mut candidates: BinaryHeap<PromotionCandidate>, budget: Duration) {
        let started = Instant::now();
        let limit = match self.scheduler.throttle {
            CreationThrottle::Unlimited => usize::MAX,
            CreationThrottle::Paused => 0,
            CreationThrottle::PerFrame(count) => count as usize,
        };

        let mut created = 0;
        while created < limit {
            if created > 0 && started.elapsed() > budget {
                break;
            }
            let Some(candidate) = candidates.pop() else {
                break;
            };
            if self.state_of(candidate.local_id) != Some(EntryState::Queued) {
                continue;
            }

            self.materialize_entry(candidate.local_id);
            created += 1;
        }

        for candidate in candidates {
            if let Some(entry) = self.entries.get_mut(&candidate.local_id)
                && entry.state == EntryState::Queued
            {
                entry.queued_passes = entry.queued_passes.saturating_add(1);
            }
        }

        if created > 0 {
            trace!(
                "Promoted {} objects in {}, {} still queued",
                created,
                self.key.name,
                self.scheduler.queued.len()
            );
        }
    }
}

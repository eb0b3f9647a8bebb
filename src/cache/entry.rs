use crate::cache::spatial::Aabb;
use glam::Vec3;
use objcache_files::objects::types::CachedObject;
use std::collections::BTreeSet;

/// Region scoped object id, handed out by the server.
pub type LocalId = u32;

/// Contribution of anything the camera is inside of, or that has to be shown regardless of its size.
pub const LARGE_SCENE_CONTRIBUTION: f32 = 1000.0;

/// Bin radius cap, so huge prims don't end up in the coarsest octree levels only.
const MAX_BIN_RADIUS: f32 = 256.0;

/// Limit for linkset bounds, children are sometimes placed very far away from their root.
const MAX_EXTENT: f32 = 65536.0;

/// Update flags value meaning "no flags were received yet".
pub const NO_UPDATE_FLAGS: u32 = u32::MAX;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub enum EntryState {
    /// Cached, not live. Roots in this state are candidates for the spatial index.
    #[default]
    Inactive,
    /// Picked as a visibility candidate, waiting for a promotion slot.
    Queued,
    /// The renderer was asked to materialize the entry and has not answered yet.
    Waiting,
    /// Has a live drawable.
    Active,
}

impl EntryState {
    /// Waiting and Active entries are owned by the renderer.
    pub fn is_live(&self) -> bool {
        matches!(self, EntryState::Waiting | EntryState::Active)
    }
}

/// Opaque handle of a live object handed out by the renderer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DrawableHandle(pub u64);

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EntryBounds {
    /// Region local for roots, parent local for children
    pub position: Vec3,
    pub scale: Vec3,
    /// Own extents joined with those of all children, in the same space as `position`
    pub extents: Aabb,
    pub bin_radius: f32,
}

impl EntryBounds {
    fn new(position: Vec3, scale: Vec3) -> Self {
        EntryBounds {
            position,
            scale,
            extents: Aabb::from_center_half_extents(position, scale),
            bin_radius: (scale.length() * 4.0).min(MAX_BIN_RADIUS),
        }
    }

    pub fn center(&self) -> Vec3 {
        self.extents.center()
    }

    /// Radius of the sphere around the whole (linkset) extents
    pub fn radius(&self) -> f32 {
        self.extents.half_extents().length()
    }
}

/// One object the region has told us about. Parent and children are plain ids into the owning region's
/// entry table.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub local_id: LocalId,
    pub crc: u32,
    pub payload: Vec<u8>,
    pub parent_id: LocalId,
    pub children: BTreeSet<LocalId>,
    pub update_flags: u32,

    pub state: EntryState,
    pub drawable: Option<DrawableHandle>,

    pub hit_count: u32,
    pub dupe_count: u32,
    pub crc_change_count: u32,
    /// Seen this session, either through a hit or a full update. Loaded entries start out unconfirmed.
    pub confirmed: bool,

    pub bounds: Option<EntryBounds>,
    pub scene_contribution: f32,
    /// Frame of the last contribution calculation, `None` if it was never evaluated since it became inactive
    pub contribution_frame: Option<u32>,
    pub last_visible_frame: u32,
    /// Frame the entry became active in; decay never looks at entries activated in the current frame
    pub activation_frame: u32,
    /// Number of scheduler passes this entry has been left queued
    pub queued_passes: u32,
}

impl CacheEntry {
    pub fn new(local_id: LocalId, crc: u32, payload: Vec<u8>) -> Self {
        CacheEntry {
            local_id,
            crc,
            payload,
            parent_id: 0,
            children: BTreeSet::new(),
            update_flags: NO_UPDATE_FLAGS,
            state: EntryState::Inactive,
            drawable: None,
            hit_count: 0,
            dupe_count: 0,
            crc_change_count: 0,
            confirmed: true,
            bounds: None,
            scene_contribution: 0.0,
            contribution_frame: None,
            last_visible_frame: 0,
            activation_frame: 0,
            queued_passes: 0,
        }
    }

    pub fn from_cached(object: CachedObject) -> Self {
        CacheEntry {
            hit_count: object.hit_count,
            dupe_count: object.dupe_count,
            crc_change_count: object.crc_change_count,
            confirmed: false,
            ..CacheEntry::new(object.local_id, object.crc, object.payload)
        }
    }

    pub fn to_cached(&self) -> CachedObject {
        CachedObject {
            local_id: self.local_id,
            crc: self.crc,
            hit_count: self.hit_count,
            dupe_count: self.dupe_count,
            crc_change_count: self.crc_change_count,
            payload: self.payload.clone(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == 0
    }

    pub fn record_hit(&mut self) {
        self.hit_count = self.hit_count.saturating_add(1);
    }

    pub fn record_dupe(&mut self) {
        self.dupe_count = self.dupe_count.saturating_add(1);
    }

    /// Replaces the payload of an object that changed on the server.
    pub fn replace_payload(&mut self, crc: u32, payload: Vec<u8>) {
        if crc != self.crc {
            self.crc_change_count = self.crc_change_count.saturating_add(1);
        }
        self.crc = crc;
        self.payload = payload;
        self.contribution_frame = None;
    }

    pub fn set_update_flags(&mut self, flags: u32) {
        if flags != NO_UPDATE_FLAGS {
            self.update_flags = flags;
        }
    }

    /// Resets the bounds to those of the object alone; children have to be added back in.
    pub fn set_bounding_info(&mut self, position: Vec3, scale: Vec3) {
        self.bounds = Some(EntryBounds::new(position, scale));
        self.contribution_frame = None;
    }

    /// Grows the bounds by a child's extents, which are relative to this entry's position.
    pub fn include_child_extents(&mut self, child_extents: &Aabb) {
        let Some(bounds) = self.bounds.as_mut() else {
            return;
        };

        let extents = bounds
            .extents
            .union(&child_extents.translated(bounds.position))
            .clamped(MAX_EXTENT);
        bounds.extents = extents;
        bounds.bin_radius = (extents.half_extents().length() * 4.0).min(MAX_BIN_RADIUS);
        self.contribution_frame = None;
    }

    /// Roughly the projected area in squared meters at one meter distance, see [`LARGE_SCENE_CONTRIBUTION`].
    /// Anything further away than `max_distance` contributes nothing.
    pub fn calc_scene_contribution(&mut self, camera: Vec3, near_radius: f32, max_distance: f32, frame: u32) -> f32 {
        self.contribution_frame = Some(frame);
        let Some(bounds) = self.bounds else {
            self.scene_contribution = 0.0;
            return 0.0;
        };

        let radius = bounds.bin_radius;
        let distance = bounds.center().distance(camera) - near_radius;
        self.scene_contribution = if distance <= 0.0 {
            LARGE_SCENE_CONTRIBUTION
        } else if distance + near_radius < max_distance + radius {
            radius * radius / distance
        } else {
            0.0
        };
        self.scene_contribution
    }

    pub fn distance_to(&self, point: Vec3) -> f32 {
        self.bounds
            .map(|bounds| bounds.center().distance(point))
            .unwrap_or(f32::MAX)
    }
}

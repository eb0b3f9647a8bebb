use crate::cache::entry::{CacheEntry, LocalId};
use glam::Vec3;

/// Links an entity back to the cache entry it was materialized from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CachedObjectRef(pub LocalId);

/// Parent local for children, region local for roots.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Placement {
    pub position: Vec3,
    pub scale: Vec3,
}

impl Placement {
    pub fn of(entry: &CacheEntry) -> Option<Placement> {
        entry.bounds.map(|bounds| Placement {
            position: bounds.position,
            scale: bounds.scale,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UpdateFlags(pub u32);

/// The user has the object selected, it must not disappear under their cursor.
#[derive(Debug, Copy, Clone, Default)]
pub struct Selected;

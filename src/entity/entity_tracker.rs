use crate::cache::entry::{CacheEntry, DrawableHandle, LocalId};
use crate::entity::components::objects::{CachedObjectRef, Placement, Selected, UpdateFlags};
use crate::region::scene::{Materialized, SceneBridge};
use hecs::{Entity, World};
use log::{trace, warn};

/// The live side of the demo: every materialized cache entry becomes an entity in a [`World`].
#[derive(Default)]
pub struct EntityTracker {
    world: World,
}

impl EntityTracker {
    pub fn new() -> Self {
        EntityTracker::default()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn live_count(&self) -> u32 {
        self.world.len()
    }

    pub fn find(&self, local_id: LocalId) -> Option<Entity> {
        self.world
            .query::<&CachedObjectRef>()
            .iter()
            .find(|(_, object)| object.0 == local_id)
            .map(|(entity, _)| entity)
    }

    /// Returns whether the object is live.
    pub fn select(&mut self, local_id: LocalId) -> bool {
        let Some(entity) = self.find(local_id) else {
            return false;
        };
        self.world.insert_one(entity, Selected).is_ok()
    }

    pub fn deselect(&mut self, local_id: LocalId) {
        if let Some(entity) = self.find(local_id) {
            let _ = self.world.remove_one::<Selected>(entity);
        }
    }

    fn entity_of(handle: DrawableHandle) -> Option<Entity> {
        Entity::from_bits(handle.0)
    }
}

impl SceneBridge for EntityTracker {
    fn materialize(&mut self, entry: &CacheEntry) -> Materialized {
        let Some(placement) = Placement::of(entry) else {
            return Materialized::Failed;
        };

        let entity = self.world.spawn((
            CachedObjectRef(entry.local_id),
            placement,
            UpdateFlags(entry.update_flags),
        ));
        trace!("Spawned {:?} for object {}", entity, entry.local_id);
        Materialized::Ready(DrawableHandle(entity.to_bits().get()))
    }

    fn release(&mut self, handle: DrawableHandle) {
        let despawned = Self::entity_of(handle).is_some_and(|entity| self.world.despawn(entity).is_ok());
        if !despawned {
            warn!("Could not release {:?}, because it wasn't known to us", handle);
        }
    }

    fn refresh(&mut self, handle: DrawableHandle, entry: &CacheEntry) {
        let (Some(entity), Some(placement)) = (Self::entity_of(handle), Placement::of(entry)) else {
            return;
        };
        if let Ok(mut current) = self.world.get::<&mut Placement>(entity) {
            *current = placement;
        }
    }

    fn load_flags(&mut self, handle: DrawableHandle, flags: u32) {
        if let Some(entity) = Self::entity_of(handle)
            && self.world.insert_one(entity, UpdateFlags(flags)).is_err()
        {
            warn!("Flags for {:?}, which is no longer live", handle);
        }
    }

    fn is_interacting(&self, handle: DrawableHandle) -> bool {
        Self::entity_of(handle)
            .and_then(|entity| self.world.entity(entity).ok())
            .is_some_and(|entity| entity.has::<Selected>())
    }
}

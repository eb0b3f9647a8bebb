use crate::cache::entry::{CacheEntry, DrawableHandle};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Materialized {
    /// The live object exists already
    Ready(DrawableHandle),
    /// Creation is in flight, the renderer reports back through `RegionCache::on_drawable_created`.
    Pending,
    Failed,
}

/// The renderer side of the cache: turns entries into live objects and tears them down again.
/// All calls happen on the thread that owns the region.
pub trait SceneBridge {
    fn materialize(&mut self, entry: &CacheEntry) -> Materialized;

    fn release(&mut self, handle: DrawableHandle);

    /// The payload or the bounds of a live object changed.
    fn refresh(&mut self, _handle: DrawableHandle, _entry: &CacheEntry) {}

    /// Flags of a compressed update that hit a live object.
    fn load_flags(&mut self, _handle: DrawableHandle, _flags: u32) {}

    /// Selected, or animated from a source the user can see. Such objects are never decayed.
    fn is_interacting(&self, _handle: DrawableHandle) -> bool {
        false
    }

    /// Whether the renderer drew the object lately.
    fn is_recently_visible(&self, _handle: DrawableHandle) -> bool {
        false
    }
}

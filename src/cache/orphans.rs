use crate::cache::entry::LocalId;
use std::collections::HashMap;

/// Children that arrived before their parent, keyed by the parent id they are waiting for.
#[derive(Debug, Default)]
pub struct OrphanIndex {
    waiting: HashMap<LocalId, Vec<LocalId>>,
}

impl OrphanIndex {
    /// Parks a child under its missing parent. Parking the same child twice is a no-op.
    pub fn push(&mut self, parent_id: LocalId, child_id: LocalId) {
        let children = self.waiting.entry(parent_id).or_default();
        if !children.contains(&child_id) {
            children.push(child_id);
        }
    }

    /// Removes and returns all children waiting for `parent_id`, in arrival order.
    pub fn take(&mut self, parent_id: LocalId) -> Option<Vec<LocalId>> {
        self.waiting.remove(&parent_id)
    }

    pub fn remove_child(&mut self, parent_id: LocalId, child_id: LocalId) -> bool {
        let Some(children) = self.waiting.get_mut(&parent_id) else {
            return false;
        };

        let Some(position) = children.iter().position(|&child| child == child_id) else {
            return false;
        };
        children.remove(position);
        if children.is_empty() {
            self.waiting.remove(&parent_id);
        }
        true
    }

    pub fn contains_parent(&self, parent_id: LocalId) -> bool {
        self.waiting.contains_key(&parent_id)
    }

    pub fn is_waiting(&self, parent_id: LocalId, child_id: LocalId) -> bool {
        self.children_of(parent_id).contains(&child_id)
    }

    pub fn children_of(&self, parent_id: LocalId) -> &[LocalId] {
        self.waiting.get(&parent_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of parents that are waited for
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn orphan_count(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    /// Drops everything, returning how many children never saw their parent.
    pub fn clear(&mut self) -> usize {
        let count = self.orphan_count();
        self.waiting.clear();
        count
    }
}

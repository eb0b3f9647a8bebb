use bitflags::bitflags;

bitflags! {
    /// Flags of the handshake reply, telling the server how to stream objects to us.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HandshakeReplyFlags: u32 {
        /// Send every cacheable object, culling happens on our side
        const SEND_ALL_CACHEABLE_OBJECTS = 0x1;
        /// The cache is empty, don't bother sending compressed updates that would only miss
        const CACHE_FILE_IS_EMPTY = 0x2;
    }
}

impl HandshakeReplyFlags {
    pub fn for_cache(entry_count: usize) -> Self {
        let mut flags = HandshakeReplyFlags::SEND_ALL_CACHEABLE_OBJECTS;
        if entry_count == 0 {
            flags |= HandshakeReplyFlags::CACHE_FILE_IS_EMPTY;
        }
        flags
    }
}

/// Holds back handshake replies and ready callbacks until the cache has finished loading.
#[derive(Default)]
pub struct HandshakeGate {
    loading: bool,
    ready: bool,
    pending_replies: u32,
    callbacks: Vec<Box<dyn FnOnce()>>,
}

impl HandshakeGate {
    pub fn begin_loading(&mut self) {
        self.loading = true;
        self.ready = false;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Returns whether the reply can go out right away.
    pub fn handshake_received(&mut self) -> bool {
        if self.ready {
            return true;
        }
        self.pending_replies += 1;
        false
    }

    pub fn pending_replies(&self) -> u32 {
        self.pending_replies
    }

    /// Runs right away if the cache is ready.
    pub fn on_ready(&mut self, callback: Box<dyn FnOnce()>) {
        if self.ready {
            callback();
        } else {
            self.callbacks.push(callback);
        }
    }

    /// Marks the cache ready. Returns whether a (single) deferred reply is owed.
    pub fn complete(&mut self) -> bool {
        self.loading = false;
        self.ready = true;
        for callback in self.callbacks.drain(..) {
            callback();
        }
        std::mem::take(&mut self.pending_replies) > 0
    }

    /// Forgets deferred work of a region that is going away.
    pub fn cancel(&mut self) {
        self.loading = false;
        self.pending_replies = 0;
        self.callbacks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn replies_are_coalesced() {
        let mut gate = HandshakeGate::default();
        gate.begin_loading();
        assert!(!gate.handshake_received());
        assert!(!gate.handshake_received());
        assert_eq!(gate.pending_replies(), 2);

        assert!(gate.complete());
        assert_eq!(gate.pending_replies(), 0);
        // once ready, handshakes are answered directly
        assert!(gate.handshake_received());
        assert!(!gate.complete());
    }

    #[test]
    fn callbacks_run_once_ready() {
        let calls = Rc::new(Cell::new(0));
        let mut gate = HandshakeGate::default();
        gate.begin_loading();

        let counter = calls.clone();
        gate.on_ready(Box::new(move || counter.set(counter.get() + 1)));
        assert_eq!(calls.get(), 0);
        gate.complete();
        assert_eq!(calls.get(), 1);

        let counter = calls.clone();
        gate.on_ready(Box::new(move || counter.set(counter.get() + 1)));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn flags() {
        assert_eq!(HandshakeReplyFlags::for_cache(0).bits(), 0x3);
        assert_eq!(
            HandshakeReplyFlags::for_cache(10),
            HandshakeReplyFlags::SEND_ALL_CACHEABLE_OBJECTS
        );
    }
}

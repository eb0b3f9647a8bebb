pub mod camera;
pub mod handshake;
pub mod misses;
pub mod region_cache;
pub mod scene;
pub mod scheduler;

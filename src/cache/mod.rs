pub mod entry;
pub mod orphans;
pub mod payload;
pub mod spatial;
pub mod store;

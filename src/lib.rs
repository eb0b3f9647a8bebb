pub mod cache;
pub mod demos;
pub mod entity;
pub mod region;
pub mod settings;

pub mod apply;
pub mod client;
pub mod namespace_cache;

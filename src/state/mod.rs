pub mod attr_cache;
pub mod counter;

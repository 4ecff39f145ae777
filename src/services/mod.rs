pub mod content_cache;
pub mod persistence;

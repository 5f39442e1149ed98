//! Artifact cache interface and implementations

pub mod sqlite;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

/// Receives one artifact's bytes, then commits them on `close`.
pub trait CacheWriter: Write {
    fn close(self: Box<Self>) -> Result<()>;
}

/// ArtifactCache hands out writers for named artifacts
pub trait ArtifactCache: Send + Sync {
    fn acquire_writer(&self, key: &str) -> Result<Box<dyn CacheWriter>>;
}

/// A stored artifact as read back from the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub content_hash: String,
    pub body: String,
    pub cached_at: DateTime<Utc>,
}

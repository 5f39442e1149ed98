//! SQLite artifact cache

use crate::storage::{ArtifactCache, CacheEntry, CacheWriter};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = include_str!("sqlite_schema.sql");

/// SQLite-backed cache of fetched bugs
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| anyhow!("cache connection lock poisoned"))
}

/// SHA-256 of the body, hex encoded
pub fn content_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

impl SqliteCache {
    /// Open (or create) the cache database at `path`
    pub fn new(path: PathBuf) -> Result<Self> {
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open cache database at {:?}", path))?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize cache schema")?;

        Ok(SqliteCache {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let conn = lock(&self.conn)?;
        let entry = conn
            .query_row(
                "SELECT key, content_hash, body, cached_at FROM bug_cache WHERE key = ?",
                params![key],
                |row| {
                    Ok(CacheEntry {
                        key: row.get(0)?,
                        content_hash: row.get(1)?,
                        body: row.get(2)?,
                        cached_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Cached keys, most recently written first
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare("SELECT key FROM bug_cache ORDER BY cached_at DESC, key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    fn store(conn: &Mutex<Connection>, key: &str, body: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(body)
            .with_context(|| format!("Cache entry {} is not valid UTF-8", key))?;
        let hash = content_hash(body);

        let conn = lock(conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO bug_cache (key, content_hash, body, cached_at) VALUES (?, ?, ?, ?)",
            params![key, hash, text, Utc::now()],
        )?;
        debug!("cached {} ({} bytes, {})", key, body.len(), hash);
        Ok(())
    }
}

impl ArtifactCache for SqliteCache {
    fn acquire_writer(&self, key: &str) -> Result<Box<dyn CacheWriter>> {
        Ok(Box::new(SqliteWriter {
            conn: Arc::clone(&self.conn),
            key: key.to_string(),
            buf: Vec::new(),
        }))
    }
}

/// Buffers one entry until it is closed
struct SqliteWriter {
    conn: Arc<Mutex<Connection>>,
    key: String,
    buf: Vec<u8>,
}

impl Write for SqliteWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CacheWriter for SqliteWriter {
    fn close(self: Box<Self>) -> Result<()> {
        SqliteCache::store(&self.conn, &self.key, &self.buf)
    }
}

//! Bounded LRU of `(header-key -> live REPL session)`. Loading mathematical
//! libraries into the REPL is the dominant cost of a query; this cache
//! amortizes it by keeping long-lived sessions whose environment 0 already
//! has the imports a theorem needs.
//!
//! A cache is exclusively owned by one worker; it needs no internal locking
//! because that worker is single-threaded with respect to its own cache.

use crate::config::Config;
use crate::error::{Result, VerifyError};
use crate::header::HeaderKey;
use crate::repl::{ProcessSessionFactory, Session, SessionFactory};
use lru::LruCache;
use serde_json::json;
use std::num::NonZeroUsize;

pub struct ReplCache {
    entries: LruCache<HeaderKey, Box<dyn Session>>,
    factory: Box<dyn SessionFactory>,
    read_deadline: std::time::Duration,
}

impl ReplCache {
    pub fn new(config: &Config) -> Self {
        let factory = ProcessSessionFactory {
            repl_path: config.repl_path.clone(),
            project_path: config.project_path.clone(),
            host: config.repl_host.clone(),
            connect_timeout: config.repl_connect_timeout,
        };
        Self::with_factory(config, Box::new(factory))
    }

    pub fn with_factory(config: &Config, factory: Box<dyn SessionFactory>) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::new(1).unwrap());
        ReplCache {
            entries: LruCache::new(capacity),
            factory,
            read_deadline: config.repl_read_deadline,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Return a mutable borrow of the REPL session for `header_key`,
    /// spawning and initializing a fresh one (evicting the LRU entry first
    /// if the cache is already at capacity) if there isn't one cached.
    pub fn open_repl(&mut self, header_key: &HeaderKey) -> Result<&mut Box<dyn Session>> {
        if self.entries.contains(header_key) {
            return Ok(self.entries.get_mut(header_key).unwrap());
        }

        if self.entries.len() >= self.entries.cap().get() {
            if let Some((evicted_key, session)) = self.entries.pop_lru() {
                tracing::info!(header = %evicted_key, "evicting LRU REPL session");
                session.shutdown();
            }
        }

        let mut session = self.factory.spawn()?;

        let init_cmd = json!({
            "allTactics": true,
            "cmd": header_key.joined(),
            "keepEnv": true,
        });
        let reply = session.interact(&init_cmd, self.read_deadline)?;
        if let Some(err) = reply.get("error").and_then(|v| v.as_str()) {
            session.shutdown();
            return Err(VerifyError::CacheInitFailed(err.to_string()));
        }

        tracing::debug!(
            pid = session.pid(),
            port = session.port(),
            header = %header_key,
            "opened new REPL session"
        );

        self.entries.put(header_key.clone(), session);
        Ok(self.entries.get_mut(header_key).unwrap())
    }

    /// Evict a specific entry (used when a query on it came back with a
    /// broken connection, so the next job with the same header rebuilds
    /// cleanly).
    pub fn evict(&mut self, header_key: &HeaderKey) {
        if let Some(session) = self.entries.pop(header_key) {
            session.shutdown();
        }
    }

    /// Tear down every cached entry. Used on worker recycling and shutdown.
    pub fn clear(&mut self) {
        while let Some((_, session)) = self.entries.pop_lru() {
            session.shutdown();
        }
    }
}

impl Drop for ReplCache {
    fn drop(&mut self) {
        self.clear();
    }
}

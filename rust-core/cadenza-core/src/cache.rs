//! # Route Cache
//!
//! Persists the route table between runs so production starts skip
//! controller registration. Entries expire after a TTL; anything expired,
//! missing or unreadable is treated as a cache miss.

use crate::error::Result;
use crate::route::RouteEntry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Default lifetime of a stored route table
pub const DEFAULT_ROUTE_TTL: Duration = Duration::from_secs(3600);

/// Storage for a previously built route table
pub trait RouteCache: Send + Sync {
    /// The stored table, unless absent or expired
    fn get(&self) -> Option<Vec<RouteEntry>>;

    /// Replace the stored table
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be persisted.
    fn store(&self, routes: &[RouteEntry], ttl: Duration) -> Result<()>;

    /// Drop the stored table
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be removed.
    fn clear(&self) -> Result<()>;
}

/// In-process route cache
#[derive(Debug, Default)]
pub struct MemoryRouteCache {
    slot: Mutex<Option<(Vec<RouteEntry>, Instant)>>,
}

impl MemoryRouteCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RouteCache for MemoryRouteCache {
    fn get(&self) -> Option<Vec<RouteEntry>> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref()
            .filter(|(_, expires)| Instant::now() < *expires)
            .map(|(routes, _)| routes.clone())
    }

    fn store(&self, routes: &[RouteEntry], ttl: Duration) -> Result<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some((routes.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    routes: Vec<RouteEntry>,
    /// Unix seconds
    expires: u64,
    /// Unix seconds
    created: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// JSON file cache at `<base>/var/cache/routes.json`
#[derive(Debug, Clone)]
pub struct FileRouteCache {
    path: PathBuf,
}

impl FileRouteCache {
    /// Cache under the application base path
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self::at(base_path.as_ref().join("var").join("cache").join("routes.json"))
    }

    /// Cache at an explicit file path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the cache file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RouteCache for FileRouteCache {
    fn get(&self) -> Option<Vec<RouteEntry>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Route cache unreadable");
                return None;
            }
        };

        let file: CacheFile = match serde_json::from_slice(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Route cache corrupt, ignoring");
                return None;
            }
        };

        if file.expires <= unix_now() {
            debug!(path = %self.path.display(), "Route cache expired");
            return None;
        }
        Some(file.routes)
    }

    fn store(&self, routes: &[RouteEntry], ttl: Duration) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let created = unix_now();
        let file = CacheFile {
            routes: routes.to_vec(),
            expires: created + ttl.as_secs(),
            created,
        };

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&file)?)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), routes = routes.len(), "Route cache stored");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

//! In-memory build table with bounded size and TTL eviction.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::core::{Build, BuildSnapshot};
use crate::errors::OrchestratorError;
use crate::utils::Timestamp;

/// Thread-safe table of known builds.
///
/// Holds at most `max_builds` entries. When the bound is exceeded the oldest
/// terminal builds are evicted first; non-terminal builds are never evicted.
#[derive(Debug)]
pub struct BuildRegistry {
    builds: Mutex<HashMap<String, Build>>,
    max_builds: usize,
}

impl BuildRegistry {
    /// Creates a registry bounded to `max_builds` entries.
    #[must_use]
    pub fn new(max_builds: usize) -> Self {
        Self {
            builds: Mutex::new(HashMap::new()),
            max_builds: max_builds.max(1),
        }
    }

    /// Returns the configured bound.
    #[must_use]
    pub fn max_builds(&self) -> usize {
        self.max_builds
    }

    /// Registers a build if fewer than `limit` builds are active.
    ///
    /// The capacity check and the insert happen under one lock, so two
    /// concurrent submissions cannot both take the last slot.
    pub fn try_register(&self, build: Build, limit: usize) -> Result<(), OrchestratorError> {
        let mut builds = self.builds.lock();

        let active = builds.values().filter(|b| !b.is_terminal()).count();
        if active >= limit {
            return Err(OrchestratorError::Capacity { active, limit });
        }
        if builds.contains_key(build.id()) {
            return Err(OrchestratorError::InvalidState {
                id: build.id().to_string(),
                status: builds[build.id()].status().to_string(),
                message: "a build with this id is already registered".to_string(),
            });
        }

        builds.insert(build.id().to_string(), build);
        let evicted = Self::evict_overflow(&mut builds, self.max_builds);
        if evicted > 0 {
            debug!(evicted, "Evicted oldest terminal builds over the registry bound");
        }
        Ok(())
    }

    /// Returns a snapshot of a build.
    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<BuildSnapshot> {
        self.builds.lock().get(id).map(Build::snapshot)
    }

    /// Reads a build under the lock.
    pub fn with_build<R>(&self, id: &str, f: impl FnOnce(&Build) -> R) -> Option<R> {
        self.builds.lock().get(id).map(f)
    }

    /// Mutates a build under the lock. Returns `None` if the id is unknown.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Build) -> R) -> Option<R> {
        self.builds.lock().get_mut(id).map(f)
    }

    /// Returns true if the id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.builds.lock().contains_key(id)
    }

    /// Number of queued, provisioning or running builds.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.builds.lock().values().filter(|b| !b.is_terminal()).count()
    }

    /// Returns the number of registered builds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.builds.lock().len()
    }

    /// Returns true if no builds are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.builds.lock().is_empty()
    }

    /// Returns snapshots of all builds, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<BuildSnapshot> {
        let builds = self.builds.lock();
        let mut entries: Vec<&Build> = builds.values().collect();
        entries.sort_by(|a, b| a.created().cmp(&b.created()).then_with(|| a.id().cmp(b.id())));
        entries.into_iter().map(Build::snapshot).collect()
    }

    /// Removes terminal builds created at least `ttl` before `now`.
    ///
    /// Returns the number of builds removed.
    pub fn evict_expired(&self, ttl: Duration, now: Timestamp) -> usize {
        let mut builds = self.builds.lock();
        let before = builds.len();
        builds.retain(|_, build| {
            let expired = (now - build.created())
                .to_std()
                .map_or(false, |age| age >= ttl);
            !(build.is_terminal() && expired)
        });
        before - builds.len()
    }

    fn evict_overflow(builds: &mut HashMap<String, Build>, max_builds: usize) -> usize {
        if builds.len() <= max_builds {
            return 0;
        }

        let mut terminal: Vec<(Timestamp, String)> = builds
            .values()
            .filter(|b| b.is_terminal())
            .map(|b| (b.created(), b.id().to_string()))
            .collect();
        terminal.sort();

        let excess = builds.len() - max_builds;
        let mut evicted = 0;
        for (_, id) in terminal.into_iter().take(excess) {
            builds.remove(&id);
            evicted += 1;
        }
        evicted
    }
}

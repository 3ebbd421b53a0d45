//! In-memory artifact store.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

use crate::errors::RemoteError;
use crate::ports::ArtifactStore;

#[derive(Debug, Clone)]
enum Object {
    Json(Value),
    Binary,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<String, Object>,
    deleted: Vec<String>,
    read_failures: VecDeque<RemoteError>,
    exists_failures: VecDeque<RemoteError>,
    delete_failures: VecDeque<RemoteError>,
    reads: usize,
}

/// An artifact store held in memory, with one-shot failure injection.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    state: Mutex<State>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a JSON document.
    pub fn put_json(&self, key: impl Into<String>, value: Value) {
        self.state.lock().objects.insert(key.into(), Object::Json(value));
    }

    /// Stores an opaque binary object, as the remote side does for artifacts.
    pub fn put_artifact(&self, key: impl Into<String>) {
        self.state.lock().objects.insert(key.into(), Object::Binary);
    }

    /// Removes an object without recording a delete.
    pub fn remove(&self, key: &str) {
        self.state.lock().objects.remove(key);
    }

    /// Returns true if an object is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().objects.contains_key(key)
    }

    /// Keys passed to `delete`, in call order.
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    /// Number of `read_json` calls, including failed ones.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    /// Makes the next `read_json` call fail.
    pub fn fail_next_read(&self, error: RemoteError) {
        self.state.lock().read_failures.push_back(error);
    }

    /// Makes the next `exists` call fail.
    pub fn fail_next_exists(&self, error: RemoteError) {
        self.state.lock().exists_failures.push_back(error);
    }

    /// Makes the next `delete` call fail.
    pub fn fail_next_delete(&self, error: RemoteError) {
        self.state.lock().delete_failures.push_back(error);
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        let mut state = self.state.lock();
        if let Some(error) = state.exists_failures.pop_front() {
            return Err(error);
        }
        Ok(state.objects.contains_key(key))
    }

    async fn read_json(&self, key: &str) -> Result<Option<Value>, RemoteError> {
        let mut state = self.state.lock();
        state.reads += 1;
        if let Some(error) = state.read_failures.pop_front() {
            return Err(error);
        }
        match state.objects.get(key) {
            None => Ok(None),
            Some(Object::Json(value)) => Ok(Some(value.clone())),
            Some(Object::Binary) => Err(RemoteError::fatal("store.read_json", format!("{key} is not JSON"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        if let Some(error) = state.delete_failures.pop_front() {
            return Err(error);
        }
        state.objects.remove(key);
        state.deleted.push(key.to_string());
        Ok(())
    }
}

//! Persistence collaborator
//!
//! The engine never issues raw queries; everything goes through
//! [`Repository`]. Writes use optimistic versioning: an entity read at
//! version `n` can only be written back while the store still holds
//! version `n`, and a successful write returns it at `n + 1`. A lost race
//! is a [`StoreError::Conflict`].
//!
//! Human-facing numbers come from [`Sequences`], a per-scope counter that
//! only moves forward.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::core::entity::Entity;
use crate::core::error::StoreError;
use crate::core::identity::EntityId;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Per-entity-type persistence
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// Insert a new entity; the returned copy carries version 1
    async fn create(&self, entity: E) -> StoreResult<E>;

    /// Replace an entity if its version still matches; returns the new copy
    async fn update(&self, entity: E) -> StoreResult<E>;

    async fn get_by_id(&self, id: &EntityId) -> StoreResult<Option<E>>;

    async fn find_by_parent(&self, parent_id: &str) -> StoreResult<Vec<E>>;

    async fn delete(&self, id: &EntityId) -> StoreResult<()>;

    async fn find_by_status(
        &self,
        parent_id: &str,
        statuses: &[E::Status],
    ) -> StoreResult<Vec<E>> {
        Ok(self
            .find_by_parent(parent_id)
            .await?
            .into_iter()
            .filter(|e| statuses.contains(&e.status()))
            .collect())
    }
}

/// Monotonic counters keyed by scope (e.g. one per blueprint)
#[async_trait]
pub trait Sequences: Send + Sync {
    /// Reserve the next number in `scope`
    ///
    /// The result is above both every number handed out before and
    /// `floor`. Concurrent callers never receive the same number.
    async fn next(&self, scope: &str, floor: u32) -> StoreResult<u32>;
}

/// Run a store call under a deadline
///
/// An elapsed deadline is reported as `Unavailable`, which callers treat
/// as retryable, never as a lifecycle failure.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Unavailable(format!(
            "store call exceeded {} ms",
            timeout.as_millis()
        ))),
    }
}

/// In-process repository, ordered by id
pub struct MemoryStore<E> {
    docs: RwLock<BTreeMap<EntityId, E>>,
}

impl<E> Default for MemoryStore<E> {
    fn default() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<E: Entity> MemoryStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for MemoryStore<E> {
    async fn create(&self, mut entity: E) -> StoreResult<E> {
        let mut docs = self.docs.write();
        if docs.contains_key(entity.id()) {
            return Err(StoreError::Duplicate(entity.id().to_string()));
        }
        entity.set_version(1);
        docs.insert(entity.id().clone(), entity.clone());
        Ok(entity)
    }

    async fn update(&self, mut entity: E) -> StoreResult<E> {
        let mut docs = self.docs.write();
        let stored = docs.get(entity.id()).ok_or_else(|| StoreError::NotFound {
            kind: E::PREFIX.kind(),
            id: entity.id().to_string(),
        })?;
        if stored.version() != entity.version() {
            return Err(StoreError::Conflict {
                id: entity.id().to_string(),
                expected: entity.version(),
                found: stored.version(),
            });
        }
        entity.set_version(entity.version() + 1);
        docs.insert(entity.id().clone(), entity.clone());
        Ok(entity)
    }

    async fn get_by_id(&self, id: &EntityId) -> StoreResult<Option<E>> {
        Ok(self.docs.read().get(id).cloned())
    }

    async fn find_by_parent(&self, parent_id: &str) -> StoreResult<Vec<E>> {
        Ok(self
            .docs
            .read()
            .values()
            .filter(|e| e.parent_id() == parent_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &EntityId) -> StoreResult<()> {
        self.docs
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                kind: E::PREFIX.kind(),
                id: id.to_string(),
            })
    }
}

/// In-process [`Sequences`]
#[derive(Default)]
pub struct MemorySequences {
    counters: Mutex<HashMap<String, u32>>,
}

impl MemorySequences {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sequences for MemorySequences {
    async fn next(&self, scope: &str, floor: u32) -> StoreResult<u32> {
        let mut counters = self.counters.lock();
        let value = counters.entry(scope.to_string()).or_insert(0);
        *value = (*value).max(floor).checked_add(1).ok_or_else(|| {
            StoreError::Unavailable(format!("sequence '{}' is exhausted", scope))
        })?;
        Ok(*value)
    }
}

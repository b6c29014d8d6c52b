//! Pin repository
//!
//! Create/delete/list pin records against the remote document store while
//! maintaining an insertion-ordered in-memory cache. The cache is the single
//! source of truth for the host's pin list and is only mutated after the
//! corresponding remote operation succeeded, so it reflects the remote store
//! within one round trip of every mutation.
//!
//! Operations on the same pin id are serialized through a per-id lock;
//! operations on distinct ids interleave freely.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::data::models::{EntityId, IncidentType, Pin, PinDocument};
use crate::data::store::{DocumentStore, StoreError};
use crate::error::{EngineError, Result};

/// Repository for persisted pins
pub struct PinRepository {
    store: Arc<dyn DocumentStore>,
    /// Insertion-ordered cache; never holds two entries with the same id
    cache: RwLock<Vec<Pin>>,
    /// Per-id serialization for remote operations
    id_locks: Mutex<HashMap<EntityId, Arc<Mutex<()>>>>,
    /// Authenticated caller; used for the local ownership gate
    user_id: String,
}

impl PinRepository {
    /// Create a repository over the given store
    pub fn new(store: Arc<dyn DocumentStore>, user_id: String) -> Self {
        Self {
            store,
            cache: RwLock::new(Vec::new()),
            id_locks: Mutex::new(HashMap::new()),
            user_id,
        }
    }

    /// Acquire the serialization lock for one pin id
    async fn id_lock(&self, id: &EntityId) -> Arc<Mutex<()>> {
        let mut locks = self.id_locks.lock().await;
        locks.entry(id.clone()).or_default().clone()
    }

    /// Drop the id lock entry once no operation holds it
    async fn release_id_lock(&self, id: &EntityId) {
        let mut locks = self.id_locks.lock().await;
        if let Some(lock) = locks.get(id) {
            // Map holds one reference, we hold the other
            if Arc::strong_count(lock) <= 2 {
                locks.remove(id);
            }
        }
    }

    /// Persist a pin, then append it to the cache
    ///
    /// Idempotent on retry: writing the same id again replaces the cached
    /// entry instead of duplicating it. On failure the caller discards the
    /// draft; there is no automatic retry, so an ambiguous network state
    /// cannot silently duplicate pins.
    pub async fn create(&self, pin: Pin) -> Result<()> {
        let lock = self.id_lock(&pin.id).await;
        let guard = lock.lock().await;

        let document = PinDocument::from(&pin);
        let result = self.store.put(&pin.id, &document).await;

        match result {
            Ok(()) => {
                let mut cache = self.cache.write().await;
                if let Some(existing) = cache.iter_mut().find(|p| p.id == pin.id) {
                    *existing = pin.clone();
                } else {
                    cache.push(pin.clone());
                }
                tracing::info!(pin_id = %pin.id, incident_type = pin.incident_type.wire_id(), "Pin persisted");
                drop(guard);
                self.release_id_lock(&pin.id).await;
                Ok(())
            }
            Err(error) => {
                tracing::warn!(pin_id = %pin.id, %error, "Pin create failed");
                drop(guard);
                self.release_id_lock(&pin.id).await;
                Err(error.into())
            }
        }
    }

    /// Patch a pin's video URL remotely, then in the cache
    ///
    /// # Errors
    /// `Persistence` if the pin no longer exists remotely (already deleted)
    pub async fn update_video_url(&self, id: &EntityId, video_url: &str) -> Result<()> {
        let lock = self.id_lock(id).await;
        let guard = lock.lock().await;

        let result = self.store.patch_video_url(id, video_url).await;
        let outcome = match result {
            Ok(()) => {
                let mut cache = self.cache.write().await;
                if let Some(pin) = cache.iter_mut().find(|p| &p.id == id) {
                    pin.video_url = video_url.to_string();
                }
                tracing::info!(pin_id = %id, "Pin video URL attached");
                Ok(())
            }
            Err(StoreError::Missing) => {
                tracing::warn!(pin_id = %id, "Video URL update skipped: pin already deleted");
                Err(EngineError::Persistence(
                    "pin no longer exists".to_string(),
                ))
            }
            Err(error) => {
                tracing::warn!(pin_id = %id, %error, "Video URL update failed");
                Err(error.into())
            }
        };

        drop(guard);
        self.release_id_lock(id).await;
        outcome
    }

    /// Delete a pin remotely, then from the cache
    ///
    /// The server enforces ownership; the client mirrors the rule and never
    /// attempts a delete for a pin it does not own.
    pub async fn delete(&self, pin: &Pin) -> Result<()> {
        if !self.can_edit(pin) {
            return Err(EngineError::PermissionDenied);
        }

        let lock = self.id_lock(&pin.id).await;
        let guard = lock.lock().await;

        let result = match self.store.delete(&pin.id).await {
            // Already gone remotely; converge the cache anyway
            Ok(()) | Err(StoreError::Missing) => {
                let mut cache = self.cache.write().await;
                cache.retain(|p| p.id != pin.id);
                tracing::info!(pin_id = %pin.id, "Pin deleted");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(pin_id = %pin.id, %error, "Pin delete failed");
                Err(error.into())
            }
        };

        drop(guard);
        self.release_id_lock(&pin.id).await;
        result
    }

    /// Full fetch, replacing the cache wholesale
    ///
    /// Used for initial load and resync, not incremental updates. Documents
    /// that fail validation (foreign or corrupted) are skipped with a
    /// warning rather than poisoning the whole list.
    pub async fn list_all(&self) -> Result<Vec<Pin>> {
        let envelopes = self.store.list().await.map_err(EngineError::from)?;

        let mut pins = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let id = envelope.id.clone();
            match envelope.document.into_pin(envelope.id) {
                Ok(pin) => pins.push(pin),
                Err(error) => {
                    tracing::warn!(pin_id = %id, %error, "Skipping invalid pin document");
                }
            }
        }

        let mut cache = self.cache.write().await;
        *cache = pins.clone();
        tracing::info!(count = pins.len(), "Pin cache resynced");
        Ok(pins)
    }

    /// Snapshot of the cached pins, in insertion order
    pub async fn snapshot(&self) -> Vec<Pin> {
        self.cache.read().await.clone()
    }

    /// Cached pins of one incident type (pure read-side projection)
    pub async fn pins_of_type(&self, incident_type: IncidentType) -> Vec<Pin> {
        self.cache
            .read()
            .await
            .iter()
            .filter(|p| p.incident_type == incident_type)
            .cloned()
            .collect()
    }

    /// Cached pins owned by the current user (pure read-side projection)
    pub async fn my_pins(&self) -> Vec<Pin> {
        self.cache
            .read()
            .await
            .iter()
            .filter(|p| p.owner_id == self.user_id)
            .cloned()
            .collect()
    }

    /// Local mirror of the server-side ownership rule
    pub fn can_edit(&self, pin: &Pin) -> bool {
        pin.owner_id == self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::store::DocumentEnvelope;
    use crate::geo::Coordinate;
    use async_trait::async_trait;
    use chrono::Utc;

    /// In-memory store; optionally fails the next write
    #[derive(Default)]
    struct InMemoryStore {
        documents: std::sync::Mutex<HashMap<EntityId, PinDocument>>,
        fail_next: std::sync::Mutex<Option<StoreError>>,
    }

    impl InMemoryStore {
        fn fail_next(&self, error: StoreError) {
            *self.fail_next.lock().unwrap() = Some(error);
        }

        fn take_failure(&self) -> Option<StoreError> {
            self.fail_next.lock().unwrap().take()
        }
    }

    #[async_trait]
    impl DocumentStore for InMemoryStore {
        async fn put(
            &self,
            id: &EntityId,
            document: &PinDocument,
        ) -> std::result::Result<(), StoreError> {
            if let Some(error) = self.take_failure() {
                return Err(error);
            }
            self.documents
                .lock()
                .unwrap()
                .insert(id.clone(), document.clone());
            Ok(())
        }

        async fn patch_video_url(
            &self,
            id: &EntityId,
            video_url: &str,
        ) -> std::result::Result<(), StoreError> {
            if let Some(error) = self.take_failure() {
                return Err(error);
            }
            let mut documents = self.documents.lock().unwrap();
            match documents.get_mut(id) {
                Some(document) => {
                    document.video_url = video_url.to_string();
                    Ok(())
                }
                None => Err(StoreError::Missing),
            }
        }

        async fn delete(&self, id: &EntityId) -> std::result::Result<(), StoreError> {
            if let Some(error) = self.take_failure() {
                return Err(error);
            }
            match self.documents.lock().unwrap().remove(id) {
                Some(_) => Ok(()),
                None => Err(StoreError::Missing),
            }
        }

        async fn list(&self) -> std::result::Result<Vec<DocumentEnvelope>, StoreError> {
            Ok(self
                .documents
                .lock()
                .unwrap()
                .iter()
                .map(|(id, document)| DocumentEnvelope {
                    id: id.clone(),
                    document: document.clone(),
                })
                .collect())
        }
    }

    fn test_pin(owner: &str) -> Pin {
        Pin {
            id: EntityId::new(),
            coordinate: Coordinate::new(40.0, -73.0).unwrap(),
            incident_type: IncidentType::Verbal,
            video_url: String::new(),
            owner_id: owner.to_string(),
            created_at: Utc::now(),
            device_id: "device-1".to_string(),
        }
    }

    fn repository() -> (PinRepository, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::default());
        (
            PinRepository::new(store.clone(), "user-1".to_string()),
            store,
        )
    }

    #[tokio::test]
    async fn create_appends_in_insertion_order() {
        let (repo, _store) = repository();
        let first = test_pin("user-1");
        let second = test_pin("user-1");

        repo.create(first.clone()).await.unwrap();
        repo.create(second.clone()).await.unwrap();

        let cached = repo.snapshot().await;
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].id, first.id);
        assert_eq!(cached[1].id, second.id);
        assert!(cached.iter().all(|p| p.video_url.is_empty()));
    }

    #[tokio::test]
    async fn create_retry_with_same_id_does_not_duplicate() {
        let (repo, _store) = repository();
        let pin = test_pin("user-1");

        repo.create(pin.clone()).await.unwrap();
        repo.create(pin.clone()).await.unwrap();

        assert_eq!(repo.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_create_leaves_cache_untouched() {
        let (repo, store) = repository();
        store.fail_next(StoreError::Network("connection reset".to_string()));

        let error = repo.create(test_pin("user-1")).await.unwrap_err();
        assert!(matches!(error, EngineError::Persistence(_)));
        assert!(repo.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn update_video_url_patches_cache_after_remote() {
        let (repo, _store) = repository();
        let pin = test_pin("user-1");
        repo.create(pin.clone()).await.unwrap();

        repo.update_video_url(&pin.id, "https://media.example.com/v.mp4")
            .await
            .unwrap();

        let cached = repo.snapshot().await;
        assert_eq!(cached[0].video_url, "https://media.example.com/v.mp4");
    }

    #[tokio::test]
    async fn update_of_deleted_pin_errors() {
        let (repo, _store) = repository();
        let pin = test_pin("user-1");

        let error = repo
            .update_video_url(&pin.id, "https://media.example.com/v.mp4")
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::Persistence(_)));
    }

    #[tokio::test]
    async fn delete_refuses_non_owned_pin() {
        let (repo, store) = repository();
        let foreign = test_pin("someone-else");

        let error = repo.delete(&foreign).await.unwrap_err();
        assert!(matches!(error, EngineError::PermissionDenied));
        // The store was never contacted
        assert!(store.documents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_from_store_and_cache() {
        let (repo, store) = repository();
        let pin = test_pin("user-1");
        repo.create(pin.clone()).await.unwrap();

        repo.delete(&pin).await.unwrap();

        assert!(repo.snapshot().await.is_empty());
        assert!(store.documents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_all_replaces_cache_wholesale() {
        let (repo, store) = repository();
        let stale = test_pin("user-1");
        repo.create(stale.clone()).await.unwrap();

        // Remote state moved on without us
        store.documents.lock().unwrap().clear();
        let fresh = test_pin("user-2");
        store
            .documents
            .lock()
            .unwrap()
            .insert(fresh.id.clone(), PinDocument::from(&fresh));

        let pins = repo.list_all().await.unwrap();
        assert_eq!(pins.len(), 1);
        assert_eq!(pins[0].id, fresh.id);
        assert_eq!(repo.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn projections_filter_by_type_and_owner() {
        let (repo, _store) = repository();
        let mut verbal = test_pin("user-1");
        verbal.incident_type = IncidentType::Verbal;
        let mut physical = test_pin("user-2");
        physical.incident_type = IncidentType::Physical;

        repo.create(verbal.clone()).await.unwrap();
        repo.create(physical.clone()).await.unwrap();

        let verbal_pins = repo.pins_of_type(IncidentType::Verbal).await;
        assert_eq!(verbal_pins.len(), 1);
        assert_eq!(verbal_pins[0].id, verbal.id);

        let mine = repo.my_pins().await;
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, verbal.id);
    }
}

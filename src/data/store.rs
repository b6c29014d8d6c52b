//! Remote document store client
//!
//! The store holds one document per pin, keyed by pin id. The engine talks
//! to it through the `DocumentStore` trait; `RestDocumentStore` is the
//! production implementation over HTTP. Server-side write policy (ownership
//! on update/delete, field completeness on create) remains authoritative;
//! the client only mirrors the ownership check locally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DocumentStoreConfig;
use crate::data::models::{EntityId, PinDocument};
use crate::error::EngineError;

/// Classified document-store failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The document no longer exists remotely (already deleted)
    #[error("document not found")]
    Missing,

    /// Rejected by the store's access policy
    #[error("access denied by the store")]
    Denied,

    /// Transport-level failure; the write may or may not have landed
    #[error("store network error: {0}")]
    Network(String),

    /// Anything else (malformed response, server fault)
    #[error("store error: {0}")]
    Other(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

/// A listed document together with its id
///
/// Ids key the document path and are not part of the document body, so list
/// responses carry them in an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEnvelope {
    pub id: EntityId,
    #[serde(flatten)]
    pub document: PinDocument,
}

/// Remote document store collaborator
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write the document for `id`, creating or replacing it
    async fn put(&self, id: &EntityId, document: &PinDocument) -> Result<(), StoreError>;

    /// Patch only the `videoURL` field of an existing document
    ///
    /// Fails with `Missing` if the document was already deleted.
    async fn patch_video_url(&self, id: &EntityId, video_url: &str) -> Result<(), StoreError>;

    /// Delete the document for `id`
    async fn delete(&self, id: &EntityId) -> Result<(), StoreError>;

    /// Fetch every document in the collection
    async fn list(&self) -> Result<Vec<DocumentEnvelope>, StoreError>;
}

/// HTTP implementation of the document store
///
/// Documents live at `{base_url}/{collection}/{id}`; the collection listing
/// at `{base_url}/{collection}`. All requests carry the caller's bearer
/// token.
pub struct RestDocumentStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    auth_token: String,
}

impl RestDocumentStore {
    /// Create a store client from configuration
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &DocumentStoreConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .user_agent("PinDrop/0.1.0")
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| EngineError::Internal(e.into()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn document_url(&self, id: &EntityId) -> String {
        format!("{}/{}/{}", self.base_url, self.collection, id)
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url, self.collection)
    }

    /// Map a non-success response status to a store error
    fn classify_status(status: reqwest::StatusCode) -> StoreError {
        if status == reqwest::StatusCode::NOT_FOUND {
            StoreError::Missing
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            StoreError::Denied
        } else {
            StoreError::Other(format!("unexpected status {}", status))
        }
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn put(&self, id: &EntityId, document: &PinDocument) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.document_url(id))
            .bearer_auth(&self.auth_token)
            .json(document)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::classify_status(response.status()))
        }
    }

    async fn patch_video_url(&self, id: &EntityId, video_url: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .patch(self.document_url(id))
            .bearer_auth(&self.auth_token)
            .json(&serde_json::json!({ "videoURL": video_url }))
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::classify_status(response.status()))
        }
    }

    async fn delete(&self, id: &EntityId) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.document_url(id))
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::classify_status(response.status()))
        }
    }

    async fn list(&self) -> Result<Vec<DocumentEnvelope>, StoreError> {
        let response = self
            .client
            .get(self.collection_url())
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::classify_status(response.status()));
        }

        response
            .json::<Vec<DocumentEnvelope>>()
            .await
            .map_err(|e| StoreError::Other(format!("malformed list response: {}", e)))
    }
}

//! Data layer: models, remote document store client, and pin repository

pub mod models;
pub mod repository;
pub mod store;

pub use models::{EntityId, IncidentType, LocalVideo, Pin, PinDocument, PinDraft};
pub use repository::PinRepository;
pub use store::{DocumentEnvelope, DocumentStore, RestDocumentStore, StoreError};

//! The three backend capabilities the client core consumes: document
//! subscription, conditional field mutation, and identity. Any store with
//! these semantics can sit behind the traits; `waypost_backend` ships the
//! in-memory reference implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

/// A document as delivered by the store: the store-assigned id plus the raw
/// JSON field map. Ids live outside the field map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

/// A collection name plus server-side ordering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    pub order_by: String,
    pub descending: bool,
}

impl Query {
    pub fn ordered_desc(collection: &str, order_by: &str) -> Self {
        Query {
            collection: collection.to_owned(),
            order_by: order_by.to_owned(),
            descending: true,
        }
    }
}

/// One per-field operation of a conditional mutation. Every op in a single
/// `update_fields` call is applied to one document atomically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldOp {
    Increment { field: String, by: i64 },
    ArrayUnion { field: String, value: Value },
    ArrayRemove { field: String, value: Value },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Full ordered state of a subscribed collection, or the error that
/// interrupted delivery.
pub type Notification = Result<Vec<Document>, StoreError>;

/// Cancel handle for a standing subscription. Cancelling twice is a no-op;
/// dropping the handle cancels.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a document and returns its store-assigned id.
    async fn create(
        &self,
        collection: &str,
        fields: Map<String, Value>,
    ) -> Result<String, StoreError>;

    /// Point read of a single document.
    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError>;

    /// Applies every op to the one document atomically; the whole call fails
    /// with `NotFound` if the document does not exist.
    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        ops: Vec<FieldOp>,
    ) -> Result<(), StoreError>;

    /// Delivers the current full ordered document list immediately and again
    /// after every change, until the handle is cancelled.
    fn subscribe(&self, query: Query) -> (mpsc::UnboundedReceiver<Notification>, Subscription);
}

/// The authenticated principal, if any.
pub trait Identity: Send + Sync {
    fn user_id(&self) -> Option<String>;
    fn user_name(&self) -> Option<String>;
}

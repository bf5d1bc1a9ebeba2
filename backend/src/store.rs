//! In-memory document store with the same observable contract as the hosted
//! backend the client was written against: ordered snapshot subscriptions,
//! per-document atomic multi-field mutations, store-assigned ids.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use waypost_client::store::{
    Document, DocumentStore, FieldOp, Notification, Query, StoreError, Subscription,
};

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    next_id: u64,
    next_watcher: u64,
}

#[derive(Default)]
struct Collection {
    documents: HashMap<String, Map<String, Value>>,
    watchers: Vec<Watcher>,
}

struct Watcher {
    id: u64,
    query: Query,
    sender: mpsc::UnboundedSender<Notification>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes an error notification to every live subscription on the
    /// collection, standing in for a permission or connectivity failure.
    /// The subscriptions stay registered; later writes resume snapshots.
    pub fn break_subscriptions(&self, collection: &str, error: StoreError) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.collections.get_mut(collection) {
            entry
                .watchers
                .retain(|watcher| watcher.sender.send(Err(error.clone())).is_ok());
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(
        &self,
        collection: &str,
        fields: Map<String, Value>,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("{}-{}", collection, inner.next_id);

        let entry = inner.collections.entry(collection.to_owned()).or_default();
        entry.documents.insert(id.clone(), fields);
        notify(entry);

        debug!("created {}/{}", collection, id);
        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        let inner = self.inner.lock().unwrap();
        let fields = inner
            .collections
            .get(collection)
            .and_then(|entry| entry.documents.get(id))
            .ok_or(StoreError::NotFound)?;
        Ok(Document {
            id: id.to_owned(),
            fields: fields.clone(),
        })
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        ops: Vec<FieldOp>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .collections
            .get_mut(collection)
            .ok_or(StoreError::NotFound)?;
        let fields = entry.documents.get_mut(id).ok_or(StoreError::NotFound)?;

        // All ops land on a scratch copy first: a failing op must leave the
        // document untouched.
        let mut updated = fields.clone();
        for op in &ops {
            apply_op(&mut updated, op)?;
        }
        *fields = updated;
        notify(entry);

        debug!("updated {}/{} with {} ops", collection, id, ops.len());
        Ok(())
    }

    fn subscribe(&self, query: Query) -> (mpsc::UnboundedReceiver<Notification>, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.inner.lock().unwrap();
        inner.next_watcher += 1;
        let watcher_id = inner.next_watcher;

        let entry = inner
            .collections
            .entry(query.collection.clone())
            .or_default();
        let _ = tx.send(Ok(snapshot(&entry.documents, &query)));
        entry.watchers.push(Watcher {
            id: watcher_id,
            query: query.clone(),
            sender: tx,
        });
        drop(inner);

        let registry = self.inner.clone();
        let collection = query.collection;
        let subscription = Subscription::new(move || {
            let mut inner = registry.lock().unwrap();
            if let Some(entry) = inner.collections.get_mut(&collection) {
                entry.watchers.retain(|watcher| watcher.id != watcher_id);
            }
        });

        (rx, subscription)
    }
}

/// Re-delivers the full ordered collection to every watcher; watchers whose
/// receiver is gone are dropped.
fn notify(entry: &mut Collection) {
    let documents = &entry.documents;
    entry.watchers.retain(|watcher| {
        watcher
            .sender
            .send(Ok(snapshot(documents, &watcher.query)))
            .is_ok()
    });
}

fn snapshot(documents: &HashMap<String, Map<String, Value>>, query: &Query) -> Vec<Document> {
    let mut docs: Vec<Document> = documents
        .iter()
        .map(|(id, fields)| Document {
            id: id.clone(),
            fields: fields.clone(),
        })
        .collect();
    docs.sort_by(|a, b| {
        let ord = cmp_values(a.fields.get(&query.order_by), b.fields.get(&query.order_by))
            .then_with(|| a.id.cmp(&b.id));
        if query.descending {
            ord.reverse()
        } else {
            ord
        }
    });
    docs
}

// Missing fields sort before present ones; mixed types compare equal.
fn cmp_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn apply_op(fields: &mut Map<String, Value>, op: &FieldOp) -> Result<(), StoreError> {
    match op {
        FieldOp::Increment { field, by } => {
            let current = match fields.get(field) {
                Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                    StoreError::InvalidOperation(format!("{field} is not an integer"))
                })?,
                Some(_) => {
                    return Err(StoreError::InvalidOperation(format!(
                        "{field} is not a number"
                    )))
                }
                None => 0,
            };
            fields.insert(field.clone(), Value::from(current + by));
        }
        FieldOp::ArrayUnion { field, value } => {
            let array = array_entry(fields, field)?;
            if !array.contains(value) {
                array.push(value.clone());
            }
        }
        FieldOp::ArrayRemove { field, value } => {
            let array = array_entry(fields, field)?;
            array.retain(|existing| existing != value);
        }
    }
    Ok(())
}

fn array_entry<'a>(
    fields: &'a mut Map<String, Value>,
    field: &str,
) -> Result<&'a mut Vec<Value>, StoreError> {
    fields
        .entry(field.to_owned())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| StoreError::InvalidOperation(format!("{field} is not an array")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(fields) => fields,
            _ => panic!("test fields must be an object"),
        }
    }

    fn timestamps(documents: &[Document]) -> Vec<i64> {
        documents
            .iter()
            .map(|doc| doc.fields["timestamp"].as_i64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn snapshots_are_ordered_descending() {
        let store = MemoryStore::new();
        store
            .create("posts", fields(json!({ "timestamp": 1000 })))
            .await
            .unwrap();
        store
            .create("posts", fields(json!({ "timestamp": 3000 })))
            .await
            .unwrap();
        store
            .create("posts", fields(json!({ "timestamp": 2000 })))
            .await
            .unwrap();

        let (mut notifications, _subscription) =
            store.subscribe(Query::ordered_desc("posts", "timestamp"));
        let snapshot = notifications.recv().await.unwrap().unwrap();
        assert_eq!(timestamps(&snapshot), vec![3000, 2000, 1000]);
    }

    #[tokio::test]
    async fn every_write_redelivers_the_full_collection() {
        let store = MemoryStore::new();
        let (mut notifications, _subscription) =
            store.subscribe(Query::ordered_desc("posts", "timestamp"));
        assert!(notifications.recv().await.unwrap().unwrap().is_empty());

        store
            .create("posts", fields(json!({ "timestamp": 1000 })))
            .await
            .unwrap();
        let snapshot = notifications.recv().await.unwrap().unwrap();
        assert_eq!(timestamps(&snapshot), vec![1000]);

        store
            .create("posts", fields(json!({ "timestamp": 2000 })))
            .await
            .unwrap();
        let snapshot = notifications.recv().await.unwrap().unwrap();
        assert_eq!(timestamps(&snapshot), vec![2000, 1000]);
    }

    #[tokio::test]
    async fn update_on_a_missing_document_fails_whole() {
        let store = MemoryStore::new();
        let err = store
            .update_fields(
                "posts",
                "posts-1",
                vec![FieldOp::Increment {
                    field: "likeCount".into(),
                    by: 1,
                }],
            )
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound);
    }

    #[tokio::test]
    async fn a_failing_op_leaves_the_document_untouched() {
        let store = MemoryStore::new();
        let id = store
            .create(
                "posts",
                fields(json!({ "likeCount": 0, "likedBy": "oops" })),
            )
            .await
            .unwrap();

        let err = store
            .update_fields(
                "posts",
                &id,
                vec![
                    FieldOp::Increment {
                        field: "likeCount".into(),
                        by: 1,
                    },
                    FieldOp::ArrayUnion {
                        field: "likedBy".into(),
                        value: json!("u1"),
                    },
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));

        let doc = store.get("posts", &id).await.unwrap();
        assert_eq!(doc.fields["likeCount"], json!(0));
    }

    #[tokio::test]
    async fn array_union_is_a_set_add() {
        let store = MemoryStore::new();
        let id = store
            .create("posts", fields(json!({ "likedBy": [] })))
            .await
            .unwrap();

        for _ in 0..2 {
            store
                .update_fields(
                    "posts",
                    &id,
                    vec![FieldOp::ArrayUnion {
                        field: "likedBy".into(),
                        value: json!("u1"),
                    }],
                )
                .await
                .unwrap();
        }

        let doc = store.get("posts", &id).await.unwrap();
        assert_eq!(doc.fields["likedBy"], json!(["u1"]));
    }

    #[tokio::test]
    async fn array_remove_removes_every_match() {
        let store = MemoryStore::new();
        let id = store
            .create("posts", fields(json!({ "likedBy": ["u1", "u2", "u1"] })))
            .await
            .unwrap();

        store
            .update_fields(
                "posts",
                &id,
                vec![FieldOp::ArrayRemove {
                    field: "likedBy".into(),
                    value: json!("u1"),
                }],
            )
            .await
            .unwrap();

        let doc = store.get("posts", &id).await.unwrap();
        assert_eq!(doc.fields["likedBy"], json!(["u2"]));
    }

    #[tokio::test]
    async fn cancelling_stops_delivery() {
        let store = MemoryStore::new();
        let (mut notifications, mut subscription) =
            store.subscribe(Query::ordered_desc("posts", "timestamp"));
        assert!(notifications.recv().await.unwrap().unwrap().is_empty());

        subscription.cancel();
        subscription.cancel();

        store
            .create("posts", fields(json!({ "timestamp": 1000 })))
            .await
            .unwrap();
        assert!(notifications.recv().await.is_none());
    }

    #[tokio::test]
    async fn broken_subscriptions_deliver_the_error_then_resume() {
        let store = MemoryStore::new();
        let (mut notifications, _subscription) =
            store.subscribe(Query::ordered_desc("posts", "timestamp"));
        assert!(notifications.recv().await.unwrap().unwrap().is_empty());

        store.break_subscriptions("posts", StoreError::PermissionDenied);
        assert_eq!(
            notifications.recv().await.unwrap(),
            Err(StoreError::PermissionDenied)
        );

        store
            .create("posts", fields(json!({ "timestamp": 1000 })))
            .await
            .unwrap();
        let snapshot = notifications.recv().await.unwrap().unwrap();
        assert_eq!(timestamps(&snapshot), vec![1000]);
    }
}

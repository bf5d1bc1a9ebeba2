use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error};
use serde_json::Value;

use crate::post::{EventType, Post, PostDetails};
use crate::store::{DocumentStore, Identity};
use crate::{GROUPS_COLLECTION, POSTS_COLLECTION};

/// Writes the denormalized activity records other screens produce as side
/// effects: a new pin, a new review, a joined group. The feed only ever
/// consumes what this emits.
pub struct PostComposer {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn Identity>,
}

impl PostComposer {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn Identity>) -> Self {
        PostComposer { store, identity }
    }

    pub async fn announce_pin_created(
        &self,
        group_id: &str,
        pin_id: &str,
        place_name: &str,
    ) -> Option<String> {
        self.publish(EventType::PinCreated, group_id, pin_id, place_name, "")
            .await
    }

    pub async fn announce_review_added(
        &self,
        group_id: &str,
        pin_id: &str,
        place_name: &str,
        review_summary: &str,
    ) -> Option<String> {
        self.publish(
            EventType::ReviewAdded,
            group_id,
            pin_id,
            place_name,
            review_summary,
        )
        .await
    }

    pub async fn announce_group_joined(&self, group_id: &str) -> Option<String> {
        self.publish(EventType::GroupJoined, group_id, "", "", "")
            .await
    }

    /// Returns the created post id, or `None` when the caller is not signed
    /// in (silent no-op, zero backend calls) or the write failed.
    async fn publish(
        &self,
        event_type: EventType,
        group_id: &str,
        pin_id: &str,
        place_name: &str,
        review_summary: &str,
    ) -> Option<String> {
        let (user_id, user_name) = match (self.identity.user_id(), self.identity.user_name()) {
            (Some(user_id), Some(user_name)) => (user_id, user_name),
            _ => {
                debug!("post emitted without a signed-in user, skipping");
                return None;
            }
        };

        let group_name = self.group_name(group_id).await;

        let post = Post {
            id: String::new(),
            details: PostDetails {
                group_name,
                place_name: place_name.to_owned(),
                review_summary: review_summary.to_owned(),
                user_name,
                event_type,
            },
            group_id: group_id.to_owned(),
            like_count: 0,
            liked_by: Vec::new(),
            pin_id: pin_id.to_owned(),
            timestamp: now_millis(),
            user_id,
        };

        let fields = match post.to_fields() {
            Ok(fields) => fields,
            Err(err) => {
                error!("error encoding post: {err}");
                return None;
            }
        };

        match self.store.create(POSTS_COLLECTION, fields).await {
            Ok(id) => {
                debug!("created {event_type:?} post {id}");
                Some(id)
            }
            Err(err) => {
                error!("error creating post: {err}");
                None
            }
        }
    }

    /// Group name for the denormalized details, `"Unknown Group"` when the
    /// lookup misses.
    async fn group_name(&self, group_id: &str) -> String {
        match self.store.get(GROUPS_COLLECTION, group_id).await {
            Ok(doc) => doc
                .fields
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Unknown Group")
                .to_owned(),
            Err(err) => {
                debug!("group {group_id} lookup failed: {err}");
                "Unknown Group".to_owned()
            }
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

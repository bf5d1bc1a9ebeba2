use std::sync::Arc;

use log::{debug, error};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::post::Post;
use crate::store::{DocumentStore, FieldOp, Identity, Query, Subscription};
use crate::POSTS_COLLECTION;

/// Live view over the posts collection plus the like toggle. `posts` and
/// `error_message` are the observable fields; `start`/`stop` bound the
/// subscription lifetime, and dropping the feed stops it.
pub struct ActivityFeed {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn Identity>,
    posts: Arc<watch::Sender<Vec<Post>>>,
    error_message: Arc<watch::Sender<Option<String>>>,
    live: Option<(Subscription, JoinHandle<()>)>,
}

impl ActivityFeed {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn Identity>) -> Self {
        let (posts, _) = watch::channel(Vec::new());
        let (error_message, _) = watch::channel(None);

        ActivityFeed {
            store,
            identity,
            posts: Arc::new(posts),
            error_message: Arc::new(error_message),
            live: None,
        }
    }

    /// The feed, most recent post first. Replaced wholesale on every
    /// notification, never merged.
    pub fn posts(&self) -> watch::Receiver<Vec<Post>> {
        self.posts.subscribe()
    }

    /// Last fetch failure, if any. A failure does not clear `posts`.
    pub fn error_message(&self) -> watch::Receiver<Option<String>> {
        self.error_message.subscribe()
    }

    /// Opens the standing subscription, ordered by timestamp descending on
    /// the store side. An already-running subscription is cancelled first so
    /// repeated calls never leak a second listener.
    pub fn start(&mut self) {
        self.stop();

        let query = Query::ordered_desc(POSTS_COLLECTION, "timestamp");
        let (mut notifications, subscription) = self.store.subscribe(query);

        let posts = self.posts.clone();
        let error_message = self.error_message.clone();

        // The only writer of the watch channels: every state change is
        // marshaled through this one task.
        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                match notification {
                    Ok(documents) => {
                        let mut decoded = Vec::with_capacity(documents.len());
                        for doc in &documents {
                            match Post::from_document(doc) {
                                Ok(post) => decoded.push(post),
                                Err(err) => {
                                    debug!("dropping undecodable post {}: {}", doc.id, err)
                                }
                            }
                        }
                        posts.send_replace(decoded);
                    }
                    Err(err) => {
                        error_message.send_replace(Some(format!("Failed to fetch posts: {err}")));
                    }
                }
            }
        });

        self.live = Some((subscription, task));
    }

    /// Cancels the subscription. Safe when never started and safe to call
    /// twice.
    pub fn stop(&mut self) {
        if let Some((mut subscription, task)) = self.live.take() {
            subscription.cancel();
            task.abort();
        }
    }

    /// Flips the current user's membership in `post.likedBy`, keeping
    /// `likeCount` in step, with one atomic per-document mutation. The
    /// direction comes from the caller's copy of the post (the last
    /// snapshot), not a fresh read: two toggles racing ahead of a refresh
    /// can pick the same direction and drift the count. Nothing is updated
    /// locally; the next snapshot notification carries the new state.
    pub async fn toggle_like(&self, post: &Post) {
        let user_id = match self.identity.user_id() {
            Some(user_id) => user_id,
            None => {
                debug!("toggle_like without a signed-in user");
                return;
            }
        };
        if post.id.is_empty() {
            debug!("toggle_like on a post without an id");
            return;
        }

        let ops = if post.liked_by_user(&user_id) {
            vec![
                FieldOp::Increment {
                    field: "likeCount".into(),
                    by: -1,
                },
                FieldOp::ArrayRemove {
                    field: "likedBy".into(),
                    value: Value::String(user_id),
                },
            ]
        } else {
            vec![
                FieldOp::Increment {
                    field: "likeCount".into(),
                    by: 1,
                },
                FieldOp::ArrayUnion {
                    field: "likedBy".into(),
                    value: Value::String(user_id),
                },
            ]
        };

        if let Err(err) = self
            .store
            .update_fields(POSTS_COLLECTION, &post.id, ops)
            .await
        {
            error!("like toggle on {} failed: {}", post.id, err);
        }
    }
}

impl Drop for ActivityFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

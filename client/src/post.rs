use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::store::Document;

/// The domain event a post announces. Unknown tags decode to `Default`
/// instead of failing the document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    PinCreated,
    ReviewAdded,
    GroupJoined,
    Default,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PinCreated => "pin_created",
            EventType::ReviewAdded => "review_added",
            EventType::GroupJoined => "group_joined",
            EventType::Default => "default",
        }
    }

    fn from_tag(tag: &str) -> Self {
        match tag {
            "pin_created" => EventType::PinCreated,
            "review_added" => EventType::ReviewAdded,
            "group_joined" => EventType::GroupJoined,
            _ => EventType::Default,
        }
    }
}

impl Serialize for EventType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(EventType::from_tag(&tag))
    }
}

/// Denormalized display payload embedded in every post so the feed renders
/// without secondary lookups. Goes stale if a group or user is renamed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDetails {
    pub group_name: String,
    pub place_name: String,
    pub review_summary: String,
    pub user_name: String,
    pub event_type: EventType,
}

/// One activity record. Field names on the wire match the original document
/// schema. Only `likeCount` and `likedBy` ever change after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Store-assigned, carried outside the document body.
    #[serde(skip)]
    pub id: String,
    pub details: PostDetails,
    #[serde(rename = "groupID")]
    pub group_id: String,
    pub like_count: i64,
    pub liked_by: Vec<String>,
    /// Empty when the event has no pin.
    #[serde(rename = "pinID")]
    pub pin_id: String,
    /// Epoch milliseconds, client-assigned at creation.
    pub timestamp: i64,
    #[serde(rename = "userID")]
    pub user_id: String,
}

impl Post {
    /// Decodes a snapshot document, attaching the store id.
    pub fn from_document(doc: &Document) -> Result<Post, serde_json::Error> {
        let mut post: Post = serde_json::from_value(Value::Object(doc.fields.clone()))?;
        post.id = doc.id.clone();
        Ok(post)
    }

    /// The document body for a create call; the id stays out of it.
    pub fn to_fields(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(fields) => Ok(fields),
            _ => unreachable!("a struct serializes to an object"),
        }
    }

    pub fn liked_by_user(&self, user_id: &str) -> bool {
        self.liked_by.iter().any(|id| id == user_id)
    }
}

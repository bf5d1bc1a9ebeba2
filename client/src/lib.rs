pub mod composer;
pub mod feed;
pub mod post;
pub mod store;

pub const POSTS_COLLECTION: &str = "posts";
pub const GROUPS_COLLECTION: &str = "groups";

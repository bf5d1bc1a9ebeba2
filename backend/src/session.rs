use std::sync::Mutex;

use waypost_client::store::Identity;

/// In-process stand-in for the identity provider: at most one signed-in
/// user, readable from any thread.
#[derive(Default)]
pub struct AuthSession {
    user: Mutex<Option<User>>,
}

#[derive(Clone)]
struct User {
    id: String,
    name: String,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: &str, user_name: &str) -> Self {
        let session = Self::default();
        session.sign_in(user_id, user_name);
        session
    }

    pub fn sign_in(&self, user_id: &str, user_name: &str) {
        *self.user.lock().unwrap() = Some(User {
            id: user_id.to_owned(),
            name: user_name.to_owned(),
        });
    }

    pub fn sign_out(&self) {
        *self.user.lock().unwrap() = None;
    }
}

impl Identity for AuthSession {
    fn user_id(&self) -> Option<String> {
        self.user.lock().unwrap().as_ref().map(|user| user.id.clone())
    }

    fn user_name(&self) -> Option<String> {
        self.user.lock().unwrap().as_ref().map(|user| user.name.clone())
    }
}

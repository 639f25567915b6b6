//! Session provider consulted before every sync cycle.

use std::sync::RwLock;

use studyhub_engine::UserId;

/// Who, if anyone, is signed in.
pub trait SessionProvider: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;

    fn is_authenticated(&self) -> bool {
        self.current_user_id().is_some()
    }
}

/// A session whose user is set explicitly.
#[derive(Debug, Default)]
pub struct StaticSession {
    user_id: RwLock<Option<UserId>>,
}

impl StaticSession {
    pub fn new(user_id: Option<UserId>) -> Self {
        Self {
            user_id: RwLock::new(user_id),
        }
    }

    pub fn signed_in(user_id: impl Into<UserId>) -> Self {
        Self::new(Some(user_id.into()))
    }

    pub fn sign_in(&self, user_id: impl Into<UserId>) {
        let user_id = user_id.into();
        tracing::info!(user_id = %user_id, "session signed in");
        *self.user_id.write().unwrap_or_else(|e| e.into_inner()) = Some(user_id);
    }

    pub fn sign_out(&self) {
        tracing::info!("session signed out");
        *self.user_id.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl SessionProvider for StaticSession {
    fn current_user_id(&self) -> Option<UserId> {
        self.user_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

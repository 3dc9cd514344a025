use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::sync::{Session, SessionProvider};

/// Session provider with a fixed account that tests can sign in and out.
#[derive(Debug, Default)]
pub struct StaticSession {
    session: Mutex<Option<Session>>,
}

impl StaticSession {
    pub fn signed_in(did: &str) -> Self {
        Self {
            session: Mutex::new(Some(Session::new(did, "test-access-token"))),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, did: &str) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Session::new(did, "test-access-token"));
    }

    pub fn sign_out(&self) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn is_authenticated(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

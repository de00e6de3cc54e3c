use std::sync::RwLock;

/// Credentials of the authenticated user.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: i64,
    pub token: String,
}

/// Process-wide session state: written once at login and once at logout,
/// read-mostly by every other component. Late-arriving network results are
/// dropped by checking this after the fact, so a torn-down session is never
/// revived by a stale response.
#[derive(Debug, Default)]
pub struct Session {
    inner: RwLock<Option<Credentials>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(&self, user_id: i64, token: impl Into<String>) {
        let mut inner = self.inner.write().expect("session lock poisoned");
        *inner = Some(Credentials { user_id, token: token.into() });
    }

    pub fn logout(&self) {
        let mut inner = self.inner.write().expect("session lock poisoned");
        *inner = None;
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.inner.read().expect("session lock poisoned").clone()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.inner
            .read()
            .expect("session lock poisoned")
            .as_ref()
            .map(|c| c.user_id)
    }

    pub fn is_active(&self) -> bool {
        self.inner.read().expect("session lock poisoned").is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logout_clears_identity() {
        let session = Session::new();
        assert!(!session.is_active());
        session.login(1, "tok");
        assert_eq!(session.user_id(), Some(1));
        session.logout();
        assert_eq!(session.user_id(), None);
    }
}

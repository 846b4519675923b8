use uuid::Uuid;

/// Authenticated session passed explicitly into every entitlement call
#[derive(Clone)]
pub struct SessionContext {
    pub user_id: Uuid,
    pub access_token: String,
}

impl SessionContext {
    pub fn new(user_id: Uuid, access_token: impl Into<String>) -> Self {
        Self {
            user_id,
            access_token: access_token.into(),
        }
    }
}

// Keep bearer tokens out of logs.
impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

use std::fmt;

use crate::error::CoreError;
use crate::ids::UserId;

/// Credentials minted by the external auth provider. The data layer needs a
/// stable user id (row ownership) and the bearer credential it forwards with
/// every remote call. Absence of a session routes operations to the local
/// fallback store.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
    user_id: UserId,
    access_token: String,
}

impl AuthSession {
    pub fn new(user_id: UserId, access_token: impl Into<String>) -> Result<Self, CoreError> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(CoreError::InvalidData("empty access token".into()));
        }
        Ok(Self {
            user_id,
            access_token,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Token stays out of logs.
        write!(f, "AuthSession({:?}, token: <redacted>)", self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_rejected() {
        assert!(AuthSession::new(UserId::new(), "").is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let session = AuthSession::new(UserId::new(), "secret-bearer").unwrap();
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-bearer"));
        assert!(rendered.contains("<redacted>"));
    }
}

//! Who is signed in. Generations work without a user, only saving to
//! history needs one.
use std::sync::{PoisonError, RwLock};

use anyhow::{Result, anyhow};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
}

pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<User>;

    fn sign_in(&self, user_id: &str) -> Result<User>;

    fn sign_out(&self);
}

/// Keeps the signed in identity in memory for the life of the process.
#[derive(Debug, Default)]
pub struct LocalAuth {
    user: RwLock<Option<User>>,
}

impl LocalAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: &str) -> Result<Self> {
        let auth = Self::new();
        auth.sign_in(user_id)?;
        Ok(auth)
    }
}

impl AuthProvider for LocalAuth {
    fn current_user(&self) -> Option<User> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn sign_in(&self, user_id: &str) -> Result<User> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(anyhow!("User id can not be blank"));
        }
        let user = User {
            id: user_id.to_string(),
        };
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user.clone());
        tracing::info!("Signed in as {}", user.id);
        Ok(user)
    }

    fn sign_out(&self) {
        if let Some(user) = self
            .user
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            tracing::info!("Signed out {}", user.id);
        }
    }
}

//! User lookup for resolving credentials

use async_trait::async_trait;
use nix::unistd::User;
use std::collections::HashMap;

use nsexec_core::{Error, Result, UserRecord};

/// Trait for user lookups
///
/// A lookup has three outcomes: a record, no record (`Ok(None)`), or a
/// failure of the lookup mechanism itself (`Err`). The daemon treats the
/// last two differently.
#[async_trait]
pub trait UserLookup: Send + Sync {
    /// Look up a user by name
    ///
    /// # Errors
    /// Returns error if the user database cannot be consulted
    async fn lookup(&self, name: &str) -> Result<Option<UserRecord>>;
}

/// Lookup against the system user database (`getpwnam_r`)
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswdUsers;

impl PasswdUsers {
    /// Create a new passwd lookup
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UserLookup for PasswdUsers {
    async fn lookup(&self, name: &str) -> Result<Option<UserRecord>> {
        let owned = name.to_string();

        let user = tokio::task::spawn_blocking(move || User::from_name(&owned))
            .await
            .map_err(|e| Error::UserLookup {
                user: name.to_string(),
                message: e.to_string(),
            })?
            .map_err(|e| Error::UserLookup {
                user: name.to_string(),
                message: e.to_string(),
            })?;

        Ok(user.map(UserRecord::from))
    }
}

/// Fixed in-memory user table, for tests and minimal images
#[derive(Debug, Clone, Default)]
pub struct StaticUsers {
    users: HashMap<String, UserRecord>,
    failure: Option<String>,
}

impl StaticUsers {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user
    #[must_use]
    pub fn with_user(mut self, user: UserRecord) -> Self {
        self.users.insert(user.name.clone(), user);
        self
    }

    /// Make every lookup fail as if the database were unavailable
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

#[async_trait]
impl UserLookup for StaticUsers {
    async fn lookup(&self, name: &str) -> Result<Option<UserRecord>> {
        if let Some(ref message) = self.failure {
            return Err(Error::UserLookup {
                user: name.to_string(),
                message: message.clone(),
            });
        }

        Ok(self.users.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passwd_root() {
        let root = PasswdUsers::new().lookup("root").await.unwrap().unwrap();
        assert_eq!(root.uid, 0);
        assert_eq!(root.gid, 0);
    }

    #[tokio::test]
    async fn test_passwd_unknown_user() {
        let user = PasswdUsers::new()
            .lookup("nsexec-no-such-user")
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn test_static_users() {
        let users = StaticUsers::new().with_user(UserRecord::new("nobody", 65534, 65534));

        let nobody = users.lookup("nobody").await.unwrap().unwrap();
        assert_eq!(nobody.uid, 65534);
        assert!(users.lookup("somebody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_static_users_failing() {
        let users = StaticUsers::new()
            .with_user(UserRecord::new("nobody", 65534, 65534))
            .failing("database offline");

        let err = users.lookup("nobody").await.unwrap_err();
        assert!(matches!(err, Error::UserLookup { .. }));
        assert!(err.to_string().contains("database offline"));
    }
}

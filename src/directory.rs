//! Lookup of principals owned by the user-management collaborator.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub is_admin: bool,
}

pub trait UserDirectory: Send + Sync {
    fn find_user(&self, user_id: &str) -> Option<User>;
    fn find_user_by_email(&self, email: &str) -> Option<User>;
}

#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user.id.clone(), user);
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn find_user(&self, user_id: &str) -> Option<User> {
        self.users
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
    }

    fn find_user_by_email(&self, email: &str) -> Option<User> {
        self.users
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned()
    }
}

//! Username/password credential store
//!
//! A plain in-memory lookup table consulted during CONNECT validation.
//! Policy beyond "do the credentials match" lives outside the broker; there
//! is no hashing, persistence, or rotation.

use std::collections::HashMap;

use crate::config::AuthConfig;

/// Credential store
pub struct UserStore {
    /// Whether credential checking is enabled at all
    enabled: bool,
    /// username -> password
    users: HashMap<String, String>,
}

impl UserStore {
    /// Build the store from configuration
    pub fn new(config: &AuthConfig) -> Self {
        let users = config
            .users
            .iter()
            .map(|u| (u.username.clone(), u.password.clone()))
            .collect();

        Self {
            enabled: config.enabled,
            users,
        }
    }

    /// An open store that accepts every connection
    pub fn open() -> Self {
        Self {
            enabled: false,
            users: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn add(&mut self, username: String, password: String) {
        self.users.insert(username, password);
    }

    pub fn remove(&mut self, username: &str) {
        self.users.remove(username);
    }

    /// Look up the stored password for a username
    pub fn lookup(&self, username: &str) -> Option<&str> {
        self.users.get(username).map(String::as_str)
    }

    /// Check credentials presented in a CONNECT packet.
    /// With checking disabled every connection passes.
    pub fn verify(&self, username: Option<&str>, password: Option<&[u8]>) -> bool {
        if !self.enabled {
            return true;
        }

        let Some(username) = username else {
            return false;
        };

        let Some(stored) = self.lookup(username) else {
            return false;
        };

        match password {
            Some(given) => given == stored.as_bytes(),
            None => stored.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserEntry;

    fn store(enabled: bool) -> UserStore {
        UserStore::new(&AuthConfig {
            enabled,
            users: vec![
                UserEntry {
                    username: "admin".to_string(),
                    password: "admin".to_string(),
                },
                UserEntry {
                    username: "user".to_string(),
                    password: "pass".to_string(),
                },
            ],
        })
    }

    #[test]
    fn test_lookup() {
        let store = store(true);
        assert_eq!(store.lookup("admin"), Some("admin"));
        assert_eq!(store.lookup("nobody"), None);
    }

    #[test]
    fn test_verify_enabled() {
        let store = store(true);
        assert!(store.verify(Some("admin"), Some(b"admin")));
        assert!(store.verify(Some("user"), Some(b"pass")));
        assert!(!store.verify(Some("user"), Some(b"wrong")));
        assert!(!store.verify(Some("nobody"), Some(b"pass")));
        assert!(!store.verify(None, None));
        assert!(!store.verify(Some("user"), None));
    }

    #[test]
    fn test_verify_disabled_accepts_anything() {
        let store = store(false);
        assert!(store.verify(None, None));
        assert!(store.verify(Some("nobody"), Some(b"whatever")));
    }

    #[test]
    fn test_add_remove() {
        let mut store = store(true);
        store.add("new".to_string(), "secret".to_string());
        assert!(store.verify(Some("new"), Some(b"secret")));

        store.remove("new");
        assert!(!store.verify(Some("new"), Some(b"secret")));
    }
}

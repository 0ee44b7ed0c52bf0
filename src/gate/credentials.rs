use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Caller identity resolved from a credential
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves credentials to identities; implement this to back tokens with a database
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn lookup(&self, token: &str) -> Option<Identity>;
}

/// Fixed token table loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    tokens: HashMap<String, Identity>,
}

impl StaticCredentialStore {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, name)| (token, Identity::new(name)))
                .collect(),
        }
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn lookup(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup() {
        let store = StaticCredentialStore::new(HashMap::from([
            ("token123".to_string(), "user1".to_string()),
            ("secret456".to_string(), "user2".to_string()),
        ]));

        assert_eq!(store.lookup("token123").await.unwrap().as_str(), "user1");
        assert_eq!(store.lookup("secret456").await, Some(Identity::new("user2")));
        assert_eq!(store.lookup("Token123").await, None);
        assert_eq!(store.lookup("").await, None);
    }
}

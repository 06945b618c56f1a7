use std::fmt::Display;
use std::sync::Arc;

use uuid::Uuid;

/// A connected websocket client.
///
/// Two connections are never the same user, even from the same address.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct User {
    /// Where the user connected from.
    pub name: Arc<String>,

    id: Uuid,
}

impl User {
    /// A new, unique user.
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::new(name.into()),
            id: Uuid::new_v4(),
        }
    }
}

impl Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

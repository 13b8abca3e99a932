//! Identity supplied by the authentication provider

use serde::{Deserialize, Serialize};

/// A signed-in caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
}

/// Source of the current caller's identity
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The signed-in identity, or `None` when nobody is signed in
    async fn current_identity(&self) -> Option<Identity>;
}

/// Identity fixed at construction (CLI flag, tests)
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    identity: Option<Identity>,
}

impl StaticIdentity {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            identity: Some(Identity {
                user_id: user_id.into(),
            }),
        }
    }

    pub fn anonymous() -> Self {
        Self { identity: None }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_identity(&self) -> Option<Identity> {
        self.identity.clone()
    }
}

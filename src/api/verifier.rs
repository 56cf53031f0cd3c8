//! Bearer token verifiers
//!
//! The auth middleware only checks that a token is syntactically present.
//! Whether a token is *valid* is up to a [`TokenVerifier`].

use async_trait::async_trait;
use subtle::ConstantTimeEq;

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Whether `token` grants access
    async fn verify(&self, token: &str) -> bool;
}

/// Accepts every well-formed token
#[derive(Debug, Default, Clone, Copy)]
pub struct PresenceOnly;

#[async_trait]
impl TokenVerifier for PresenceOnly {
    async fn verify(&self, _token: &str) -> bool {
        true
    }
}

/// Accepts exactly one configured token
#[derive(Clone)]
pub struct StaticToken {
    expected: String,
}

impl StaticToken {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenVerifier for StaticToken {
    async fn verify(&self, token: &str) -> bool {
        self.expected.as_bytes().ct_eq(token.as_bytes()).into()
    }
}

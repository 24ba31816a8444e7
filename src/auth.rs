//! Credential resolution for the Ridewire handshake.
//!
//! The dispatch connection authenticates at handshake time with
//! `{userId, userType}` so the server can reject unauthenticated sockets
//! before any event is processed. This module owns the step that turns a
//! stored credential into that handshake data: [`CredentialProvider`] yields
//! the raw token, [`ClaimExtractor`] pulls the user id out of it, and the
//! result is an [`AuthContext`] derived once per connect attempt.
//!
//! Token storage and JWT parsing live outside this crate — the surrounding
//! application implements these traits over whatever it already uses.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RidewireError};

/// Which side of the dispatch protocol a connection speaks.
///
/// Serialized lowercase — the same spelling is used for the handshake
/// `userType` field and the `role` field of a ride request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Passenger,
    Driver,
}

impl Role {
    /// The wire spelling of this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Passenger => "passenger",
            Role::Driver => "driver",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handshake identity for one connect attempt.
///
/// Recreated from the stored credential on every attempt; never cached
/// across reconnects so a token refresh is picked up automatically.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// User id extracted from the credential.
    pub user_id: i64,
    /// Role this connection authenticates as.
    pub role: Role,
    /// The raw credential, opaque to this crate.
    pub token: String,
}

/// Source of the stored credential.
pub trait CredentialProvider: Send + Sync {
    /// Returns the current token, or `None` when the user is signed out.
    fn current_token(&self) -> Option<String>;
}

/// Extracts the user id claim from a raw token.
pub trait ClaimExtractor: Send + Sync {
    /// Returns the user id carried by `token`, or `None` when the token is
    /// malformed or carries no usable id.
    fn extract_user_id(&self, token: &str) -> Option<i64>;
}

/// Resolves the dispatch endpoint for the current environment.
pub trait EndpointResolver: Send + Sync {
    /// Base socket endpoint, e.g. `ws://localhost:4000`. The namespace is
    /// appended by the transport backend.
    fn socket_endpoint(&self) -> String;
}

/// Bundles the credential collaborators a client needs to open connections.
#[derive(Clone)]
pub struct AuthResolver {
    credentials: Arc<dyn CredentialProvider>,
    claims: Arc<dyn ClaimExtractor>,
}

impl AuthResolver {
    pub fn new(credentials: Arc<dyn CredentialProvider>, claims: Arc<dyn ClaimExtractor>) -> Self {
        Self {
            credentials,
            claims,
        }
    }

    /// Derive an [`AuthContext`] for one connect attempt.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::AuthResolution`] when no token is stored or
    /// the token does not yield a user id. The caller must not open a
    /// transport in that case.
    pub fn resolve(&self, role: Role) -> Result<AuthContext> {
        let token = self
            .credentials
            .current_token()
            .ok_or_else(|| RidewireError::AuthResolution("no stored token".into()))?;
        let user_id = self
            .claims
            .extract_user_id(&token)
            .ok_or_else(|| RidewireError::AuthResolution("token has no user id".into()))?;
        Ok(AuthContext {
            user_id,
            role,
            token,
        })
    }
}

impl std::fmt::Debug for AuthResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthResolver").finish_non_exhaustive()
    }
}

/// Fixed-value providers for tests and demos.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: Option<String>,
    user_id: Option<i64>,
}

impl StaticCredentials {
    /// A credential that always resolves to `user_id`.
    pub fn signed_in(user_id: i64) -> Self {
        Self {
            token: Some(format!("static-token-{user_id}")),
            user_id: Some(user_id),
        }
    }

    /// A credential store with no token at all.
    pub fn signed_out() -> Self {
        Self {
            token: None,
            user_id: None,
        }
    }

    /// A stored token from which no user id can be extracted.
    pub fn unreadable_token() -> Self {
        Self {
            token: Some("opaque-garbage".into()),
            user_id: None,
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn current_token(&self) -> Option<String> {
        self.token.clone()
    }
}

impl ClaimExtractor for StaticCredentials {
    fn extract_user_id(&self, _token: &str) -> Option<i64> {
        self.user_id
    }
}

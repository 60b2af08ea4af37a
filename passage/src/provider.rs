//! The identity-provider capability consumed by the scheme

use std::error;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{Credentials, RefreshTokenRef, Session, UserAttribute, UserProfile, Username, UsernameRef};

/// An error reported by an identity provider
pub trait ProviderError: error::Error + Send + Sync + 'static {
    /// Whether the failure is likely to clear up on its own, such as a
    /// network error or an unavailable service
    ///
    /// Rejections (bad credentials, revoked tokens, unknown users) are not
    /// transient.
    fn is_transient(&self) -> bool {
        false
    }
}

/// The client of an external identity service that authenticates users
/// and issues sessions
///
/// The scheme never constructs or mutates a [`Session`] itself; it requests
/// one from the provider or asks the provider to refresh it. How sessions are
/// cached, how credentials are exchanged, and how tokens are signed are all
/// the provider's business.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The error type returned when a provider operation fails
    type Error: ProviderError;

    /// Identifies the previously signed-in user from local state, if any
    ///
    /// This does not contact the identity service.
    fn current_user(&self) -> Option<Username>;

    /// Gets a valid session for the user
    ///
    /// Providers are expected to return a cached session while it is valid,
    /// and to refresh it transparently once it has expired.
    async fn session(&self, user: &UsernameRef) -> Result<Session, Self::Error>;

    /// Exchanges a refresh token for a new session
    async fn refresh_session(
        &self,
        user: &UsernameRef,
        refresh_token: &RefreshTokenRef,
    ) -> Result<Session, Self::Error>;

    /// Performs the authentication handshake
    ///
    /// On success the authenticated user becomes the provider's current user.
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, Self::Error>;

    /// Reads the attributes recorded for the user
    async fn user_attributes(&self, user: &UsernameRef)
        -> Result<Vec<UserAttribute>, Self::Error>;

    /// Signs the user out, forgetting any locally cached session
    async fn sign_out(&self, user: &UsernameRef) -> Result<(), Self::Error>;
}

/// Contributes additional fields to a freshly built user profile
///
/// Fields returned are merged into the profile with
/// [`UserProfile::merge()`], overriding provider attributes of the same name.
#[async_trait]
pub trait ProfileEnricher: Send + Sync {
    /// Produces extra fields for the given user
    async fn enrich(
        &self,
        user: &UsernameRef,
        profile: &UserProfile,
    ) -> Result<Map<String, Value>, Box<dyn error::Error + Send + Sync + 'static>>;
}

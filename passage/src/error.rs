use std::{error, time::Duration};

use thiserror::Error;

use crate::{claims::ClaimsError, ProviderError};

/// A boxed error from a collaborator
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// An error encountered while driving the session lifecycle
#[derive(Debug, Error)]
pub enum AuthError {
    /// The identity provider rejected the authentication handshake
    #[error("authentication rejected by identity provider: {source}")]
    Authentication {
        /// The provider's reason
        source: BoxError,
    },
    /// No valid session could be obtained
    #[error("unable to obtain a valid session")]
    Session {
        /// The provider's reason
        source: BoxError,
        /// Whether the provider considers the failure transient
        transient: bool,
    },
    /// The session has no refresh token with which to refresh it
    #[error("session cannot be refreshed without a refresh token")]
    MissingRefreshToken,
    /// A call to the identity provider did not complete in time
    #[error("identity provider call `{operation}` timed out after {timeout:?}")]
    TimedOut {
        /// The provider operation that was abandoned
        operation: &'static str,
        /// The configured request timeout
        timeout: Duration,
    },
    /// The session was reset while the operation was in flight, so its
    /// result was discarded
    #[error("session was reset during `{operation}`, result discarded")]
    Interrupted {
        /// The operation whose result was discarded
        operation: &'static str,
    },
    /// The token cannot be carried in a request header
    #[error("token is not a valid header value")]
    InvalidToken(#[from] http::header::InvalidHeaderValue),
    /// The ID token's claims could not be read
    #[error("unable to read ID token claims")]
    Claims(#[from] ClaimsError),
    /// The profile enricher failed
    #[error("profile enrichment failed")]
    Enrichment(#[source] BoxError),
    /// The scheme is misconfigured
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl AuthError {
    pub(crate) fn authentication<E: ProviderError>(error: E) -> Self {
        Self::Authentication {
            source: Box::new(error),
        }
    }

    pub(crate) fn session<E: ProviderError>(error: E) -> Self {
        let transient = error.is_transient();
        Self::Session {
            source: Box::new(error),
            transient,
        }
    }

    /// Whether retrying later could reasonably succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TimedOut { .. } => true,
            Self::Session { transient, .. } => *transient,
            _ => false,
        }
    }
}

/// An error in the scheme's configuration
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No user pool identifier was configured
    #[error("no user pool id configured")]
    MissingUserPoolId,
    /// The user pool identifier is not of the form `<region>_<pool>`
    #[error("user pool id `{0}` is not of the form `<region>_<pool>`")]
    InvalidUserPoolId(String),
    /// No client identifier was configured
    #[error("no client id configured")]
    MissingClientId,
    /// The configured token header name is not a valid header name
    #[error("`{name}` is not a valid header name")]
    InvalidTokenName {
        /// The configured name
        name: String,
        /// The parse failure
        source: http::header::InvalidHeaderName,
    },
    /// The request timeout must be non-zero
    #[error("request timeout must be greater than zero")]
    ZeroRequestTimeout,
}

//! Session-token lifecycle management for hosts authenticating against an
//! external identity provider
//!
//! This library keeps a host application's view of authentication in step with
//! an identity provider's sessions. It installs the session's token into the
//! headers the host attaches to outbound requests, publishes the signed-in
//! user's profile, and periodically refreshes the session in the background so
//! that the installed token does not go stale while the user is active.
//!
//! The provider itself is abstracted behind the [`IdentityProvider`] trait. The
//! scheme never signs, verifies, or mints tokens; it only asks the provider for
//! sessions and decides what to do with them.
//!
//! # General Flow
//!
//! On start-up, construct an [`AuthScheme`] from [`AuthOptions`], a [`Host`]
//! describing the shared request headers and key-value storage, and a
//! provider. Then _mount_ it, which restores any previously signed-in user's
//! session. Mounting never fails; a visitor whose session cannot be restored is
//! treated as signed out.
//!
//! ```
//! use std::sync::Arc;
//!
//! use passage::{
//!     providers::in_memory::InMemoryIdentityProvider, AuthOptions, AuthScheme, ClientId,
//!     Credentials, Host, MemoryStorage, Mounted, NamespacedStorage, Password, SharedHeaders,
//!     Storage, UserPoolId, Username,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = AuthOptions::default()
//!     .with_user_pool_id(UserPoolId::from_static("eu-west-1_Example"))
//!     .with_client_id(ClientId::from_static("demo"));
//!
//! let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
//! let headers = SharedHeaders::new();
//!
//! let provider = InMemoryIdentityProvider::new(NamespacedStorage::new(storage.clone(), "demo"));
//! provider.add_user(
//!     Username::from_static("alice"),
//!     Password::from_static("correct horse"),
//!     Vec::new(),
//!     vec!["admin".to_owned()],
//! );
//!
//! let scheme = AuthScheme::new(options, Host::new(headers.clone(), storage), provider)?;
//! assert!(matches!(scheme.mount().await, Mounted::Anonymous));
//!
//! scheme.login(&Credentials::new("alice", "correct horse")).await?;
//! assert!(headers.contains(&http::header::AUTHORIZATION));
//! assert!(scheme.user_watcher().current().map_or(false, |u| u.is_member_of("admin")));
//!
//! scheme.logout().await;
//! assert!(!headers.contains(&http::header::AUTHORIZATION));
//! # Ok(())
//! # }
//! ```
//!
//! Once a user has been fetched, a refresh timer forces a session refresh every
//! [`refresh_interval`][AuthOptions::refresh_interval()]. Only one timer runs
//! at a time, and it is cancelled whenever the scheme is reset.
//!
//! This crate includes an example of an interactive login against the in-memory
//! provider in the examples folder.
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `in-memory`: Provides an in-process [`IdentityProvider`] useful for tests,
//!   demos, and local development.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod claims;
mod config;
mod error;
mod headers;
mod profile;
mod provider;
pub mod providers;
pub mod refresh;
mod scheme;
mod session;
mod storage;
mod user;

pub use braids::*;
pub use config::{AuthOptions, CLIENT_ID_ENV, USER_POOL_ID_ENV};
pub use error::{AuthError, BoxError, ConfigurationError};
pub use headers::SharedHeaders;
pub use profile::{UserAttribute, UserProfile};
pub use provider::{IdentityProvider, ProfileEnricher, ProviderError};
pub use scheme::{AuthScheme, AuthStatus, Host, Mounted};
pub use session::{Session, SessionLifetimeConfig, SessionStatus, TokenKind};
pub use storage::{MemoryStorage, NamespacedStorage, Storage};
pub use user::{BorrowedUser, UserPublisherQuit, UserWatcher};

//! An in-process identity provider
//!
//! Holds a directory of users and issues unsigned, JWT-shaped tokens. The
//! signed-in user and their session are cached in namespaced host storage the
//! same way a browser SDK would, so clearing the scheme's storage namespace
//! forgets them. Intended for tests, demos, and local development; it is not
//! an authentication protocol implementation.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use passage_clock::{Clock, DurationSecs, System};
use serde_json::json;
use thiserror::Error;

use crate::{
    claims::{unsigned_jwt, COGNITO_GROUPS_CLAIM},
    AccessToken, Credentials, IdToken, IdentityProvider, NamespacedStorage, Password,
    ProviderError, RefreshToken, RefreshTokenRef, Session, SessionLifetimeConfig, UserAttribute,
    Username, UsernameRef,
};

const LAST_AUTH_USER: &str = "LastAuthUser";

/// An error from the in-memory identity provider
#[derive(Debug, Error)]
pub enum InMemoryError {
    /// The username or password is wrong
    #[error("incorrect username or password")]
    NotAuthorized,
    /// The user does not exist
    #[error("user `{0}` does not exist")]
    UserNotFound(Username),
    /// The user has no cached session
    #[error("user `{0}` is not signed in")]
    NoSession(Username),
    /// The refresh token is unknown, revoked, or belongs to someone else
    #[error("refresh token is invalid")]
    InvalidRefreshToken,
    /// The provider has been switched off
    #[error("identity service unavailable")]
    Unavailable,
    /// The cached session could not be read back
    #[error("cached session is unreadable")]
    CorruptSession(#[from] serde_json::Error),
}

impl ProviderError for InMemoryError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

/// Counts of operations served by the provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProviderStats {
    /// Successful authentication handshakes
    pub authentications: u64,
    /// Sessions served from cache or transparently refreshed
    pub sessions: u64,
    /// Sessions refreshed on request with a refresh token
    pub refreshes: u64,
    /// Expired sessions renewed transparently while being served
    pub renewals: u64,
    /// Attribute reads
    pub attribute_reads: u64,
    /// Sign-outs
    pub sign_outs: u64,
}

#[derive(Debug)]
struct Account {
    password: Password,
    attributes: Vec<UserAttribute>,
    groups: Vec<String>,
}

#[derive(Debug, Default)]
struct Directory {
    accounts: HashMap<Username, Account>,
    refresh_tokens: HashMap<RefreshToken, Username>,
    stats: ProviderStats,
}

/// An identity provider backed by an in-process user directory
#[derive(Debug)]
pub struct InMemoryIdentityProvider<C = System> {
    storage: NamespacedStorage,
    lifetime_config: SessionLifetimeConfig<C>,
    session_duration: DurationSecs,
    latency: Duration,
    available: AtomicBool,
    serial: AtomicU64,
    directory: Mutex<Directory>,
}

impl InMemoryIdentityProvider<System> {
    /// Constructs a provider caching its state in `storage`
    ///
    /// Sessions last an hour and are stamped by the system clock.
    pub fn new(storage: NamespacedStorage) -> Self {
        Self {
            storage,
            lifetime_config: SessionLifetimeConfig::default(),
            session_duration: DurationSecs(3_600),
            latency: Duration::ZERO,
            available: AtomicBool::new(true),
            serial: AtomicU64::new(0),
            directory: Mutex::new(Directory::default()),
        }
    }
}

impl<C> InMemoryIdentityProvider<C> {
    /// Stamps sessions with a custom clock
    pub fn with_clock<D>(self, clock: D) -> InMemoryIdentityProvider<D> {
        InMemoryIdentityProvider {
            storage: self.storage,
            lifetime_config: self.lifetime_config.with_clock(clock),
            session_duration: self.session_duration,
            latency: self.latency,
            available: self.available,
            serial: self.serial,
            directory: self.directory,
        }
    }

    /// Sets how long issued sessions remain valid
    pub fn with_session_duration(mut self, session_duration: DurationSecs) -> Self {
        self.session_duration = session_duration;
        self
    }

    /// Delays every call by `latency`, imitating a remote service
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Registers a user
    pub fn add_user(
        &self,
        username: Username,
        password: Password,
        attributes: Vec<UserAttribute>,
        groups: Vec<String>,
    ) {
        self.directory.lock().accounts.insert(
            username,
            Account {
                password,
                attributes,
                groups,
            },
        );
    }

    /// Switches the service on or off
    ///
    /// While off, every call fails with [`InMemoryError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Revokes every refresh token issued to the user
    pub fn revoke_refresh_tokens(&self, user: &UsernameRef) {
        self.directory
            .lock()
            .refresh_tokens
            .retain(|_, owner| owner.as_str() != user.as_str());
    }

    /// Counts of operations served so far
    pub fn stats(&self) -> ProviderStats {
        self.directory.lock().stats
    }

    async fn simulate_network(&self) -> Result<(), InMemoryError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(InMemoryError::Unavailable)
        }
    }

    fn session_key(user: &UsernameRef) -> String {
        format!("{}.session", user)
    }

    fn cached_session(&self, user: &UsernameRef) -> Result<Option<Session>, InMemoryError> {
        match self.storage.get_item(&Self::session_key(user)) {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn cache_session(&self, user: &UsernameRef, session: &Session) -> Result<(), InMemoryError> {
        let raw = serde_json::to_string(session)?;
        self.storage.set_item(&Self::session_key(user), raw);
        self.storage.set_item(LAST_AUTH_USER, user.as_str());
        Ok(())
    }
}

impl<C: Clock> InMemoryIdentityProvider<C> {
    fn issue(
        &self,
        user: &UsernameRef,
        refresh_token: Option<RefreshToken>,
    ) -> Result<Session, InMemoryError> {
        let serial = self.serial.fetch_add(1, Ordering::AcqRel);
        let issued = self.lifetime_config.clock().now();
        let expires = issued + self.session_duration;

        let mut directory = self.directory.lock();
        let account = directory
            .accounts
            .get(user)
            .ok_or_else(|| InMemoryError::UserNotFound(user.to_owned()))?;

        let subject = account
            .attributes
            .iter()
            .rev()
            .find(|a| a.name == "sub")
            .map_or_else(|| user.as_str().to_owned(), |a| a.value.clone());

        let access_token = unsigned_jwt(&json!({
            "sub": subject,
            "username": user.as_str(),
            "token_use": "access",
            "iat": issued.0,
            "exp": expires.0,
            "jti": format!("access-{}", serial),
        }));

        let mut id_claims = json!({
            "sub": subject,
            "cognito:username": user.as_str(),
            "token_use": "id",
            "iat": issued.0,
            "exp": expires.0,
            "jti": format!("id-{}", serial),
        });
        id_claims[COGNITO_GROUPS_CLAIM] = json!(account.groups);
        let id_token = unsigned_jwt(&id_claims);

        let refresh_token = refresh_token.unwrap_or_else(|| {
            let token = RefreshToken::new(format!("refresh-{}-{}", user, serial));
            directory
                .refresh_tokens
                .insert(token.clone(), user.to_owned());
            token
        });

        let session = self.lifetime_config.create_session(
            AccessToken::new(access_token),
            Some(IdToken::new(id_token)),
            Some(refresh_token),
            self.session_duration,
        );
        drop(directory);

        self.cache_session(user, &session)?;
        Ok(session)
    }

    fn refresh_with(
        &self,
        user: &UsernameRef,
        refresh_token: &RefreshTokenRef,
    ) -> Result<Session, InMemoryError> {
        match self.directory.lock().refresh_tokens.get(refresh_token) {
            Some(owner) if owner.as_str() == user.as_str() => {}
            _ => return Err(InMemoryError::InvalidRefreshToken),
        }

        self.issue(user, Some(refresh_token.to_owned()))
    }
}

#[async_trait]
impl<C> IdentityProvider for InMemoryIdentityProvider<C>
where
    C: Clock + Send + Sync + 'static,
{
    type Error = InMemoryError;

    fn current_user(&self) -> Option<Username> {
        self.storage.get_item(LAST_AUTH_USER).map(Username::new)
    }

    async fn session(&self, user: &UsernameRef) -> Result<Session, Self::Error> {
        self.simulate_network().await?;

        let cached = self
            .cached_session(user)?
            .ok_or_else(|| InMemoryError::NoSession(user.to_owned()))?;

        self.directory.lock().stats.sessions += 1;

        if cached.is_valid_at(self.lifetime_config.clock().now()) {
            return Ok(cached);
        }

        tracing::debug!(user = %user, "cached session expired, refreshing");
        let refresh_token = cached
            .refresh_token()
            .ok_or_else(|| InMemoryError::NoSession(user.to_owned()))?;
        let renewed = self.refresh_with(user, refresh_token)?;
        self.directory.lock().stats.renewals += 1;
        Ok(renewed)
    }

    async fn refresh_session(
        &self,
        user: &UsernameRef,
        refresh_token: &RefreshTokenRef,
    ) -> Result<Session, Self::Error> {
        self.simulate_network().await?;
        let session = self.refresh_with(user, refresh_token)?;
        self.directory.lock().stats.refreshes += 1;
        Ok(session)
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, Self::Error> {
        self.simulate_network().await?;

        {
            let mut directory = self.directory.lock();
            match directory.accounts.get(&credentials.username) {
                Some(account) if account.password.as_str() == credentials.password.as_str() => {}
                _ => return Err(InMemoryError::NotAuthorized),
            }
            directory.stats.authentications += 1;
        }

        self.issue(&credentials.username, None)
    }

    async fn user_attributes(
        &self,
        user: &UsernameRef,
    ) -> Result<Vec<UserAttribute>, Self::Error> {
        self.simulate_network().await?;

        if self.cached_session(user)?.is_none() {
            return Err(InMemoryError::NoSession(user.to_owned()));
        }

        let mut directory = self.directory.lock();
        directory.stats.attribute_reads += 1;
        directory
            .accounts
            .get(user)
            .map(|a| a.attributes.clone())
            .ok_or_else(|| InMemoryError::UserNotFound(user.to_owned()))
    }

    async fn sign_out(&self, user: &UsernameRef) -> Result<(), Self::Error> {
        self.simulate_network().await?;

        self.storage.remove_item(&Self::session_key(user));
        if self.storage.get_item(LAST_AUTH_USER).as_deref() == Some(user.as_str()) {
            self.storage.remove_item(LAST_AUTH_USER);
        }

        self.directory.lock().stats.sign_outs += 1;
        Ok(())
    }
}

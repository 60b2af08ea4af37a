use std::{
    error,
    future::Future,
    sync::{Arc, Weak},
};

use http::{HeaderName, HeaderValue};
use parking_lot::Mutex;

use crate::{
    claims,
    refresh::{RefreshTask, RefreshTimer, Scheduler, TokioScheduler},
    user::UserPublisher,
    AuthError, AuthOptions, BearerToken, BearerTokenRef, Credentials, IdentityProvider,
    NamespacedStorage, ProfileEnricher, Session, SharedHeaders, Storage, UserProfile,
    UserWatcher, UsernameRef,
};

/// Where the scheme stands in the session lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    /// No session is considered valid
    Unauthenticated,
    /// A login handshake is in flight
    Authenticating,
    /// A session is considered valid
    Authenticated,
    /// A forced refresh of the session is in flight
    Refreshing,
}

/// The outcome of mounting the scheme
///
/// Mounting never fails. A visitor whose session cannot be restored is
/// simply treated as signed out.
#[derive(Debug)]
pub enum Mounted {
    /// A previously signed-in user's session was restored
    Authenticated,
    /// No session could be restored
    Anonymous,
    /// The session could not be restored because of a failure that may clear
    /// up on its own, such as a timeout or an unavailable identity service
    ///
    /// The visitor is treated as signed out.
    Degraded(AuthError),
}

/// What the scheme needs from its host
#[derive(Clone)]
pub struct Host {
    /// Headers attached to every outbound request
    pub headers: SharedHeaders,
    /// The host's key-value persistence
    pub storage: Arc<dyn Storage>,
}

impl Host {
    /// Constructs a host description
    pub fn new(headers: SharedHeaders, storage: Arc<dyn Storage>) -> Self {
        Self { headers, storage }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct SessionState {
    /// Bumped on every reset; in-flight work started under an older value
    /// must not commit its results
    generation: u64,
    status: AuthStatus,
    token: Option<BearerToken>,
    timer: Option<RefreshTimer>,
}

struct Inner<P, S> {
    options: AuthOptions,
    token_name: HeaderName,
    provider: P,
    scheduler: S,
    enricher: Option<Box<dyn ProfileEnricher>>,
    headers: SharedHeaders,
    storage: NamespacedStorage,
    user: UserPublisher,
    state: Mutex<SessionState>,
}

/// An authentication scheme that keeps a host's session state in step with
/// an identity provider
///
/// Clones share the same session.
pub struct AuthScheme<P, S = TokioScheduler> {
    inner: Arc<Inner<P, S>>,
}

impl<P, S> Clone for AuthScheme<P, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P, S> std::fmt::Debug for AuthScheme<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("AuthScheme")
            .field("options", &self.inner.options)
            .field("storage", &self.inner.storage)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl<P: IdentityProvider + 'static> AuthScheme<P, TokioScheduler> {
    /// Constructs a new scheme using the tokio timer for session refreshes
    ///
    /// Fails if the options are missing pool identifiers or are otherwise
    /// invalid.
    pub fn new(options: AuthOptions, host: Host, provider: P) -> Result<Self, AuthError> {
        Self::with_scheduler(options, host, provider, TokioScheduler)
    }
}

impl<P, S> AuthScheme<P, S>
where
    P: IdentityProvider + 'static,
    S: Scheduler + 'static,
{
    /// Constructs a new scheme with a custom refresh scheduler
    pub fn with_scheduler(
        options: AuthOptions,
        host: Host,
        provider: P,
        scheduler: S,
    ) -> Result<Self, AuthError> {
        let token_name = options.validate()?;
        let namespace = options
            .client_id()
            .map(|c| c.as_str().to_owned())
            .unwrap_or_default();
        let storage = NamespacedStorage::new(host.storage, &namespace);

        Ok(Self {
            inner: Arc::new(Inner {
                options,
                token_name,
                provider,
                scheduler,
                enricher: None,
                headers: host.headers,
                storage,
                user: UserPublisher::new(),
                state: Mutex::new(SessionState {
                    generation: 0,
                    status: AuthStatus::Unauthenticated,
                    token: None,
                    timer: None,
                }),
            }),
        })
    }

    /// Adds a hook that contributes extra fields to every fetched profile
    ///
    /// Must be called before the scheme is cloned or mounted.
    pub fn with_enricher(mut self, enricher: impl ProfileEnricher + 'static) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.enricher = Some(Box::new(enricher)),
            None => tracing::warn!("scheme already shared, ignoring profile enricher"),
        }
        self
    }

    /// The scheme's options
    pub fn options(&self) -> &AuthOptions {
        &self.inner.options
    }

    /// The identity provider
    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    /// The scheme's namespace within host storage
    pub fn storage(&self) -> &NamespacedStorage {
        &self.inner.storage
    }

    /// The current position in the session lifecycle
    pub fn status(&self) -> AuthStatus {
        self.inner.state.lock().status
    }

    /// The bearer token for the current session, if any
    pub fn token(&self) -> Option<BearerToken> {
        self.inner.state.lock().token.clone()
    }

    /// Whether a refresh timer is currently running
    pub fn has_refresh_timer(&self) -> bool {
        self.inner.state.lock().timer.is_some()
    }

    /// A watcher over the signed-in user
    pub fn user_watcher(&self) -> UserWatcher {
        self.inner.user.watcher()
    }

    /// Restores a previously signed-in user's session on start-up
    ///
    /// Failures are never propagated: the visitor is left signed out and the
    /// outcome says whether the failure looked transient.
    #[tracing::instrument(skip(self))]
    pub async fn mount(&self) -> Mounted {
        let mut degraded = None;

        if self.inner.options.token_required() {
            match self.restore_token().await {
                Ok(true) => {}
                Ok(false) => tracing::debug!("no cached user to restore"),
                Err(AuthError::Interrupted { .. }) => {}
                Err(error) => {
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        transient = error.is_transient(),
                        "unable to restore session, continuing signed out"
                    );
                    self.discard_token();
                    if error.is_transient() {
                        degraded = Some(error);
                    }
                }
            }
        }

        if let Err(error) = self.fetch_user_once().await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to fetch user while mounting, continuing signed out"
            );
            if error.is_transient() && degraded.is_none() {
                degraded = Some(error);
            }
        }

        match degraded {
            Some(error) => Mounted::Degraded(error),
            None if self.inner.user.has_user() || self.token().is_some() => Mounted::Authenticated,
            None => Mounted::Anonymous,
        }
    }

    async fn restore_token(&self) -> Result<bool, AuthError> {
        let generation = self.generation();
        let user = match self.inner.provider.current_user() {
            Some(user) => user,
            None => return Ok(false),
        };

        let session = self
            .call("session", self.inner.provider.session(&user))
            .await?
            .map_err(AuthError::session)?;

        if !self.install_session_token(&session, generation)?
            || !self.set_status_if_current(generation, AuthStatus::Authenticated)
        {
            return Err(self.abandon("session"));
        }
        Ok(true)
    }

    /// Signs in with a username and password
    ///
    /// Any existing session is reset before the handshake begins, so no stale
    /// token is visible while it is in flight.
    #[tracing::instrument(skip(self, credentials), fields(username = %credentials.username))]
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        self.reset().await;
        let generation = {
            let mut state = self.inner.state.lock();
            state.status = AuthStatus::Authenticating;
            state.generation
        };

        let session = match self
            .call("authenticate", self.inner.provider.authenticate(credentials))
            .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(error)) => {
                self.set_status_if_current(generation, AuthStatus::Unauthenticated);
                return Err(AuthError::authentication(error));
            }
            Err(error) => {
                self.set_status_if_current(generation, AuthStatus::Unauthenticated);
                return Err(error);
            }
        };

        match self.install_session_token(&session, generation) {
            Ok(true) if self.set_status_if_current(generation, AuthStatus::Authenticated) => {}
            Ok(_) => return Err(self.abandon("authenticate")),
            Err(error) => {
                self.set_status_if_current(generation, AuthStatus::Unauthenticated);
                return Err(error);
            }
        }
        tracing::info!("signed in");

        if self.inner.options.auto_fetch_user() {
            self.fetch_user(false).await?;
        }

        Ok(session)
    }

    /// Installs a token obtained through a side channel, such as a federated
    /// sign-in redirect, then fetches the user
    pub async fn set_user_token(&self, raw_token: &str) -> Result<(), AuthError> {
        let generation = self.generation();
        let token = BearerToken::format(self.inner.options.token_type(), raw_token);
        if !self.install_token(token, generation)? {
            return Err(self.abandon("set_user_token"));
        }
        if self.inner.options.token_required() {
            self.set_status_if_current(generation, AuthStatus::Authenticated);
        }

        self.fetch_user(false).await
    }

    /// Fetches the user only if none has been published yet
    pub async fn fetch_user_once(&self) -> Result<(), AuthError> {
        if self.inner.user.has_user() {
            return Ok(());
        }

        self.fetch_user(false).await
    }

    /// Reads the signed-in user's profile and publishes it
    ///
    /// Does nothing when no user is signed in. With `force_refresh`, the
    /// session is first refreshed with its refresh token and the installed
    /// token is replaced. Afterwards a refresh timer is scheduled unless one
    /// is already running.
    ///
    /// If the scheme is reset while the fetch is in flight, its results are
    /// discarded and [`AuthError::Interrupted`] is returned.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_user(&self, force_refresh: bool) -> Result<(), AuthError> {
        let user = match self.inner.provider.current_user() {
            Some(user) => user,
            None => {
                tracing::trace!("no cached user, nothing to fetch");
                return Ok(());
            }
        };

        let (generation, previous) = {
            let mut state = self.inner.state.lock();
            let previous = force_refresh
                .then(|| std::mem::replace(&mut state.status, AuthStatus::Refreshing));
            (state.generation, previous)
        };

        let result = self.read_profile(&user, force_refresh, generation).await;

        if let Some(previous) = previous {
            let settled = match (&result, previous) {
                (Ok(_), _) => AuthStatus::Authenticated,
                (Err(_), AuthStatus::Refreshing) => AuthStatus::Authenticated,
                (Err(_), previous) => previous,
            };
            self.set_status_if_current(generation, settled);
        }

        let profile = result?;
        if !self.publish_user(generation, profile) {
            return Err(self.abandon("fetch_user"));
        }
        tracing::debug!(user = %user, "user profile published");

        self.schedule_refresh(generation);
        Ok(())
    }

    async fn read_profile(
        &self,
        user: &UsernameRef,
        force_refresh: bool,
        generation: u64,
    ) -> Result<UserProfile, AuthError> {
        let provider = &self.inner.provider;

        let mut session = self
            .call("session", provider.session(user))
            .await?
            .map_err(AuthError::session)?;

        if force_refresh {
            if !self.is_current(generation) {
                return Err(self.abandon("session"));
            }

            let refresh_token = session
                .refresh_token()
                .ok_or(AuthError::MissingRefreshToken)?
                .to_owned();

            session = self
                .call("refresh_session", provider.refresh_session(user, &refresh_token))
                .await?
                .map_err(AuthError::session)?;

            tracing::debug!(
                expiry = session.expiry().0,
                lifetime = session.lifetime().0,
                "session refreshed"
            );
            if !self.install_session_token(&session, generation)? {
                return Err(self.abandon("refresh_session"));
            }
        }

        let attributes = self
            .call("user_attributes", provider.user_attributes(user))
            .await?
            .map_err(AuthError::session)?;

        let groups = match session.id_token() {
            Some(id_token) => claims::groups(id_token.as_str(), self.inner.options.groups_claim())?,
            None => Vec::new(),
        };

        let mut profile = UserProfile::from_attributes(attributes, groups);

        if let Some(enricher) = &self.inner.enricher {
            let fields = enricher
                .enrich(user, &profile)
                .await
                .map_err(AuthError::Enrichment)?;
            profile.merge(fields);
        }

        Ok(profile)
    }

    /// Signs the user out at the identity provider, then resets
    ///
    /// Sign-out is best-effort; failures are logged and ignored.
    #[tracing::instrument(skip(self))]
    pub async fn logout(&self) {
        if let Some(user) = self.inner.provider.current_user() {
            match self
                .call("sign_out", self.inner.provider.sign_out(&user))
                .await
            {
                Ok(Ok(())) => tracing::info!(user = %user, "signed out"),
                Ok(Err(error)) => tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "identity provider sign-out failed, resetting anyway"
                ),
                Err(error) => tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "identity provider sign-out timed out, resetting anyway"
                ),
            }
        }

        self.reset().await;
    }

    /// Returns the scheme to a signed-out state
    ///
    /// Clears the token, cancels the refresh timer, withdraws the user, and
    /// clears the scheme's storage namespace. Work already in flight, such as
    /// a scheduled refresh, is discarded when it completes. Safe to call at
    /// any time and any number of times.
    pub async fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.generation = state.generation.wrapping_add(1);
        if self.inner.options.token_required() {
            state.token = None;
        }
        state.status = AuthStatus::Unauthenticated;

        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }

        if self.inner.options.token_required() && self.inner.options.global_token() {
            self.inner.headers.remove(&self.inner.token_name);
        }

        self.inner.user.set_user(None);
        self.inner.storage.clear();
        drop(state);

        tracing::debug!("session reset");
    }

    /// Schedules the periodic refresh unless disabled, already running, no
    /// user is published, or the scheme was reset since `generation`
    fn schedule_refresh(&self, generation: u64) {
        let period = match self.inner.options.refresh_interval() {
            Some(period) => period,
            None => return,
        };

        let mut state = self.inner.state.lock();
        if state.generation != generation
            || state.timer.is_some()
            || !self.inner.user.has_user()
        {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let task: RefreshTask = Arc::new(move || Box::pin(refresh_tick(weak.clone())));

        tracing::debug!(?period, "scheduling session refresh");
        state.timer = Some(self.inner.scheduler.schedule(period, task));
    }

    /// Installs the session's token unless the scheme was reset since
    /// `generation`, returning whether it is still current
    fn install_session_token(
        &self,
        session: &Session,
        generation: u64,
    ) -> Result<bool, AuthError> {
        if !self.inner.options.token_required() {
            return Ok(self.is_current(generation));
        }

        let kind = self.inner.options.token_kind();
        let jwt = session.jwt(kind).ok_or_else(|| AuthError::Session {
            source: "session has no ID token".into(),
            transient: false,
        })?;

        self.install_token(
            BearerToken::format(self.inner.options.token_type(), jwt),
            generation,
        )
    }

    fn install_token(&self, token: BearerToken, generation: u64) -> Result<bool, AuthError> {
        if !self.inner.options.token_required() {
            return Ok(self.is_current(generation));
        }

        let value = if self.inner.options.global_token() {
            Some(header_value(&token)?)
        } else {
            None
        };

        let mut state = self.inner.state.lock();
        if state.generation != generation {
            return Ok(false);
        }

        if let Some(value) = value {
            self.inner.headers.set(&self.inner.token_name, value);
        }
        state.token = Some(token);
        Ok(true)
    }

    fn publish_user(&self, generation: u64, profile: UserProfile) -> bool {
        let state = self.inner.state.lock();
        if state.generation != generation {
            return false;
        }

        self.inner.user.set_user(Some(profile));
        true
    }

    /// Gives up on work overtaken by a reset
    ///
    /// The provider may have re-cached the session while the work was in
    /// flight, so storage is cleared again unless a new session has begun.
    fn abandon(&self, operation: &'static str) -> AuthError {
        let state = self.inner.state.lock();
        if state.status == AuthStatus::Unauthenticated && state.token.is_none() {
            self.inner.storage.clear();
        }
        drop(state);

        tracing::debug!(operation, "session reset while in flight, discarding result");
        AuthError::Interrupted { operation }
    }

    fn discard_token(&self) {
        if !self.inner.options.token_required() {
            return;
        }

        let mut state = self.inner.state.lock();
        state.token = None;
        state.status = AuthStatus::Unauthenticated;
        drop(state);

        if self.inner.options.global_token() {
            self.inner.headers.remove(&self.inner.token_name);
        }
    }

    fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    fn set_status_if_current(&self, generation: u64, status: AuthStatus) -> bool {
        let mut state = self.inner.state.lock();
        if state.generation != generation {
            return false;
        }

        state.status = status;
        true
    }

    /// Runs a provider call under the configured request timeout
    async fn call<F: Future>(
        &self,
        operation: &'static str,
        fut: F,
    ) -> Result<F::Output, AuthError> {
        let timeout = self.inner.options.request_timeout();
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| AuthError::TimedOut { operation, timeout })
    }
}

fn header_value(token: &BearerTokenRef) -> Result<HeaderValue, AuthError> {
    let mut value = HeaderValue::from_str(token.as_str())?;
    value.set_sensitive(true);
    Ok(value)
}

async fn refresh_tick<P, S>(inner: Weak<Inner<P, S>>)
where
    P: IdentityProvider + 'static,
    S: Scheduler + 'static,
{
    let scheme = match inner.upgrade() {
        Some(inner) => AuthScheme { inner },
        None => return,
    };

    if scheme.status() == AuthStatus::Refreshing {
        tracing::debug!("refresh already in flight, skipping this cycle");
        return;
    }

    match scheme.fetch_user(true).await {
        Ok(()) | Err(AuthError::Interrupted { .. }) => {}
        Err(error) => tracing::warn!(
            error = (&error as &dyn error::Error),
            transient = error.is_transient(),
            "scheduled session refresh failed, will retry next cycle"
        ),
    }
}

#[cfg(all(test, feature = "in-memory"))]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use color_eyre::Result;
    use http::header::AUTHORIZATION;
    use passage_clock::{TestClock, UnixTime};
    use serde_json::{json, Map, Value};
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        providers::in_memory::InMemoryIdentityProvider, refresh::Cancellation, BoxError, ClientId,
        MemoryStorage, Password, UserAttribute, UserPoolId, Username,
    };

    type Provider = InMemoryIdentityProvider<TestClock>;
    type TestScheme = AuthScheme<Provider, RecordingScheduler>;

    #[derive(Clone, Default)]
    struct RecordingScheduler {
        scheduled: Arc<Mutex<Vec<(Duration, RefreshTask, Cancellation)>>>,
    }

    impl RecordingScheduler {
        fn count(&self) -> usize {
            self.scheduled.lock().len()
        }

        fn period(&self, idx: usize) -> Duration {
            self.scheduled.lock()[idx].0
        }

        fn is_cancelled(&self, idx: usize) -> bool {
            self.scheduled.lock()[idx].2.is_cancelled()
        }

        async fn tick(&self, idx: usize) {
            let task = self.scheduled.lock()[idx].1.clone();
            task().await;
        }
    }

    impl Scheduler for RecordingScheduler {
        fn schedule(&self, period: Duration, task: RefreshTask) -> RefreshTimer {
            let (timer, cancellation) = RefreshTimer::new(period);
            self.scheduled.lock().push((period, task, cancellation));
            timer
        }
    }

    struct Fixture {
        scheme: TestScheme,
        headers: SharedHeaders,
        storage: Arc<dyn Storage>,
        scheduler: RecordingScheduler,
        clock: TestClock,
    }

    fn options() -> AuthOptions {
        AuthOptions::default()
            .with_user_pool_id(UserPoolId::from_static("us-east-1_Example"))
            .with_client_id(ClientId::from_static("client"))
    }

    fn alice() -> Credentials {
        Credentials::new("alice", "correct horse")
    }

    fn provider(storage: &Arc<dyn Storage>, clock: &TestClock, latency: Duration) -> Provider {
        let provider = InMemoryIdentityProvider::new(NamespacedStorage::new(storage.clone(), "client"))
            .with_clock(clock.clone())
            .with_latency(latency);
        provider.add_user(
            Username::from_static("alice"),
            Password::from_static("correct horse"),
            vec![
                UserAttribute::new("sub", "0f1e2d3c"),
                UserAttribute::new("email", "alice@example.com"),
            ],
            vec!["admin".to_owned()],
        );
        provider
    }

    fn fixture_with(options: AuthOptions, latency: Duration) -> Fixture {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let clock = TestClock::new(UnixTime(1_700_000_000));
        let headers = SharedHeaders::new();
        let scheduler = RecordingScheduler::default();
        let scheme = AuthScheme::with_scheduler(
            options,
            Host::new(headers.clone(), storage.clone()),
            provider(&storage, &clock, latency),
            scheduler.clone(),
        )
        .unwrap();

        Fixture {
            scheme,
            headers,
            storage,
            scheduler,
            clock,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(options(), Duration::ZERO)
    }

    /// A second scheme over the same host storage, as after a page reload
    fn reloaded(fixture: &Fixture) -> (TestScheme, SharedHeaders, RecordingScheduler) {
        let headers = SharedHeaders::new();
        let scheduler = RecordingScheduler::default();
        let scheme = AuthScheme::with_scheduler(
            options(),
            Host::new(headers.clone(), fixture.storage.clone()),
            provider(&fixture.storage, &fixture.clock, Duration::ZERO),
            scheduler.clone(),
        )
        .unwrap();
        (scheme, headers, scheduler)
    }

    fn header(headers: &SharedHeaders) -> Option<String> {
        headers
            .get(&AUTHORIZATION)
            .and_then(|v| v.to_str().ok().map(str::to_owned))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn construction_requires_pool_identifiers() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let clock = TestClock::new(UnixTime(0));
        let result = AuthScheme::new(
            AuthOptions::default(),
            Host::new(SharedHeaders::new(), storage.clone()),
            provider(&storage, &clock, Duration::ZERO),
        );

        assert!(matches!(
            result,
            Err(AuthError::Configuration(
                crate::ConfigurationError::MissingUserPoolId
            ))
        ));
    }

    #[tokio::test]
    async fn login_installs_a_bearer_access_token() -> Result<()> {
        let f = fixture();

        let session = f.scheme.login(&alice()).await?;

        let expected = format!("Bearer {}", session.access_token().as_str());
        assert_eq!(header(&f.headers).as_deref(), Some(expected.as_str()));
        assert_eq!(
            f.scheme.token().as_deref().map(BearerTokenRef::as_str),
            Some(expected.as_str())
        );
        assert_eq!(f.scheme.status(), AuthStatus::Authenticated);

        let user = f.scheme.user_watcher().current().unwrap();
        assert_eq!(user.attribute("email"), Some("alice@example.com"));
        assert!(user.is_member_of("admin"));
        Ok(())
    }

    #[tokio::test]
    async fn id_token_is_presented_when_configured() -> Result<()> {
        let f = fixture_with(options().with_id_token(true), Duration::ZERO);

        let session = f.scheme.login(&alice()).await?;

        let expected = format!("Bearer {}", session.id_token().unwrap().as_str());
        assert_eq!(header(&f.headers), Some(expected));
        Ok(())
    }

    #[tokio::test]
    async fn empty_token_type_installs_the_bare_jwt() -> Result<()> {
        let f = fixture_with(options().with_token_type(None), Duration::ZERO);

        let session = f.scheme.login(&alice()).await?;

        assert_eq!(
            header(&f.headers).as_deref(),
            Some(session.access_token().as_str())
        );
        Ok(())
    }

    #[tokio::test]
    async fn no_header_is_installed_when_tokens_are_not_required() -> Result<()> {
        let f = fixture_with(options().with_token_required(false), Duration::ZERO);

        f.scheme.login(&alice()).await?;

        assert!(f.headers.snapshot().is_empty());
        assert!(f.scheme.token().is_none());
        assert!(f.scheme.user_watcher().is_signed_in());
        Ok(())
    }

    #[tokio::test]
    async fn non_global_tokens_stay_out_of_shared_headers() -> Result<()> {
        let f = fixture_with(options().with_global_token(false), Duration::ZERO);

        f.scheme.login(&alice()).await?;

        assert!(!f.headers.contains(&AUTHORIZATION));
        assert!(f.scheme.token().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn rejected_login_leaves_the_scheme_signed_out() {
        let f = fixture();

        let err = f
            .scheme
            .login(&Credentials::new("alice", "wrong"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Authentication { .. }));
        assert!(!err.is_transient());
        assert_eq!(f.scheme.status(), AuthStatus::Unauthenticated);
        assert!(!f.headers.contains(&AUTHORIZATION));
        assert!(!f.scheme.user_watcher().is_signed_in());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_token_is_not_visible_during_the_handshake() -> Result<()> {
        let f = fixture_with(options(), Duration::from_secs(1));
        f.scheme.login(&alice()).await?;
        assert!(f.headers.contains(&AUTHORIZATION));

        let scheme = f.scheme.clone();
        let handle = tokio::spawn(async move { scheme.login(&alice()).await });

        settle().await;
        assert_eq!(f.scheme.status(), AuthStatus::Authenticating);
        assert!(!f.headers.contains(&AUTHORIZATION));
        assert!(!f.scheme.user_watcher().is_signed_in());

        handle.await??;
        assert!(f.headers.contains(&AUTHORIZATION));
        assert_eq!(f.scheme.status(), AuthStatus::Authenticated);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_providers_time_out() {
        let f = fixture_with(
            options().with_request_timeout(Duration::from_secs(5)),
            Duration::from_secs(60),
        );

        let err = f.scheme.login(&alice()).await.unwrap_err();

        assert!(matches!(
            err,
            AuthError::TimedOut {
                operation: "authenticate",
                ..
            }
        ));
        assert!(err.is_transient());
        assert_eq!(f.scheme.status(), AuthStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn only_one_refresh_timer_runs_at_a_time() -> Result<()> {
        let f = fixture();

        f.scheme.login(&alice()).await?;
        f.scheme.fetch_user(false).await?;
        f.scheme.fetch_user(false).await?;

        assert_eq!(f.scheduler.count(), 1);
        assert_eq!(f.scheduler.period(0), Duration::from_secs(300));
        assert!(!f.scheduler.is_cancelled(0));

        f.scheme.login(&alice()).await?;
        assert!(f.scheduler.is_cancelled(0));
        assert_eq!(f.scheduler.count(), 2);
        assert!(!f.scheduler.is_cancelled(1));
        Ok(())
    }

    #[tokio::test]
    async fn disabled_refresh_schedules_nothing() -> Result<()> {
        let f = fixture_with(options().with_refresh_interval(None), Duration::ZERO);

        f.scheme.login(&alice()).await?;

        assert_eq!(f.scheduler.count(), 0);
        assert!(!f.scheme.has_refresh_timer());
        Ok(())
    }

    #[tokio::test]
    async fn forced_fetch_refreshes_once_and_replaces_the_token() -> Result<()> {
        let f = fixture();
        f.scheme.login(&alice()).await?;
        let before = header(&f.headers);
        assert_eq!(f.scheme.provider().stats().refreshes, 0);

        f.scheme.fetch_user(true).await?;

        assert_eq!(f.scheme.provider().stats().refreshes, 1);
        assert_ne!(header(&f.headers), before);
        assert_eq!(f.scheme.status(), AuthStatus::Authenticated);
        assert_eq!(f.scheduler.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn forced_fetch_of_an_expired_session_refreshes_once() -> Result<()> {
        let f = fixture();
        f.scheme.login(&alice()).await?;
        let reads = f.scheme.provider().stats().attribute_reads;
        f.clock.advance(passage_clock::DurationSecs(7_200));

        f.scheme.fetch_user(true).await?;

        let stats = f.scheme.provider().stats();
        assert_eq!(stats.refreshes, 1);
        assert_eq!(stats.attribute_reads, reads + 1);
        assert!(f.scheme.user_watcher().is_signed_in());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_ticks_refresh_the_session() -> Result<()> {
        let f = fixture();
        f.scheme.login(&alice()).await?;
        let before = header(&f.headers);

        f.scheduler.tick(0).await;
        f.scheduler.tick(0).await;

        assert_eq!(f.scheme.provider().stats().refreshes, 2);
        assert_ne!(header(&f.headers), before);
        assert_eq!(f.scheduler.count(), 1);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_refresh_ticks_are_logged_and_survived() -> Result<()> {
        let f = fixture();
        f.scheme.login(&alice()).await?;
        f.scheme
            .provider()
            .revoke_refresh_tokens(UsernameRef::from_static("alice"));

        f.scheduler.tick(0).await;

        assert!(logs_contain("scheduled session refresh failed"));
        assert_eq!(f.scheme.status(), AuthStatus::Authenticated);
        assert!(f.headers.contains(&AUTHORIZATION));
        assert!(!f.scheduler.is_cancelled(0));
        Ok(())
    }

    #[tokio::test]
    async fn ticks_after_the_scheme_is_dropped_do_nothing() -> Result<()> {
        let f = fixture();
        f.scheme.login(&alice()).await?;

        drop(f.scheme);

        assert!(f.scheduler.is_cancelled(0));
        f.scheduler.tick(0).await;
        Ok(())
    }

    #[tokio::test]
    async fn reset_is_idempotent() -> Result<()> {
        let f = fixture();
        f.scheme.reset().await;
        f.scheme.reset().await;

        f.scheme.login(&alice()).await?;
        f.scheme.reset().await;
        f.scheme.reset().await;

        assert!(!f.headers.contains(&AUTHORIZATION));
        assert!(f.scheme.token().is_none());
        assert!(!f.scheme.user_watcher().is_signed_in());
        assert!(!f.scheme.has_refresh_timer());
        assert!(f.scheduler.is_cancelled(0));
        assert!(f.scheme.provider().current_user().is_none());
        assert_eq!(f.scheme.status(), AuthStatus::Unauthenticated);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_an_in_flight_refresh() -> Result<()> {
        let f = fixture_with(options(), Duration::from_secs(1));
        f.scheme.login(&alice()).await?;

        let scheduler = f.scheduler.clone();
        let handle = tokio::spawn(async move { scheduler.tick(0).await });

        settle().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(f.scheme.status(), AuthStatus::Refreshing);

        f.scheme.reset().await;
        handle.await?;

        assert_eq!(f.scheme.provider().stats().refreshes, 1);
        assert!(!f.headers.contains(&AUTHORIZATION));
        assert!(f.scheme.token().is_none());
        assert!(!f.scheme.user_watcher().is_signed_in());
        assert_eq!(f.scheme.status(), AuthStatus::Unauthenticated);
        assert!(!f.scheme.has_refresh_timer());
        assert_eq!(f.scheduler.count(), 1);
        assert!(f.scheduler.is_cancelled(0));
        assert!(f.scheme.provider().current_user().is_none());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn reset_during_a_forced_fetch_keeps_the_scheme_signed_out() -> Result<()> {
        let f = fixture_with(options(), Duration::from_secs(1));
        f.scheme.login(&alice()).await?;

        let scheduler = f.scheduler.clone();
        let handle = tokio::spawn(async move { scheduler.tick(0).await });

        settle().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;

        f.scheme.reset().await;
        assert_eq!(f.scheme.status(), AuthStatus::Unauthenticated);
        handle.await?;

        assert_eq!(f.scheme.status(), AuthStatus::Unauthenticated);
        assert_eq!(f.scheme.provider().stats().refreshes, 0);
        assert!(!f.headers.contains(&AUTHORIZATION));
        assert!(!f.scheme.user_watcher().is_signed_in());
        assert_eq!(f.scheduler.count(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn reset_during_login_discards_the_new_session() -> Result<()> {
        let f = fixture_with(options(), Duration::from_secs(1));

        let scheme = f.scheme.clone();
        let handle = tokio::spawn(async move { scheme.login(&alice()).await });

        settle().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(f.scheme.status(), AuthStatus::Authenticating);

        f.scheme.reset().await;
        let err = handle.await?.unwrap_err();

        assert!(matches!(
            err,
            AuthError::Interrupted {
                operation: "authenticate"
            }
        ));
        assert!(!err.is_transient());
        assert!(!f.headers.contains(&AUTHORIZATION));
        assert_eq!(f.scheme.status(), AuthStatus::Unauthenticated);
        assert!(f.scheme.provider().current_user().is_none());
        assert_eq!(f.scheduler.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn logout_signs_out_and_resets() -> Result<()> {
        let f = fixture();
        f.scheme.login(&alice()).await?;

        f.scheme.logout().await;

        assert_eq!(f.scheme.provider().stats().sign_outs, 1);
        assert!(f.scheme.provider().current_user().is_none());
        assert!(!f.headers.contains(&AUTHORIZATION));
        assert!(!f.scheme.user_watcher().is_signed_in());
        assert!(f.scheduler.is_cancelled(0));

        f.scheme.logout().await;
        assert_eq!(f.scheme.provider().stats().sign_outs, 1);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn logout_resets_even_when_sign_out_fails() -> Result<()> {
        let f = fixture();
        f.scheme.login(&alice()).await?;
        f.scheme.provider().set_available(false);

        f.scheme.logout().await;

        assert!(logs_contain("identity provider sign-out failed"));
        assert_eq!(f.scheme.provider().stats().sign_outs, 0);
        assert!(!f.headers.contains(&AUTHORIZATION));
        assert!(f.scheme.token().is_none());
        assert!(!f.scheme.user_watcher().is_signed_in());
        assert!(f.scheduler.is_cancelled(0));
        assert!(f.scheme.provider().current_user().is_none());
        assert_eq!(f.scheme.status(), AuthStatus::Unauthenticated);
        Ok(())
    }

    #[tokio::test]
    async fn mount_restores_a_previous_session() -> Result<()> {
        let f = fixture();
        let session = f.scheme.login(&alice()).await?;

        let (scheme, headers, scheduler) = reloaded(&f);
        let outcome = scheme.mount().await;

        assert!(matches!(outcome, Mounted::Authenticated));
        let expected = format!("Bearer {}", session.access_token().as_str());
        assert_eq!(header(&headers), Some(expected));
        assert_eq!(scheme.status(), AuthStatus::Authenticated);
        assert!(scheme.user_watcher().is_signed_in());
        assert_eq!(scheduler.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn mount_without_a_previous_user_is_anonymous() {
        let f = fixture();

        let outcome = f.scheme.mount().await;

        assert!(matches!(outcome, Mounted::Anonymous));
        assert!(f.headers.snapshot().is_empty());
        assert!(!f.scheme.user_watcher().is_signed_in());
        assert_eq!(f.scheme.provider().stats().sessions, 0);
        assert_eq!(f.scheduler.count(), 0);
    }

    #[tokio::test]
    async fn mount_with_an_unrefreshable_session_is_anonymous() -> Result<()> {
        let f = fixture();
        f.scheme.login(&alice()).await?;
        f.clock.advance(passage_clock::DurationSecs(7_200));

        // the reloaded provider never issued the cached refresh token
        let (scheme, headers, scheduler) = reloaded(&f);
        let outcome = scheme.mount().await;

        assert!(matches!(outcome, Mounted::Anonymous));
        assert!(!headers.contains(&AUTHORIZATION));
        assert!(!scheme.user_watcher().is_signed_in());
        assert_eq!(scheduler.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn mount_degrades_when_the_provider_is_unavailable() -> Result<()> {
        let f = fixture();
        f.scheme.login(&alice()).await?;

        let (scheme, headers, scheduler) = reloaded(&f);
        scheme.provider().set_available(false);
        let outcome = scheme.mount().await;

        match outcome {
            Mounted::Degraded(err) => assert!(err.is_transient()),
            other => panic!("expected a degraded mount, got {:?}", other),
        }
        assert!(!headers.contains(&AUTHORIZATION));
        assert_eq!(scheme.status(), AuthStatus::Unauthenticated);
        assert!(!scheme.user_watcher().is_signed_in());
        assert_eq!(scheduler.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn side_channel_tokens_are_formatted_and_installed() -> Result<()> {
        let f = fixture();

        f.scheme.set_user_token("abc123").await?;

        assert_eq!(header(&f.headers).as_deref(), Some("Bearer abc123"));
        assert_eq!(f.scheme.status(), AuthStatus::Authenticated);
        Ok(())
    }

    struct Nicknames;

    #[async_trait]
    impl ProfileEnricher for Nicknames {
        async fn enrich(
            &self,
            user: &UsernameRef,
            profile: &UserProfile,
        ) -> Result<Map<String, Value>, BoxError> {
            assert!(profile.is_member_of("admin"));
            let fields = json!({
                "nickname": format!("{} the admin", user),
                "groups": ["editors"],
                "logins": 3,
            });
            match fields {
                Value::Object(map) => Ok(map),
                _ => Err("unexpected enrichment shape".into()),
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl ProfileEnricher for Failing {
        async fn enrich(
            &self,
            _: &UsernameRef,
            _: &UserProfile,
        ) -> Result<Map<String, Value>, BoxError> {
            Err("profile service unreachable".into())
        }
    }

    #[tokio::test]
    async fn enrichment_is_merged_into_the_profile() -> Result<()> {
        let f = fixture();
        let scheme = f.scheme.with_enricher(Nicknames);

        scheme.login(&alice()).await?;

        let user = scheme.user_watcher().current().unwrap();
        assert_eq!(user.attribute("nickname"), Some("alice the admin"));
        assert_eq!(user.attribute("email"), Some("alice@example.com"));
        assert_eq!(user.groups(), ["editors".to_owned()]);
        assert_eq!(user.custom("logins"), Some(&json!(3)));
        Ok(())
    }

    #[tokio::test]
    async fn enrichment_failures_are_reported() {
        let f = fixture();
        let scheme = f.scheme.with_enricher(Failing);

        let err = scheme.login(&alice()).await.unwrap_err();

        assert!(matches!(err, AuthError::Enrichment(_)));
        assert!(!scheme.user_watcher().is_signed_in());
    }

    #[tokio::test]
    #[traced_test]
    async fn tokens_never_reach_the_logs() -> Result<()> {
        let f = fixture();

        let session = f.scheme.login(&alice()).await?;
        f.scheme.fetch_user(true).await?;

        assert!(logs_contain("signed in"));
        assert!(!logs_contain(session.access_token().as_str()));
        assert!(!logs_contain(session.refresh_token().unwrap().as_str()));
        Ok(())
    }
}

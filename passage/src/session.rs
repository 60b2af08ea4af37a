use passage_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef, IdToken, IdTokenRef, RefreshToken, RefreshTokenRef};

/// A session as issued by the identity provider, with lifetime information
///
/// Sessions are owned by the identity provider. The scheme only requests
/// them or asks the provider to refresh them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    access_token: AccessToken,
    id_token: Option<IdToken>,
    refresh_token: Option<RefreshToken>,
    lifetime: DurationSecs,
    issued: UnixTime,
    stale: UnixTime,
    expiry: UnixTime,
}

/// A session's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// The session is fresh and valid
    Fresh,
    /// The session is valid, but should be refreshed
    Stale,
    /// The session is no longer valid
    Expired,
}

/// Which of the session's tokens is presented to downstream services
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// The OAuth2 access token
    Access,
    /// The OpenID Connect ID token
    Id,
}

impl Session {
    /// Gets the current access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the current ID token, if available
    #[inline]
    pub fn id_token(&self) -> Option<&IdTokenRef> {
        self.id_token.as_deref()
    }

    /// Gets the refresh token, if the provider issued one
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// Gets the JWT of the requested kind
    ///
    /// Returns `None` when an ID token is requested but the session has none.
    pub fn jwt(&self, kind: TokenKind) -> Option<&str> {
        match kind {
            TokenKind::Access => Some(self.access_token.as_str()),
            TokenKind::Id => self.id_token().map(IdTokenRef::as_str),
        }
    }

    /// Gets the session's lifetime
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// Gets the time that the session was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time that the session will become stale
    #[inline]
    pub fn stale(&self) -> UnixTime {
        self.stale
    }

    /// Gets the time that the session will expire
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets the session's current lifetime status
    #[inline]
    pub fn status(&self) -> SessionStatus {
        self.status_with_clock(&System)
    }

    /// Gets the session's lifetime status based on the current time
    /// as reported by the provided clock
    #[inline]
    pub fn status_with_clock<C: Clock>(&self, clock: &C) -> SessionStatus {
        self.status_at(clock.now())
    }

    /// Gets the session's lifetime status as of the provided time
    #[inline]
    pub fn status_at(&self, time: UnixTime) -> SessionStatus {
        if time < self.stale {
            SessionStatus::Fresh
        } else if time < self.expiry {
            SessionStatus::Stale
        } else {
            SessionStatus::Expired
        }
    }

    /// Whether the session can still be presented as of the provided time
    #[inline]
    pub fn is_valid_at(&self, time: UnixTime) -> bool {
        time < self.expiry
    }

    /// Gets a duration for how much longer the session would be valid as of
    /// the provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }
}

/// Configuration for determining how long a session should be considered fresh
#[derive(Clone, Debug)]
pub struct SessionLifetimeConfig<C = System> {
    freshness_period: f64,
    min_staleness_period: DurationSecs,
    clock: C,
}

impl Default for SessionLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Uses a freshness period of 75%, with a minimum stale period of 30 seconds, and using
    /// the system clock.
    fn default() -> Self {
        Self {
            freshness_period: 0.75,
            min_staleness_period: DurationSecs(30),
            clock: System,
        }
    }
}

impl SessionLifetimeConfig {
    /// Constructs a new lifetime configuration
    ///
    /// A session using this configuration will be considered stale when the
    /// `freshness_period` (a ratio of the session's lifetime) has passed, and
    /// always with at least `min_staleness_period` remaining.
    pub fn new(freshness_period: f64, min_staleness_period: DurationSecs) -> Self {
        Self {
            freshness_period,
            min_staleness_period,
            clock: System,
        }
    }
}

impl<C> SessionLifetimeConfig<C> {
    /// Sets a custom clock to be used
    pub fn with_clock<D>(self, clock: D) -> SessionLifetimeConfig<D> {
        SessionLifetimeConfig {
            freshness_period: self.freshness_period,
            min_staleness_period: self.min_staleness_period,
            clock,
        }
    }

    /// The clock used to stamp sessions
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn time_to_stale(&self, issued: UnixTime, valid_duration: DurationSecs) -> UnixTime {
        let fresh_for = valid_duration * self.freshness_period;
        let latest = valid_duration.0.saturating_sub(self.min_staleness_period.0);
        issued + DurationSecs(fresh_for.0.min(latest))
    }
}

impl<C: Clock> SessionLifetimeConfig<C> {
    /// Builds a session from freshly issued tokens valid for `valid_duration`
    pub fn create_session(
        &self,
        access_token: AccessToken,
        id_token: Option<IdToken>,
        refresh_token: Option<RefreshToken>,
        valid_duration: DurationSecs,
    ) -> Session {
        let issued = self.clock.now();
        Session {
            access_token,
            id_token,
            refresh_token,
            lifetime: valid_duration,
            issued,
            stale: self.time_to_stale(issued, valid_duration),
            expiry: issued + valid_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use passage_clock::TestClock;

    use super::*;

    fn session_at(clock: &TestClock, lifetime: u64) -> Session {
        SessionLifetimeConfig::default()
            .with_clock(clock.clone())
            .create_session(
                AccessToken::from_static("access"),
                Some(IdToken::from_static("id")),
                Some(RefreshToken::from_static("refresh")),
                DurationSecs(lifetime),
            )
    }

    #[test]
    fn session_walks_through_fresh_stale_expired() {
        let clock = TestClock::new(UnixTime(1_000));
        let session = session_at(&clock, 3_600);

        assert_eq!(session.stale(), UnixTime(1_000 + 2_700));
        assert_eq!(session.expiry(), UnixTime(4_600));

        assert_eq!(session.status_with_clock(&clock), SessionStatus::Fresh);
        clock.advance(DurationSecs(2_700));
        assert_eq!(session.status_with_clock(&clock), SessionStatus::Stale);
        clock.advance(DurationSecs(900));
        assert_eq!(session.status_with_clock(&clock), SessionStatus::Expired);
        assert!(!session.is_valid_at(clock.now()));
    }

    #[test]
    fn short_sessions_keep_a_minimum_stale_window() {
        let clock = TestClock::new(UnixTime(0));
        let session = session_at(&clock, 60);

        assert_eq!(session.stale(), UnixTime(30));
        assert_eq!(session.until_expired_at(UnixTime(45)), DurationSecs(15));
    }

    #[test]
    fn jwt_selects_the_configured_kind() {
        let clock = TestClock::default();
        let session = session_at(&clock, 60);

        assert_eq!(session.jwt(TokenKind::Access), Some("access"));
        assert_eq!(session.jwt(TokenKind::Id), Some("id"));

        let without_id = SessionLifetimeConfig::default().create_session(
            AccessToken::from_static("access"),
            None,
            None,
            DurationSecs(60),
        );
        assert_eq!(without_id.jwt(TokenKind::Id), None);
        assert!(without_id.refresh_token().is_none());
    }
}

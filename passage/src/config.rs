use std::{env, time::Duration};

use http::HeaderName;
use serde::{Deserialize, Deserializer};

use crate::{claims::COGNITO_GROUPS_CLAIM, ClientId, ClientIdRef, ConfigurationError, TokenKind, UserPoolId, UserPoolIdRef};

/// Environment variable consulted for a missing user pool id
pub const USER_POOL_ID_ENV: &str = "AWS_COGNITO_USER_POOL_ID";

/// Environment variable consulted for a missing client id
pub const CLIENT_ID_ENV: &str = "AWS_COGNITO_CLIENT_ID";

/// Options recognized by the auth scheme
///
/// Deserializes from the camelCase keys used by host module configuration,
/// e.g. `{"tokenType": false, "refreshInterval": 60000}`. Keys left out take
/// their default value.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthOptions {
    #[serde(deserialize_with = "string_or_false")]
    token_type: Option<String>,
    global_token: bool,
    token_required: bool,
    id_token: bool,
    token_name: String,
    auto_fetch_user: bool,
    #[serde(deserialize_with = "millis_or_false")]
    refresh_interval: Option<Duration>,
    #[serde(deserialize_with = "millis")]
    request_timeout: Duration,
    groups_claim: String,
    user_pool_id: Option<UserPoolId>,
    client_id: Option<ClientId>,
}

impl Default for AuthOptions {
    /// Default options
    ///
    /// Installs the access token globally as `Authorization: Bearer <jwt>`,
    /// fetches the user after login, and refreshes the session every five
    /// minutes. Provider calls time out after 30 seconds. No pool
    /// identifiers are set.
    fn default() -> Self {
        Self {
            token_type: Some("Bearer".to_owned()),
            global_token: true,
            token_required: true,
            id_token: false,
            token_name: "Authorization".to_owned(),
            auto_fetch_user: true,
            refresh_interval: Some(Duration::from_secs(5 * 60)),
            request_timeout: Duration::from_secs(30),
            groups_claim: COGNITO_GROUPS_CLAIM.to_owned(),
            user_pool_id: None,
            client_id: None,
        }
    }
}

impl AuthOptions {
    /// Default options with pool identifiers taken from the environment
    pub fn from_env() -> Self {
        Self::default().with_env_defaults()
    }

    /// Fills any missing pool identifiers from the environment
    pub fn with_env_defaults(mut self) -> Self {
        if self.user_pool_id.is_none() {
            self.user_pool_id = env::var(USER_POOL_ID_ENV).ok().map(UserPoolId::new);
        }
        if self.client_id.is_none() {
            self.client_id = env::var(CLIENT_ID_ENV).ok().map(ClientId::new);
        }
        self
    }

    /// Sets the scheme name prefixed to the token, or `None` for a bare token
    pub fn with_token_type(mut self, token_type: Option<&str>) -> Self {
        self.token_type = token_type.map(str::to_owned);
        self
    }

    /// Sets whether the token is installed into the shared request headers
    pub fn with_global_token(mut self, global_token: bool) -> Self {
        self.global_token = global_token;
        self
    }

    /// Sets whether the scheme manages a bearer token at all
    pub fn with_token_required(mut self, token_required: bool) -> Self {
        self.token_required = token_required;
        self
    }

    /// Sets whether the ID token is presented instead of the access token
    pub fn with_id_token(mut self, id_token: bool) -> Self {
        self.id_token = id_token;
        self
    }

    /// Sets the name of the header carrying the token
    pub fn with_token_name(mut self, token_name: impl Into<String>) -> Self {
        self.token_name = token_name.into();
        self
    }

    /// Sets whether the user is fetched immediately after login
    pub fn with_auto_fetch_user(mut self, auto_fetch_user: bool) -> Self {
        self.auto_fetch_user = auto_fetch_user;
        self
    }

    /// Sets the period of the session refresh timer, or `None` to disable it
    pub fn with_refresh_interval(mut self, refresh_interval: Option<Duration>) -> Self {
        self.refresh_interval = refresh_interval.filter(|d| !d.is_zero());
        self
    }

    /// Sets the timeout applied to every identity-provider call
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Sets the ID token claim holding the user's groups
    pub fn with_groups_claim(mut self, groups_claim: impl Into<String>) -> Self {
        self.groups_claim = groups_claim.into();
        self
    }

    /// Sets the user pool identifier
    pub fn with_user_pool_id(mut self, user_pool_id: UserPoolId) -> Self {
        self.user_pool_id = Some(user_pool_id);
        self
    }

    /// Sets the client identifier
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// The scheme name prefixed to the token
    pub fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref().filter(|t| !t.is_empty())
    }

    /// Whether the token is installed into the shared request headers
    pub fn global_token(&self) -> bool {
        self.global_token
    }

    /// Whether the scheme manages a bearer token
    pub fn token_required(&self) -> bool {
        self.token_required
    }

    /// Which token is presented to downstream services
    pub fn token_kind(&self) -> TokenKind {
        if self.id_token {
            TokenKind::Id
        } else {
            TokenKind::Access
        }
    }

    /// The name of the header carrying the token
    pub fn token_name(&self) -> &str {
        &self.token_name
    }

    /// Whether the user is fetched immediately after login
    pub fn auto_fetch_user(&self) -> bool {
        self.auto_fetch_user
    }

    /// The period of the session refresh timer
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval
    }

    /// The timeout applied to every identity-provider call
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// The ID token claim holding the user's groups
    pub fn groups_claim(&self) -> &str {
        &self.groups_claim
    }

    /// The user pool identifier
    pub fn user_pool_id(&self) -> Option<&UserPoolIdRef> {
        self.user_pool_id.as_deref()
    }

    /// The client identifier
    pub fn client_id(&self) -> Option<&ClientIdRef> {
        self.client_id.as_deref()
    }

    /// Checks the options, returning the parsed token header name
    pub(crate) fn validate(&self) -> Result<HeaderName, ConfigurationError> {
        let pool = self
            .user_pool_id
            .as_ref()
            .ok_or(ConfigurationError::MissingUserPoolId)?;
        match pool.as_str().split_once('_') {
            Some((region, id)) if !region.is_empty() && !id.is_empty() => {}
            _ => return Err(ConfigurationError::InvalidUserPoolId(pool.as_str().to_owned())),
        }

        if self.client_id.as_ref().map_or(true, |c| c.as_str().is_empty()) {
            return Err(ConfigurationError::MissingClientId);
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigurationError::ZeroRequestTimeout);
        }

        HeaderName::from_bytes(self.token_name.as_bytes()).map_err(|source| {
            ConfigurationError::InvalidTokenName {
                name: self.token_name.clone(),
                source,
            }
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrFalse {
    String(String),
    Bool(bool),
}

fn string_or_false<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Option::<StringOrFalse>::deserialize(d)? {
        Some(StringOrFalse::String(s)) if !s.is_empty() => Ok(Some(s)),
        Some(StringOrFalse::Bool(true)) => Err(serde::de::Error::custom(
            "expected a scheme name or `false`",
        )),
        _ => Ok(None),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MillisOrFalse {
    Millis(u64),
    Bool(bool),
}

fn millis_or_false<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    match Option::<MillisOrFalse>::deserialize(d)? {
        Some(MillisOrFalse::Millis(ms)) if ms > 0 => Ok(Some(Duration::from_millis(ms))),
        Some(MillisOrFalse::Bool(true)) => Err(serde::de::Error::custom(
            "expected a period in milliseconds or `false`",
        )),
        _ => Ok(None),
    }
}

fn millis<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}

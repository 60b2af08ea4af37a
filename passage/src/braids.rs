use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// The identifier of the user pool a client authenticates against
///
/// Pool identifiers take the form `<region>_<pool>`.
#[braid(serde)]
pub struct UserPoolId;

/// The identifier of the application client registered with the user pool
#[braid(serde)]
pub struct ClientId;

/// The name a user signs in with
#[braid(serde)]
pub struct Username;

/// A user's password
#[braid(serde, debug = "owned", display = "owned")]
pub struct Password;

limited_reveal!(PasswordRef: "PASSWORD", 0);

/// An access token issued by the identity provider
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// An OpenID Connect ID token issued by the identity provider
#[braid(serde, debug = "owned", display = "owned")]
pub struct IdToken;

limited_reveal!(IdTokenRef: "ID TOKEN", 15);

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

/// The value installed into request headers for an authenticated session
///
/// This is the JWT of the configured token kind, optionally prefixed by a
/// scheme name such as `Bearer`.
#[braid(serde, debug = "owned", display = "owned")]
pub struct BearerToken;

limited_reveal!(BearerTokenRef: "BEARER TOKEN", 20);

impl BearerToken {
    /// Formats a raw JWT as a bearer token
    ///
    /// With a scheme name the result is `"<scheme> <jwt>"`. An absent or
    /// empty scheme name yields the JWT alone.
    pub fn format(scheme: Option<&str>, jwt: &str) -> Self {
        match scheme {
            Some(scheme) if !scheme.is_empty() => Self::new(format!("{} {}", scheme, jwt)),
            _ => Self::new(jwt.to_owned()),
        }
    }
}

/// Credentials supplied to the identity provider's authentication handshake
#[derive(Clone, Debug)]
pub struct Credentials {
    /// The user signing in
    pub username: Username,
    /// The user's password
    pub password: Password,
}

impl Credentials {
    /// Constructs a new set of credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Username::new(username.into()),
            password: Password::new(password.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_is_prefixed_by_scheme() {
        let token = BearerToken::format(Some("Bearer"), "abc123");
        assert_eq!(token.as_str(), "Bearer abc123");
    }

    #[test]
    fn bearer_token_without_scheme_is_the_bare_jwt() {
        assert_eq!(BearerToken::format(None, "abc123").as_str(), "abc123");
        assert_eq!(BearerToken::format(Some(""), "abc123").as_str(), "abc123");
    }

    #[test]
    fn secrets_are_redacted_by_default() {
        let password = Password::from_static("hunter2");
        assert_eq!(format!("{:?}", password), "***PASSWORD***");
        assert_eq!(format!("{}", password), "***PASSWORD***");

        let credentials = Credentials::new("alice", "hunter2");
        assert!(!format!("{:?}", credentials).contains("hunter2"));
    }

    #[test]
    fn alternate_formatting_reveals_a_prefix() {
        let token = AccessToken::from_static("eyJhbGciOiJub25lIn0.payload.");
        assert_eq!(format!("{:#5}", token), "eyJh…");
        assert_eq!(format!("{:#}", token), "eyJhbGciOiJub25lIn0.payload.");
    }
}

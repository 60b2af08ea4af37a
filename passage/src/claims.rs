//! Reading claims out of identity-provider tokens
//!
//! Claims are read without verifying the token's signature. The token has
//! just been handed to us by the identity provider over its own channel, and
//! the values are only used to describe the signed-in user to the host.
//! Downstream services must still verify any token they receive.

use aliri_base64::{Base64Url, InvalidBase64Data};
use serde_json::{Map, Value};
use thiserror::Error;

/// The claim holding a user's group memberships in Cognito-issued ID tokens
pub const COGNITO_GROUPS_CLAIM: &str = "cognito:groups";

/// An error encountered while reading token claims
#[derive(Debug, Error)]
pub enum ClaimsError {
    /// The token does not have the three `.`-separated JWT sections
    #[error("token is not a well-formed JWT")]
    Malformed,
    /// The payload section is not valid URL-safe base64
    #[error("token payload is not valid base64")]
    Encoding(#[from] InvalidBase64Data),
    /// The payload is not a JSON object
    #[error("token payload is not a JSON object")]
    Payload(#[from] serde_json::Error),
    /// A claim held a value of an unexpected shape
    #[error("claim `{claim}` does not hold a list of strings")]
    UnexpectedShape {
        /// The claim name
        claim: String,
    },
}

/// Decodes the untrusted payload of a JWT into its claims
pub fn untrusted_claims(jwt: &str) -> Result<Map<String, Value>, ClaimsError> {
    let mut sections = jwt.splitn(3, '.');
    let payload = match (sections.next(), sections.next(), sections.next()) {
        (Some(_header), Some(payload), Some(_signature)) => payload,
        _ => return Err(ClaimsError::Malformed),
    };

    let raw = Base64Url::from_encoded(payload)?;
    Ok(serde_json::from_slice(raw.as_slice())?)
}

/// Reads a list of group names from the named claim of a JWT
///
/// A missing claim is an empty membership list. Order is preserved.
pub fn groups(jwt: &str, claim: &str) -> Result<Vec<String>, ClaimsError> {
    let mut claims = untrusted_claims(jwt)?;
    match claims.remove(claim) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(values)) => values
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(ClaimsError::UnexpectedShape {
                    claim: claim.to_owned(),
                }),
            })
            .collect(),
        Some(_) => Err(ClaimsError::UnexpectedShape {
            claim: claim.to_owned(),
        }),
    }
}

/// Encodes claims as an unsigned, JWT-shaped token
///
/// The result carries an `alg` of `none` and an empty signature section.
#[cfg(any(test, feature = "in-memory"))]
pub(crate) fn unsigned_jwt(claims: &Value) -> String {
    use aliri_base64::Base64UrlRef;

    let header = br#"{"alg":"none","typ":"JWT"}"#;
    let payload = claims.to_string();
    format!(
        "{}.{}.",
        Base64UrlRef::from_slice(header),
        Base64UrlRef::from_slice(payload.as_bytes())
    )
}

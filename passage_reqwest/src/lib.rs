//! Middleware to automatically attach session headers to outgoing requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`SharedHeadersMiddleware`] in the middleware stack to send the
//! headers currently installed by a `passage` auth scheme, such as its
//! `Authorization` header, with each outbound request.
//!
//! If a request already has a value for one of the shared headers by the
//! time that the middleware executes, the existing value will be left in
//! place, allowing overrides to be specified as required.
//!
//! ```
//! use passage::SharedHeaders;
//! use passage_reqwest::SharedHeadersMiddleware;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! // The same headers handed to the auth scheme's `Host`
//! let headers = SharedHeaders::new();
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(SharedHeadersMiddleware::new(headers))
//!     .build();
//!
//! let req = client
//!     .get("https://example.com");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! The middleware can also be configured to attach headers only
//! conditionally. This can be useful in the event that you want to use a
//! single common middleware stack with multiple potential backends and want
//! to ensure that session tokens are only sent to your own backend.
//!
//! These predicates can be composed together to evaluate more complex
//! requirements prior to attaching headers to a request.
//!
//! ```
//! use passage::SharedHeaders;
//! use passage_reqwest::{ExactHostMatch, HttpsOnly, SharedHeadersMiddleware};
//! use predicates::prelude::PredicateBooleanExt;
//!
//! SharedHeadersMiddleware::new(SharedHeaders::new())
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("api.example.com")));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use passage::SharedHeaders;
use predicates::{prelude::*, reflection};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

/// A middleware that injects the shared session headers into outgoing requests
#[derive(Clone, Debug)]
pub struct SharedHeadersMiddleware<P> {
    headers: SharedHeaders,
    predicate: P,
}

impl SharedHeadersMiddleware<HttpsOnly> {
    /// Construct a new middleware from the host's shared headers
    ///
    /// By default, this middleware will only send the headers if the request
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(headers: SharedHeaders) -> Self {
        Self {
            headers,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> SharedHeadersMiddleware<P> {
        SharedHeadersMiddleware {
            headers: self.headers,
            predicate,
        }
    }
}

impl<P> SharedHeadersMiddleware<P> {
    fn attach(&self, req: &mut Request) {
        let snapshot = self.headers.snapshot();
        if snapshot.is_empty() {
            tracing::trace!("no shared headers installed");
            return;
        }

        let target = req.headers_mut();
        for (name, value) in snapshot.iter() {
            if !target.contains_key(name) {
                target.insert(name.clone(), value.clone());
            } else {
                tracing::trace!(header = %name, "request overrides shared header");
            }
        }
    }
}

#[async_trait::async_trait]
impl<P> Middleware for SharedHeadersMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) {
            self.attach(&mut req);
        }

        next.run(req, extensions).await
    }
}

/// Only attach session headers if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        mismatch(self, self.eval(req), expected, "scheme", || {
            req.url().scheme().to_owned()
        })
    }
}

impl reflection::PredicateReflection for HttpsOnly {}

impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach session headers if the request is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a predicate matching the given host
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(self.host.as_str())
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        mismatch(self, self.eval(req), expected, "host", || {
            req.url().host_str().unwrap_or("<no host>").to_owned()
        })
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}

impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host == {}", self.host)
    }
}

/// Describes why a predicate did not produce the expected result
fn mismatch<'a>(
    predicate: &'a dyn reflection::PredicateReflection,
    result: bool,
    expected: bool,
    product: &'static str,
    observed: impl FnOnce() -> String,
) -> Option<reflection::Case<'a>> {
    (result != expected).then(|| {
        reflection::Case::new(Some(predicate), result)
            .add_product(reflection::Product::new(product, observed()))
    })
}

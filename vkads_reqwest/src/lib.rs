//! Authorized access to the VK Ads API through `reqwest`
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AccessTokenMiddleware`] in the middleware stack to attach the
//! access token held by a [`TokenLifecycleManager`] to each outbound request.
//! The token is obtained on demand, so the first request after start-up or
//! after expiry waits for the manager to mint or refresh one.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.
//!
//! ```
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//! use vkads_reqwest::AccessTokenMiddleware;
//! use vkads_tokens::{
//!     config::ProviderConfig,
//!     endpoint::{dto::ClientCredentials, TokenEndpoint},
//!     store::InMemoryTokenStore,
//!     ClientId, ClientSecret, TokenLifecycleManager,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! # let credentials = ClientCredentials::new(ClientId::from_static("app"), ClientSecret::from_static("secret"));
//! let endpoint = TokenEndpoint::new(Client::new(), ProviderConfig::default(), credentials);
//! let manager = TokenLifecycleManager::new(endpoint, InMemoryTokenStore::new());
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(manager))
//!     .build();
//!
//! let req = client
//!     .get("https://ads.vk.com/api/v2/user.json");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! The middleware can also be configured to add an authorization token
//! only conditionally, so that a common middleware stack shared with other
//! backends never leaks the platform's token to them.
//!
//! ```
//! use predicates::prelude::PredicateBooleanExt;
//! use vkads_reqwest::{AccessTokenMiddleware, ExactHostMatch, HttpsOnly};
//! # use vkads_tokens::{
//! #     config::ProviderConfig,
//! #     endpoint::{dto::ClientCredentials, TokenEndpoint},
//! #     store::InMemoryTokenStore,
//! #     ClientId, ClientSecret, TokenLifecycleManager,
//! # };
//! # let credentials = ClientCredentials::new(ClientId::from_static("app"), ClientSecret::from_static("secret"));
//! # let endpoint = TokenEndpoint::new(reqwest::Client::new(), ProviderConfig::default(), credentials);
//! # let manager = TokenLifecycleManager::new(endpoint, InMemoryTokenStore::new());
//!
//! AccessTokenMiddleware::new(manager)
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("ads.vk.com")));
//! ```
//!
//! On top of the middleware, [`AgencyClients`] wraps the agency client
//! resources of the API and [`HealthReport`] summarizes the token state for
//! monitoring.

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

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bytes::{BufMut, BytesMut};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use vkads_clock::{Clock, System};
use vkads_tokens::{store::TokenStore, AccessTokenRef, TokenLifecycleManager};

mod agency;
mod health;

pub use agency::{AgencyClients, ApiError, DEFAULT_API_BASE_URL};
pub use health::HealthReport;

/// Counts the requests an [`AccessTokenMiddleware`] has authorized
///
/// Clones share the same count.
#[derive(Clone, Debug, Default)]
pub struct CallCounter(Arc<AtomicU64>);

impl CallCounter {
    /// The number of requests authorized so far
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// A middleware that injects an access token into outgoing requests
#[derive(Debug)]
pub struct AccessTokenMiddleware<S, C = System, P = HttpsOnly> {
    manager: TokenLifecycleManager<S, C>,
    predicate: P,
    calls: CallCounter,
}

impl<S, C, P: Clone> Clone for AccessTokenMiddleware<S, C, P> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            predicate: self.predicate.clone(),
            calls: self.calls.clone(),
        }
    }
}

impl<S, C> AccessTokenMiddleware<S, C, HttpsOnly> {
    /// Construct a new middleware from a token manager
    ///
    /// By default, this middleware will only send its token if the request
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(manager: TokenLifecycleManager<S, C>) -> Self {
        Self {
            manager,
            predicate: HttpsOnly,
            calls: CallCounter::default(),
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<S, C, P> {
        AccessTokenMiddleware {
            manager: self.manager,
            predicate,
            calls: self.calls,
        }
    }
}

impl<S, C, P> AccessTokenMiddleware<S, C, P> {
    /// A handle on the count of requests this middleware has authorized
    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }

    /// The manager tokens are taken from
    pub fn manager(&self) -> &TokenLifecycleManager<S, C> {
        &self.manager
    }
}

fn bearer_header(
    token: &AccessTokenRef,
) -> std::result::Result<header::HeaderValue, header::InvalidHeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze())?;
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait::async_trait]
impl<S, C, P> Middleware for AccessTokenMiddleware<S, C, P>
where
    S: TokenStore + 'static,
    C: Clock + Send + Sync + 'static,
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            let token = self
                .manager
                .access_token()
                .await
                .map_err(reqwest_middleware::Error::middleware)?;

            tracing::trace!(
                token = format_args!("{:#}", token),
                url = %req.url(),
                "authorizing request"
            );

            let value = bearer_header(&token).map_err(reqwest_middleware::Error::middleware)?;
            req.headers_mut().insert(header::AUTHORIZATION, value);
            self.calls.increment();
        }

        next.run(req, extensions).await
    }
}

/// Only attach an access token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach an access token if the request is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
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
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "host",
                    req.url().host_str().unwrap_or("<no host>").to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host == {}", self.host)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;
    use vkads_tokens::store::InMemoryTokenStore;

    use super::*;
    use crate::test_support::{manager, manager_holding, Manager};

    const TEST_TOKEN: &str = "this-is-a-test-token";
    const BEARER_TEST_TOKEN: &str = "Bearer this-is-a-test-token";

    struct AuthChecker {
        expected_authorization: String,
        checked: AtomicBool,
    }

    impl AuthChecker {
        pub fn new(expected: impl Into<String>) -> Self {
            Self {
                expected_authorization: expected.into(),
                checked: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl Middleware for AuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let authorization_header = req
                .headers()
                .get(header::AUTHORIZATION)
                .expect("no authorization header")
                .to_str()
                .expect("authorization header was not valid UTF-8");

            assert_eq!(authorization_header, self.expected_authorization);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    #[derive(Default)]
    struct NoAuthChecker {
        checked: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Middleware for NoAuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            assert_eq!(req.headers().get(header::AUTHORIZATION), None);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    async fn prepare_middleware() -> AccessTokenMiddleware<Arc<InMemoryTokenStore>> {
        let manager: Manager = manager_holding(TEST_TOKEN).await;
        AccessTokenMiddleware::new(manager)
    }

    mod when_request_does_not_have_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_with_defaults_attaches_token_on_https_request() {
            let middleware = prepare_middleware().await;
            let calls = middleware.call_counter();
            let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("https://ads.vk.com").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
            assert_eq!(calls.get(), 1);
        }

        #[tokio::test]
        async fn middleware_with_defaults_ignores_plain_http_request() {
            let middleware = prepare_middleware().await;
            let calls = middleware.call_counter();
            let auth_checker = Arc::new(NoAuthChecker::default());

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("http://ads.vk.com").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
            assert_eq!(calls.get(), 0);
        }

        mod and_predicate_evaluates_to_attach {
            use super::*;

            #[tokio::test]
            async fn middleware_attaches_access_token() {
                let middleware = prepare_middleware()
                    .await
                    .with_predicate(predicate::always());
                let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("http://localhost").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }

        mod and_predicate_evaluates_to_ignore {
            use super::*;

            #[tokio::test]
            async fn middleware_does_not_attach_access_token() {
                let middleware = prepare_middleware()
                    .await
                    .with_predicate(predicate::never());
                let auth_checker = Arc::new(NoAuthChecker::default());

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("https://ads.vk.com").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }

        mod and_no_token_can_be_obtained {
            use super::*;

            #[tokio::test]
            async fn request_fails_before_reaching_the_network() {
                let (manager, _store) = manager("http://127.0.0.1:9/oauth2/");
                let middleware = AccessTokenMiddleware::new(manager);
                let calls = middleware.call_counter();
                let auth_checker = Arc::new(NoAuthChecker::default());

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let err = client.get("https://ads.vk.com").send().await.unwrap_err();

                assert!(matches!(err, reqwest_middleware::Error::Middleware(_)));
                assert!(!auth_checker.checked.load(Ordering::Acquire));
                assert_eq!(calls.get(), 0);
            }
        }
    }

    mod when_request_already_contains_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_does_not_attach_access_token() {
            const OVERRIDE_TOKEN: &str = "overridden!";
            // Reqwest uses a capital `B` bearer
            const BEARER_OVERRIDE_TOKEN: &str = "Bearer overridden!";

            let middleware = prepare_middleware().await;
            let calls = middleware.call_counter();
            let auth_checker = Arc::new(AuthChecker::new(BEARER_OVERRIDE_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client
                .get("https://ads.vk.com")
                .bearer_auth(OVERRIDE_TOKEN)
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
            assert_eq!(calls.get(), 0);
        }
    }

    mod https_only_predicate {
        use super::*;

        #[test]
        fn matches_when_request_has_https_scheme() {
            let request = Request::new(reqwest::Method::GET, "https://ads.vk.com".parse().unwrap());
            let result = HttpsOnly.find_case(true, &request);
            assert!(result.is_none())
        }

        #[test]
        fn does_not_match_when_request_has_http_scheme() {
            let request = Request::new(reqwest::Method::GET, "http://ads.vk.com".parse().unwrap());
            let result = HttpsOnly.find_case(false, &request);
            assert!(result.is_none())
        }
    }

    mod exact_host_match_predicate {
        use super::*;

        #[test]
        fn matches_when_request_has_same_host() {
            let request = Request::new(reqwest::Method::GET, "https://ads.vk.com".parse().unwrap());
            let predicate = ExactHostMatch::new("ads.vk.com");
            assert!(predicate.find_case(true, &request).is_none())
        }

        #[test]
        fn reports_the_host_when_it_differs() {
            let request = Request::new(
                reqwest::Method::GET,
                "https://target.my.com".parse().unwrap(),
            );
            let predicate = ExactHostMatch::new("ads.vk.com");
            assert!(predicate.find_case(false, &request).is_none());
            assert!(predicate.find_case(true, &request).is_some());
        }
    }
}

//! Client-credentials token lifecycle management for the VK Ads API
//!
//! Every call to the VK Ads API needs a bearer token issued through the OAuth2
//! _client credentials_ grant. The platform limits how many live tokens a
//! client may hold, so tokens must be reused for as long as they are valid,
//! refreshed rather than re-issued where possible, and shared between
//! processes through a store.
//!
//! This crate puts all of that behind a single call. A
//! [`TokenLifecycleManager`] holds the current token in memory, reads and
//! writes it through a [`TokenStore`](store::TokenStore), and exchanges
//! credentials with the platform through a [`TokenEndpoint`](endpoint::TokenEndpoint)
//! only when the held token can no longer be used.
//!
//! # Usage
//!
//! ```
//! use vkads_tokens::{
//!     config::ProviderConfig,
//!     endpoint::{dto::ClientCredentials, TokenEndpoint},
//!     store::InMemoryTokenStore,
//!     ClientId, ClientSecret, TokenLifecycleManager,
//! };
//!
//! # async fn run() -> Result<(), vkads_tokens::error::TokenError> {
//! let endpoint = TokenEndpoint::new(
//!     reqwest::Client::new(),
//!     ProviderConfig::default(),
//!     ClientCredentials::new(
//!         ClientId::from_static("my-app"),
//!         ClientSecret::from_static("my-secret"),
//!     ),
//! );
//!
//! let manager = TokenLifecycleManager::new(endpoint, InMemoryTokenStore::new());
//!
//! let token = manager.access_token().await?;
//! tracing::info!(token = format_args!("{:#}", token), "obtained access token");
//! # Ok(())
//! # }
//! ```
//!
//! The manager is cheap to clone and every clone shares the same token, so a
//! single instance can be handed to every component that calls the API.
//! Concurrent callers never cause more than one exchange with the platform.
//!
//! Secrets such as [`AccessToken`] and [`ClientSecret`] do not reveal their
//! contents through `Debug` or `Display`. The alternate form (`{:#}`) shows a
//! short prefix suitable for correlating log lines.
//!
//! # Features
//!
//! The following features are enabled by default:
//!
//! * `file`: Provides [`FileTokenStore`](store::FileTokenStore), which keeps
//!   tokens in a JSON file so that separate runs of a program can share them.
//! * `rustls-tls`: Enables TLS in the bundled `reqwest` so that the production
//!   endpoints can be reached.

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
pub mod config;
pub mod endpoint;
pub mod error;
mod manager;
mod record;
pub mod store;

pub use braids::*;
pub use manager::{
    TokenDiagnostics, TokenLifecycleManager, TokenLifecycleManagerBuilder, TokenPhase,
};
pub use record::TokenRecord;

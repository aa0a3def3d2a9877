//! Errors raised while obtaining or persisting tokens

use std::io;

use thiserror::Error;

/// An error obtaining an access token
///
/// This is the single error a caller of
/// [`TokenLifecycleManager::access_token()`](crate::TokenLifecycleManager::access_token)
/// can observe.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The platform answered with a non-success status
    #[error("token request rejected with status {status}: {message} ({code})")]
    ProviderRejected {
        /// HTTP status code of the response
        status: u16,
        /// The platform's error code, or `unknown` when absent
        code: String,
        /// The platform's error message, or the raw body when unparseable
        message: String,
    },

    /// The platform answered 403, invalidating every token issued to this
    /// client
    #[error("platform invalidated all tokens for this client: {message}")]
    ProviderInvalidatedTokens {
        /// The platform's error message
        message: String,
    },

    /// The request never produced a response
    #[error("error communicating with the token endpoint")]
    TransportFailure(#[source] reqwest::Error),

    /// The response arrived but did not contain a usable token
    #[error("malformed token response from the platform")]
    MalformedResponse(#[from] serde_json::Error),

    /// The platform issued a token that expires within the configured expiry
    /// margin
    #[error("platform issued a token that is already expired (lifetime {lifetime}s)")]
    UnusableToken {
        /// Lifetime of the issued token, in seconds
        lifetime: u64,
    },

    /// The token store could not be consulted and no token is held in memory
    #[error("token store unavailable")]
    StoreUnavailable(#[from] StoreError),
}

impl TokenError {
    /// Whether repeating the call later may succeed without any change on our
    /// side
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportFailure(_) | Self::StoreUnavailable(_) => true,
            Self::ProviderRejected { status, .. } => *status == 429 || *status >= 500,
            Self::ProviderInvalidatedTokens { .. }
            | Self::MalformedResponse(_)
            | Self::UnusableToken { .. } => false,
        }
    }

    /// The HTTP status the platform answered with, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ProviderRejected { status, .. } => Some(*status),
            Self::ProviderInvalidatedTokens { .. } => Some(403),
            Self::TransportFailure(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// An error reported by a [`TokenStore`](crate::store::TokenStore)
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing storage could not be read or written
    #[error("token store I/O failed")]
    Io(#[from] io::Error),

    /// The stored data could not be decoded
    #[error("token store holds undecodable data")]
    Corrupt(#[from] serde_json::Error),

    /// A backend-specific failure
    #[error("token store backend failed: {0}")]
    Backend(String),
}

/// An error in the provided configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A URL could not be parsed or resolved
    #[error("invalid endpoint URL")]
    InvalidUrl(#[from] url::ParseError),
}

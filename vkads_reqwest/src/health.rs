use serde::Serialize;
use vkads_clock::Clock;
use vkads_tokens::{error::TokenError, store::TokenStore, TokenLifecycleManager};

use crate::CallCounter;

/// A summary of the token state suitable for a health endpoint
///
/// The report never contains the token itself, only whether one is held and
/// its length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Whether an access token is held in memory
    pub token_present: bool,

    /// Length of the held access token, or zero
    pub token_length: usize,

    /// Requests authorized by the middleware so far
    pub downstream_calls: u64,

    /// The token manager's phase
    pub phase: &'static str,
}

impl HealthReport {
    /// Reports on the token currently held, without any I/O
    pub fn collect<S, C>(manager: &TokenLifecycleManager<S, C>, calls: &CallCounter) -> Self
    where
        S: TokenStore,
        C: Clock + Send + Sync,
    {
        let diagnostics = manager.diagnostics();
        Self {
            token_present: diagnostics.token_present,
            token_length: diagnostics.token_length,
            downstream_calls: calls.get(),
            phase: diagnostics.phase.as_str(),
        }
    }

    /// Makes sure a valid token can be obtained, then reports on it
    pub async fn probe<S, C>(
        manager: &TokenLifecycleManager<S, C>,
        calls: &CallCounter,
    ) -> Result<Self, TokenError>
    where
        S: TokenStore,
        C: Clock + Send + Sync,
    {
        manager.access_token().await?;
        Ok(Self::collect(manager, calls))
    }
}

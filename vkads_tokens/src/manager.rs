use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Mutex;
use vkads_clock::{Clock, System, UnixTime};

use crate::{
    config::ManagerConfig,
    endpoint::{dto::TokenResponse, TokenEndpoint},
    error::{StoreError, TokenError},
    record::TokenRecord,
    store::TokenStore,
    AccessToken, RefreshToken,
};

/// Where the manager stands with respect to its current token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenPhase {
    /// No token is held in memory; the store is consulted next
    NoToken,

    /// A token is held and may be handed out
    Valid,

    /// The held token has passed its expiry
    Expired,

    /// A `refresh_token` exchange is in flight
    Refreshing,

    /// A `client_credentials` exchange is in flight
    Minting,
}

impl TokenPhase {
    /// A short lowercase name for the phase
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoToken => "no_token",
            Self::Valid => "valid",
            Self::Expired => "expired",
            Self::Refreshing => "refreshing",
            Self::Minting => "minting",
        }
    }
}

/// A point-in-time view of the manager's token, safe to expose to operators
///
/// Gathering diagnostics never touches the network or the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenDiagnostics {
    /// The manager's phase
    pub phase: TokenPhase,

    /// Whether an access token is held in memory
    pub token_present: bool,

    /// Length of the held access token, or zero
    pub token_length: usize,

    /// Expiry of the held access token
    pub expires_at: Option<UnixTime>,

    /// Whether a refresh token is held alongside the access token
    pub has_refresh_token: bool,
}

#[derive(Debug)]
struct State {
    phase: TokenPhase,
    record: Option<TokenRecord>,
}

#[derive(Debug)]
struct Inner<S, C> {
    endpoint: TokenEndpoint,
    store: S,
    clock: C,
    config: ManagerConfig,
    // Held for the whole transition sequence so that only one exchange with
    // the platform is ever in flight
    flight: Mutex<()>,
    state: RwLock<State>,
}

/// Hands out valid access tokens, minting, refreshing, persisting and revoking
/// them as needed
///
/// The manager is a cheap handle; clones share the same token. Callers that
/// arrive while a token is being obtained wait for that exchange instead of
/// starting their own.
///
/// A token is obtained on demand. While the held token is unexpired,
/// [`access_token()`](Self::access_token) answers from memory without any I/O.
/// Otherwise the manager works through these phases:
///
/// * [`NoToken`](TokenPhase::NoToken): the store is read. A usable record
///   becomes the current token, an expired one is treated as below, and an
///   empty store leads to minting.
/// * [`Expired`](TokenPhase::Expired): refresh when a refresh token is held,
///   mint otherwise.
/// * [`Refreshing`](TokenPhase::Refreshing): a failed refresh falls back to
///   minting.
/// * [`Minting`](TokenPhase::Minting): failures are returned to the caller.
///
/// When the platform answers 403, it has invalidated every token of this
/// client. The manager then revokes, forgets its token and mints once more. A
/// second 403 within the same call is returned as
/// [`TokenError::ProviderInvalidatedTokens`].
#[derive(Debug)]
pub struct TokenLifecycleManager<S, C = System> {
    inner: Arc<Inner<S, C>>,
}

impl<S, C> Clone for TokenLifecycleManager<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Assembles a [`TokenLifecycleManager`]
#[derive(Debug)]
pub struct TokenLifecycleManagerBuilder<S, C = System> {
    endpoint: TokenEndpoint,
    store: S,
    clock: C,
    config: ManagerConfig,
}

impl<S, C> TokenLifecycleManagerBuilder<S, C> {
    /// Overrides the default store key and expiry margin
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets a custom clock
    ///
    /// Useful for testing purposes
    pub fn clock<D>(self, clock: D) -> TokenLifecycleManagerBuilder<S, D> {
        TokenLifecycleManagerBuilder {
            endpoint: self.endpoint,
            store: self.store,
            clock,
            config: self.config,
        }
    }

    /// Builds the manager
    ///
    /// Nothing is read from the store until the first token is requested.
    pub fn build(self) -> TokenLifecycleManager<S, C> {
        TokenLifecycleManager {
            inner: Arc::new(Inner {
                endpoint: self.endpoint,
                store: self.store,
                clock: self.clock,
                config: self.config,
                flight: Mutex::new(()),
                state: RwLock::new(State {
                    phase: TokenPhase::NoToken,
                    record: None,
                }),
            }),
        }
    }
}

impl<S: TokenStore> TokenLifecycleManager<S, System> {
    /// Constructs a manager with the default configuration and the system
    /// clock
    pub fn new(endpoint: TokenEndpoint, store: S) -> Self {
        Self::builder(endpoint, store).build()
    }

    /// Starts assembling a manager
    pub fn builder(endpoint: TokenEndpoint, store: S) -> TokenLifecycleManagerBuilder<S, System> {
        TokenLifecycleManagerBuilder {
            endpoint,
            store,
            clock: System,
            config: ManagerConfig::default(),
        }
    }
}

impl<S, C> TokenLifecycleManager<S, C>
where
    S: TokenStore,
    C: Clock + Send + Sync,
{
    /// Returns an access token that has not expired
    ///
    /// Up to two token exchanges may be needed in the ordinary case, a
    /// refresh followed by a fallback mint, plus one revocation and one more
    /// mint when the platform invalidates this client's tokens.
    pub async fn access_token(&self) -> Result<AccessToken, TokenError> {
        if let Some(token) = self.usable_token() {
            return Ok(token);
        }

        let _flight = self.inner.flight.lock().await;

        let mut phase = self.resting_phase();
        let mut recovery_used = false;

        loop {
            self.set_phase(phase);
            tracing::trace!(phase = phase.as_str(), "token transition");

            phase = match phase {
                TokenPhase::NoToken => self.hydrate().await?,
                TokenPhase::Valid => match self.usable_token() {
                    Some(token) => return Ok(token),
                    None => TokenPhase::Expired,
                },
                TokenPhase::Expired => {
                    if self.held_refresh_token().is_some() {
                        TokenPhase::Refreshing
                    } else {
                        TokenPhase::Minting
                    }
                }
                TokenPhase::Refreshing => {
                    let Some(refresh_token) = self.held_refresh_token() else {
                        phase = TokenPhase::Minting;
                        continue;
                    };

                    match self.inner.endpoint.refresh(&refresh_token).await {
                        Ok(response) => return self.install(response, Some(refresh_token)).await,
                        Err(TokenError::ProviderInvalidatedTokens { message }) => {
                            tracing::warn!(
                                reason = %message,
                                "platform invalidated tokens during refresh, \
                                 revoking and minting anew"
                            );
                            self.recover().await;
                            recovery_used = true;
                            TokenPhase::Minting
                        }
                        Err(error) => {
                            tracing::warn!(
                                error = &error as &dyn std::error::Error,
                                "refresh failed, minting a new token instead"
                            );
                            TokenPhase::Minting
                        }
                    }
                }
                TokenPhase::Minting => match self.inner.endpoint.mint().await {
                    Ok(response) => return self.install(response, None).await,
                    Err(TokenError::ProviderInvalidatedTokens { message }) if !recovery_used => {
                        tracing::warn!(
                            reason = %message,
                            "platform invalidated tokens, revoking and minting anew"
                        );
                        self.recover().await;
                        recovery_used = true;
                        TokenPhase::Minting
                    }
                    Err(error) => {
                        if let TokenError::ProviderInvalidatedTokens { .. } = error {
                            tracing::error!("platform invalidated tokens again after recovery");
                            self.clear().await;
                        }
                        self.set_phase(self.resting_phase());
                        return Err(error);
                    }
                },
            };
        }
    }

    /// Revokes every token issued to this client and forgets the current one
    ///
    /// Failures are logged and leave the current token in place. Returns
    /// whether the platform confirmed the revocation.
    pub async fn revoke_access_token(&self) -> bool {
        let _flight = self.inner.flight.lock().await;

        match self.inner.endpoint.revoke().await {
            Ok(()) => {
                self.clear().await;
                self.set_phase(TokenPhase::NoToken);
                tracing::info!("access token revoked");
                true
            }
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to revoke access token"
                );
                false
            }
        }
    }

    /// The manager's phase at this moment
    ///
    /// `Refreshing` and `Minting` are only reported while an exchange is
    /// actually in flight. A call abandoned mid-exchange leaves the manager
    /// in the phase it would start from next.
    pub fn phase(&self) -> TokenPhase {
        let now = self.inner.clock.now();
        let phase = self.state().phase;
        match phase {
            TokenPhase::Refreshing | TokenPhase::Minting => match self.inner.flight.try_lock() {
                Ok(_idle) => self.resting_phase(),
                Err(_) => phase,
            },
            TokenPhase::Valid if !self.is_usable(self.state().record.as_ref(), now) => {
                TokenPhase::Expired
            }
            phase => phase,
        }
    }

    /// A snapshot of the token currently held in memory
    pub fn diagnostics(&self) -> TokenDiagnostics {
        let phase = self.phase();
        let state = self.state();
        let record = state.record.as_ref();

        TokenDiagnostics {
            phase,
            token_present: record.is_some(),
            token_length: record.map_or(0, |r| r.access_token().as_str().len()),
            expires_at: record.and_then(TokenRecord::expires_at),
            has_refresh_token: record.map_or(false, |r| r.refresh_token().is_some()),
        }
    }

    /// Reads the persisted record into memory
    async fn hydrate(&self) -> Result<TokenPhase, TokenError> {
        let key = self.inner.config.store_key();
        let raw = match self.inner.store.get(key).await {
            Ok(raw) => raw,
            Err(StoreError::Corrupt(error)) => {
                tracing::warn!(
                    key,
                    error = &error as &dyn std::error::Error,
                    "token store holds undecodable data, minting a replacement"
                );
                return Ok(TokenPhase::Minting);
            }
            Err(error) => {
                tracing::error!(
                    key,
                    error = &error as &dyn std::error::Error,
                    "token store unavailable"
                );
                return Err(TokenError::StoreUnavailable(error));
            }
        };

        let Some(raw) = raw else {
            tracing::debug!(key, "no persisted token");
            return Ok(TokenPhase::Minting);
        };

        let record: TokenRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    key,
                    error = &error as &dyn std::error::Error,
                    "ignoring undecodable persisted token"
                );
                return Ok(TokenPhase::Minting);
            }
        };

        let usable = self.is_usable(Some(&record), self.inner.clock.now());
        tracing::debug!(
            key,
            usable,
            expires_at = record.expires_at().map(|e| e.0),
            "loaded persisted token"
        );
        self.state_mut().record = Some(record);

        Ok(if usable {
            TokenPhase::Valid
        } else {
            TokenPhase::Expired
        })
    }

    /// Makes a freshly issued token current and persists it
    ///
    /// A token that would already be inside the expiry margin is neither kept
    /// nor persisted.
    async fn install(
        &self,
        response: TokenResponse,
        previous_refresh_token: Option<RefreshToken>,
    ) -> Result<AccessToken, TokenError> {
        let now = self.inner.clock.now();
        let lifetime = response.expires_in;
        let record = TokenRecord::issued(
            response.access_token,
            response.refresh_token.or(previous_refresh_token),
            now,
            lifetime,
        );

        if !self.is_usable(Some(&record), now) {
            tracing::warn!(
                lifetime = lifetime.0,
                margin = self.inner.config.expiry_margin().0,
                "platform issued a token that expires within the expiry margin"
            );
            self.set_phase(self.resting_phase());
            return Err(TokenError::UnusableToken {
                lifetime: lifetime.0,
            });
        }

        let access_token = record.access_token().to_owned();

        self.persist(&record, now).await;

        let mut state = self.state_mut();
        state.record = Some(record);
        state.phase = TokenPhase::Valid;

        Ok(access_token)
    }

    async fn persist(&self, record: &TokenRecord, now: UnixTime) {
        let key = self.inner.config.store_key();
        let ttl = record.ttl_at(now);

        let value = match serde_json::to_string(record) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "unable to encode token for the store"
                );
                return;
            }
        };

        match self.inner.store.put(key, value, Some(ttl)).await {
            Ok(()) => tracing::debug!(key, ttl = ttl.0, "persisted token"),
            Err(error) => tracing::warn!(
                key,
                error = &error as &dyn std::error::Error,
                "unable to persist token, keeping it in memory only"
            ),
        }
    }

    /// Revokes after the platform has invalidated our tokens, then forgets
    /// the current one
    async fn recover(&self) {
        if let Err(error) = self.inner.endpoint.revoke().await {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "revocation during recovery failed"
            );
        }
        self.clear().await;
    }

    /// Forgets the current token, in memory and in the store
    async fn clear(&self) {
        self.state_mut().record = None;

        let key = self.inner.config.store_key();
        if let Err(error) = self.inner.store.delete(key).await {
            tracing::warn!(
                key,
                error = &error as &dyn std::error::Error,
                "unable to delete persisted token"
            );
        }
    }
}

impl<S, C: Clock> TokenLifecycleManager<S, C> {
    fn state(&self) -> RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, State> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: TokenPhase) {
        self.state_mut().phase = phase;
    }

    fn is_usable(&self, record: Option<&TokenRecord>, now: UnixTime) -> bool {
        record.map_or(false, |r| {
            r.is_usable_at(now, self.inner.config.expiry_margin())
        })
    }

    fn usable_token(&self) -> Option<AccessToken> {
        let now = self.inner.clock.now();
        let margin = self.inner.config.expiry_margin();
        let state = self.state();
        let record = state
            .record
            .as_ref()
            .filter(|r| r.is_usable_at(now, margin))?;
        Some(record.access_token().to_owned())
    }

    fn held_refresh_token(&self) -> Option<RefreshToken> {
        self.state()
            .record
            .as_ref()
            .and_then(|r| r.refresh_token())
            .map(ToOwned::to_owned)
    }

    /// The phase to start from when no exchange is in flight
    fn resting_phase(&self) -> TokenPhase {
        let now = self.inner.clock.now();
        let state = self.state();
        match &state.record {
            None => TokenPhase::NoToken,
            Some(r) if self.is_usable(Some(r), now) => TokenPhase::Valid,
            Some(_) => TokenPhase::Expired,
        }
    }
}

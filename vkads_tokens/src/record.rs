use serde::{Deserialize, Serialize};
use vkads_clock::{DurationSecs, UnixTime};

use crate::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef};

/// The credential currently issued to this client, as held in memory and
/// persisted to the token store
///
/// A record is always replaced as a whole. There is no way to alter a single
/// field of a record that a manager already holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    access_token: AccessToken,
    #[serde(default)]
    refresh_token: Option<RefreshToken>,
    #[serde(default)]
    expires_at: Option<UnixTime>,
}

impl TokenRecord {
    /// Constructs a record from its parts
    pub fn new(
        access_token: AccessToken,
        refresh_token: Option<RefreshToken>,
        expires_at: Option<UnixTime>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Builds the record for a token that was just issued with a lifetime of
    /// `expires_in`, as observed at `received_at`
    pub fn issued(
        access_token: AccessToken,
        refresh_token: Option<RefreshToken>,
        received_at: UnixTime,
        expires_in: DurationSecs,
    ) -> Self {
        Self::new(access_token, refresh_token, Some(received_at + expires_in))
    }

    /// The bearer credential
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// The refresh credential, if the platform issued one
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// The instant at which the access token stops being valid
    #[inline]
    pub fn expires_at(&self) -> Option<UnixTime> {
        self.expires_at
    }

    /// Whether the access token may still be handed out at `now`
    ///
    /// `margin` shortens the usable lifetime. A record without a known expiry
    /// is never usable.
    pub fn is_usable_at(&self, now: UnixTime, margin: DurationSecs) -> bool {
        match self.expires_at {
            Some(expires_at) => now + margin < expires_at,
            None => false,
        }
    }

    /// Seconds the store should keep this record, never less than one
    pub fn ttl_at(&self, now: UnixTime) -> DurationSecs {
        let remaining = self.expires_at.map(|e| e - now).unwrap_or_default();
        remaining.max(DurationSecs(1))
    }
}

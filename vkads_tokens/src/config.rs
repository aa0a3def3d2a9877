//! Configuration for talking to the platform and managing the token

use reqwest::Url;
use vkads_clock::DurationSecs;

use crate::error::ConfigError;

/// Base URL of the VK Ads OAuth2 API
pub const DEFAULT_BASE_URL: &str = "https://ads.vk.com/api/v2/oauth2/";

/// Path of the token endpoint, relative to the base URL
pub const DEFAULT_TOKEN_PATH: &str = "token.json";

/// Path of the revocation endpoint, relative to the base URL
pub const DEFAULT_REVOKE_PATH: &str = "token/delete.json";

/// Store key the token record is kept under
pub const DEFAULT_STORE_KEY: &str = "vk_ads_token";

/// Where the platform's token endpoints live
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderConfig {
    token_url: Url,
    revoke_url: Url,
}

impl ProviderConfig {
    /// Uses explicit token and revocation URLs
    pub fn new(token_url: Url, revoke_url: Url) -> Self {
        Self {
            token_url,
            revoke_url,
        }
    }

    /// Derives both endpoints from a base URL using the default paths
    ///
    /// A missing trailing slash on `base_url` is added, so that
    /// `https://host/api/v2/oauth2` and `https://host/api/v2/oauth2/` resolve
    /// the same way.
    pub fn from_base_url(base_url: &str) -> Result<Self, ConfigError> {
        Self::from_base_url_with_paths(base_url, DEFAULT_TOKEN_PATH, DEFAULT_REVOKE_PATH)
    }

    /// Derives both endpoints from a base URL and custom relative paths
    pub fn from_base_url_with_paths(
        base_url: &str,
        token_path: &str,
        revoke_path: &str,
    ) -> Result<Self, ConfigError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            token_url: base.join(token_path.trim_start_matches('/'))?,
            revoke_url: base.join(revoke_path.trim_start_matches('/'))?,
        })
    }

    /// The URL token requests are posted to
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// The URL revocation requests are posted to
    pub fn revoke_url(&self) -> &Url {
        &self.revoke_url
    }
}

impl Default for ProviderConfig {
    /// The production VK Ads endpoints
    fn default() -> Self {
        Self::from_base_url(DEFAULT_BASE_URL).expect("default provider URL is valid")
    }
}

/// How the lifecycle manager keeps its token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    store_key: String,
    expiry_margin: DurationSecs,
}

impl Default for ManagerConfig {
    /// Stores under [`DEFAULT_STORE_KEY`] and trusts the platform's lifetime
    /// exactly, with no expiry margin
    fn default() -> Self {
        Self {
            store_key: DEFAULT_STORE_KEY.to_owned(),
            expiry_margin: DurationSecs(0),
        }
    }
}

impl ManagerConfig {
    /// Sets the key the token record is persisted under
    pub fn with_store_key(mut self, store_key: impl Into<String>) -> Self {
        self.store_key = store_key.into();
        self
    }

    /// Treats tokens as expired `margin` before the platform says they are
    ///
    /// This guards against clock skew between this host and the platform at
    /// the cost of refreshing slightly more often.
    pub fn with_expiry_margin(mut self, margin: DurationSecs) -> Self {
        self.expiry_margin = margin;
        self
    }

    /// The key the token record is persisted under
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    /// How long before the reported expiry a token stops being handed out
    pub fn expiry_margin(&self) -> DurationSecs {
        self.expiry_margin
    }
}

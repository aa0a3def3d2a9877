//! Key-value persistence for issued tokens
//!
//! The lifecycle manager only ever reads and writes a single key, but the
//! interface mirrors the general-purpose cache that deployments already run so
//! that operational tooling can share it.

use std::sync::Arc;

use async_trait::async_trait;
use vkads_clock::DurationSecs;

use crate::error::StoreError;

#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FileTokenStore;
pub use in_memory::InMemoryTokenStore;

/// An asynchronous key-value store with per-entry expiry
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value
    ///
    /// The entry disappears once `ttl` has elapsed. Without a `ttl` the entry
    /// is kept until deleted.
    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<DurationSecs>,
    ) -> Result<(), StoreError>;

    /// Reads the live value under `key`
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Removes `key`, succeeding whether or not it was present
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Removes every key containing `pattern` as a substring, returning how
    /// many were removed
    async fn delete_by_pattern(&self, pattern: &str) -> Result<usize, StoreError>;

    /// Whether a live value exists under `key`
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Replaces the value under `key` only if one is already present
    ///
    /// Returns whether a write took place.
    async fn update(
        &self,
        key: &str,
        value: String,
        ttl: Option<DurationSecs>,
    ) -> Result<bool, StoreError> {
        if self.exists(key).await? {
            self.put(key, value, ttl).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[async_trait]
impl<S: TokenStore + ?Sized> TokenStore for Arc<S> {
    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<DurationSecs>,
    ) -> Result<(), StoreError> {
        (**self).put(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<usize, StoreError> {
        (**self).delete_by_pattern(pattern).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        (**self).exists(key).await
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single-flight cache for verification key material.
//!
//! Holds one shared value (the identity provider [`KeySet`](super::KeySet)
//! or the claim [`ClaimKey`](super::ClaimKey)). Readers take a cheap read
//! lock; population and refresh are serialised behind an async mutex so
//! concurrent first access performs exactly one fetch.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

/// Cache entry.
struct CacheEntry<T> {
    value: Arc<T>,
    fetched_at: Instant,
}

/// Process-wide cache with fetch-once-then-memoize semantics.
pub struct KeyCache<T> {
    /// Current value, replaced wholesale on refresh
    slot: RwLock<Option<CacheEntry<T>>>,
    /// Held for the whole duration of a fetch; records when the last one
    /// started, whether or not it succeeded
    fetch_lock: Mutex<Option<Instant>>,
}

impl<T> KeyCache<T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            fetch_lock: Mutex::new(None),
        }
    }

    /// Create a cache that already holds `value`.
    pub fn with_value(value: T) -> Self {
        Self {
            slot: RwLock::new(Some(CacheEntry {
                value: Arc::new(value),
                fetched_at: Instant::now(),
            })),
            fetch_lock: Mutex::new(None),
        }
    }

    /// Current value, if populated.
    pub async fn get(&self) -> Option<Arc<T>> {
        self.slot
            .read()
            .await
            .as_ref()
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Replace the cached value.
    pub async fn set(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        *self.slot.write().await = Some(CacheEntry {
            value: Arc::clone(&value),
            fetched_at: Instant::now(),
        });
        value
    }

    /// Time since the value was last populated.
    pub async fn age(&self) -> Option<Duration> {
        self.slot
            .read()
            .await
            .as_ref()
            .map(|entry| entry.fetched_at.elapsed())
    }

    /// Return the cached value, fetching it first if the cache is empty.
    ///
    /// Callers that arrive while a fetch is running wait for it and share
    /// its result. A failed fetch leaves the cache empty; the next caller
    /// tries again.
    pub async fn get_or_fetch<F, Fut, E>(&self, fetch: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get().await {
            return Ok(value);
        }

        let mut last_attempt = self.fetch_lock.lock().await;

        // Another caller may have populated the cache while we waited.
        if let Some(value) = self.get().await {
            return Ok(value);
        }

        tracing::debug!(target: "auth.cache", "Cache empty, fetching");
        *last_attempt = Some(Instant::now());
        let value = fetch().await?;
        Ok(self.set(value).await)
    }

    /// Fetch a fresh value and swap it in.
    ///
    /// On failure the previous value stays in place.
    pub async fn refresh<F, Fut, E>(&self, fetch: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last_attempt = self.fetch_lock.lock().await;
        *last_attempt = Some(Instant::now());
        let value = fetch().await?;
        Ok(self.set(value).await)
    }

    /// Refresh only if the cached value and the last fetch attempt are both
    /// older than `min_age`.
    ///
    /// Returns `Ok(None)` when either is still too fresh, including when a
    /// concurrent caller refreshed while this one waited. A failed attempt
    /// counts, so an unreachable source is retried at most once per
    /// `min_age`.
    pub async fn refresh_if_older_than<F, Fut, E>(
        &self,
        min_age: Duration,
        fetch: F,
    ) -> Result<Option<Arc<T>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last_attempt = self.fetch_lock.lock().await;

        let since_attempt = last_attempt.as_ref().map(Instant::elapsed);
        let since_fetch = self.age().await;
        if let Some(age) = since_attempt.into_iter().chain(since_fetch).min() {
            if age < min_age {
                tracing::debug!(
                    target: "auth.cache",
                    age_ms = age.as_millis() as u64,
                    "Refresh skipped, cached value is recent"
                );
                return Ok(None);
            }
        }

        *last_attempt = Some(Instant::now());
        let value = fetch().await?;
        Ok(Some(self.set(value).await))
    }
}

impl<T> Default for KeyCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

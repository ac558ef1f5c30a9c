//! Replicated key/value workflow: a store operation with bounded retries
//! and a single retrieve attempt.

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::overlay::{GetError, Overlay, PutError};

/// An immutable key/value record. One record is exercised per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvRecord {
    pub key: String,
    pub value: Bytes,
}

impl KvRecord {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> KvRecord {
        KvRecord {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Outcome of a successful store, reporting how many attempts it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreReport {
    pub attempts: u32,
}

/// All store attempts were exhausted; carries the last failure's cause.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("store failed after {attempts} attempts: {last}")]
pub struct StoreError {
    pub attempts: u32,
    #[source]
    pub last: PutError,
}

/// The single retrieve attempt failed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("retrieve failed for key {key:?}")]
pub struct RetrieveError {
    pub key: String,
    #[source]
    pub source: GetError,
}

/// Client for the overlay's replicated put/get operations.
#[derive(Debug, Clone)]
pub struct KvClient<O> {
    overlay: Arc<O>,
}

impl<O: Overlay> KvClient<O> {
    pub fn new(overlay: Arc<O>) -> KvClient<O> {
        KvClient { overlay }
    }

    /// Stores a record, retrying up to `policy.max_attempts` times with
    /// `policy.inter_delay` between failures.
    ///
    /// Returns on the first attempt that succeeds. Each failed attempt
    /// logs the current peer count: store failures in a DHT typically
    /// mean insufficient replica placement coverage, so that count is
    /// what an operator needs to see. At least one attempt is always
    /// made, even with `max_attempts == 0`.
    pub fn store_with_retry(
        &self,
        record: &KvRecord,
        policy: &RetryPolicy,
    ) -> Result<StoreReport, StoreError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            info!(
                key = %record.key,
                attempt,
                max_attempts = policy.max_attempts,
                "Storing value"
            );

            match self.overlay.put(&record.key, record.value.clone()) {
                Ok(()) => {
                    info!(key = %record.key, attempt, "Stored value");
                    return Ok(StoreReport { attempts: attempt });
                }
                Err(error) => {
                    let snapshot = self.overlay.peers();
                    warn!(
                        key = %record.key,
                        attempt,
                        max_attempts = policy.max_attempts,
                        peers = snapshot.len(),
                        %error,
                        "Store attempt failed"
                    );

                    if attempt >= policy.max_attempts {
                        return Err(StoreError {
                            attempts: attempt,
                            last: error,
                        });
                    }

                    thread::sleep(policy.inter_delay);
                }
            }
        }
    }

    /// Looks up the value stored under `key`. A single attempt; callers
    /// must not treat a miss shortly after a store as a store failure,
    /// since replication may still be propagating.
    pub fn retrieve(&self, key: &str) -> Result<KvRecord, RetrieveError> {
        self.overlay
            .get(key)
            .map(|value| KvRecord::new(key, value))
            .map_err(|source| RetrieveError {
                key: key.to_string(),
                source,
            })
    }
}

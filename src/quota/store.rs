//! Quota Store
//!
//! Persistence seam for per-identity quota records. The ledger reads and
//! writes straight through a [`QuotaStore`]; there is no cache in between.
//!
//! Implementations must make [`QuotaStore::increment`] atomic per identity
//! across every process sharing the store (e.g. a conditional
//! `$inc ... upsert` in a document store). [`MemoryQuotaStore`] satisfies
//! this within a single process and is what the gateway and tests use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Resource-owner identity, supplied by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(identity: &str) -> Self {
        Self::new(identity)
    }
}

/// Persisted usage for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRecord {
    pub identity: Identity,

    /// Successful responses recorded against the shared ceiling
    pub response_count: u64,

    /// The identity brings its own downstream credential
    pub has_own_credential: bool,

    /// Last mutation time, `None` for a record that was never stored
    pub updated_at: Option<DateTime<Utc>>,
}

impl QuotaRecord {
    /// The record an absent identity behaves as
    pub fn empty(identity: Identity) -> Self {
        Self {
            identity,
            response_count: 0,
            has_own_credential: false,
            updated_at: None,
        }
    }
}

/// Error types for quota store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Backend could not be reached or refused the operation
    #[error("Quota store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value persistence for quota records, keyed by [`Identity`]
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Load the record for `identity`, or [`QuotaRecord::empty`] if none exists
    async fn get(&self, identity: &Identity) -> Result<QuotaRecord, StoreError>;

    /// Atomically add one to `response_count`, creating the record with a
    /// count of 1 if absent. Records with `has_own_credential` are left
    /// untouched.
    ///
    /// Returns the new count, or `None` when the record was exempt.
    async fn increment(&self, identity: &Identity) -> Result<Option<u64>, StoreError>;

    /// Mark or unmark the identity as bringing its own credential
    async fn set_own_credential(&self, identity: &Identity, has_own: bool)
        -> Result<(), StoreError>;

    /// Set `response_count` back to zero
    async fn reset(&self, identity: &Identity) -> Result<(), StoreError>;
}

/// In-memory quota store
#[derive(Debug, Clone, Default)]
pub struct MemoryQuotaStore {
    records: Arc<RwLock<HashMap<Identity, QuotaRecord>>>,
}

impl MemoryQuotaStore {
    /// Create a new, empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a record directly
    pub async fn insert(&self, record: QuotaRecord) {
        let mut records = self.records.write().await;
        records.insert(record.identity.clone(), record);
    }

    /// Snapshot of every stored record
    pub async fn records(&self) -> Vec<QuotaRecord> {
        let records = self.records.read().await;
        records.values().cloned().collect()
    }

    /// Number of stored records
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn get(&self, identity: &Identity) -> Result<QuotaRecord, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(identity)
            .cloned()
            .unwrap_or_else(|| QuotaRecord::empty(identity.clone())))
    }

    async fn increment(&self, identity: &Identity) -> Result<Option<u64>, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .entry(identity.clone())
            .or_insert_with(|| QuotaRecord::empty(identity.clone()));

        if record.has_own_credential {
            return Ok(None);
        }

        record.response_count += 1;
        record.updated_at = Some(Utc::now());
        Ok(Some(record.response_count))
    }

    async fn set_own_credential(
        &self,
        identity: &Identity,
        has_own: bool,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .entry(identity.clone())
            .or_insert_with(|| QuotaRecord::empty(identity.clone()));
        record.has_own_credential = has_own;
        record.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn reset(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(identity) {
            record.response_count = 0;
            record.updated_at = Some(Utc::now());
        }
        Ok(())
    }
}

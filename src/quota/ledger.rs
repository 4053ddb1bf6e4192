//! Quota Ledger
//!
//! Turns stored usage into admission decisions and records consumption
//! after a successful forward. Identities that bring their own downstream
//! credential are never exhausted and never charged.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::QuotaConfig;
use super::store::{Identity, QuotaRecord, QuotaStore, StoreError};
use crate::metrics;

/// Ceiling applied to a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceiling {
    /// At most this many successful responses
    Limited(u64),
    /// Own credential: no ceiling applies
    Unbounded,
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ceiling::Limited(total) => write!(f, "{}", total),
            Ceiling::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Usage versus ceiling for one identity, computed per request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    pub total: Ceiling,
    pub used: u64,
}

impl QuotaDecision {
    pub fn limited(total: u64, used: u64) -> Self {
        Self {
            total: Ceiling::Limited(total),
            used,
        }
    }

    pub fn unbounded(used: u64) -> Self {
        Self {
            total: Ceiling::Unbounded,
            used,
        }
    }

    /// `used >= total`; an unbounded decision is never exhausted
    pub fn is_exhausted(&self) -> bool {
        match self.total {
            Ceiling::Limited(total) => self.used >= total,
            Ceiling::Unbounded => false,
        }
    }

    /// Responses left before exhaustion, `None` when unbounded
    pub fn remaining(&self) -> Option<u64> {
        match self.total {
            Ceiling::Limited(total) => Some(total.saturating_sub(self.used)),
            Ceiling::Unbounded => None,
        }
    }
}

/// Ledger failures. Always a server-side fault, never quota exhaustion,
/// and transient: the caller may retry the request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Quota ledger unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

/// Per-identity quota accounting on top of a [`QuotaStore`]
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
    config: QuotaConfig,
}

impl fmt::Debug for QuotaLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaLedger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QuotaLedger {
    /// Create a ledger over `store`
    pub fn new(store: Arc<dyn QuotaStore>, config: QuotaConfig) -> Self {
        Self { store, config }
    }

    /// Current usage versus ceiling for `identity`.
    ///
    /// An identity with no record counts as zero usage without a credential.
    pub async fn decision(&self, identity: &Identity) -> Result<QuotaDecision, LedgerError> {
        self.decision_with(identity, false).await
    }

    /// Same as [`decision`](Self::decision), for a request that may carry its
    /// own downstream credential. Either the request or the stored record
    /// presenting one makes the decision unbounded.
    pub async fn decision_with(
        &self,
        identity: &Identity,
        presented_credential: bool,
    ) -> Result<QuotaDecision, LedgerError> {
        let record = self.load(identity).await?;

        let decision = if presented_credential || record.has_own_credential {
            QuotaDecision::unbounded(record.response_count)
        } else {
            QuotaDecision::limited(self.ceiling_for(identity), record.response_count)
        };

        debug!(
            identity = %identity,
            used = decision.used,
            total = %decision.total,
            "Quota decision"
        );
        Ok(decision)
    }

    /// Charge one successful response to `identity`.
    ///
    /// Returns the new count, or `None` when the identity has its own
    /// credential and nothing was recorded.
    pub async fn record_consumption(&self, identity: &Identity) -> Result<Option<u64>, LedgerError> {
        self.record_consumption_with(identity, false).await
    }

    /// Same as [`record_consumption`](Self::record_consumption); a request
    /// that presented its own credential is never charged.
    pub async fn record_consumption_with(
        &self,
        identity: &Identity,
        presented_credential: bool,
    ) -> Result<Option<u64>, LedgerError> {
        if presented_credential {
            debug!(identity = %identity, "Request brought its own credential, not charged");
            return Ok(None);
        }

        match self.store.increment(identity).await {
            Ok(Some(count)) => {
                metrics::QUOTA_CONSUMPTION_RECORDED_TOTAL.inc();
                debug!(identity = %identity, count, "Recorded consumption");
                Ok(Some(count))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                metrics::LEDGER_ERRORS_TOTAL.inc();
                Err(e.into())
            }
        }
    }

    /// Mark or unmark `identity` as bringing its own downstream credential
    pub async fn set_own_credential(
        &self,
        identity: &Identity,
        has_own: bool,
    ) -> Result<(), LedgerError> {
        info!(identity = %identity, has_own, "Updating own-credential flag");
        self.store
            .set_own_credential(identity, has_own)
            .await
            .map_err(|e| self.fail(e))
    }

    /// Manual reset of an identity's usage
    pub async fn reset(&self, identity: &Identity) -> Result<(), LedgerError> {
        warn!(identity = %identity, "Resetting quota usage");
        self.store.reset(identity).await.map_err(|e| self.fail(e))
    }

    /// Stored record for `identity` (empty if absent)
    pub async fn usage(&self, identity: &Identity) -> Result<QuotaRecord, LedgerError> {
        self.load(identity).await
    }

    /// Ceiling for `identity` when it uses the shared credential
    pub fn ceiling_for(&self, identity: &Identity) -> u64 {
        self.config.ceiling_for(identity.as_str())
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    async fn load(&self, identity: &Identity) -> Result<QuotaRecord, LedgerError> {
        self.store.get(identity).await.map_err(|e| self.fail(e))
    }

    fn fail(&self, e: StoreError) -> LedgerError {
        metrics::LEDGER_ERRORS_TOTAL.inc();
        LedgerError::from(e)
    }
}

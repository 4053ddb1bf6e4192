//! Quota Module
//!
//! Long-lived, per-identity usage accounting. Every successful forward to
//! the answering service is charged to the resource owner's identity until
//! a fixed ceiling is reached. Identities that bring their own downstream
//! credential are exempt.
//!
//! Usage never rolls over on a timer; it only goes down through an explicit
//! [`QuotaLedger::reset`], and exhaustion can also be lifted by raising the
//! identity's ceiling in configuration.

pub mod config;
pub mod ledger;
pub mod store;

pub use config::QuotaConfig;
pub use ledger::{Ceiling, LedgerError, QuotaDecision, QuotaLedger};
pub use store::{Identity, MemoryQuotaStore, QuotaRecord, QuotaStore, StoreError};

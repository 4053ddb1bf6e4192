//! Admission Module
//!
//! Ties the per-caller rate limiter and the per-identity quota ledger around
//! a single downstream call, and classifies how each request ended.

pub mod coordinator;
pub mod error;
pub mod outcome;

pub use coordinator::{AdmissionCoordinator, AdmissionRequest};
pub use error::{Rejection, RequestError};
pub use outcome::{AdmissionOutcome, AdmissionState, OutcomeBody, OutcomePayload};

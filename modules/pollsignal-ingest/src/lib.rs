//! Reconciliation and ingestion engine for election-poll observations.
//!
//! Input is a validated [`pollsignal_common::IngestBatch`] produced by an
//! out-of-scope discovery/extraction pipeline. The engine gates each record
//! against cutoff policy, corrects office/region classification, resolves the
//! audience scope, reconciles duplicate surveys across source channels by
//! content fingerprint, separates multi-scenario matchup options, verifies
//! candidate tokens against the official registry, and persists everything
//! through the [`store::IngestStore`] contract. Soft failures route to a
//! review queue; hard failures reject only the offending record.

pub mod cutoff;
pub mod fingerprint;
pub mod ingestor;
pub mod options;
pub mod registry;
pub mod scenario;
pub mod scope;
pub mod store;
pub mod verify;

#[cfg(any(test, feature = "test-support"))]
pub mod testutil;

pub use fingerprint::{build_fingerprint, merge_by_priority};
pub use ingestor::{Ingestor, RunSummary};
pub use registry::{CandidateRegistry, NoRegistry, RegistryProfile, RegistryScope};
pub use store::IngestStore;

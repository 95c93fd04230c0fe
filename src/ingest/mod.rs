//! Webhook payload admission and the ingestion pipeline behind it.

pub mod admission;
pub mod payload;
pub mod pipeline;

pub use admission::{AdmissionGate, AllowList, IngestDecision, RejectReason};
pub use payload::{IngestFile, IngestPayload};
pub use pipeline::{open_pull_request, IngestOutcome};

//! # Shared Types Crate
//!
//! Entities shared by every batcher component.
//!
//! ## Contents
//!
//! - **Blobs**: `BlobKey`, `BlobSubmission`, `Blob`, `BlobMetadata`
//! - **Lifecycle**: `BlobStatus`, `StatusUpdate`, `FailureReason`
//! - **Progress records**: `DispatchInfo`, `ConfirmationInfo`, `BlobAttestation`
//! - **Errors**: `StoreError`
//!
//! ## Lifecycle
//!
//! ```text
//! Queued ──→ Encoded ──→ Dispatched ──→ Confirmed ──→ Finalized
//!    │          │             │              │
//!    └──────────┴─────────────┴──────────────┴──→ Failed (terminal)
//! ```

pub mod entities;
pub mod errors;
pub mod status;

pub use entities::*;
pub use errors::*;
pub use status::*;

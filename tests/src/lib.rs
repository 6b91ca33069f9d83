//! # DA Batcher Test Suite
//!
//! Cross-component scenarios driving the real pipeline services against
//! the in-memory blob store and the scripted doubles of
//! `da_batcher::test_utils`.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs     # Wiring plus a transition-recording store
//!     ├── pipeline.rs    # Batch lifecycle end to end
//!     ├── recovery.rs    # Restart over a surviving store
//!     └── invariants.rs  # Monotone status, bounded retries
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p da-tests
//! cargo test -p da-tests integration::recovery::
//! ```

pub mod integration;

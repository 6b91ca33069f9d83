//! Domain layer - pure pipeline logic

pub mod assignment;
pub mod batch;
pub mod chunk;
pub mod quorum;
pub mod records;
pub mod retry;

pub use assignment::{assign_chunks, encoding_params};
pub use batch::{BatchHeader, BlobHeader};
pub use chunk::{EncodedBlob, EncodedChunk, EncodingParams};
pub use quorum::{meets_threshold, stake_percent, Operator, OperatorState};
pub use records::*;
pub use retry::RetryPolicy;

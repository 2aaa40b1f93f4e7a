//! Well-known header names used by the engine.
//!
//! Endpoints stamp these on derived messages; user configuration may also
//! read and set them (e.g. routing on `CORRELATION_ID`).

/// Groups related messages for aggregation. Splitters set this to the
/// originating message id.
pub const CORRELATION_ID: &str = "correlation_id";

/// Zero-based position of a split message within its original sequence.
pub const SEQUENCE_INDEX: &str = "sequence_index";

/// Total number of messages produced by the originating split.
pub const SEQUENCE_SIZE: &str = "sequence_size";

/// Boolean flag that releases an aggregation group regardless of count.
pub const AGGREGATION_COMPLETE: &str = "aggregation_complete";

/// Id of the endpoint whose failure produced this error message.
pub const ERROR_ENDPOINT: &str = "error_endpoint";

/// Human-readable failure cause on an error message.
pub const ERROR_CAUSE: &str = "error_cause";

/// Number of processing attempts before the failure was surfaced.
pub const ERROR_ATTEMPTS: &str = "error_attempts";

/// Id of the original message an error message was derived from.
pub const ORIGINAL_ID: &str = "original_id";

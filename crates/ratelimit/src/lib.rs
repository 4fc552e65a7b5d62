//! Rate and concurrency limiting (spec.md §4.7, C7): a general token-bucket
//! limiter in front of every route, and a separate inference concurrency
//! limiter in front of the model-serving routes specifically.

pub mod general;
pub mod inference;

pub use general::GeneralRateLimiter;
pub use inference::{InferenceGuard, InferenceLimiter};

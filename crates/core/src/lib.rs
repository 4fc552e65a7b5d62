//! Shared types, wire formats, and error taxonomy for the inference gateway.
//!
//! Every other gateway crate depends on this one; this one depends on
//! nothing gateway-specific.

pub mod chat;

pub mod error;
pub mod fingerprint;
pub mod model;
pub mod peer;
pub mod progress;

pub use error::{Error, Result};
pub use fingerprint::RequestFingerprint;
pub use model::{parse_quantization, ModelDescriptor, ModelInstance};
pub use peer::{Announcement, Peer, MAX_ANNOUNCEMENT_BYTES};
pub use progress::{TransferProgress, TransferStatus};

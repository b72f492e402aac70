//! # consentry-inbound
//!
//! Authenticates callbacks from external providers before anything in them
//! is trusted. Each provider adapter only knows how to extract and
//! canonicalize its signature headers; the HMAC primitive is shared with
//! outbound delivery.

mod config;
mod error;
mod gate;
mod handlers;
mod provider;
pub mod providers;
mod sink;
mod status;

pub use config::InboundConfig;
pub use error::{InboundError, VerificationError};
pub use gate::{InboundGate, InboundUpdate, ParsedCallback};
pub use handlers::{configure_routes, AckResponse, InboundApiDoc, InboundState};
pub use provider::Provider;
pub use providers::{DocumentCheckGate, LivenessGate, PaymentsGate};
pub use sink::{InboundSink, TracingSink};
pub use status::VerificationStatus;

/// Allowed clock skew for providers that sign a timestamp
pub const DEFAULT_TIMESTAMP_TOLERANCE: std::time::Duration = std::time::Duration::from_secs(300);

//! Provider adapters. Each one canonicalizes its own signature headers and
//! hands the result to the shared HMAC primitive.

mod document_check;
mod liveness;
mod payments;

pub use document_check::{DocumentCheckConfig, DocumentCheckGate};
pub use liveness::{LivenessConfig, LivenessGate};
pub use payments::{PaymentsConfig, PaymentsGate};

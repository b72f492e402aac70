use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::InboundError;

/// External systems allowed to call back into Consentry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// Payout processor
    Payments,
    /// Identity document verification vendor
    DocumentCheck,
    /// Biometric liveness vendor
    Liveness,
}

impl Provider {
    pub fn all() -> [Provider; 3] {
        [Provider::Payments, Provider::DocumentCheck, Provider::Liveness]
    }

    /// Path segment under `/inbound/`
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Payments => "payments",
            Provider::DocumentCheck => "document-check",
            Provider::Liveness => "liveness",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = InboundError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::all()
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| InboundError::UnknownProvider(s.to_string()))
    }
}
